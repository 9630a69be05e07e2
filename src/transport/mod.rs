//! The byte transport under the XML stream.
//!
//! The engine owns exactly one [`Transport`] and drives it from the
//! caller's thread; implementations do not spawn anything. The default
//! implementation is [`TcpTransport`]; tests (and embedders with unusual
//! connection methods) can inject their own with
//! [`StreamEngine::set_transport`](crate::StreamEngine::set_transport).

use std::io;
use std::time::Duration;

use crate::error::ConnectionError;

mod tcp;
pub use tcp::TcpTransport;

/// Information about a negotiated TLS session, handed to
/// [`ConnectionListener::on_tls_connect`](crate::ConnectionListener::on_tls_connect)
/// for the certificate veto.
#[derive(Debug, Clone, Default)]
pub struct TlsInfo {
    /// DER encoding of the peer certificate, when one was presented.
    pub peer_certificate: Option<Vec<u8>>,
}

/// A connected byte pipe with optional TLS and stream compression.
pub trait Transport {
    /// Establish the connection. Must fail fast with
    /// [`ConnectionError::Dns`] when the server cannot be resolved.
    fn connect(&mut self, server: &str, port: u16) -> Result<(), ConnectionError>;

    /// Read decrypted, decompressed bytes. A read timeout surfaces as
    /// `WouldBlock`/`TimedOut`; `Ok(0)` means the peer closed the
    /// connection.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write bytes, compressing and encrypting as negotiated.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Tear the connection down. Idempotent.
    fn disconnect(&mut self);

    /// Whether the transport currently holds a connection.
    fn is_connected(&self) -> bool;

    /// Set the timeout for subsequent [`read`](Transport::read) calls.
    fn set_read_timeout(&mut self, timeout: Option<Duration>);

    /// Upgrade the connection to TLS (client side) against `domain`.
    fn start_tls(&mut self, domain: &str) -> Result<TlsInfo, ConnectionError>;

    /// Whether the connection is encrypted.
    fn is_secure(&self) -> bool;

    /// Whether this transport can do XEP-0138 `zlib` compression.
    fn supports_compression(&self) -> bool;

    /// Enable or disable compression; returns whether the request took
    /// effect.
    fn set_compression(&mut self, enable: bool) -> bool;

    /// Whether compression is currently active.
    fn is_compressed(&self) -> bool;

    /// Whether a client certificate is configured for EXTERNAL
    /// authentication.
    fn has_client_certificate(&self) -> bool {
        false
    }

    /// Raw bytes written to the wire so far.
    fn bytes_sent(&self) -> u64;

    /// Raw bytes read from the wire so far.
    fn bytes_received(&self) -> u64;
}
