use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use native_tls::{HandshakeError, Identity, TlsConnector, TlsStream};

use crate::error::ConnectionError;
use crate::transport::{TlsInfo, Transport};

const CHUNK: usize = 4096;

enum Layer {
    None,
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

struct Zlib {
    compress: Compress,
    decompress: Decompress,
    /// Decompressed bytes not yet handed to the reader.
    plain: Vec<u8>,
}

impl Zlib {
    fn new() -> Zlib {
        Zlib {
            compress: Compress::new(Compression::default(), true),
            decompress: Decompress::new(true),
            plain: Vec::new(),
        }
    }
}

/// [`Transport`] over `std::net::TcpStream`, with `native-tls` for
/// StartTLS and `flate2` for XEP-0138 `zlib` compression.
///
/// Each write is flushed with a zlib sync flush so that stanza
/// boundaries reach the peer immediately.
pub struct TcpTransport {
    layer: Layer,
    zlib: Option<Zlib>,
    identity: Option<Identity>,
    bytes_sent: u64,
    bytes_received: u64,
}

impl TcpTransport {
    /// A transport with no connection yet.
    pub fn new() -> TcpTransport {
        TcpTransport {
            layer: Layer::None,
            zlib: None,
            identity: None,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Configure a client certificate for TLS; also enables SASL
    /// EXTERNAL selection in the engine.
    pub fn set_client_certificate(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    fn tcp_stream(&self) -> Option<&TcpStream> {
        match self.layer {
            Layer::None => None,
            Layer::Plain(ref s) => Some(s),
            Layer::Tls(ref s) => Some(s.get_ref()),
        }
    }

    fn raw_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match self.layer {
            Layer::None => {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"))
            }
            Layer::Plain(ref mut s) => s.read(buf)?,
            Layer::Tls(ref mut s) => s.read(buf)?,
        };
        self.bytes_received += n as u64;
        Ok(n)
    }

    fn raw_write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.layer {
            Layer::None => {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"))
            }
            Layer::Plain(ref mut s) => s.write_all(buf)?,
            Layer::Tls(ref mut s) => s.write_all(buf)?,
        }
        self.bytes_sent += buf.len() as u64;
        Ok(())
    }
}

impl Default for TcpTransport {
    fn default() -> TcpTransport {
        TcpTransport::new()
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, server: &str, port: u16) -> Result<(), ConnectionError> {
        let addrs: Vec<_> = match (server, port).to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                log::warn!("failed to resolve {}: {}", server, e);
                return Err(ConnectionError::Dns);
            }
        };
        if addrs.is_empty() {
            return Err(ConnectionError::Dns);
        }
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    self.layer = Layer::Plain(stream);
                    self.zlib = None;
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }
        match last_error {
            Some(e) => Err(e.into()),
            None => Err(ConnectionError::Dns),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.zlib.is_none() {
            return self.raw_read(buf);
        }
        loop {
            // Serve buffered plaintext first.
            if let Some(ref mut zlib) = self.zlib {
                if !zlib.plain.is_empty() {
                    let n = buf.len().min(zlib.plain.len());
                    buf[..n].copy_from_slice(&zlib.plain[..n]);
                    zlib.plain.drain(..n);
                    return Ok(n);
                }
            }
            let mut raw = [0u8; CHUNK];
            let n = self.raw_read(&mut raw)?;
            if n == 0 {
                return Ok(0);
            }
            if let Some(ref mut zlib) = self.zlib {
                inflate(&mut zlib.decompress, &raw[..n], &mut zlib.plain)?;
            }
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let compressed = match self.zlib {
            None => return self.raw_write_all(buf),
            Some(ref mut zlib) => {
                let mut out = Vec::new();
                deflate(&mut zlib.compress, buf, &mut out)?;
                out
            }
        };
        self.raw_write_all(&compressed)
    }

    fn disconnect(&mut self) {
        match std::mem::replace(&mut self.layer, Layer::None) {
            Layer::None => (),
            Layer::Plain(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            Layer::Tls(mut stream) => {
                let _ = stream.shutdown();
            }
        }
        self.zlib = None;
    }

    fn is_connected(&self) -> bool {
        !matches!(self.layer, Layer::None)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        // A zero timeout would disable the timeout entirely.
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        if let Some(stream) = self.tcp_stream() {
            let _ = stream.set_read_timeout(timeout);
        }
    }

    fn start_tls(&mut self, domain: &str) -> Result<TlsInfo, ConnectionError> {
        let stream = match std::mem::replace(&mut self.layer, Layer::None) {
            Layer::Plain(stream) => stream,
            other => {
                self.layer = other;
                return Err(ConnectionError::TlsFailed);
            }
        };
        let mut builder = TlsConnector::builder();
        if let Some(identity) = self.identity.take() {
            builder.identity(identity);
        }
        let connector = match builder.build() {
            Ok(connector) => connector,
            Err(e) => {
                log::warn!("failed to initialise TLS backend: {}", e);
                return Err(ConnectionError::TlsFailed);
            }
        };
        match connector.connect(domain, stream) {
            Ok(tls) => {
                let peer_certificate = match tls.peer_certificate() {
                    Ok(Some(cert)) => cert.to_der().ok(),
                    _ => None,
                };
                self.layer = Layer::Tls(Box::new(tls));
                Ok(TlsInfo { peer_certificate })
            }
            Err(HandshakeError::Failure(e)) => {
                log::warn!("TLS handshake with {} failed: {}", domain, e);
                Err(ConnectionError::TlsFailed)
            }
            // The stream is blocking, so an interrupted handshake is a
            // failure as well.
            Err(HandshakeError::WouldBlock(_)) => Err(ConnectionError::TlsFailed),
        }
    }

    fn is_secure(&self) -> bool {
        matches!(self.layer, Layer::Tls(_))
    }

    fn supports_compression(&self) -> bool {
        true
    }

    fn set_compression(&mut self, enable: bool) -> bool {
        if enable {
            if self.zlib.is_none() {
                self.zlib = Some(Zlib::new());
            }
        } else {
            self.zlib = None;
        }
        true
    }

    fn is_compressed(&self) -> bool {
        self.zlib.is_some()
    }

    fn has_client_certificate(&self) -> bool {
        self.identity.is_some()
    }

    fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

fn zlib_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Compress `input` into `out`, finishing with a sync flush.
fn deflate(compress: &mut Compress, input: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
    let mut consumed = 0usize;
    loop {
        out.reserve(CHUNK);
        let before_in = compress.total_in();
        let before_out = out.len();
        let status = compress
            .compress_vec(&input[consumed..], out, FlushCompress::Sync)
            .map_err(zlib_error)?;
        consumed += (compress.total_in() - before_in) as usize;
        let produced = out.len() - before_out;
        match status {
            Status::StreamEnd => return Ok(()),
            Status::Ok | Status::BufError => {
                // Done once all input is in and the flush no longer
                // fills the whole output window.
                if consumed >= input.len() && produced < CHUNK {
                    return Ok(());
                }
            }
        }
    }
}

/// Decompress `input`, appending the plaintext to `out`.
fn inflate(decompress: &mut Decompress, input: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
    let mut consumed = 0usize;
    loop {
        out.reserve(CHUNK);
        let before_in = decompress.total_in();
        let before_out = out.len();
        let status = decompress
            .decompress_vec(&input[consumed..], out, FlushDecompress::None)
            .map_err(zlib_error)?;
        consumed += (decompress.total_in() - before_in) as usize;
        let produced = out.len() - before_out;
        match status {
            Status::StreamEnd => return Ok(()),
            Status::Ok | Status::BufError => {
                if consumed >= input.len() && produced < CHUNK {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_inflate_sync_flush() {
        let mut compress = Compress::new(Compression::default(), true);
        let mut decompress = Decompress::new(true);

        let mut wire = Vec::new();
        deflate(&mut compress, b"<presence/>", &mut wire).unwrap();
        assert!(!wire.is_empty());

        // A sync flush must make the whole stanza recoverable without
        // further input.
        let mut plain = Vec::new();
        inflate(&mut decompress, &wire, &mut plain).unwrap();
        assert_eq!(plain, b"<presence/>");

        // The stream continues across writes.
        let mut wire2 = Vec::new();
        deflate(&mut compress, b"<iq type='get'/>", &mut wire2).unwrap();
        let mut plain2 = Vec::new();
        inflate(&mut decompress, &wire2, &mut plain2).unwrap();
        assert_eq!(plain2, b"<iq type='get'/>");
    }
}
