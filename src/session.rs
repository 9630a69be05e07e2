//! Per-connection session data.

use jid::Jid;

use crate::error::{AuthFailure, BindError, ConnectionError, SessionError, StreamError};
use crate::features::StreamFeatures;

/// Lifecycle state of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport, or the transport was torn down.
    Disconnected,
    /// Transport established, negotiation in progress.
    Connecting,
    /// Negotiation finished; stanzas flow.
    Connected,
}

/// Local policy for StartTLS negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Never negotiate TLS, even if offered.
    Disabled,
    /// Negotiate TLS when the server offers it.
    Optional,
    /// Fail the connection unless TLS can be negotiated.
    Required,
}

/// Running traffic statistics, as delivered to a
/// [`StatisticsHandler`](crate::StatisticsHandler).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatistics {
    /// Raw bytes sent on the wire (after compression/TLS framing input).
    pub bytes_sent: u64,
    /// Raw bytes received from the wire.
    pub bytes_received: u64,
    /// IQ stanzas sent.
    pub iq_stanzas_sent: u64,
    /// IQ stanzas received.
    pub iq_stanzas_received: u64,
    /// Message stanzas sent.
    pub message_stanzas_sent: u64,
    /// Message stanzas received.
    pub message_stanzas_received: u64,
    /// Presence stanzas sent (excluding subscription management).
    pub presence_stanzas_sent: u64,
    /// Presence stanzas received (excluding subscription management).
    pub presence_stanzas_received: u64,
    /// Subscription stanzas sent.
    pub subscription_stanzas_sent: u64,
    /// Subscription stanzas received.
    pub subscription_stanzas_received: u64,
    /// Whether stream compression is active.
    pub compression: bool,
    /// Whether the transport is encrypted.
    pub encryption: bool,
}

/// Everything the engine knows about the current session.
///
/// Created at construction, mutated throughout negotiation, partially
/// reset on disconnect.
pub(crate) struct Session {
    /// Our own address; replaced by the server-assigned full JID after
    /// resource binding.
    pub jid: Jid,
    /// Password or component shared secret.
    pub password: String,
    /// Connection target override; defaults to the JID domain.
    pub server: Option<String>,
    /// Connection port.
    pub port: u16,
    /// Default namespace of the stream (`jabber:client` or
    /// `jabber:component:accept`).
    pub default_ns: &'static str,

    /// Whether SASL may be used.
    pub sasl: bool,
    /// StartTLS policy.
    pub tls: TlsPolicy,
    /// Whether stream compression may be negotiated.
    pub compression: bool,
    /// Prefer XEP-0078 even when SASL mechanisms are offered.
    pub force_non_sasl: bool,

    /// Stream id from the server's stream header; used by the legacy
    /// digest and the component handshake.
    pub sid: Option<String>,
    /// Features advertised in the last `<stream:features/>`.
    pub features: StreamFeatures,
    pub state: ConnectionState,
    /// Whether authentication completed on this stream.
    pub authed: bool,

    pub auth_failure: Option<AuthFailure>,
    pub stream_error: Option<StreamError>,
    pub bind_error: Option<BindError>,
    pub session_error: Option<SessionError>,
    /// Reason of the last disconnect.
    pub last_error: Option<ConnectionError>,

    pub stats: StreamStatistics,
}

impl Session {
    pub fn new(jid: Jid, password: String, default_ns: &'static str, port: u16) -> Session {
        Session {
            jid,
            password,
            server: None,
            port,
            default_ns,
            sasl: true,
            tls: TlsPolicy::Optional,
            compression: true,
            force_non_sasl: false,
            sid: None,
            features: StreamFeatures::empty(),
            state: ConnectionState::Disconnected,
            authed: false,
            auth_failure: None,
            stream_error: None,
            bind_error: None,
            session_error: None,
            last_error: None,
            stats: StreamStatistics::default(),
        }
    }

    /// The host to connect to.
    pub fn server(&self) -> String {
        match self.server {
            Some(ref server) => server.clone(),
            None => self.jid.domain().to_string(),
        }
    }

    /// Reset the parts that only live as long as one stream.
    pub fn reset_stream(&mut self) {
        self.sid = None;
        self.features = StreamFeatures::empty();
        self.authed = false;
        self.state = ConnectionState::Disconnected;
    }
}
