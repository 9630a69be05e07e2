//! Client-side entry points.

use core::ops::{Deref, DerefMut};

use jid::Jid;

use crate::engine::{ClientProfile, StreamEngine};

/// Default client-to-server port.
pub const DEFAULT_CLIENT_PORT: u16 = 5222;

/// A full XMPP client: TLS, compression, SASL, resource binding and
/// session establishment, with legacy authentication as fallback.
///
/// `Client` derefs to [`StreamEngine`], which carries the whole
/// connection and handler API.
pub struct Client {
    engine: StreamEngine,
}

impl Client {
    /// Create a client for `jid`, authenticating with `password`.
    ///
    /// The connection goes to the JID domain on port 5222 unless
    /// overridden with `set_server`/`set_port`.
    pub fn new(jid: Jid, password: &str) -> Client {
        let engine = StreamEngine::new(
            Box::new(ClientProfile::new()),
            jid,
            password.to_string(),
            DEFAULT_CLIENT_PORT,
        );
        Client { engine }
    }

    /// Consume the wrapper, returning the engine.
    pub fn into_inner(self) -> StreamEngine {
        self.engine
    }
}

impl Deref for Client {
    type Target = StreamEngine;

    fn deref(&self) -> &StreamEngine {
        &self.engine
    }
}

impl DerefMut for Client {
    fn deref_mut(&mut self) -> &mut StreamEngine {
        &mut self.engine
    }
}

/// A minimal client for pre-XMPP-1.0 servers: no SASL, authentication
/// through XEP-0078 only.
pub struct BareClient {
    engine: StreamEngine,
}

impl BareClient {
    /// Create a legacy client for `jid`.
    pub fn new(jid: Jid, password: &str) -> BareClient {
        let mut engine = StreamEngine::new(
            Box::new(ClientProfile::new()),
            jid,
            password.to_string(),
            DEFAULT_CLIENT_PORT,
        );
        engine.set_sasl(false);
        BareClient { engine }
    }

    /// Consume the wrapper, returning the engine.
    pub fn into_inner(self) -> StreamEngine {
        self.engine
    }
}

impl Deref for BareClient {
    type Target = StreamEngine;

    fn deref(&self) -> &StreamEngine {
        &self.engine
    }
}

impl DerefMut for BareClient {
    fn deref_mut(&mut self) -> &mut StreamEngine {
        &mut self.engine
    }
}
