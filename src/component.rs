//! Server component entry point (XEP-0114).

use core::ops::{Deref, DerefMut};

use jid::Jid;

use crate::engine::{ComponentProfile, StreamEngine};

/// Default component accept port.
pub const DEFAULT_COMPONENT_PORT: u16 = 5347;

/// An external server component speaking `jabber:component:accept`.
///
/// Authenticates with the XEP-0114 handshake,
/// `hex(SHA1(stream_id + secret))`, as soon as the server's stream
/// header arrives.
pub struct Component {
    engine: StreamEngine,
}

impl Component {
    /// Create a component serving `domain`, connecting to `server` with
    /// the given shared `secret`.
    pub fn new(
        domain: &str,
        secret: &str,
        server: &str,
        port: u16,
    ) -> Result<Component, jid::Error> {
        let jid = Jid::new(domain)?;
        let mut engine = StreamEngine::new(
            Box::new(ComponentProfile::new()),
            jid,
            secret.to_string(),
            port,
        );
        engine.set_server(server);
        Ok(Component { engine })
    }

    /// Consume the wrapper, returning the engine.
    pub fn into_inner(self) -> StreamEngine {
        self.engine
    }
}

impl Deref for Component {
    type Target = StreamEngine;

    fn deref(&self) -> &StreamEngine {
        &self.engine
    }
}

impl DerefMut for Component {
    fn deref_mut(&mut self) -> &mut StreamEngine {
        &mut self.engine
    }
}
