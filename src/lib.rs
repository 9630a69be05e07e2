//! Synchronous [XMPP](https://xmpp.org/) protocol engine for clients and components.
//!
//! This is the blocking sibling of [tokio-xmpp](https://docs.rs/tokio-xmpp):
//! one network stream, driven cooperatively from the caller's thread. The
//! engine negotiates TLS, stream compression, SASL or legacy (XEP-0078)
//! authentication, resource binding and session establishment, then
//! classifies every incoming stanza and dispatches it to the handlers the
//! application registered.
//!
//! # Getting started
//!
//! Build a [`Client`] (or [`Component`] for XEP-0114), register the
//! handlers you need, then either call [`StreamEngine::run`] to block
//! until the stream ends, or drive [`StreamEngine::recv`] yourself:
//!
//! ```no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use sync_xmpp::{Client, ConnectionListener, StreamEngine};
//!
//! struct Ping;
//!
//! impl ConnectionListener for Ping {
//!     fn on_connect(&mut self, engine: &mut StreamEngine) {
//!         engine.send_raw("<presence/>");
//!     }
//! }
//!
//! let jid = sync_xmpp::jid::Jid::new("romeo@example.net").unwrap();
//! let mut client = Client::new(jid, "juliet4ever");
//! client.register_connection_listener(Rc::new(RefCell::new(Ping)));
//! let reason = client.run();
//! eprintln!("stream ended: {}", reason);
//! ```
//!
//! # Concurrency model
//!
//! Single-threaded, synchronous, cooperative. Progress happens only
//! inside `run`/`recv`; all handlers run on that caller's stack. Calling
//! [`StreamEngine::disconnect`] from within a handler is the one
//! cancellation mechanism: it flips the state and unwinds the receive
//! loop. There are no locks and no internal retries; reconnection
//! policy belongs to the application.

#![deny(unsafe_code, missing_docs, bare_trait_objects)]

pub mod error;
pub mod ns;

mod auth;
mod features;
mod handler;
mod registry;
mod session;
mod xmlstream;

pub mod engine;
pub mod transport;

mod client;
pub use client::{BareClient, Client, DEFAULT_CLIENT_PORT};

mod component;
pub use component::{Component, DEFAULT_COMPONENT_PORT};

pub use crate::engine::{ClientProfile, ComponentProfile, StreamEngine, StreamProfile};
pub use crate::error::{
    AuthFailure, BindError, ConnectionError, SessionError, StreamError, StreamErrorCondition,
};
pub use crate::features::StreamFeatures;
pub use crate::handler::{
    ConnectionListener, ConnectionListenerRef, IqHandler, IqHandlerRef, MessageHandler,
    MessageHandlerRef, MessageSession, MessageSessionHandler, MessageSessionHandlerRef,
    MessageTypes, MucInvitationHandler, MucInvitationHandlerRef, PresenceHandler,
    PresenceHandlerRef, StatisticsHandler, StatisticsHandlerRef, SubscriptionHandler,
    SubscriptionHandlerRef, TagHandler, TagHandlerRef,
};
pub use crate::session::{ConnectionState, StreamStatistics, TlsPolicy};
pub use crate::transport::{TcpTransport, TlsInfo, Transport};

// Re-exports
pub use jid;
pub use minidom;
