// Copyright (c) 2025 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Application-facing handler interfaces.
//!
//! Handlers are registered as `Rc<RefCell<dyn Trait>>` and run
//! synchronously on the caller's stack from within the engine's receive
//! loop. A component registers only the capabilities it needs; every
//! method has a no-op default.
//!
//! Stanza [`Element`]s handed to a callback are borrowed for that call
//! only; clone what you need to keep. Do not re-enter `recv`/`run` from
//! inside a callback; `disconnect` is the one engine operation meant to
//! be called from there.

use std::cell::RefCell;
use std::rc::Rc;

use jid::Jid;
use minidom::Element;

use crate::engine::StreamEngine;
use crate::error::{BindError, ConnectionError, SessionError};
use crate::session::StreamStatistics;
use crate::transport::TlsInfo;

/// Lifecycle notifications for the stream.
pub trait ConnectionListener {
    /// The stream is fully negotiated; stanzas may be sent.
    fn on_connect(&mut self, engine: &mut StreamEngine) {
        let _ = engine;
    }

    /// The stream is gone. Inspect `engine.stream_error()` and
    /// `engine.auth_failure()` for details on fatal protocol failures.
    fn on_disconnect(&mut self, engine: &mut StreamEngine, reason: &ConnectionError) {
        let _ = (engine, reason);
    }

    /// The TLS handshake completed. Return `false` to veto the
    /// certificate; the engine then disconnects with
    /// [`ConnectionError::TlsFailed`].
    fn on_tls_connect(&mut self, info: &TlsInfo) -> bool {
        let _ = info;
        true
    }

    /// A resource was bound; `jid` is the server-assigned full JID.
    fn on_resource_bind(&mut self, engine: &mut StreamEngine, jid: &Jid) {
        let _ = (engine, jid);
    }

    /// Resource binding failed. Advisory: the stream stays open and
    /// `bind_resource` may be called again.
    fn on_resource_bind_error(&mut self, error: BindError) {
        let _ = error;
    }

    /// Session establishment failed. Advisory, like bind errors.
    fn on_session_create_error(&mut self, error: SessionError) {
        let _ = error;
    }
}

/// Handles IQ stanzas.
pub trait IqHandler {
    /// An IQ matching the registered namespace arrived. Return `true`
    /// when the stanza was consumed; unclaimed `get`/`set` requests are
    /// answered with an empty result by the engine.
    fn handle_iq(&mut self, engine: &mut StreamEngine, iq: &Element) -> bool {
        let _ = (engine, iq);
        false
    }

    /// The reply to a request tracked with
    /// [`track_id`](crate::StreamEngine::track_id) arrived. Fires exactly
    /// once per tracked id; `context` is the value given at registration.
    fn handle_iq_id(&mut self, engine: &mut StreamEngine, iq: &Element, context: u32) {
        let _ = (engine, iq, context);
    }
}

/// Handles message stanzas.
pub trait MessageHandler {
    /// A message stanza arrived.
    fn handle_message(&mut self, engine: &mut StreamEngine, message: &Element);
}

/// Handles presence stanzas (excluding subscription management).
pub trait PresenceHandler {
    /// A presence stanza arrived.
    fn handle_presence(&mut self, engine: &mut StreamEngine, presence: &Element);
}

/// Handles subscription stanzas (presence of type `subscribe`,
/// `subscribed`, `unsubscribe`, `unsubscribed`).
pub trait SubscriptionHandler {
    /// A subscription stanza arrived.
    fn handle_subscription(&mut self, engine: &mut StreamEngine, presence: &Element);
}

/// Handles arbitrary stream children by element name and namespace.
pub trait TagHandler {
    /// A stanza matching the registered (name, namespace) pair arrived.
    fn handle_tag(&mut self, engine: &mut StreamEngine, tag: &Element);
}

/// Handles MUC invitations. When registered, an invitation message
/// bypasses all other message routing.
pub trait MucInvitationHandler {
    /// `invite` is the `<invite/>` child of the message's
    /// `http://jabber.org/protocol/muc#user` extension.
    fn handle_invitation(&mut self, engine: &mut StreamEngine, message: &Element, invite: &Element);
}

/// Receives automatically created message sessions.
pub trait MessageSessionHandler {
    /// A message arrived for `session`; the session was either just
    /// created for the sender's JID or matched from an earlier message.
    fn handle_message_session(
        &mut self,
        engine: &mut StreamEngine,
        session: &MessageSession,
        message: &Element,
    );
}

/// Receives a statistics snapshot after every dispatched stanza.
pub trait StatisticsHandler {
    /// Traffic counters were updated.
    fn handle_statistics(&mut self, stats: &StreamStatistics);
}

/// Bitmask of message subtypes, for JID-keyed handlers and message
/// sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageTypes(u8);

impl MessageTypes {
    /// `type="chat"`
    pub const CHAT: MessageTypes = MessageTypes(1 << 0);
    /// `type="error"`
    pub const ERROR: MessageTypes = MessageTypes(1 << 1);
    /// `type="groupchat"`
    pub const GROUPCHAT: MessageTypes = MessageTypes(1 << 2);
    /// `type="headline"`
    pub const HEADLINE: MessageTypes = MessageTypes(1 << 3);
    /// `type="normal"` (or no type attribute)
    pub const NORMAL: MessageTypes = MessageTypes(1 << 4);
    /// All subtypes.
    pub const ALL: MessageTypes = MessageTypes(0x1f);

    /// The subtype of a message stanza.
    pub fn of(message: &Element) -> MessageTypes {
        match message.attr("type") {
            Some("chat") => Self::CHAT,
            Some("error") => Self::ERROR,
            Some("groupchat") => Self::GROUPCHAT,
            Some("headline") => Self::HEADLINE,
            _ => Self::NORMAL,
        }
    }

    /// Whether all bits of `other` are present in `self`.
    pub fn contains(self, other: MessageTypes) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for MessageTypes {
    type Output = MessageTypes;

    fn bitor(self, rhs: MessageTypes) -> MessageTypes {
        MessageTypes(self.0 | rhs.0)
    }
}

/// A conversation automatically created for a peer JID.
#[derive(Debug, Clone)]
pub struct MessageSession {
    /// The peer's JID as seen on the first message.
    pub jid: Jid,
    /// The thread id of the first message, if any.
    pub thread: Option<String>,
    /// Subtypes routed to this session.
    pub types: MessageTypes,
}

/// Shared handle to a [`ConnectionListener`].
pub type ConnectionListenerRef = Rc<RefCell<dyn ConnectionListener>>;
/// Shared handle to an [`IqHandler`].
pub type IqHandlerRef = Rc<RefCell<dyn IqHandler>>;
/// Shared handle to a [`MessageHandler`].
pub type MessageHandlerRef = Rc<RefCell<dyn MessageHandler>>;
/// Shared handle to a [`PresenceHandler`].
pub type PresenceHandlerRef = Rc<RefCell<dyn PresenceHandler>>;
/// Shared handle to a [`SubscriptionHandler`].
pub type SubscriptionHandlerRef = Rc<RefCell<dyn SubscriptionHandler>>;
/// Shared handle to a [`TagHandler`].
pub type TagHandlerRef = Rc<RefCell<dyn TagHandler>>;
/// Shared handle to a [`MucInvitationHandler`].
pub type MucInvitationHandlerRef = Rc<RefCell<dyn MucInvitationHandler>>;
/// Shared handle to a [`MessageSessionHandler`].
pub type MessageSessionHandlerRef = Rc<RefCell<dyn MessageSessionHandler>>;
/// Shared handle to a [`StatisticsHandler`].
pub type StatisticsHandlerRef = Rc<RefCell<dyn StatisticsHandler>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_types() {
        let chat: Element = "<message xmlns='jabber:client' type='chat'/>"
            .parse()
            .unwrap();
        assert_eq!(MessageTypes::of(&chat), MessageTypes::CHAT);

        let untyped: Element = "<message xmlns='jabber:client'/>".parse().unwrap();
        assert_eq!(MessageTypes::of(&untyped), MessageTypes::NORMAL);

        let mask = MessageTypes::CHAT | MessageTypes::NORMAL;
        assert!(mask.contains(MessageTypes::CHAT));
        assert!(!mask.contains(MessageTypes::GROUPCHAT));
        assert!(MessageTypes::ALL.contains(mask));
    }
}
