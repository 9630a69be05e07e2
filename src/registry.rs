// Copyright (c) 2025 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Dispatch tables owned by the engine.
//!
//! The registry only stores handlers; the routing rules live in the
//! engine's dispatch methods. Semantics:
//!
//! - namespace IQ handlers: one per namespace, re-registering replaces;
//! - tracked ids: one-shot, removed before the callback fires,
//!   re-registering a live id overwrites it (last write wins);
//! - presence/subscription/message/tag handlers: ordered lists, fired in
//!   registration order.

use std::collections::HashMap;

use jid::Jid;

use crate::handler::{
    ConnectionListenerRef, IqHandlerRef, MessageHandlerRef, MessageSession,
    MessageSessionHandlerRef, MessageTypes, MucInvitationHandlerRef, PresenceHandlerRef,
    StatisticsHandlerRef, SubscriptionHandlerRef, TagHandlerRef,
};

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    pub connection_listeners: Vec<ConnectionListenerRef>,
    pub iq_handlers: HashMap<String, IqHandlerRef>,
    tracked: HashMap<String, (IqHandlerRef, u32)>,
    pub message_handlers: Vec<MessageHandlerRef>,
    pub jid_message_handlers: Vec<(Jid, MessageTypes, MessageHandlerRef)>,
    pub presence_handlers: Vec<PresenceHandlerRef>,
    pub subscription_handlers: Vec<SubscriptionHandlerRef>,
    pub tag_handlers: Vec<(String, String, TagHandlerRef)>,
    pub muc_invitation_handler: Option<MucInvitationHandlerRef>,
    pub message_session_handler: Option<(MessageSessionHandlerRef, MessageTypes)>,
    pub sessions: Vec<MessageSession>,
    pub statistics_handler: Option<StatisticsHandlerRef>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry::default()
    }

    /// Register a one-shot reply handler for `id`.
    pub fn track(&mut self, id: String, handler: IqHandlerRef, context: u32) {
        if self.tracked.insert(id, (handler, context)).is_some() {
            log::warn!("replacing tracked handler for an id that is still live");
        }
    }

    /// Remove and return the tracked entry for `id`, if any.
    pub fn take_tracked(&mut self, id: &str) -> Option<(IqHandlerRef, u32)> {
        self.tracked.remove(id)
    }

    /// Register the handler for an IQ namespace, replacing any previous
    /// registration for that namespace.
    pub fn set_iq_handler(&mut self, namespace: &str, handler: IqHandlerRef) {
        self.iq_handlers.insert(namespace.to_string(), handler);
    }

    /// Remove the handler for an IQ namespace.
    pub fn remove_iq_handler(&mut self, namespace: &str) {
        self.iq_handlers.remove(namespace);
    }

    /// Find the session for a peer, matching on the bare JID.
    pub fn find_session(&self, from: &Jid, types: MessageTypes) -> Option<&MessageSession> {
        self.sessions
            .iter()
            .find(|s| s.types.contains(types) && s.jid.to_bare() == from.to_bare())
    }
}

/// Remove every handler in `list` that is the same allocation as
/// `handler`.
pub(crate) fn remove_by_identity<T: ?Sized>(
    list: &mut Vec<std::rc::Rc<std::cell::RefCell<T>>>,
    handler: &std::rc::Rc<std::cell::RefCell<T>>,
) {
    list.retain(|h| !std::rc::Rc::ptr_eq(h, handler));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use minidom::Element;

    use crate::engine::StreamEngine;
    use crate::handler::IqHandler;

    struct Recorder {
        calls: u32,
    }

    impl IqHandler for Recorder {
        fn handle_iq_id(&mut self, _engine: &mut StreamEngine, _iq: &Element, _context: u32) {
            self.calls += 1;
        }
    }

    #[test]
    fn tracked_entries_are_one_shot() {
        let mut registry = HandlerRegistry::new();
        let handler: IqHandlerRef = Rc::new(RefCell::new(Recorder { calls: 0 }));
        registry.track("uid1".to_string(), handler, 7);

        let (_, context) = registry.take_tracked("uid1").unwrap();
        assert_eq!(context, 7);
        assert!(registry.take_tracked("uid1").is_none());
    }

    #[test]
    fn tracking_same_id_overwrites() {
        let mut registry = HandlerRegistry::new();
        let first: IqHandlerRef = Rc::new(RefCell::new(Recorder { calls: 0 }));
        let second: IqHandlerRef = Rc::new(RefCell::new(Recorder { calls: 0 }));
        registry.track("uid1".to_string(), first.clone(), 1);
        registry.track("uid1".to_string(), second.clone(), 2);

        let (handler, context) = registry.take_tracked("uid1").unwrap();
        assert_eq!(context, 2);
        assert!(Rc::ptr_eq(&handler, &second));
    }

    #[test]
    fn iq_namespace_registration_replaces() {
        let mut registry = HandlerRegistry::new();
        let first: IqHandlerRef = Rc::new(RefCell::new(Recorder { calls: 0 }));
        let second: IqHandlerRef = Rc::new(RefCell::new(Recorder { calls: 0 }));
        registry.set_iq_handler("jabber:iq:version", first);
        registry.set_iq_handler("jabber:iq:version", second.clone());

        assert_eq!(registry.iq_handlers.len(), 1);
        assert!(Rc::ptr_eq(&registry.iq_handlers["jabber:iq:version"], &second));

        registry.remove_iq_handler("jabber:iq:version");
        assert!(registry.iq_handlers.is_empty());
    }
}
