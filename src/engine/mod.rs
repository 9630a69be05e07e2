// Copyright (c) 2025 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The protocol state machine.
//!
//! [`StreamEngine`] owns the transport and the XML reader, drives stream
//! negotiation through a [`StreamProfile`], and routes stanzas to the
//! registered handlers. Progress happens only when the caller invokes
//! [`run`](StreamEngine::run) or [`recv`](StreamEngine::recv); every
//! callback runs synchronously on that caller's stack.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use jid::Jid;
use minidom::Element;

use crate::error::{
    AuthFailure, BindError, ConnectionError, SessionError, StreamError,
};
use crate::features::StreamFeatures;
use crate::handler::{
    ConnectionListenerRef, IqHandlerRef, MessageHandlerRef, MessageSession,
    MessageSessionHandlerRef, MessageTypes, MucInvitationHandlerRef, PresenceHandlerRef,
    StatisticsHandlerRef, SubscriptionHandlerRef, TagHandlerRef,
};
use crate::ns;
use crate::registry::{remove_by_identity, HandlerRegistry};
use crate::session::{ConnectionState, Session, StreamStatistics, TlsPolicy};
use crate::transport::{TcpTransport, Transport};
use crate::xmlstream::{SharedTransport, StreamEvent, XmlReader};

mod profile;
pub use profile::{ClientProfile, ComponentProfile, StreamProfile};

/// The session/protocol state machine.
///
/// Usually constructed through [`Client`](crate::Client),
/// [`BareClient`](crate::BareClient) or [`Component`](crate::Component),
/// which pick the right [`StreamProfile`].
pub struct StreamEngine {
    pub(crate) session: Session,
    registry: HandlerRegistry,
    profile: Option<Box<dyn StreamProfile>>,
    transport: Option<SharedTransport>,
    reader: Option<XmlReader>,
    /// Resource-bind request id currently in flight.
    pub(crate) bind_id: Option<String>,
    /// Session request id currently in flight.
    pub(crate) session_id: Option<String>,
    id_counter: u64,
    in_dispatch: bool,
    pending_disconnect: Option<ConnectionError>,
}

impl StreamEngine {
    /// Create an engine for the given profile and credentials.
    pub fn new(profile: Box<dyn StreamProfile>, jid: Jid, password: String, port: u16) -> Self {
        let default_ns = profile.default_ns();
        StreamEngine {
            session: Session::new(jid, password, default_ns, port),
            registry: HandlerRegistry::new(),
            profile: Some(profile),
            transport: None,
            reader: None,
            bind_id: None,
            session_id: None,
            id_counter: 0,
            in_dispatch: false,
            pending_disconnect: None,
        }
    }

    // ---- configuration ------------------------------------------------

    /// Replace the transport. Useful for tests and for embedders with
    /// unusual connection methods; must be called before `connect`.
    pub fn set_transport(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(Rc::new(RefCell::new(transport)));
    }

    /// Connect to `server` instead of the JID domain.
    pub fn set_server(&mut self, server: &str) {
        self.session.server = Some(server.to_string());
    }

    /// Change the connection port.
    pub fn set_port(&mut self, port: u16) {
        self.session.port = port;
    }

    /// Enable or disable SASL. With SASL disabled only legacy
    /// authentication (XEP-0078) is attempted.
    pub fn set_sasl(&mut self, sasl: bool) {
        self.session.sasl = sasl;
    }

    /// Set the StartTLS policy.
    pub fn set_tls_policy(&mut self, policy: TlsPolicy) {
        self.session.tls = policy;
    }

    /// Allow or forbid stream compression.
    pub fn set_compression(&mut self, compression: bool) {
        self.session.compression = compression;
    }

    /// Prefer legacy authentication even when SASL mechanisms are
    /// offered.
    pub fn set_force_non_sasl(&mut self, force: bool) {
        self.session.force_non_sasl = force;
    }

    // ---- accessors ----------------------------------------------------

    /// Our JID; carries the server-assigned resource after binding.
    pub fn jid(&self) -> &Jid {
        &self.session.jid
    }

    /// The node part of our JID.
    pub fn username(&self) -> Option<String> {
        self.session.jid.node().map(|node| node.to_string())
    }

    /// The configured password or component secret.
    pub fn password(&self) -> &str {
        &self.session.password
    }

    /// The host that `connect` dials.
    pub fn server(&self) -> String {
        self.session.server()
    }

    /// The port that `connect` dials.
    pub fn port(&self) -> u16 {
        self.session.port
    }

    /// The stream id assigned by the server, once the stream header
    /// arrived.
    pub fn sid(&self) -> Option<String> {
        self.session.sid.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.session.state
    }

    /// A snapshot of the traffic statistics.
    pub fn statistics(&self) -> StreamStatistics {
        let mut stats = self.session.stats;
        if let Some(transport) = &self.transport {
            let transport = transport.borrow();
            stats.bytes_sent = transport.bytes_sent();
            stats.bytes_received = transport.bytes_received();
            stats.encryption = transport.is_secure();
            stats.compression = transport.is_compressed();
        }
        stats
    }

    /// The failure of the last authentication attempt, if any.
    pub fn auth_failure(&self) -> Option<AuthFailure> {
        self.session.auth_failure
    }

    /// The last received stream error, if any.
    pub fn stream_error(&self) -> Option<&StreamError> {
        self.session.stream_error.as_ref()
    }

    /// The last resource-bind error, if any.
    pub fn bind_error(&self) -> Option<BindError> {
        self.session.bind_error
    }

    /// The last session-establishment error, if any.
    pub fn session_error(&self) -> Option<SessionError> {
        self.session.session_error
    }

    /// The stream's default namespace.
    pub fn default_ns(&self) -> &'static str {
        self.session.default_ns
    }

    /// A fresh request id, unique for this engine.
    pub fn next_id(&mut self) -> String {
        self.id_counter += 1;
        format!("uid{}", self.id_counter)
    }

    // ---- handler registration -----------------------------------------

    /// Register a connection listener.
    pub fn register_connection_listener(&mut self, listener: ConnectionListenerRef) {
        self.registry.connection_listeners.push(listener);
    }

    /// Remove a connection listener.
    pub fn remove_connection_listener(&mut self, listener: &ConnectionListenerRef) {
        remove_by_identity(&mut self.registry.connection_listeners, listener);
    }

    /// Register the IQ handler for `namespace`, replacing any previous
    /// one for that namespace.
    pub fn register_iq_handler(&mut self, namespace: &str, handler: IqHandlerRef) {
        self.registry.set_iq_handler(namespace, handler);
    }

    /// Remove the IQ handler for `namespace`.
    pub fn remove_iq_handler(&mut self, namespace: &str) {
        self.registry.remove_iq_handler(namespace);
    }

    /// Track the reply to the request sent with `id`. The handler's
    /// `handle_iq_id` fires exactly once, with `context`, for the first
    /// `result`/`error` bearing that id. Re-registering a live id
    /// replaces the previous entry.
    pub fn track_id(&mut self, handler: IqHandlerRef, id: &str, context: u32) {
        self.registry.track(id.to_string(), handler, context);
    }

    /// Register a message handler at the end of the flat list.
    pub fn register_message_handler(&mut self, handler: MessageHandlerRef) {
        self.registry.message_handlers.push(handler);
    }

    /// Remove a message handler from the flat list.
    pub fn remove_message_handler(&mut self, handler: &MessageHandlerRef) {
        remove_by_identity(&mut self.registry.message_handlers, handler);
    }

    /// Register a message handler for a specific JID. A full JID matches
    /// exactly; a bare JID matches any resource. `types` filters the
    /// message subtypes delivered.
    pub fn register_message_handler_for(
        &mut self,
        jid: Jid,
        types: MessageTypes,
        handler: MessageHandlerRef,
    ) {
        self.registry.jid_message_handlers.push((jid, types, handler));
    }

    /// Remove every JID-keyed registration of `handler`.
    pub fn remove_message_handler_for(&mut self, handler: &MessageHandlerRef) {
        self.registry
            .jid_message_handlers
            .retain(|(_, _, h)| !Rc::ptr_eq(h, handler));
    }

    /// Register a presence handler.
    pub fn register_presence_handler(&mut self, handler: PresenceHandlerRef) {
        self.registry.presence_handlers.push(handler);
    }

    /// Remove a presence handler.
    pub fn remove_presence_handler(&mut self, handler: &PresenceHandlerRef) {
        remove_by_identity(&mut self.registry.presence_handlers, handler);
    }

    /// Register a subscription handler.
    pub fn register_subscription_handler(&mut self, handler: SubscriptionHandlerRef) {
        self.registry.subscription_handlers.push(handler);
    }

    /// Remove a subscription handler.
    pub fn remove_subscription_handler(&mut self, handler: &SubscriptionHandlerRef) {
        remove_by_identity(&mut self.registry.subscription_handlers, handler);
    }

    /// Register a handler for stanzas with the given name and namespace.
    pub fn register_tag_handler(&mut self, name: &str, namespace: &str, handler: TagHandlerRef) {
        self.registry
            .tag_handlers
            .push((name.to_string(), namespace.to_string(), handler));
    }

    /// Remove every (name, namespace) registration of `handler`.
    pub fn remove_tag_handler(&mut self, handler: &TagHandlerRef) {
        self.registry
            .tag_handlers
            .retain(|(_, _, h)| !Rc::ptr_eq(h, handler));
    }

    /// Register the MUC invitation handler. Invitation messages bypass
    /// all other message routing while one is registered.
    pub fn register_muc_invitation_handler(&mut self, handler: MucInvitationHandlerRef) {
        self.registry.muc_invitation_handler = Some(handler);
    }

    /// Remove the MUC invitation handler.
    pub fn remove_muc_invitation_handler(&mut self) {
        self.registry.muc_invitation_handler = None;
    }

    /// Register the message session handler and enable automatic session
    /// creation for the given subtypes.
    pub fn register_message_session_handler(
        &mut self,
        handler: MessageSessionHandlerRef,
        types: MessageTypes,
    ) {
        self.registry.message_session_handler = Some((handler, types));
    }

    /// Remove the message session handler and drop all sessions.
    pub fn remove_message_session_handler(&mut self) {
        self.registry.message_session_handler = None;
        self.registry.sessions.clear();
    }

    /// Register the statistics handler.
    pub fn register_statistics_handler(&mut self, handler: StatisticsHandlerRef) {
        self.registry.statistics_handler = Some(handler);
    }

    /// Remove the statistics handler.
    pub fn remove_statistics_handler(&mut self) {
        self.registry.statistics_handler = None;
    }

    // ---- lifecycle ----------------------------------------------------

    /// Establish the transport and open the stream.
    ///
    /// Fails fast when the server cannot be resolved; no disconnect
    /// notification is emitted for connection attempts that never got a
    /// transport.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.session.state != ConnectionState::Disconnected {
            return Ok(());
        }
        if self.transport.is_none() {
            let transport: Box<dyn Transport> = Box::new(TcpTransport::new());
            self.transport = Some(Rc::new(RefCell::new(transport)));
        }
        let server = self.session.server();
        let port = self.session.port;
        let transport = match self.transport.clone() {
            Some(transport) => transport,
            None => return Err(ConnectionError::NotConnected),
        };
        transport.borrow_mut().connect(&server, port)?;
        log::debug!("connected to {}:{}", server, port);
        self.session.state = ConnectionState::Connecting;
        self.session.last_error = None;
        self.reader = Some(XmlReader::new(transport));
        self.send_stream_header();
        match self.session.state {
            ConnectionState::Disconnected => Err(self
                .session
                .last_error
                .clone()
                .unwrap_or(ConnectionError::NotConnected)),
            _ => Ok(()),
        }
    }

    /// Connect if necessary, then drive the stream until it ends.
    /// Returns the terminal reason.
    pub fn run(&mut self) -> ConnectionError {
        if let Err(e) = self.connect() {
            return e;
        }
        loop {
            if let Err(e) = self.recv(None) {
                return e;
            }
        }
    }

    /// One cooperative step: pull at most one stream event and handle
    /// it. `Ok(())` when the timeout expired with nothing to do;
    /// `Err(reason)` once the stream is gone.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<(), ConnectionError> {
        if self.session.state == ConnectionState::Disconnected {
            return Err(ConnectionError::NotConnected);
        }
        let transport = match self.transport.clone() {
            Some(transport) => transport,
            None => return Err(ConnectionError::NotConnected),
        };
        transport.borrow_mut().set_read_timeout(timeout);
        let event = match self.reader.as_mut() {
            Some(reader) => reader.read_event(),
            None => return Err(ConnectionError::NotConnected),
        };
        match event {
            Ok(None) => Ok(()),
            Ok(Some(event)) => {
                self.in_dispatch = true;
                self.handle_event(event);
                self.in_dispatch = false;
                match self.pending_disconnect.take() {
                    Some(reason) => {
                        self.notify_disconnect(&reason);
                        Err(reason)
                    }
                    None => Ok(()),
                }
            }
            Err(reason) => {
                self.disconnect_with(reason.clone());
                Err(reason)
            }
        }
    }

    /// Close the stream and tear the transport down. Idempotent; safe to
    /// call from within a handler (the receive loop then unwinds).
    pub fn disconnect(&mut self) {
        self.disconnect_with(ConnectionError::UserDisconnected);
    }

    pub(crate) fn disconnect_with(&mut self, reason: ConnectionError) {
        if self.session.state == ConnectionState::Disconnected {
            return;
        }
        log::debug!("disconnecting: {}", reason);
        if reason == ConnectionError::UserDisconnected {
            self.session.stream_error = None;
        }
        // Don't wave goodbye into a stream that already failed.
        if !matches!(reason, ConnectionError::StreamError(_)) {
            if let Some(transport) = &self.transport {
                let mut transport = transport.borrow_mut();
                if transport.is_connected() {
                    let _ = transport.write_all(b"</stream:stream>");
                }
            }
        }
        if let Some(transport) = &self.transport {
            transport.borrow_mut().disconnect();
        }
        self.reader = None;
        self.bind_id = None;
        self.session_id = None;
        self.session.reset_stream();
        self.session.last_error = Some(reason.clone());
        if self.in_dispatch {
            self.pending_disconnect = Some(reason);
        } else {
            self.notify_disconnect(&reason);
        }
    }

    // ---- sending ------------------------------------------------------

    /// Serialise and send a stanza. Silently dropped when not connected;
    /// write failures disconnect the engine.
    pub fn send(&mut self, stanza: Element) {
        match stanza.name() {
            "iq" => self.session.stats.iq_stanzas_sent += 1,
            "message" => self.session.stats.message_stanzas_sent += 1,
            "presence" => {
                if is_subscription(&stanza) {
                    self.session.stats.subscription_stanzas_sent += 1;
                } else {
                    self.session.stats.presence_stanzas_sent += 1;
                }
            }
            _ => (),
        }
        let serialised = String::from(&stanza);
        self.send_bytes(serialised.as_bytes());
    }

    /// Send raw bytes down the stream, bypassing serialisation and
    /// stanza counters.
    pub fn send_raw(&mut self, xml: &str) {
        self.send_bytes(xml.as_bytes());
    }

    fn send_bytes(&mut self, bytes: &[u8]) {
        let transport = match self.transport.clone() {
            Some(transport) => transport,
            None => {
                log::warn!("dropping outgoing data: not connected");
                return;
            }
        };
        log::debug!(">> {}", String::from_utf8_lossy(bytes));
        let result = transport.borrow_mut().write_all(bytes);
        if let Err(e) = result {
            log::warn!("write failed: {}", e);
            self.disconnect_with(e.into());
        }
    }

    // ---- negotiation helpers (used by the profiles) -------------------

    pub(crate) fn send_stream_header(&mut self) {
        let header = format!(
            "<?xml version='1.0'?><stream:stream to='{}' version='1.0' xml:lang='en' xmlns='{}' xmlns:stream='{}'>",
            self.session.jid.domain(),
            self.session.default_ns,
            ns::STREAM,
        );
        self.send_raw(&header);
    }

    /// Reset the reader and reopen the stream on the same transport,
    /// after TLS, compression or SASL success.
    pub(crate) fn restart_stream(&mut self) {
        if let Some(transport) = self.transport.clone() {
            self.reader = Some(XmlReader::new(transport));
        }
        self.session.sid = None;
        self.session.features = StreamFeatures::empty();
        self.send_stream_header();
    }

    /// Finish STARTTLS after the server's `<proceed/>`.
    pub(crate) fn complete_tls(&mut self) {
        let transport = match self.transport.clone() {
            Some(transport) => transport,
            None => return,
        };
        let domain = self.session.jid.domain().to_string();
        let result = transport.borrow_mut().start_tls(&domain);
        match result {
            Ok(info) => {
                let listeners = self.registry.connection_listeners.clone();
                let mut accepted = true;
                for listener in listeners {
                    accepted &= listener.borrow_mut().on_tls_connect(&info);
                }
                if !accepted {
                    log::warn!("TLS certificate vetoed by a connection listener");
                    self.disconnect_with(ConnectionError::TlsFailed);
                    return;
                }
                self.session.stats.encryption = true;
                self.restart_stream();
            }
            Err(reason) => self.disconnect_with(reason),
        }
    }

    /// Finish compression negotiation after the server's
    /// `<compressed/>`.
    pub(crate) fn complete_compression(&mut self) {
        let enabled = match self.transport.clone() {
            Some(transport) => transport.borrow_mut().set_compression(true),
            None => return,
        };
        if !enabled {
            self.disconnect_with(ConnectionError::CompressionFailed);
            return;
        }
        self.session.stats.compression = true;
        self.restart_stream();
    }

    pub(crate) fn set_authenticated(&mut self) {
        self.session.authed = true;
        self.session.auth_failure = None;
    }

    /// The stream is fully negotiated.
    pub(crate) fn notify_connected(&mut self) {
        self.session.state = ConnectionState::Connected;
        log::debug!("connection established as {}", self.session.jid);
        let listeners = self.registry.connection_listeners.clone();
        for listener in listeners {
            listener.borrow_mut().on_connect(self);
        }
    }

    pub(crate) fn fail_auth(&mut self, failure: AuthFailure) {
        self.session.auth_failure = Some(failure);
        self.disconnect_with(ConnectionError::AuthenticationFailed(failure));
    }

    pub(crate) fn transport_is_secure(&self) -> bool {
        self.transport
            .as_ref()
            .map(|t| t.borrow().is_secure())
            .unwrap_or(false)
    }

    pub(crate) fn transport_supports_compression(&self) -> bool {
        self.transport
            .as_ref()
            .map(|t| t.borrow().supports_compression())
            .unwrap_or(false)
    }

    pub(crate) fn transport_is_compressed(&self) -> bool {
        self.transport
            .as_ref()
            .map(|t| t.borrow().is_compressed())
            .unwrap_or(false)
    }

    pub(crate) fn transport_has_client_certificate(&self) -> bool {
        self.transport
            .as_ref()
            .map(|t| t.borrow().has_client_certificate())
            .unwrap_or(false)
    }

    // ---- resource binding / session -----------------------------------

    /// Request a resource binding. Called automatically after SASL when
    /// the server offers Bind; public so that the application can retry
    /// after an advisory bind error.
    pub fn bind_resource(&mut self, resource: Option<&str>) {
        let id = self.next_id();
        let resource = resource
            .map(str::to_string)
            .or_else(|| self.session.jid.resource().map(|r| r.to_string()));
        let mut bind = Element::builder("bind", ns::BIND);
        if let Some(resource) = resource {
            bind = bind.append(Element::builder("resource", ns::BIND).append(resource));
        }
        let iq = Element::builder("iq", self.session.default_ns)
            .attr("type", "set")
            .attr("id", id.as_str())
            .append(bind)
            .build();
        self.bind_id = Some(id);
        self.send(iq);
    }

    pub(crate) fn handle_bind_response(&mut self, iq: &Element) {
        self.bind_id = None;
        match iq.attr("type") {
            Some("result") => {
                let jid = iq
                    .get_child("bind", ns::BIND)
                    .and_then(|bind| bind.get_child("jid", ns::BIND))
                    .map(|jid| jid.text())
                    .and_then(|text| Jid::new(text.trim()).ok());
                match jid {
                    Some(jid) => {
                        log::debug!("bound to {}", jid);
                        self.session.jid = jid.clone();
                        self.session.bind_error = None;
                        let listeners = self.registry.connection_listeners.clone();
                        for listener in listeners {
                            listener.borrow_mut().on_resource_bind(self, &jid);
                        }
                        if self.session.features.has(StreamFeatures::SESSION) {
                            self.establish_session();
                        } else {
                            self.notify_connected();
                        }
                    }
                    None => {
                        log::warn!("bind result without a usable JID");
                        self.disconnect_with(ConnectionError::Parse);
                    }
                }
            }
            Some("error") => {
                let error = BindError::from_stanza_error(iq);
                log::warn!("resource binding failed: {}", error);
                self.session.bind_error = Some(error);
                let listeners = self.registry.connection_listeners.clone();
                for listener in listeners {
                    listener.borrow_mut().on_resource_bind_error(error);
                }
            }
            _ => (),
        }
    }

    fn establish_session(&mut self) {
        let id = self.next_id();
        let iq = Element::builder("iq", self.session.default_ns)
            .attr("type", "set")
            .attr("id", id.as_str())
            .append(Element::builder("session", ns::SESSION))
            .build();
        self.session_id = Some(id);
        self.send(iq);
    }

    pub(crate) fn handle_session_response(&mut self, iq: &Element) {
        self.session_id = None;
        match iq.attr("type") {
            Some("result") => {
                self.session.session_error = None;
                self.notify_connected();
            }
            Some("error") => {
                let error = SessionError::from_stanza_error(iq);
                log::warn!("session establishment failed: {}", error);
                self.session.session_error = Some(error);
                let listeners = self.registry.connection_listeners.clone();
                for listener in listeners {
                    listener.borrow_mut().on_session_create_error(error);
                }
            }
            _ => (),
        }
    }

    // ---- dispatch -----------------------------------------------------

    fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Start { id, version } => {
                log::debug!("stream opened, id={:?}", id);
                self.session.sid = id;
                let mut profile = match self.profile.take() {
                    Some(profile) => profile,
                    None => return,
                };
                if profile.expects_stream_features() && version.is_none() {
                    self.profile = Some(profile);
                    log::warn!("server stream has no version attribute");
                    self.disconnect_with(ConnectionError::StreamVersion);
                    return;
                }
                profile.on_stream_start(self);
                self.profile = Some(profile);
            }
            StreamEvent::Child(elem) => {
                log::debug!("<< {:?}", elem);
                if elem.is("error", ns::STREAM) {
                    self.handle_stream_error(&elem);
                    return;
                }
                let mut profile = match self.profile.take() {
                    Some(profile) => profile,
                    None => return,
                };
                let consumed = profile.handle_stream_child(self, &elem);
                self.profile = Some(profile);
                if !consumed && self.session.state != ConnectionState::Disconnected {
                    self.dispatch(&elem);
                }
            }
            StreamEvent::Close => {
                log::debug!("stream closed by the server");
                self.disconnect_with(ConnectionError::StreamClosed);
            }
        }
    }

    fn handle_stream_error(&mut self, elem: &Element) {
        let error = StreamError::from_element(elem);
        log::warn!("stream error: {}", error.condition);
        let condition = error.condition;
        self.session.stream_error = Some(error);
        self.disconnect_with(ConnectionError::StreamError(condition));
    }

    /// Classify a stanza and hand it to the registered handlers.
    fn dispatch(&mut self, elem: &Element) {
        match elem.name() {
            "iq" => {
                self.session.stats.iq_stanzas_received += 1;
                self.notify_iq_handlers(elem);
            }
            "message" => {
                self.session.stats.message_stanzas_received += 1;
                self.notify_message_handlers(elem);
            }
            "presence" if is_subscription(elem) => {
                self.session.stats.subscription_stanzas_received += 1;
                let handlers = self.registry.subscription_handlers.clone();
                for handler in handlers {
                    handler.borrow_mut().handle_subscription(self, elem);
                }
            }
            "presence" => {
                self.session.stats.presence_stanzas_received += 1;
                let handlers = self.registry.presence_handlers.clone();
                for handler in handlers {
                    handler.borrow_mut().handle_presence(self, elem);
                }
            }
            _ => (),
        }
        self.notify_tag_handlers(elem);
        self.notify_statistics();
    }

    fn notify_iq_handlers(&mut self, iq: &Element) {
        let mut handled = false;

        // Every namespace handler whose namespace appears on the stanza
        // or one of its payloads fires; several may claim it.
        let matching: Vec<IqHandlerRef> = self
            .registry
            .iq_handlers
            .iter()
            .filter(|(namespace, _)| {
                iq.has_ns(namespace.as_str())
                    || iq.children().any(|child| child.has_ns(namespace.as_str()))
            })
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in matching {
            handled |= handler.borrow_mut().handle_iq(self, iq);
        }

        let iq_type = iq.attr("type").unwrap_or("");
        if matches!(iq_type, "result" | "error") {
            if let Some(id) = iq.attr("id") {
                let id = id.to_string();
                if let Some((handler, context)) = self.registry.take_tracked(&id) {
                    handler.borrow_mut().handle_iq_id(self, iq, context);
                    handled = true;
                }
            }
        }

        // Nothing claimed a request: answer with an empty result so the
        // peer is not left waiting.
        if !handled && matches!(iq_type, "get" | "set") {
            let mut bounce = Element::builder("iq", self.session.default_ns).attr("type", "result");
            if let Some(id) = iq.attr("id") {
                bounce = bounce.attr("id", id);
            }
            if let Some(from) = iq.attr("from") {
                bounce = bounce.attr("to", from);
            }
            self.send(bounce.build());
        }
    }

    fn notify_message_handlers(&mut self, message: &Element) {
        // A MUC invitation bypasses all other routing.
        if let Some(handler) = self.registry.muc_invitation_handler.clone() {
            if let Some(invite) = message
                .get_child("x", ns::MUC_USER)
                .and_then(|x| x.get_child("invite", ns::MUC_USER))
            {
                handler.borrow_mut().handle_invitation(self, message, invite);
                return;
            }
        }

        let types = MessageTypes::of(message);
        let from = message.attr("from").and_then(|from| Jid::new(from).ok());

        if let Some(from) = from {
            // Exact full-JID registrations win.
            let full: Vec<MessageHandlerRef> = self
                .registry
                .jid_message_handlers
                .iter()
                .filter(|(jid, mask, _)| {
                    jid.resource().is_some() && *jid == from && mask.contains(types)
                })
                .map(|(_, _, handler)| handler.clone())
                .collect();
            if !full.is_empty() {
                for handler in full {
                    handler.borrow_mut().handle_message(self, message);
                }
                return;
            }

            // Then bare-JID registrations.
            let bare: Vec<MessageHandlerRef> = self
                .registry
                .jid_message_handlers
                .iter()
                .filter(|(jid, mask, _)| {
                    jid.resource().is_none()
                        && jid.to_bare() == from.to_bare()
                        && mask.contains(types)
                })
                .map(|(_, _, handler)| handler.clone())
                .collect();
            if !bare.is_empty() {
                for handler in bare {
                    handler.borrow_mut().handle_message(self, message);
                }
                return;
            }

            // Then an automatically created conversation session.
            if let Some((handler, mask)) = self.registry.message_session_handler.clone() {
                if mask.contains(types) {
                    let session = match self.registry.find_session(&from, types) {
                        Some(session) => session.clone(),
                        None => {
                            let session = MessageSession {
                                jid: from.clone(),
                                thread: message
                                    .get_child("thread", self.session.default_ns)
                                    .map(|thread| thread.text()),
                                types: mask,
                            };
                            self.registry.sessions.push(session.clone());
                            session
                        }
                    };
                    handler
                        .borrow_mut()
                        .handle_message_session(self, &session, message);
                    return;
                }
            }
        }

        // Finally the flat list.
        let handlers = self.registry.message_handlers.clone();
        for handler in handlers {
            handler.borrow_mut().handle_message(self, message);
        }
    }

    fn notify_tag_handlers(&mut self, elem: &Element) {
        let matching: Vec<TagHandlerRef> = self
            .registry
            .tag_handlers
            .iter()
            .filter(|(name, namespace, _)| elem.is(name.as_str(), namespace.as_str()))
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in matching {
            handler.borrow_mut().handle_tag(self, elem);
        }
    }

    fn notify_statistics(&mut self) {
        if let Some(handler) = self.registry.statistics_handler.clone() {
            let stats = self.statistics();
            handler.borrow_mut().handle_statistics(&stats);
        }
    }

    fn notify_disconnect(&mut self, reason: &ConnectionError) {
        let listeners = self.registry.connection_listeners.clone();
        for listener in listeners {
            listener.borrow_mut().on_disconnect(self, reason);
        }
    }
}

/// Whether a presence stanza manages a subscription.
fn is_subscription(presence: &Element) -> bool {
    matches!(
        presence.attr("type"),
        Some("subscribe") | Some("subscribed") | Some("unsubscribe") | Some("unsubscribed")
    )
}
