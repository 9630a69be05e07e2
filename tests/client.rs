//! End-to-end negotiation and dispatch tests over a scripted transport.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};

use sync_xmpp::jid::Jid;
use sync_xmpp::minidom::Element;
use sync_xmpp::{
    Client, ConnectionError, ConnectionListener, IqHandler, MessageHandler, MessageTypes,
    MucInvitationHandler, PresenceHandler, StreamEngine, StreamErrorCondition,
    SubscriptionHandler, TlsInfo, TlsPolicy,
};

use common::{drain, feed, hex, server_header, take_written, MockState, MockTransport};

#[derive(Default)]
struct Recorder {
    connected: bool,
    disconnects: Vec<ConnectionError>,
    bound: Option<String>,
    veto_tls: bool,
}

impl ConnectionListener for Recorder {
    fn on_connect(&mut self, _engine: &mut StreamEngine) {
        self.connected = true;
    }

    fn on_disconnect(&mut self, _engine: &mut StreamEngine, reason: &ConnectionError) {
        self.disconnects.push(reason.clone());
    }

    fn on_tls_connect(&mut self, _info: &TlsInfo) -> bool {
        !self.veto_tls
    }

    fn on_resource_bind(&mut self, _engine: &mut StreamEngine, jid: &Jid) {
        self.bound = Some(jid.to_string());
    }
}

#[derive(Default)]
struct Counter {
    calls: u32,
    last_context: Option<u32>,
}

impl IqHandler for Counter {
    fn handle_iq(&mut self, _engine: &mut StreamEngine, _iq: &Element) -> bool {
        self.calls += 1;
        true
    }

    fn handle_iq_id(&mut self, _engine: &mut StreamEngine, _iq: &Element, context: u32) {
        self.calls += 1;
        self.last_context = Some(context);
    }
}

#[derive(Default)]
struct MessageCounter {
    calls: u32,
}

impl MessageHandler for MessageCounter {
    fn handle_message(&mut self, _engine: &mut StreamEngine, _message: &Element) {
        self.calls += 1;
    }
}

impl PresenceHandler for MessageCounter {
    fn handle_presence(&mut self, _engine: &mut StreamEngine, _presence: &Element) {
        self.calls += 1;
    }
}

impl SubscriptionHandler for MessageCounter {
    fn handle_subscription(&mut self, _engine: &mut StreamEngine, _presence: &Element) {
        self.calls += 1;
    }
}

impl MucInvitationHandler for MessageCounter {
    fn handle_invitation(
        &mut self,
        _engine: &mut StreamEngine,
        _message: &Element,
        _invite: &Element,
    ) {
        self.calls += 1;
    }
}

fn client(jid: &str, password: &str) -> (Client, Rc<RefCell<MockState>>, Rc<RefCell<Recorder>>) {
    common::init_logging();
    let (transport, state) = MockTransport::new();
    let mut client = Client::new(Jid::new(jid).unwrap(), password);
    client.set_transport(Box::new(transport));
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    client.register_connection_listener(recorder.clone());
    (client, state, recorder)
}

/// Connect a client that finishes negotiation on an empty features set
/// (no credentials path), so stanza dispatch can be exercised.
fn connected_client() -> (Client, Rc<RefCell<MockState>>, Rc<RefCell<Recorder>>) {
    let (mut client, state, recorder) = client("romeo@example.net", "");
    client.connect().unwrap();
    take_written(&state);
    feed(&state, &server_header("s1"));
    feed(&state, "<stream:features/>");
    drain(&mut client).unwrap();
    assert!(recorder.borrow().connected);
    take_written(&state);
    (client, state, recorder)
}

#[test]
fn iq_auth_only_runs_legacy_exchange() {
    let (mut client, state, recorder) = client("romeo@example.net", "pass123");
    client.connect().unwrap();
    let header = take_written(&state);
    assert!(header.contains("<stream:stream"));
    assert!(header.contains("to='example.net'"));

    feed(&state, &server_header("s1"));
    feed(
        &state,
        "<stream:features><auth xmlns='http://jabber.org/features/iq-auth'/></stream:features>",
    );
    drain(&mut client).unwrap();

    let request = take_written(&state);
    assert!(request.contains("jabber:iq:auth"));
    // Never a SASL <auth/> when only IqAuth is on the table.
    assert!(!request.contains("urn:ietf:params:xml:ns:xmpp-sasl"));

    // The server offers a digest field, and we know the stream id, so
    // the reply must carry hex(SHA1(sid + password)).
    feed(
        &state,
        "<iq type='result' id='uid1'><query xmlns='jabber:iq:auth'>\
         <username/><password/><digest/><resource/></query></iq>",
    );
    drain(&mut client).unwrap();

    let login: Element = take_written(&state).parse().unwrap();
    let query = login.get_child("query", "jabber:iq:auth").unwrap();
    let digest = query.get_child("digest", "jabber:iq:auth").unwrap();
    assert_eq!(digest.text(), hex(&Sha1::digest(b"s1pass123")));
    assert!(query.get_child("password", "jabber:iq:auth").is_none());

    feed(&state, "<iq type='result' id='uid2'/>");
    drain(&mut client).unwrap();
    assert!(recorder.borrow().connected);
}

#[test]
fn legacy_error_is_fatal_for_the_attempt() {
    let (mut client, state, recorder) = client("romeo@example.net", "pass123");
    client.connect().unwrap();
    feed(&state, &server_header("s1"));
    feed(
        &state,
        "<stream:features><auth xmlns='http://jabber.org/features/iq-auth'/></stream:features>",
    );
    feed(
        &state,
        "<iq type='result' id='uid1'><query xmlns='jabber:iq:auth'>\
         <username/><password/><resource/></query></iq>",
    );
    feed(
        &state,
        "<iq type='error' id='uid2'><error code='401'>\
         <not-authorized xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error></iq>",
    );
    let result = drain(&mut client);
    assert_eq!(
        result,
        Err(ConnectionError::AuthenticationFailed(
            sync_xmpp::AuthFailure::NotAuthorized
        ))
    );
    assert_eq!(
        client.auth_failure(),
        Some(sync_xmpp::AuthFailure::NotAuthorized)
    );
    assert!(!recorder.borrow().connected);
}

#[test]
fn starttls_takes_priority_over_sasl() {
    let (mut client, state, _recorder) = client("romeo@example.net", "pass123");
    client.connect().unwrap();
    take_written(&state);

    feed(&state, &server_header("s1"));
    feed(
        &state,
        "<stream:features>\
         <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>\
         <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
         <mechanism>PLAIN</mechanism></mechanisms>\
         </stream:features>",
    );
    drain(&mut client).unwrap();

    let written = take_written(&state);
    assert!(written.contains("<starttls"));
    assert!(!written.contains("<auth"));

    // <proceed/> upgrades the transport and reopens the stream.
    feed(&state, "<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>");
    drain(&mut client).unwrap();
    assert!(state.borrow().secure);
    assert!(take_written(&state).contains("<stream:stream"));
}

#[test]
fn certificate_veto_fails_the_connection() {
    let (mut client, state, recorder) = client("romeo@example.net", "pass123");
    recorder.borrow_mut().veto_tls = true;
    client.connect().unwrap();
    feed(&state, &server_header("s1"));
    feed(
        &state,
        "<stream:features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/></stream:features>",
    );
    feed(&state, "<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>");
    assert_eq!(drain(&mut client), Err(ConnectionError::TlsFailed));
    assert_eq!(
        recorder.borrow().disconnects,
        vec![ConnectionError::TlsFailed]
    );
}

#[test]
fn plain_is_used_when_tls_is_disabled() {
    let (mut client, state, recorder) = client("romeo@example.net", "pass123");
    client.set_tls_policy(TlsPolicy::Disabled);
    client.connect().unwrap();
    take_written(&state);

    feed(&state, &server_header("s1"));
    feed(
        &state,
        "<stream:features>\
         <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>\
         <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
         <mechanism>PLAIN</mechanism></mechanisms>\
         </stream:features>",
    );
    drain(&mut client).unwrap();

    let auth: Element = take_written(&state).parse().unwrap();
    assert!(auth.is("auth", "urn:ietf:params:xml:ns:xmpp-sasl"));
    assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
    let payload = BASE64.decode(auth.text()).unwrap();
    assert_eq!(payload, b"\0romeo\0pass123");

    // Success restarts the stream; bind and session follow.
    feed(&state, "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>");
    drain(&mut client).unwrap();
    assert!(take_written(&state).contains("<stream:stream"));

    feed(&state, &server_header("s2"));
    feed(
        &state,
        "<stream:features>\
         <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
         <session xmlns='urn:ietf:params:xml:ns:xmpp-session'/>\
         </stream:features>",
    );
    drain(&mut client).unwrap();
    let bind: Element = take_written(&state).parse().unwrap();
    assert_eq!(bind.attr("id"), Some("uid1"));
    assert!(bind
        .get_child("bind", "urn:ietf:params:xml:ns:xmpp-bind")
        .is_some());

    feed(
        &state,
        "<iq type='result' id='uid1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
         <jid>romeo@example.net/balcony</jid></bind></iq>",
    );
    drain(&mut client).unwrap();

    // The server-assigned full JID is adopted verbatim, and the session
    // request follows immediately.
    assert_eq!(client.jid().to_string(), "romeo@example.net/balcony");
    assert_eq!(
        recorder.borrow().bound.as_deref(),
        Some("romeo@example.net/balcony")
    );
    let session: Element = take_written(&state).parse().unwrap();
    assert_eq!(session.attr("type"), Some("set"));
    assert!(session
        .get_child("session", "urn:ietf:params:xml:ns:xmpp-session")
        .is_some());

    assert!(!recorder.borrow().connected);
    feed(&state, "<iq type='result' id='uid2'/>");
    drain(&mut client).unwrap();
    assert!(recorder.borrow().connected);
}

#[test]
fn compression_is_negotiated_after_tls_branch() {
    let (mut client, state, _recorder) = client("romeo@example.net", "pass123");
    client.set_tls_policy(TlsPolicy::Disabled);
    client.connect().unwrap();
    take_written(&state);

    feed(&state, &server_header("s1"));
    feed(
        &state,
        "<stream:features>\
         <compression xmlns='http://jabber.org/features/compress'>\
         <method>zlib</method></compression>\
         <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
         <mechanism>PLAIN</mechanism></mechanisms>\
         </stream:features>",
    );
    drain(&mut client).unwrap();
    let written = take_written(&state);
    assert!(written.contains("<compress"));
    assert!(written.contains("zlib"));
    assert!(!written.contains("<auth"));

    feed(&state, "<compressed xmlns='http://jabber.org/protocol/compress'/>");
    drain(&mut client).unwrap();
    assert!(state.borrow().compressed);
    assert!(take_written(&state).contains("<stream:stream"));
}

#[test]
fn compression_failure_falls_back_to_auth() {
    let (mut client, state, _recorder) = client("romeo@example.net", "pass123");
    client.set_tls_policy(TlsPolicy::Disabled);
    client.connect().unwrap();
    feed(&state, &server_header("s1"));
    feed(
        &state,
        "<stream:features>\
         <compression xmlns='http://jabber.org/features/compress'>\
         <method>zlib</method></compression>\
         <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
         <mechanism>PLAIN</mechanism></mechanisms>\
         </stream:features>",
    );
    drain(&mut client).unwrap();
    take_written(&state);

    feed(&state, "<failure xmlns='http://jabber.org/protocol/compress'/>");
    drain(&mut client).unwrap();
    let written = take_written(&state);
    assert!(written.contains("mechanism=\"PLAIN\"") || written.contains("mechanism='PLAIN'"));
}

#[test]
fn missing_stream_version_is_fatal() {
    let (mut client, state, _recorder) = client("romeo@example.net", "pass123");
    client.connect().unwrap();
    feed(
        &state,
        "<stream:stream xmlns='jabber:client' \
         xmlns:stream='http://etherx.jabber.org/streams' id='s1'>",
    );
    assert_eq!(drain(&mut client), Err(ConnectionError::StreamVersion));
}

#[test]
fn no_supported_auth_disconnects() {
    let (mut client, state, _recorder) = client("romeo@example.net", "pass123");
    client.connect().unwrap();
    feed(&state, &server_header("s1"));
    // Credentials are set but nothing usable is offered.
    feed(
        &state,
        "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
         <mechanism>SCRAM-SHA-1</mechanism></mechanisms></stream:features>",
    );
    assert_eq!(drain(&mut client), Err(ConnectionError::NoSupportedAuth));
}

#[test]
fn tracked_id_fires_exactly_once() {
    let (mut client, state, _recorder) = connected_client();
    let handler = Rc::new(RefCell::new(Counter::default()));
    client.track_id(handler.clone(), "q1", 5);

    feed(&state, "<iq type='result' id='q1' from='a@example.org'/>");
    feed(&state, "<iq type='result' id='q1' from='a@example.org'/>");
    drain(&mut client).unwrap();

    assert_eq!(handler.borrow().calls, 1);
    assert_eq!(handler.borrow().last_context, Some(5));
    // Replies are not requests: the ignored duplicate is not bounced.
    assert_eq!(take_written(&state), "");
}

#[test]
fn unclaimed_get_is_answered_with_empty_result() {
    let (mut client, state, _recorder) = connected_client();
    feed(
        &state,
        "<iq type='get' id='X' from='a@b'><query xmlns='jabber:iq:version'/></iq>",
    );
    drain(&mut client).unwrap();

    let bounce: Element = take_written(&state).parse().unwrap();
    assert_eq!(bounce.name(), "iq");
    assert_eq!(bounce.attr("type"), Some("result"));
    assert_eq!(bounce.attr("id"), Some("X"));
    assert_eq!(bounce.attr("to"), Some("a@b"));
    assert_eq!(bounce.children().count(), 0);
}

#[test]
fn namespace_handler_claims_requests() {
    let (mut client, state, _recorder) = connected_client();
    let handler = Rc::new(RefCell::new(Counter::default()));
    client.register_iq_handler("jabber:iq:version", handler.clone());

    feed(
        &state,
        "<iq type='get' id='v1' from='a@b'><query xmlns='jabber:iq:version'/></iq>",
    );
    drain(&mut client).unwrap();

    assert_eq!(handler.borrow().calls, 1);
    // The handler claimed it, so no bounce.
    assert_eq!(take_written(&state), "");
}

#[test]
fn message_routing_prefers_specific_handlers() {
    let (mut client, state, _recorder) = connected_client();
    let full = Rc::new(RefCell::new(MessageCounter::default()));
    let bare = Rc::new(RefCell::new(MessageCounter::default()));
    let flat = Rc::new(RefCell::new(MessageCounter::default()));
    client.register_message_handler_for(
        Jid::new("juliet@example.net/chamber").unwrap(),
        MessageTypes::ALL,
        full.clone(),
    );
    client.register_message_handler_for(
        Jid::new("juliet@example.net").unwrap(),
        MessageTypes::ALL,
        bare.clone(),
    );
    client.register_message_handler(flat.clone());

    feed(
        &state,
        "<message from='juliet@example.net/chamber' type='chat'><body>hi</body></message>",
    );
    drain(&mut client).unwrap();
    assert_eq!(
        (full.borrow().calls, bare.borrow().calls, flat.borrow().calls),
        (1, 0, 0)
    );

    feed(
        &state,
        "<message from='juliet@example.net/garden' type='chat'><body>hi</body></message>",
    );
    drain(&mut client).unwrap();
    assert_eq!(
        (full.borrow().calls, bare.borrow().calls, flat.borrow().calls),
        (1, 1, 0)
    );

    feed(
        &state,
        "<message from='tybalt@example.net/hall' type='chat'><body>hi</body></message>",
    );
    drain(&mut client).unwrap();
    assert_eq!(
        (full.borrow().calls, bare.borrow().calls, flat.borrow().calls),
        (1, 1, 1)
    );
}

#[test]
fn muc_invitation_short_circuits_message_routing() {
    let (mut client, state, _recorder) = connected_client();
    let muc = Rc::new(RefCell::new(MessageCounter::default()));
    let flat = Rc::new(RefCell::new(MessageCounter::default()));
    client.register_muc_invitation_handler(muc.clone());
    client.register_message_handler(flat.clone());

    feed(
        &state,
        "<message from='darkcave@chat.example.net'>\
         <x xmlns='http://jabber.org/protocol/muc#user'>\
         <invite from='crone@example.net/desktop'><reason>moot</reason></invite>\
         </x></message>",
    );
    drain(&mut client).unwrap();

    assert_eq!(muc.borrow().calls, 1);
    assert_eq!(flat.borrow().calls, 0);
}

#[test]
fn presence_and_subscription_are_split() {
    let (mut client, state, _recorder) = connected_client();
    let presence = Rc::new(RefCell::new(MessageCounter::default()));
    let subscription = Rc::new(RefCell::new(MessageCounter::default()));
    client.register_presence_handler(presence.clone());
    client.register_subscription_handler(subscription.clone());

    feed(&state, "<presence from='juliet@example.net/chamber'/>");
    feed(&state, "<presence type='subscribe' from='tybalt@example.net'/>");
    drain(&mut client).unwrap();

    assert_eq!(presence.borrow().calls, 1);
    assert_eq!(subscription.borrow().calls, 1);

    let stats = client.statistics();
    assert_eq!(stats.presence_stanzas_received, 1);
    assert_eq!(stats.subscription_stanzas_received, 1);
}

#[test]
fn stream_error_disconnects_and_is_kept_for_introspection() {
    let (mut client, state, recorder) = connected_client();
    feed(
        &state,
        "<stream:error><system-shutdown xmlns='urn:ietf:params:xml:ns:xmpp-streams'/>\
         </stream:error>",
    );
    let result = drain(&mut client);
    assert_eq!(
        result,
        Err(ConnectionError::StreamError(
            StreamErrorCondition::SystemShutdown
        ))
    );
    assert_eq!(
        client.stream_error().map(|e| e.condition),
        Some(StreamErrorCondition::SystemShutdown)
    );
    assert_eq!(
        recorder.borrow().disconnects,
        vec![ConnectionError::StreamError(
            StreamErrorCondition::SystemShutdown
        )]
    );
}

#[test]
fn server_stream_close_disconnects() {
    let (mut client, state, _recorder) = connected_client();
    feed(&state, "</stream:stream>");
    assert_eq!(drain(&mut client), Err(ConnectionError::StreamClosed));
    assert_eq!(client.state(), sync_xmpp::ConnectionState::Disconnected);
}
