//! XEP-0114 component handshake tests.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use sha1::{Digest, Sha1};

use sync_xmpp::minidom::Element;
use sync_xmpp::{Component, ConnectionError, ConnectionListener, StreamEngine};

use common::{drain, feed, hex, take_written, MockTransport};

#[derive(Default)]
struct Recorder {
    connected: bool,
}

impl ConnectionListener for Recorder {
    fn on_connect(&mut self, _engine: &mut StreamEngine) {
        self.connected = true;
    }
}

const COMPONENT_HEADER: &str = "<stream:stream xmlns='jabber:component:accept' \
     xmlns:stream='http://etherx.jabber.org/streams' from='comp.example.org' id='abc123'>";

#[test]
fn handshake_is_sha1_of_sid_and_secret() {
    common::init_logging();
    let (transport, state) = MockTransport::new();
    let mut component = Component::new("comp.example.org", "s3cr3t", "localhost", 5347).unwrap();
    component.set_transport(Box::new(transport));
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    component.register_connection_listener(recorder.clone());

    component.connect().unwrap();
    let header = take_written(&state);
    assert!(header.contains("jabber:component:accept"));
    assert!(header.contains("to='comp.example.org'"));

    // Component streams carry no version attribute; the handshake is
    // sent as soon as the header (and with it the sid) arrives.
    feed(&state, COMPONENT_HEADER);
    drain(&mut component).unwrap();

    let handshake: Element = take_written(&state).parse().unwrap();
    assert!(handshake.is("handshake", "jabber:component:accept"));
    assert_eq!(handshake.text(), hex(&Sha1::digest(b"abc123s3cr3t")));

    // The echoed empty handshake establishes the connection.
    assert!(!recorder.borrow().connected);
    feed(&state, "<handshake/>");
    drain(&mut component).unwrap();
    assert!(recorder.borrow().connected);
}

#[test]
fn handshake_rejection_is_a_stream_error() {
    common::init_logging();
    let (transport, state) = MockTransport::new();
    let mut component = Component::new("comp.example.org", "wrong", "localhost", 5347).unwrap();
    component.set_transport(Box::new(transport));

    component.connect().unwrap();
    feed(&state, COMPONENT_HEADER);
    feed(
        &state,
        "<stream:error><not-authorized xmlns='urn:ietf:params:xml:ns:xmpp-streams'/>\
         </stream:error>",
    );
    let result = drain(&mut component);
    assert_eq!(
        result,
        Err(ConnectionError::StreamError(
            sync_xmpp::StreamErrorCondition::NotAuthorized
        ))
    );
}

#[test]
fn stanzas_flow_after_handshake() {
    common::init_logging();
    let (transport, state) = MockTransport::new();
    let mut component = Component::new("comp.example.org", "s3cr3t", "localhost", 5347).unwrap();
    component.set_transport(Box::new(transport));

    component.connect().unwrap();
    feed(&state, COMPONENT_HEADER);
    feed(&state, "<handshake/>");
    drain(&mut component).unwrap();
    take_written(&state);

    // An unclaimed get is bounced on component streams too, in the
    // component namespace.
    feed(
        &state,
        "<iq type='get' id='p1' from='user@example.org' to='comp.example.org'>\
         <query xmlns='jabber:iq:version'/></iq>",
    );
    drain(&mut component).unwrap();
    let bounce: Element = take_written(&state).parse().unwrap();
    assert!(bounce.is("iq", "jabber:component:accept"));
    assert_eq!(bounce.attr("type"), Some("result"));
    assert_eq!(bounce.attr("id"), Some("p1"));
    assert_eq!(bounce.attr("to"), Some("user@example.org"));
}
