// Copyright (c) 2025 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Namespace constants used by the stream engine.

/// RFC 6120: `<stream:stream/>` and `<stream:error/>`
pub const STREAM: &str = "http://etherx.jabber.org/streams";

/// RFC 6120: client-to-server streams
pub const CLIENT: &str = "jabber:client";

/// XEP-0114: component accept streams
pub const COMPONENT: &str = "jabber:component:accept";

/// RFC 6120: StartTLS negotiation
pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";

/// RFC 6120: SASL negotiation
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

/// RFC 6120: resource binding
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";

/// RFC 3921: session establishment
pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";

/// RFC 6120: stream error defined conditions
pub const XMPP_STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";

/// RFC 6120: stanza error defined conditions
pub const XMPP_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// XEP-0138: compression as a stream feature
pub const COMPRESS_FEATURE: &str = "http://jabber.org/features/compress";

/// XEP-0138: compression negotiation
pub const COMPRESS: &str = "http://jabber.org/protocol/compress";

/// XEP-0078: non-SASL authentication as a stream feature
pub const IQ_AUTH_FEATURE: &str = "http://jabber.org/features/iq-auth";

/// XEP-0078: non-SASL authentication queries
pub const AUTH: &str = "jabber:iq:auth";

/// XEP-0077: in-band registration as a stream feature
pub const IQ_REGISTER_FEATURE: &str = "http://jabber.org/features/iq-register";

/// Legacy stanza acknowledgements as a stream feature
pub const ACK_FEATURE: &str = "http://jabber.org/features/ack";

/// XEP-0045: MUC user payloads (invitations)
pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
