// Copyright (c) 2025 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream profiles.
//!
//! A profile is the strategy object that distinguishes client,
//! legacy-client and component streams: the stream namespace, the
//! startup hook, and the recognizer for framework elements (features,
//! TLS/compression/SASL nonzas, tracked bind/session replies, the
//! component handshake echo). Everything the recognizer does not claim
//! falls through to stanza dispatch.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use digest::Digest;
use minidom::Element;
use sha1::Sha1;

use crate::auth::nonsasl::NonSaslAuth;
use crate::auth::{hex, sasl};
use crate::engine::StreamEngine;
use crate::error::{AuthFailure, ConnectionError};
use crate::features::StreamFeatures;
use crate::ns;
use crate::session::TlsPolicy;

/// Per-variant behaviour of the stream engine, chosen at construction.
pub trait StreamProfile {
    /// The default namespace of the stream this profile speaks.
    fn default_ns(&self) -> &'static str;

    /// Whether the server is expected to advertise a stream version and
    /// `<stream:features/>`. Version-less streams are fatal for such
    /// profiles.
    fn expects_stream_features(&self) -> bool {
        true
    }

    /// Called when the server's stream header arrived.
    fn on_stream_start(&mut self, engine: &mut StreamEngine);

    /// Offer a stream child to the profile. Returns `true` when the
    /// element was consumed as part of stream negotiation.
    fn handle_stream_child(&mut self, engine: &mut StreamEngine, elem: &Element) -> bool;
}

enum SaslState {
    None,
    DigestMd5,
}

/// Profile for `jabber:client` streams: STARTTLS, compression, SASL
/// (DIGEST-MD5, PLAIN, ANONYMOUS, EXTERNAL), legacy authentication,
/// resource binding and session establishment.
pub struct ClientProfile {
    sasl_state: SaslState,
    nonsasl: Option<NonSaslAuth>,
    compression_failed: bool,
}

impl ClientProfile {
    /// A fresh client profile.
    pub fn new() -> ClientProfile {
        ClientProfile {
            sasl_state: SaslState::None,
            nonsasl: None,
            compression_failed: false,
        }
    }

    /// Evaluate the advertised features, in fixed priority order:
    /// TLS, then compression, then authentication or binding. Each
    /// branch is terminal for the current features event.
    fn negotiate(&mut self, engine: &mut StreamEngine) {
        let features = engine.session.features;
        let secure = engine.transport_is_secure();

        if engine.session.tls != TlsPolicy::Disabled
            && features.has(StreamFeatures::STARTTLS)
            && !secure
        {
            engine.send(Element::builder("starttls", ns::TLS).build());
            return;
        }
        if engine.session.tls == TlsPolicy::Required && !secure {
            engine.disconnect_with(ConnectionError::TlsNotAvailable);
            return;
        }

        if engine.session.compression
            && !self.compression_failed
            && features.has(StreamFeatures::COMPRESS_ZLIB)
            && engine.transport_supports_compression()
            && !engine.transport_is_compressed()
        {
            engine.send(
                Element::builder("compress", ns::COMPRESS)
                    .append(Element::builder("method", ns::COMPRESS).append("zlib"))
                    .build(),
            );
            return;
        }

        if engine.session.sasl {
            if engine.session.authed {
                if features.has(StreamFeatures::BIND) {
                    engine.bind_resource(None);
                } else {
                    engine.notify_connected();
                }
                return;
            }
            let username = engine.username();
            let has_credentials =
                username.is_some() && !engine.session.password.is_empty();
            if has_credentials {
                if !engine.session.force_non_sasl && features.has(StreamFeatures::SASL_DIGEST_MD5)
                {
                    self.start_digest_md5(engine);
                } else if !engine.session.force_non_sasl
                    && features.has(StreamFeatures::SASL_PLAIN)
                {
                    self.start_plain(engine);
                } else if engine.session.force_non_sasl || features.has(StreamFeatures::IQ_AUTH) {
                    self.start_legacy(engine);
                } else {
                    engine.disconnect_with(ConnectionError::NoSupportedAuth);
                }
                return;
            }
            if engine.transport_has_client_certificate()
                && features.has(StreamFeatures::SASL_EXTERNAL)
            {
                self.start_external(engine);
                return;
            }
            if features.has(StreamFeatures::SASL_ANONYMOUS) {
                self.start_anonymous(engine);
                return;
            }
            // No credentials, nothing to negotiate: the stream is as
            // established as it will get.
            engine.notify_connected();
            return;
        }

        // SASL disabled: XEP-0078 or nothing.
        if features.has(StreamFeatures::IQ_AUTH) || engine.session.force_non_sasl {
            self.start_legacy(engine);
        } else {
            engine.disconnect_with(ConnectionError::NoSupportedAuth);
        }
    }

    fn start_digest_md5(&mut self, engine: &mut StreamEngine) {
        self.sasl_state = SaslState::DigestMd5;
        engine.send(
            Element::builder("auth", ns::SASL)
                .attr("mechanism", "DIGEST-MD5")
                .build(),
        );
    }

    fn start_plain(&mut self, engine: &mut StreamEngine) {
        let username = engine.username().unwrap_or_default();
        let payload = sasl::plain(None, &username, &engine.session.password);
        engine.send(
            Element::builder("auth", ns::SASL)
                .attr("mechanism", "PLAIN")
                .append(BASE64.encode(payload))
                .build(),
        );
    }

    fn start_anonymous(&mut self, engine: &mut StreamEngine) {
        // The cdata is a fresh request id, usable as a trace token.
        let token = engine.next_id();
        engine.send(
            Element::builder("auth", ns::SASL)
                .attr("mechanism", "ANONYMOUS")
                .append(token)
                .build(),
        );
    }

    fn start_external(&mut self, engine: &mut StreamEngine) {
        let authzid = engine.jid().to_bare().to_string();
        engine.send(
            Element::builder("auth", ns::SASL)
                .attr("mechanism", "EXTERNAL")
                .append(BASE64.encode(authzid))
                .build(),
        );
    }

    fn start_legacy(&mut self, engine: &mut StreamEngine) {
        let mut nonsasl = NonSaslAuth::new();
        nonsasl.start(engine);
        self.nonsasl = Some(nonsasl);
    }

    fn handle_challenge(&mut self, engine: &mut StreamEngine, elem: &Element) {
        if !matches!(self.sasl_state, SaslState::DigestMd5) {
            log::warn!("unexpected SASL challenge");
            return;
        }
        let decoded = match BASE64.decode(elem.text().trim()) {
            Ok(decoded) => decoded,
            Err(_) => {
                engine.fail_auth(AuthFailure::IncorrectEncoding);
                return;
            }
        };
        let challenge = String::from_utf8_lossy(&decoded);
        let fields = sasl::parse_challenge(&challenge);

        // The final round carries rspauth and gets an empty response.
        if fields.contains_key("rspauth") {
            engine.send(Element::builder("response", ns::SASL).build());
            return;
        }

        let nonce = match fields.get("nonce") {
            Some(nonce) => nonce.clone(),
            None => {
                engine.fail_auth(AuthFailure::MalformedRequest);
                return;
            }
        };
        let realm = fields.get("realm").cloned().unwrap_or_default();
        let username = engine.username().unwrap_or_default();
        let password = engine.session.password.clone();
        let domain = engine.jid().domain().to_string();
        let cnonce = sasl::cnonce();
        let reply = sasl::digest_md5_reply(&username, &password, &realm, &nonce, &cnonce, &domain);
        engine.send(
            Element::builder("response", ns::SASL)
                .append(BASE64.encode(reply.as_bytes()))
                .build(),
        );
    }
}

impl Default for ClientProfile {
    fn default() -> ClientProfile {
        ClientProfile::new()
    }
}

impl StreamProfile for ClientProfile {
    fn default_ns(&self) -> &'static str {
        ns::CLIENT
    }

    fn on_stream_start(&mut self, _engine: &mut StreamEngine) {
        // Clients wait for <stream:features/>.
    }

    fn handle_stream_child(&mut self, engine: &mut StreamEngine, elem: &Element) -> bool {
        if elem.is("features", ns::STREAM) {
            engine.session.features = StreamFeatures::from_element(elem);
            log::debug!("stream features: {}", engine.session.features);
            self.negotiate(engine);
            true
        } else if elem.is("proceed", ns::TLS) {
            engine.complete_tls();
            true
        } else if elem.is("failure", ns::TLS) {
            engine.disconnect_with(ConnectionError::TlsFailed);
            true
        } else if elem.is("compressed", ns::COMPRESS) {
            engine.complete_compression();
            true
        } else if elem.is("failure", ns::COMPRESS) {
            log::warn!("server rejected stream compression, continuing without");
            self.compression_failed = true;
            self.negotiate(engine);
            true
        } else if elem.is("challenge", ns::SASL) {
            self.handle_challenge(engine, elem);
            true
        } else if elem.is("success", ns::SASL) {
            self.sasl_state = SaslState::None;
            engine.set_authenticated();
            engine.restart_stream();
            true
        } else if elem.is("failure", ns::SASL) {
            engine.fail_auth(AuthFailure::from_sasl_failure(elem));
            true
        } else if elem.name() == "iq" {
            if engine.bind_id.is_some() && elem.attr("id") == engine.bind_id.as_deref() {
                engine.handle_bind_response(elem);
                return true;
            }
            if engine.session_id.is_some() && elem.attr("id") == engine.session_id.as_deref() {
                engine.handle_session_response(elem);
                return true;
            }
            if let Some(mut nonsasl) = self.nonsasl.take() {
                let consumed = nonsasl.handle_iq(engine, elem);
                self.nonsasl = Some(nonsasl);
                return consumed;
            }
            false
        } else {
            false
        }
    }
}

/// Profile for `jabber:component:accept` streams (XEP-0114).
///
/// Authentication is a single message: the handshake digest is sent as
/// soon as the server's stream header (and with it the stream id)
/// arrives, and the echoed empty `<handshake/>` establishes the
/// connection.
pub struct ComponentProfile;

impl ComponentProfile {
    /// A fresh component profile.
    pub fn new() -> ComponentProfile {
        ComponentProfile
    }
}

impl Default for ComponentProfile {
    fn default() -> ComponentProfile {
        ComponentProfile::new()
    }
}

impl StreamProfile for ComponentProfile {
    fn default_ns(&self) -> &'static str {
        ns::COMPONENT
    }

    fn expects_stream_features(&self) -> bool {
        false
    }

    fn on_stream_start(&mut self, engine: &mut StreamEngine) {
        let sid = match engine.sid() {
            Some(sid) => sid,
            None => {
                log::warn!("component stream has no stream id");
                engine.disconnect_with(ConnectionError::Parse);
                return;
            }
        };
        let mut sha1 = Sha1::new();
        sha1.update(sid.as_bytes());
        sha1.update(engine.session.password.as_bytes());
        let digest = hex(&sha1.finalize());
        engine.send(
            Element::builder("handshake", ns::COMPONENT)
                .append(digest)
                .build(),
        );
    }

    fn handle_stream_child(&mut self, engine: &mut StreamEngine, elem: &Element) -> bool {
        if elem.is("handshake", ns::COMPONENT) {
            log::debug!("component handshake accepted");
            engine.set_authenticated();
            engine.notify_connected();
            true
        } else {
            false
        }
    }
}
