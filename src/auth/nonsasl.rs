// Copyright (c) 2025 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Legacy non-SASL authentication (XEP-0078).
//!
//! Two IQ round trips: field discovery, then the actual login with
//! either the SHA-1 stream digest or the plaintext password.

use digest::Digest;
use minidom::Element;
use sha1::Sha1;

use crate::auth::hex;
use crate::engine::StreamEngine;
use crate::error::{stanza_error_condition, AuthFailure};
use crate::ns;

/// Which round of the exchange a tracked id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Round {
    RequestAuthFields,
    SendAuth,
}

/// Driver for one legacy login attempt.
pub(crate) struct NonSaslAuth {
    pending: Option<(String, Round)>,
}

impl NonSaslAuth {
    pub(crate) fn new() -> NonSaslAuth {
        NonSaslAuth { pending: None }
    }

    /// `hex(SHA1(sid + password))`, the digest of XEP-0078 § 3.
    pub(crate) fn digest(sid: &str, password: &str) -> String {
        let mut sha1 = Sha1::new();
        sha1.update(sid.as_bytes());
        sha1.update(password.as_bytes());
        hex(&sha1.finalize())
    }

    /// Send the field-discovery `get`.
    pub(crate) fn start(&mut self, engine: &mut StreamEngine) {
        let id = engine.next_id();
        let username = engine.username().unwrap_or_default();
        let iq = Element::builder("iq", engine.default_ns())
            .attr("type", "get")
            .attr("id", id.as_str())
            .attr("to", engine.jid().domain().to_string())
            .append(
                Element::builder("query", ns::AUTH)
                    .append(Element::builder("username", ns::AUTH).append(username)),
            )
            .build();
        self.pending = Some((id, Round::RequestAuthFields));
        engine.send(iq);
    }

    /// Offer an incoming IQ to the exchange; returns whether it was
    /// consumed.
    pub(crate) fn handle_iq(&mut self, engine: &mut StreamEngine, iq: &Element) -> bool {
        let Some((id, round)) = self.pending.clone() else {
            return false;
        };
        if iq.attr("id") != Some(id.as_str()) {
            return false;
        }
        self.pending = None;
        match round {
            Round::RequestAuthFields => self.send_auth(engine, iq),
            Round::SendAuth => finish(engine, iq),
        }
        true
    }

    fn send_auth(&mut self, engine: &mut StreamEngine, fields: &Element) {
        if fields.attr("type") == Some("error") {
            fail(engine, fields);
            return;
        }
        let username = engine.username().unwrap_or_default();
        let resource = match engine.jid().resource() {
            Some(resource) => resource.to_string(),
            None => "sync-xmpp".to_string(),
        };
        let offers_digest = fields
            .get_child("query", ns::AUTH)
            .map(|query| query.has_child("digest", ns::AUTH))
            .unwrap_or(false);

        let mut query = Element::builder("query", ns::AUTH)
            .append(Element::builder("username", ns::AUTH).append(username))
            .append(Element::builder("resource", ns::AUTH).append(resource));
        match engine.sid() {
            Some(sid) if offers_digest => {
                let digest = Self::digest(&sid, engine.password());
                query = query.append(Element::builder("digest", ns::AUTH).append(digest));
            }
            _ => {
                query = query
                    .append(Element::builder("password", ns::AUTH).append(engine.password()));
            }
        }

        let id = engine.next_id();
        let iq = Element::builder("iq", engine.default_ns())
            .attr("type", "set")
            .attr("id", id.as_str())
            .attr("to", engine.jid().domain().to_string())
            .append(query)
            .build();
        self.pending = Some((id, Round::SendAuth));
        engine.send(iq);
    }
}

fn finish(engine: &mut StreamEngine, iq: &Element) {
    match iq.attr("type") {
        Some("result") => {
            log::debug!("legacy authentication successful");
            engine.set_authenticated();
            engine.notify_connected();
        }
        _ => fail(engine, iq),
    }
}

fn fail(engine: &mut StreamEngine, iq: &Element) {
    let failure = match stanza_error_condition(iq) {
        Some("conflict") => AuthFailure::Conflict,
        Some("not-acceptable") => AuthFailure::NotAcceptable,
        Some("not-authorized") => AuthFailure::NotAuthorized,
        _ => match legacy_error_code(iq) {
            Some("409") => AuthFailure::Conflict,
            Some("406") => AuthFailure::NotAcceptable,
            Some("401") => AuthFailure::NotAuthorized,
            _ => AuthFailure::Undefined,
        },
    };
    engine.fail_auth(failure);
}

fn legacy_error_code(iq: &Element) -> Option<&str> {
    iq.children()
        .find(|child| child.name() == "error")
        .and_then(|error| error.attr("code"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_sha1_of_sid_and_password() {
        // Same fixture as the component handshake: SHA1("sid123456").
        assert_eq!(
            NonSaslAuth::digest("sid", "123456"),
            "9accec263ab84a43c6037ccf7cd48cb1d3f6df8e"
        );
    }

    #[test]
    fn error_code_mapping() {
        let iq: Element = "<iq xmlns='jabber:client' type='error' id='uid2'>
            <error code='409'>Conflict</error>
        </iq>"
            .parse()
            .unwrap();
        assert_eq!(legacy_error_code(&iq), Some("409"));
    }
}
