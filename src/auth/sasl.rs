// Copyright (c) 2025 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SASL mechanism payloads.
//!
//! Only the mechanism computations live here; the element framing
//! (`<auth/>`, `<response/>`) is done by the client profile.

use std::collections::HashMap;

use md5::{Digest, Md5};
use rand::Rng;

use crate::auth::hex;

/// Parse a DIGEST-MD5 challenge into its key=value fields.
///
/// Values may be quoted and quoted values may contain commas.
pub(crate) fn parse_challenge(challenge: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut rest = challenge.trim();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().to_string();
        rest = &rest[eq + 1..];
        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            let Some(end) = stripped.find('"') else { break };
            value = stripped[..end].to_string();
            rest = stripped[end + 1..].trim_start_matches(',');
        } else {
            match rest.find(',') {
                Some(comma) => {
                    value = rest[..comma].trim().to_string();
                    rest = &rest[comma + 1..];
                }
                None => {
                    value = rest.trim().to_string();
                    rest = "";
                }
            }
        }
        fields.insert(key, value);
    }
    fields
}

fn md5_digest(data: &[u8]) -> [u8; 16] {
    let mut md5 = Md5::new();
    md5.update(data);
    md5.finalize().into()
}

/// The RFC 2831 `response` value for qop `auth` and nc `00000001`.
pub(crate) fn digest_md5_response(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    cnonce: &str,
    digest_uri: &str,
) -> String {
    let mut a1 = Vec::new();
    a1.extend_from_slice(&md5_digest(
        format!("{}:{}:{}", username, realm, password).as_bytes(),
    ));
    a1.extend_from_slice(format!(":{}:{}", nonce, cnonce).as_bytes());
    let ha1 = hex(&md5_digest(&a1));
    let ha2 = hex(&md5_digest(format!("AUTHENTICATE:{}", digest_uri).as_bytes()));
    let kd = format!("{}:{}:00000001:{}:auth:{}", ha1, nonce, cnonce, ha2);
    hex(&md5_digest(kd.as_bytes()))
}

/// The full field list sent in reply to a DIGEST-MD5 challenge.
pub(crate) fn digest_md5_reply(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    cnonce: &str,
    server: &str,
) -> String {
    let digest_uri = format!("xmpp/{}", server);
    let response = digest_md5_response(username, password, realm, nonce, cnonce, &digest_uri);
    format!(
        "username=\"{}\",realm=\"{}\",nonce=\"{}\",cnonce=\"{}\",nc=00000001,\
         qop=auth,digest-uri=\"{}\",response={},charset=utf-8",
        username, realm, nonce, cnonce, digest_uri, response
    )
}

/// A fresh client nonce.
pub(crate) fn cnonce() -> String {
    let mut rng = rand::thread_rng();
    format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>())
}

/// The PLAIN (RFC 4616) initial response:
/// `[authzid] NUL authcid NUL passwd`.
pub(crate) fn plain(authzid: Option<&str>, username: &str, password: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    if let Some(authzid) = authzid {
        payload.extend_from_slice(authzid.as_bytes());
    }
    payload.push(0);
    payload.extend_from_slice(username.as_bytes());
    payload.push(0);
    payload.extend_from_slice(password.as_bytes());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_fields() {
        let fields = parse_challenge(
            "realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\",\
             algorithm=md5-sess,charset=utf-8",
        );
        assert_eq!(fields["realm"], "elwood.innosoft.com");
        assert_eq!(fields["nonce"], "OA6MG9tEQGm2hh");
        assert_eq!(fields["qop"], "auth");
        assert_eq!(fields["algorithm"], "md5-sess");
    }

    #[test]
    fn challenge_final_round() {
        let fields = parse_challenge("rspauth=ea40f60335c427b5527b84dbabcdfffd");
        assert!(fields.contains_key("rspauth"));
    }

    // The example from RFC 2831 § 4.
    #[test]
    fn rfc2831_reference_response() {
        let response = digest_md5_response(
            "chris",
            "secret",
            "elwood.innosoft.com",
            "OA6MG9tEQGm2hh",
            "OA6MHXh6VqTrRk",
            "imap/elwood.innosoft.com",
        );
        assert_eq!(response, "d388dad90d4bbd760a152321f2143af7");
    }

    #[test]
    fn reply_carries_all_fields() {
        let reply = digest_md5_reply(
            "juliet",
            "s3crit",
            "capulet.example",
            "nonce123",
            "cnonce456",
            "capulet.example",
        );
        assert!(reply.contains("username=\"juliet\""));
        assert!(reply.contains("digest-uri=\"xmpp/capulet.example\""));
        assert!(reply.contains("nc=00000001"));
        assert!(reply.contains("qop=auth"));
        assert!(reply.contains("charset=utf-8"));
        assert!(!reply.contains("s3crit"));
    }

    #[test]
    fn plain_payload() {
        assert_eq!(plain(None, "user", "pass"), b"\0user\0pass");
        assert_eq!(
            plain(Some("other@example"), "user", "pass"),
            b"other@example\0user\0pass"
        );
    }

    #[test]
    fn cnonce_is_unpredictable_enough() {
        let a = cnonce();
        let b = cnonce();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
