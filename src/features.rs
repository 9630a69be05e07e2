// Copyright (c) 2025 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parsing of `<stream:features/>` into a feature bitmask.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use minidom::Element;

use crate::ns;

/// The set of stream features advertised by the server.
///
/// Recomputed from scratch on every `<stream:features/>`, i.e. after each
/// stream restart following TLS or compression negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFeatures(u32);

impl StreamFeatures {
    /// Resource binding (RFC 6120 § 7).
    pub const BIND: StreamFeatures = StreamFeatures(1 << 0);
    /// Session establishment (RFC 3921 § 3).
    pub const SESSION: StreamFeatures = StreamFeatures(1 << 1);
    /// The SASL DIGEST-MD5 mechanism.
    pub const SASL_DIGEST_MD5: StreamFeatures = StreamFeatures(1 << 2);
    /// The SASL PLAIN mechanism.
    pub const SASL_PLAIN: StreamFeatures = StreamFeatures(1 << 3);
    /// The SASL ANONYMOUS mechanism.
    pub const SASL_ANONYMOUS: StreamFeatures = StreamFeatures(1 << 4);
    /// The SASL EXTERNAL mechanism.
    pub const SASL_EXTERNAL: StreamFeatures = StreamFeatures(1 << 5);
    /// StartTLS (RFC 6120 § 5).
    pub const STARTTLS: StreamFeatures = StreamFeatures(1 << 6);
    /// Legacy non-SASL authentication (XEP-0078).
    pub const IQ_AUTH: StreamFeatures = StreamFeatures(1 << 7);
    /// In-band registration (XEP-0077).
    pub const IQ_REGISTER: StreamFeatures = StreamFeatures(1 << 8);
    /// Legacy stanza acknowledgements.
    pub const ACK: StreamFeatures = StreamFeatures(1 << 9);
    /// Stream compression, method `zlib` (XEP-0138).
    pub const COMPRESS_ZLIB: StreamFeatures = StreamFeatures(1 << 10);
    /// Stream compression, method `lzw` (XEP-0229).
    pub const COMPRESS_DCLZ: StreamFeatures = StreamFeatures(1 << 11);

    /// No features at all.
    pub fn empty() -> StreamFeatures {
        StreamFeatures(0)
    }

    /// Whether all bits of `other` are present in `self`.
    pub fn has(self, other: StreamFeatures) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any SASL mechanism was advertised.
    pub fn has_sasl_mechanisms(self) -> bool {
        self.has(Self::SASL_DIGEST_MD5)
            || self.has(Self::SASL_PLAIN)
            || self.has(Self::SASL_ANONYMOUS)
            || self.has(Self::SASL_EXTERNAL)
    }

    /// Compute the bitmask from a `<stream:features/>` element.
    pub fn from_element(elem: &Element) -> StreamFeatures {
        let mut features = StreamFeatures::empty();
        for child in elem.children() {
            if child.is("bind", ns::BIND) {
                features |= Self::BIND;
            } else if child.is("session", ns::SESSION) {
                features |= Self::SESSION;
            } else if child.is("starttls", ns::TLS) {
                features |= Self::STARTTLS;
            } else if child.is("mechanisms", ns::SASL) {
                for mechanism in child.children() {
                    if mechanism.name() != "mechanism" {
                        continue;
                    }
                    match mechanism.text().as_str() {
                        "DIGEST-MD5" => features |= Self::SASL_DIGEST_MD5,
                        "PLAIN" => features |= Self::SASL_PLAIN,
                        "ANONYMOUS" => features |= Self::SASL_ANONYMOUS,
                        "EXTERNAL" => features |= Self::SASL_EXTERNAL,
                        other => log::trace!("ignoring SASL mechanism {}", other),
                    }
                }
            } else if child.is("compression", ns::COMPRESS_FEATURE) {
                for method in child.children() {
                    if method.name() != "method" {
                        continue;
                    }
                    match method.text().as_str() {
                        "zlib" => features |= Self::COMPRESS_ZLIB,
                        "lzw" => features |= Self::COMPRESS_DCLZ,
                        _ => (),
                    }
                }
            } else if child.is("auth", ns::IQ_AUTH_FEATURE) {
                features |= Self::IQ_AUTH;
            } else if child.is("register", ns::IQ_REGISTER_FEATURE) {
                features |= Self::IQ_REGISTER;
            } else if child.is("ack", ns::ACK_FEATURE) {
                features |= Self::ACK;
            }
        }
        features
    }
}

impl BitOr for StreamFeatures {
    type Output = StreamFeatures;

    fn bitor(self, rhs: StreamFeatures) -> StreamFeatures {
        StreamFeatures(self.0 | rhs.0)
    }
}

impl BitOrAssign for StreamFeatures {
    fn bitor_assign(&mut self, rhs: StreamFeatures) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for StreamFeatures {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{:#x}", self.0)
    }
}
