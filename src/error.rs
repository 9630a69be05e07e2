// Copyright (c) 2025 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error vocabularies of the stream engine.
//!
//! No error in this module is ever raised as a panic; everything surfaces
//! through listener callbacks, return values or the post-failure accessors
//! on the engine.

use core::fmt;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io;

use minidom::Element;

use crate::ns;

/// Reason for a terminated (or never established) connection.
///
/// This is what [`ConnectionListener::on_disconnect`] receives and what the
/// blocking receive loop returns.
///
/// [`ConnectionListener::on_disconnect`]: crate::ConnectionListener::on_disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The user or application called `disconnect()`.
    UserDisconnected,
    /// An operation required an established connection.
    NotConnected,
    /// The server host could not be resolved.
    Dns,
    /// The server actively refused the connection.
    ConnectionRefused,
    /// An I/O error on the underlying transport.
    Io(io::ErrorKind),
    /// The incoming byte stream was not well-formed XML.
    Parse,
    /// The stream header carried no `version` attribute.
    StreamVersion,
    /// The server closed the stream with `</stream:stream>`.
    StreamClosed,
    /// The server sent a `<stream:error/>`; details are available through
    /// the engine's `stream_error()` accessor.
    StreamError(StreamErrorCondition),
    /// The TLS handshake failed, or a connection listener vetoed the
    /// certificate.
    TlsFailed,
    /// TLS was required by policy but the server did not offer StartTLS.
    TlsNotAvailable,
    /// The server rejected stream compression.
    CompressionFailed,
    /// Authentication failed; details are available through the engine's
    /// `auth_failure()` accessor.
    AuthenticationFailed(AuthFailure),
    /// Neither a supported SASL mechanism nor legacy authentication was
    /// available.
    NoSupportedAuth,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionError::UserDisconnected => write!(fmt, "disconnected on user request"),
            ConnectionError::NotConnected => write!(fmt, "not connected"),
            ConnectionError::Dns => write!(fmt, "server could not be resolved"),
            ConnectionError::ConnectionRefused => write!(fmt, "connection refused"),
            ConnectionError::Io(kind) => write!(fmt, "IO error: {:?}", kind),
            ConnectionError::Parse => write!(fmt, "stream was not well-formed"),
            ConnectionError::StreamVersion => write!(fmt, "missing stream version"),
            ConnectionError::StreamClosed => write!(fmt, "stream closed by the server"),
            ConnectionError::StreamError(c) => write!(fmt, "stream error: {}", c),
            ConnectionError::TlsFailed => write!(fmt, "TLS handshake failed"),
            ConnectionError::TlsNotAvailable => write!(fmt, "TLS required but not available"),
            ConnectionError::CompressionFailed => write!(fmt, "stream compression failed"),
            ConnectionError::AuthenticationFailed(f) => {
                write!(fmt, "authentication failed: {}", f)
            }
            ConnectionError::NoSupportedAuth => {
                write!(fmt, "no supported authentication mechanism offered")
            }
        }
    }
}

impl StdError for ConnectionError {}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => ConnectionError::ConnectionRefused,
            kind => ConnectionError::Io(kind),
        }
    }
}

/// Stream error conditions defined in RFC 3920 § 4.7.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorCondition {
    /// The entity has sent XML that cannot be processed.
    BadFormat,
    /// An unsupported (or missing but required) namespace prefix.
    BadNamespacePrefix,
    /// A new stream for this entity conflicts with this one.
    Conflict,
    /// The peer has not responded to traffic for some time.
    ConnectionTimeout,
    /// The addressed FQDN is no longer serviced by this entity.
    HostGone,
    /// The addressed FQDN is not serviced by this entity.
    HostUnknown,
    /// A stanza violated the addressing rules.
    ImproperAddressing,
    /// A misconfiguration or other internal server error.
    InternalServerError,
    /// The `from` attribute does not match an authorized JID.
    InvalidFrom,
    /// The stream id or dialback id is invalid or expired.
    InvalidId,
    /// The stream or content namespace is not supported.
    InvalidNamespace,
    /// The entity has sent invalid XML to a validating server.
    InvalidXml,
    /// The entity attempted something it was not authorized for.
    NotAuthorized,
    /// A local service policy was violated.
    PolicyViolation,
    /// The server could not connect to the authoritative remote server.
    RemoteConnectionFailed,
    /// The server lacks the resources to service the stream.
    ResourceConstraint,
    /// The entity has sent restricted XML features (comments, PIs, …).
    RestrictedXml,
    /// The entity should connect to another host instead.
    SeeOtherHost,
    /// The server is being shut down.
    SystemShutdown,
    /// An error not covered by the other conditions.
    UndefinedCondition,
    /// An encoding other than UTF-8 was used.
    UnsupportedEncoding,
    /// A first-level child the server does not understand.
    UnsupportedStanzaType,
    /// The requested stream version is not supported.
    UnsupportedVersion,
    /// The stream is not well-formed XML.
    XmlNotWellFormed,
}

impl StreamErrorCondition {
    fn from_name(name: &str) -> Option<StreamErrorCondition> {
        use StreamErrorCondition::*;
        Some(match name {
            "bad-format" => BadFormat,
            "bad-namespace-prefix" => BadNamespacePrefix,
            "conflict" => Conflict,
            "connection-timeout" => ConnectionTimeout,
            "host-gone" => HostGone,
            "host-unknown" => HostUnknown,
            "improper-addressing" => ImproperAddressing,
            "internal-server-error" => InternalServerError,
            "invalid-from" => InvalidFrom,
            "invalid-id" => InvalidId,
            "invalid-namespace" => InvalidNamespace,
            "invalid-xml" => InvalidXml,
            "not-authorized" => NotAuthorized,
            "policy-violation" => PolicyViolation,
            "remote-connection-failed" => RemoteConnectionFailed,
            "resource-constraint" => ResourceConstraint,
            "restricted-xml" => RestrictedXml,
            "see-other-host" => SeeOtherHost,
            "system-shutdown" => SystemShutdown,
            "undefined-condition" => UndefinedCondition,
            "unsupported-encoding" => UnsupportedEncoding,
            "unsupported-stanza-type" => UnsupportedStanzaType,
            "unsupported-version" => UnsupportedVersion,
            "xml-not-well-formed" => XmlNotWellFormed,
            _ => return None,
        })
    }
}

impl fmt::Display for StreamErrorCondition {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{:?}", self)
    }
}

/// A parsed `<stream:error/>`.
///
/// Stream errors are always fatal; the engine stores the last one for
/// introspection after the disconnect notification.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamError {
    /// The defined condition, `UndefinedCondition` if the server sent
    /// none we recognise.
    pub condition: StreamErrorCondition,
    /// Human-readable texts, keyed by `xml:lang`.
    pub texts: BTreeMap<String, String>,
    /// An optional application-specific condition element.
    pub application_condition: Option<Element>,
}

impl StreamError {
    /// Parse a `<stream:error/>` element.
    pub fn from_element(elem: &Element) -> StreamError {
        let mut condition = StreamErrorCondition::UndefinedCondition;
        let mut texts = BTreeMap::new();
        let mut application_condition = None;
        for child in elem.children() {
            if child.is("text", ns::XMPP_STREAMS) {
                let lang = child.attr("xml:lang").unwrap_or("").to_string();
                texts.insert(lang, child.text());
            } else if child.has_ns(ns::XMPP_STREAMS) {
                if let Some(c) = StreamErrorCondition::from_name(child.name()) {
                    condition = c;
                }
            } else if application_condition.is_none() {
                application_condition = Some(child.clone());
            }
        }
        StreamError {
            condition,
            texts,
            application_condition,
        }
    }
}

/// Authentication failures, from either the SASL or the legacy
/// (XEP-0078) sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The authentication exchange was aborted.
    Aborted,
    /// The account is disabled.
    AccountDisabled,
    /// The credentials have expired.
    CredentialsExpired,
    /// Encryption is required before this mechanism may be used.
    EncryptionRequired,
    /// The base64 data sent was invalid.
    IncorrectEncoding,
    /// The authzid was invalid.
    InvalidAuthzid,
    /// The selected mechanism was invalid.
    InvalidMechanism,
    /// The request was malformed.
    MalformedRequest,
    /// The selected mechanism is weaker than the server allows.
    MechanismTooWeak,
    /// The credentials were not accepted.
    NotAuthorized,
    /// A temporary server-side failure; retrying later may succeed.
    TemporaryAuthFailure,
    /// Legacy authentication: the resource is already in use.
    Conflict,
    /// Legacy authentication: a required field was missing.
    NotAcceptable,
    /// The server gave no recognisable reason.
    Undefined,
}

impl AuthFailure {
    /// Map the defined condition inside a SASL `<failure/>`.
    pub(crate) fn from_sasl_failure(elem: &Element) -> AuthFailure {
        use AuthFailure::*;
        for child in elem.children() {
            let failure = match child.name() {
                "aborted" => Aborted,
                "account-disabled" => AccountDisabled,
                "credentials-expired" => CredentialsExpired,
                "encryption-required" => EncryptionRequired,
                "incorrect-encoding" => IncorrectEncoding,
                "invalid-authzid" => InvalidAuthzid,
                "invalid-mechanism" => InvalidMechanism,
                "malformed-request" => MalformedRequest,
                "mechanism-too-weak" => MechanismTooWeak,
                "not-authorized" => NotAuthorized,
                "temporary-auth-failure" => TemporaryAuthFailure,
                _ => continue,
            };
            return failure;
        }
        Undefined
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{:?}", self)
    }
}

/// Advisory errors from resource binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    /// The supplied resource violated the resource syntax.
    BadRequest,
    /// The client is not allowed to bind a resource.
    NotAllowed,
    /// The resource is already in use.
    Conflict,
    /// The error condition was missing or not recognised.
    Unknown,
}

impl BindError {
    pub(crate) fn from_stanza_error(elem: &Element) -> BindError {
        match stanza_error_condition(elem) {
            Some("bad-request") => BindError::BadRequest,
            Some("not-allowed") => BindError::NotAllowed,
            Some("conflict") => BindError::Conflict,
            _ => BindError::Unknown,
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{:?}", self)
    }
}

/// Advisory errors from session establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The server failed to create the session.
    InternalServerError,
    /// The client is not allowed to create a session.
    Forbidden,
    /// A session already exists for this resource.
    Conflict,
    /// The error condition was missing or not recognised.
    Unknown,
}

impl SessionError {
    pub(crate) fn from_stanza_error(elem: &Element) -> SessionError {
        match stanza_error_condition(elem) {
            Some("internal-server-error") => SessionError::InternalServerError,
            Some("forbidden") => SessionError::Forbidden,
            Some("conflict") => SessionError::Conflict,
            _ => SessionError::Unknown,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{:?}", self)
    }
}

/// Find the defined condition inside the `<error/>` child of a stanza.
pub(crate) fn stanza_error_condition(stanza: &Element) -> Option<&str> {
    let error = stanza
        .children()
        .find(|child| child.name() == "error")?;
    error
        .children()
        .find(|child| child.has_ns(ns::XMPP_STANZAS))
        .map(|child| child.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_error_with_text_and_app_condition() {
        let elem: Element = "<stream:error xmlns:stream='http://etherx.jabber.org/streams'>
            <system-shutdown xmlns='urn:ietf:params:xml:ns:xmpp-streams'/>
            <text xmlns='urn:ietf:params:xml:ns:xmpp-streams' xml:lang='en'>Going down</text>
            <maintenance xmlns='urn:example:maintenance'/>
        </stream:error>"
            .parse()
            .unwrap();
        let error = StreamError::from_element(&elem);
        assert_eq!(error.condition, StreamErrorCondition::SystemShutdown);
        assert_eq!(error.texts["en"], "Going down");
        let app = error.application_condition.unwrap();
        assert!(app.is("maintenance", "urn:example:maintenance"));
    }

    #[test]
    fn stream_error_without_condition() {
        let elem: Element =
            "<stream:error xmlns:stream='http://etherx.jabber.org/streams'/>"
                .parse()
                .unwrap();
        let error = StreamError::from_element(&elem);
        assert_eq!(error.condition, StreamErrorCondition::UndefinedCondition);
        assert!(error.texts.is_empty());
    }

    #[test]
    fn sasl_failure_condition() {
        let elem: Element = "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>
            <not-authorized/>
        </failure>"
            .parse()
            .unwrap();
        assert_eq!(
            AuthFailure::from_sasl_failure(&elem),
            AuthFailure::NotAuthorized
        );
    }

    #[test]
    fn bind_error_conditions() {
        let elem: Element = "<iq xmlns='jabber:client' type='error' id='bind1'>
            <error type='cancel'>
                <conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>
            </error>
        </iq>"
            .parse()
            .unwrap();
        assert_eq!(BindError::from_stanza_error(&elem), BindError::Conflict);
    }
}
