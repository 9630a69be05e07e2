// Copyright (c) 2025 xmpp-rs contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Blocking XML stream reader.
//!
//! Turns transport bytes into discrete stream events carrying parsed
//! [`minidom::Element`]s. This is a thin adapter around [`rxml`]; the
//! engine recreates it on every stream restart (after TLS, compression
//! and SASL success), which resets the parser state the same way
//! `tokio-xmpp`'s `RawXmlStream::reset_state` does.

use std::cell::RefCell;
use std::io::{self, BufRead, Read};
use std::rc::Rc;

use minidom::Element;
use rxml::Namespace;

use crate::error::ConnectionError;
use crate::ns;
use crate::transport::Transport;

/// Shared handle to the engine's transport; the reader borrows it for
/// the duration of a single `read` call.
pub(crate) type SharedTransport = Rc<RefCell<Box<dyn Transport>>>;

/// One event from the incoming XML stream.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    /// The server's `<stream:stream>` header.
    Start {
        /// The server-assigned stream id.
        id: Option<String>,
        /// The advertised stream version, if any.
        version: Option<String>,
    },
    /// A complete top-level child of the stream (stanza or nonza).
    Child(Element),
    /// The server closed the stream with `</stream:stream>`.
    Close,
}

/// `Read`/`BufRead` adapter over the shared transport.
pub(crate) struct TransportRead {
    transport: SharedTransport,
    buf: Vec<u8>,
    pos: usize,
}

impl TransportRead {
    fn new(transport: SharedTransport) -> TransportRead {
        TransportRead {
            transport,
            buf: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for TransportRead {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let data = self.fill_buf()?;
        let n = data.len().min(out.len());
        out[..n].copy_from_slice(&data[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for TransportRead {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.buf.len() {
            let mut chunk = [0u8; 4096];
            let n = self.transport.borrow_mut().read(&mut chunk)?;
            self.buf.clear();
            self.pos = 0;
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(&self.buf[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.buf.len());
    }
}

/// Reads stream events from the transport.
pub(crate) struct XmlReader {
    reader: rxml::Reader<TransportRead>,
    /// Open elements above the stream root, innermost last.
    stack: Vec<Element>,
    /// Whether the stream header has been seen.
    started: bool,
}

impl XmlReader {
    pub(crate) fn new(transport: SharedTransport) -> XmlReader {
        XmlReader {
            reader: rxml::Reader::new(TransportRead::new(transport)),
            stack: Vec::new(),
            started: false,
        }
    }

    /// Pull the next stream event.
    ///
    /// `Ok(None)` means the transport's read timeout expired before a
    /// full event arrived.
    pub(crate) fn read_event(&mut self) -> Result<Option<StreamEvent>, ConnectionError> {
        loop {
            let event = match self.reader.next() {
                None => return Err(ConnectionError::Io(io::ErrorKind::UnexpectedEof)),
                Some(Err(e)) => return self.map_read_error(e),
                Some(Ok(event)) => event,
            };
            match event {
                rxml::Event::XmlDeclaration(_, _) => (),
                rxml::Event::StartElement(_, (elem_ns, name), mut attrs) => {
                    if !self.started {
                        if elem_ns != ns::STREAM || name != "stream" {
                            log::warn!("unexpected stream root <{}>", name);
                            return Err(ConnectionError::Parse);
                        }
                        let id = attrs
                            .remove(Namespace::none(), "id")
                            .map(|v| v.to_string());
                        let version = attrs
                            .remove(Namespace::none(), "version")
                            .map(|v| v.to_string());
                        self.started = true;
                        return Ok(Some(StreamEvent::Start { id, version }));
                    }
                    self.stack.push(build_element(elem_ns, name.to_string(), attrs));
                }
                rxml::Event::Text(_, text) => {
                    match self.stack.last_mut() {
                        Some(parent) => parent.append_text_node(text.to_string()),
                        // Whitespace keepalive between stanzas.
                        None => (),
                    }
                }
                rxml::Event::EndElement(_) => match self.stack.pop() {
                    None => return Ok(Some(StreamEvent::Close)),
                    Some(elem) => {
                        if let Some(parent) = self.stack.last_mut() {
                            parent.append_child(elem);
                        } else {
                            return Ok(Some(StreamEvent::Child(elem)));
                        }
                    }
                },
            }
        }
    }

    fn map_read_error(&self, e: io::Error) -> Result<Option<StreamEvent>, ConnectionError> {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Ok(None),
            _ => {
                let is_xml = e
                    .get_ref()
                    .map(|inner| inner.downcast_ref::<rxml::Error>().is_some())
                    .unwrap_or(false);
                if is_xml {
                    log::warn!("stream is not well-formed: {}", e);
                    Err(ConnectionError::Parse)
                } else {
                    Err(e.into())
                }
            }
        }
    }
}

/// Build a (childless) element from a start-tag event.
fn build_element(elem_ns: Namespace, name: String, attrs: rxml::AttrMap) -> Element {
    let mut builder = Element::builder(name, elem_ns.to_string());
    for ((attr_ns, attr_name), value) in attrs.into_iter() {
        let key = if attr_ns == *Namespace::none() {
            attr_name.to_string()
        } else if attr_ns == *Namespace::xml() {
            format!("xml:{}", attr_name)
        } else {
            log::trace!("dropping foreign-namespace attribute {}", attr_name);
            continue;
        };
        builder = builder.attr(key.as_str(), value.to_string());
    }
    builder.build()
}
