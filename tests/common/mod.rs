//! Scripted transport for driving the engine without a network.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use sync_xmpp::error::ConnectionError;
use sync_xmpp::{StreamEngine, TlsInfo, Transport};

/// Observable state shared between the test and the engine-owned
/// transport.
#[derive(Default)]
pub struct MockState {
    /// Chunks served to the engine, in order. An empty queue reads as a
    /// timeout.
    pub script: VecDeque<Vec<u8>>,
    /// Everything the engine wrote.
    pub written: Vec<u8>,
    pub connected: bool,
    pub secure: bool,
    pub compressed: bool,
    pub has_client_certificate: bool,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new() -> (MockTransport, Rc<RefCell<MockState>>) {
        let state = Rc::new(RefCell::new(MockState::default()));
        (
            MockTransport {
                state: state.clone(),
            },
            state,
        )
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, _server: &str, _port: u16) -> Result<(), ConnectionError> {
        self.state.borrow_mut().connected = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        match state.script.front_mut() {
            None => Err(io::Error::new(io::ErrorKind::WouldBlock, "script empty")),
            Some(chunk) => {
                let n = buf.len().min(chunk.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                chunk.drain(..n);
                if chunk.is_empty() {
                    state.script.pop_front();
                }
                state.bytes_received += n as u64;
                Ok(n)
            }
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.written.extend_from_slice(buf);
        state.bytes_sent += buf.len() as u64;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn set_read_timeout(&mut self, _timeout: Option<Duration>) {}

    fn start_tls(&mut self, _domain: &str) -> Result<TlsInfo, ConnectionError> {
        self.state.borrow_mut().secure = true;
        Ok(TlsInfo {
            peer_certificate: Some(vec![0x30, 0x82]),
        })
    }

    fn is_secure(&self) -> bool {
        self.state.borrow().secure
    }

    fn supports_compression(&self) -> bool {
        true
    }

    fn set_compression(&mut self, enable: bool) -> bool {
        self.state.borrow_mut().compressed = enable;
        true
    }

    fn is_compressed(&self) -> bool {
        self.state.borrow().compressed
    }

    fn has_client_certificate(&self) -> bool {
        self.state.borrow().has_client_certificate
    }

    fn bytes_sent(&self) -> u64 {
        self.state.borrow().bytes_sent
    }

    fn bytes_received(&self) -> u64 {
        self.state.borrow().bytes_received
    }
}

/// Enable `RUST_LOG`-controlled logging for a test run.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Queue one chunk of server-to-client bytes.
pub fn feed(state: &Rc<RefCell<MockState>>, xml: &str) {
    state.borrow_mut().script.push_back(xml.as_bytes().to_vec());
}

/// Take and return everything written since the last call.
pub fn take_written(state: &Rc<RefCell<MockState>>) -> String {
    let bytes = std::mem::take(&mut state.borrow_mut().written);
    String::from_utf8(bytes).expect("engine wrote invalid utf-8")
}

/// Drive the engine until the scripted input is exhausted.
pub fn drain(engine: &mut StreamEngine) -> Result<(), ConnectionError> {
    for _ in 0..64 {
        engine.recv(Some(Duration::from_millis(1)))?;
    }
    Ok(())
}

/// Lowercase hex, for expected digests.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// The usual client stream header from the server.
pub fn server_header(id: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream xmlns='jabber:client' \
         xmlns:stream='http://etherx.jabber.org/streams' from='example.net' \
         id='{}' version='1.0'>",
        id
    )
}
