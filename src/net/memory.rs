//! In-process transport with a scripted remote side.
//!
//! `MemoryTransport` is the local end handed to the attachment layer;
//! `MemoryPeer` plays the remote end: it injects inbound events and records
//! everything the local end sent.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::net::transport::{
    CloseFrame, Message, ReadyState, Transport, TransportError, TransportEvent,
};

struct Shared {
    state: AtomicU8,
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: Mutex<Vec<Message>>,
    close_requests: Mutex<Vec<CloseFrame>>,
    pings: Mutex<Vec<Bytes>>,
    auto_pong: AtomicBool,
    ack_close: AtomicBool,
    terminated: AtomicBool,
    peer_addr: Option<SocketAddr>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn state(&self) -> ReadyState {
        ReadyState::from(self.state.load(Ordering::Acquire))
    }
}

/// Local end of an in-memory transport.
pub struct MemoryTransport {
    shared: Arc<Shared>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

/// Remote end of an in-memory transport.
#[derive(Clone)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// An already open pair. Pings are answered and closes acknowledged.
    pub fn pair() -> (Self, MemoryPeer) {
        Self::build(ReadyState::Open, None)
    }

    /// A pair whose local end is still connecting until `MemoryPeer::open`.
    pub fn connecting() -> (Self, MemoryPeer) {
        Self::build(ReadyState::Connecting, None)
    }

    /// An open pair reporting the given peer address.
    pub fn with_peer_addr(addr: SocketAddr) -> (Self, MemoryPeer) {
        Self::build(ReadyState::Open, Some(addr))
    }

    fn build(state: ReadyState, peer_addr: Option<SocketAddr>) -> (Self, MemoryPeer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(state as u8),
            events: tx,
            sent: Mutex::new(Vec::new()),
            close_requests: Mutex::new(Vec::new()),
            pings: Mutex::new(Vec::new()),
            auto_pong: AtomicBool::new(true),
            ack_close: AtomicBool::new(true),
            terminated: AtomicBool::new(false),
            peer_addr,
        });
        let transport = Self {
            shared: Arc::clone(&shared),
            events: Mutex::new(Some(rx)),
        };
        (transport, MemoryPeer { shared })
    }
}

impl Transport for MemoryTransport {
    fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    fn send(&self, message: Message) -> Result<(), TransportError> {
        match self.shared.state() {
            ReadyState::Open => {
                self.shared.sent.lock().expect("memory transport mutex poisoned").push(message);
                Ok(())
            }
            ReadyState::Connecting => Err(TransportError::NotReady),
            _ => Err(TransportError::Closed),
        }
    }

    fn ping(&self, payload: Bytes) -> Result<(), TransportError> {
        if self.shared.state() != ReadyState::Open {
            return Err(TransportError::Closed);
        }
        self.shared
            .pings
            .lock()
            .expect("memory transport mutex poisoned")
            .push(payload.clone());
        if self.shared.auto_pong.load(Ordering::SeqCst) {
            self.shared.emit(TransportEvent::Pong(payload));
        }
        Ok(())
    }

    fn close(&self, frame: Option<CloseFrame>) -> Result<(), TransportError> {
        match self.shared.state() {
            ReadyState::Closing | ReadyState::Closed => return Ok(()),
            _ => {}
        }
        let frame = frame.unwrap_or_else(|| CloseFrame::new(1000, ""));
        self.shared
            .close_requests
            .lock()
            .expect("memory transport mutex poisoned")
            .push(frame.clone());
        if self.shared.ack_close.load(Ordering::SeqCst) {
            self.shared.state.store(ReadyState::Closed as u8, Ordering::Release);
            self.shared.emit(TransportEvent::Close(frame));
        } else {
            self.shared.state.store(ReadyState::Closing as u8, Ordering::Release);
        }
        Ok(())
    }

    fn terminate(&self) {
        self.shared.state.store(ReadyState::Closed as u8, Ordering::Release);
        self.shared.terminated.store(true, Ordering::SeqCst);
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.lock().expect("memory transport mutex poisoned").take()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }
}

impl MemoryPeer {
    /// Finish opening a connecting transport.
    pub fn open(&self) {
        self.shared.state.store(ReadyState::Open as u8, Ordering::Release);
        self.shared.emit(TransportEvent::Open);
    }

    pub fn text(&self, text: impl Into<String>) {
        self.shared.emit(TransportEvent::Text(text.into()));
    }

    pub fn binary(&self, data: impl Into<Bytes>) {
        self.shared.emit(TransportEvent::Binary(data.into()));
    }

    /// An unsolicited pong with an empty payload.
    pub fn pong(&self) {
        self.pong_with(Bytes::new());
    }

    pub fn pong_with(&self, payload: impl Into<Bytes>) {
        self.shared.emit(TransportEvent::Pong(payload.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.shared.emit(TransportEvent::Error(message.into()));
    }

    /// Close from the remote side.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.shared.state.store(ReadyState::Closed as u8, Ordering::Release);
        self.shared.emit(TransportEvent::Close(CloseFrame::new(code, reason)));
    }

    /// Answer pings automatically (default: on).
    pub fn set_auto_pong(&self, enabled: bool) {
        self.shared.auto_pong.store(enabled, Ordering::SeqCst);
    }

    /// Acknowledge close requests immediately (default: on).
    pub fn set_ack_close(&self, enabled: bool) {
        self.shared.ack_close.store(enabled, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.shared.sent.lock().expect("memory transport mutex poisoned").clone()
    }

    pub fn close_requests(&self) -> Vec<CloseFrame> {
        self.shared
            .close_requests
            .lock()
            .expect("memory transport mutex poisoned")
            .clone()
    }

    pub fn ping_count(&self) -> usize {
        self.shared.pings.lock().expect("memory transport mutex poisoned").len()
    }

    /// Payload of the most recent ping.
    pub fn last_ping(&self) -> Option<Bytes> {
        self.shared
            .pings
            .lock()
            .expect("memory transport mutex poisoned")
            .last()
            .cloned()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    /// Whether the local end dropped the connection without a close handshake.
    pub fn terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }
}
