//! Transport handle abstraction.
//!
//! # Responsibilities
//! - Describe the primitives a live bidirectional stream must offer
//!   (send, ping, close, readiness, one-shot event subscription)
//! - Define the outbound message and close-frame vocabulary
//!
//! # Design Decisions
//! - Object safe: the attachment layer holds `Arc<dyn Transport>`
//! - Sends are non-blocking enqueues; I/O happens on the transport's own tasks
//! - Events are handed out once through `take_events`, so a transport can only
//!   ever feed a single facade

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc;

/// Standard close codes used by the gateway.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const NO_STATUS: u16 = 1005;
    pub const ABNORMAL: u16 = 1006;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

/// Readiness of a transport.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for ReadyState {
    fn from(val: u8) -> Self {
        match val {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Close code and reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Frame reported when the stream ends without a close handshake.
    pub fn abnormal() -> Self {
        Self::new(close_code::ABNORMAL, "")
    }
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::Binary(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(Bytes::from(data))
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Message::Binary(Bytes::copy_from_slice(data))
    }
}

/// Notifications produced by a transport, in the order it observed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Text(String),
    Binary(Bytes),
    Pong(Bytes),
    Error(String),
    Close(CloseFrame),
}

/// Errors returned by transport primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport is closing or closed.
    #[error("transport is closed")]
    Closed,

    /// The transport has not finished opening.
    #[error("transport is not open yet")]
    NotReady,
}

/// A live bidirectional message stream.
pub trait Transport: Send + Sync + 'static {
    fn ready_state(&self) -> ReadyState;

    fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Send a liveness probe. The acknowledgment arrives as `TransportEvent::Pong`.
    fn ping(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Request a close handshake. Closing an already closing transport is a no-op.
    fn close(&self, frame: Option<CloseFrame>) -> Result<(), TransportError>;

    /// Drop the connection without waiting for the peer, even mid close
    /// handshake. No further events are delivered.
    fn terminate(&self);

    /// Take the event stream. Returns `None` once it has been taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}
