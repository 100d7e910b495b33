//! Facade-level event and payload types.

use bytes::Bytes;
use serde::Serialize;

use crate::net::transport::{CloseFrame, Message};

/// Lifecycle state of a facade socket.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for SocketState {
    fn from(val: u8) -> Self {
        match val {
            0 => SocketState::Connecting,
            1 => SocketState::Open,
            2 => SocketState::Closing,
            _ => SocketState::Closed,
        }
    }
}

/// How binary frames are surfaced in message events.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryType {
    /// Shared, reference counted `Bytes`.
    #[default]
    Bytes = 0,
    /// An owned `Vec<u8>` the handler may mutate in place.
    Buffer = 1,
}

impl From<u8> for BinaryType {
    fn from(val: u8) -> Self {
        match val {
            1 => BinaryType::Buffer,
            _ => BinaryType::Bytes,
        }
    }
}

/// Payload of a message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    Text(String),
    Binary(Bytes),
    Buffer(Vec<u8>),
}

impl MessageData {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageData::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MessageData::Text(text) => text.len(),
            MessageData::Binary(data) => data.len(),
            MessageData::Buffer(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<MessageData> for Message {
    fn from(data: MessageData) -> Self {
        match data {
            MessageData::Text(text) => Message::Text(text),
            MessageData::Binary(data) => Message::Binary(data),
            MessageData::Buffer(data) => Message::Binary(Bytes::from(data)),
        }
    }
}

/// Events delivered to the application, only ever after attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(MessageData),
    Error(String),
    Close(CloseFrame),
}
