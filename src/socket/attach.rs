//! One-shot binding of a facade socket to a live transport.
//!
//! # Responsibilities
//! - Refuse a second binding for the same facade
//! - Fire `Open` synchronously when the transport is already open
//! - Replay a close requested before attachment, right after `Open`
//! - Forward transport events to the facade, translating text/binary framing
//!
//! # Design Decisions
//! - Exactly one forwarding task per attachment; it owns the transport's
//!   event receiver, which preserves per-connection ordering
//! - Liveness acknowledgments wake health probes instead of reaching the app

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::net::transport::{CloseFrame, ReadyState, Transport, TransportEvent};
use crate::socket::event::{BinaryType, MessageData, SocketEvent};
use crate::socket::facade::{FacadeSocket, SocketId};

/// Attachment failures. Both indicate a programming error in the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("socket {0} is already attached to a transport")]
    AlreadyAttached(SocketId),

    #[error("transport events were already taken by another subscriber")]
    EventsUnavailable,
}

/// Bind `transport` to `socket` and start delivering its events.
///
/// Must be called from within a Tokio runtime.
pub fn attach(socket: &FacadeSocket, transport: Arc<dyn Transport>) -> Result<(), AttachError> {
    let inner = &socket.inner;
    if inner.transport.get().is_some() {
        return Err(AttachError::AlreadyAttached(inner.id));
    }
    let events = transport.take_events().ok_or(AttachError::EventsUnavailable)?;

    let mut pending = {
        let mut slot = inner.pending_close.lock().expect("socket close mutex poisoned");
        inner
            .transport
            .set(Arc::clone(&transport))
            .map_err(|_| AttachError::AlreadyAttached(inner.id))?;
        slot.take()
    };

    tracing::debug!(
        socket = %inner.id,
        ready_state = ?transport.ready_state(),
        binary_type = ?socket.binary_type(),
        deferred_close = pending.is_some(),
        "Socket attached"
    );

    if transport.ready_state() == ReadyState::Open {
        open(socket, &mut pending);
    }

    tokio::spawn(forward(socket.clone(), events, pending));
    Ok(())
}

fn open(socket: &FacadeSocket, pending: &mut Option<CloseFrame>) {
    if !socket.mark_open() {
        return;
    }
    if let Some(frame) = pending.take() {
        if let Err(e) = socket.close_with(frame.code, frame.reason) {
            tracing::warn!(socket = %socket.id(), error = %e, "Deferred close failed");
        }
    }
}

async fn forward(
    socket: FacadeSocket,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut pending: Option<CloseFrame>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Open => open(&socket, &mut pending),
            TransportEvent::Text(text) => {
                socket.touch();
                socket.emit(SocketEvent::Message(MessageData::Text(text)));
            }
            TransportEvent::Binary(data) => {
                socket.touch();
                let data = match socket.binary_type() {
                    BinaryType::Bytes => MessageData::Binary(data),
                    BinaryType::Buffer => MessageData::Buffer(data.to_vec()),
                };
                socket.emit(SocketEvent::Message(data));
            }
            TransportEvent::Pong(payload) => {
                // Probe acknowledgments are not activity; idle eviction ignores them.
                if !socket.acknowledge_pong(&payload) {
                    tracing::debug!(socket = %socket.id(), "Ignoring unsolicited pong");
                }
            }
            TransportEvent::Error(message) => {
                tracing::debug!(socket = %socket.id(), error = %message, "Transport error");
                socket.emit(SocketEvent::Error(message));
            }
            TransportEvent::Close(frame) => {
                socket.mark_closed(frame);
                return;
            }
        }
    }
    socket.mark_closed(CloseFrame::abnormal());
}
