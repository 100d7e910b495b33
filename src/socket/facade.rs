//! The facade socket handed to application code.
//!
//! # Responsibilities
//! - Exist and be usable before any transport is bound
//! - Gate `send` on the open state
//! - Defer a pre-attachment `close` until the socket has opened
//! - Fan transport events out to the application in transport order
//!
//! # Design Decisions
//! - The transport binding is a crate-private `OnceLock`; application code
//!   cannot read or forge it, and a second bind fails by construction
//! - Events travel over an unbounded channel; nothing is buffered before
//!   attachment because nothing can be produced before attachment

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::net::connection::ConnectionId;
use crate::net::transport::{close_code, CloseFrame, Message, Transport, TransportError};
use crate::socket::event::{BinaryType, SocketEvent, SocketState};

static SOCKET_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a facade socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u64);

impl SocketId {
    fn next() -> Self {
        Self(SOCKET_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sock-{}", self.0)
    }
}

/// Usage errors on a facade socket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    #[error("socket is not attached to a transport")]
    NotAttached,

    #[error("socket is not open (state: {0:?})")]
    NotOpen(SocketState),

    #[error("socket is already registered as {0}")]
    AlreadyRegistered(ConnectionId),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub(super) struct SocketInner {
    pub(super) id: SocketId,
    state: AtomicU8,
    binary_type: AtomicU8,
    pub(super) transport: OnceLock<Arc<dyn Transport>>,
    /// Close requested before attachment. The lock also serializes attachment
    /// against `close`, so a deferred close can't slip between the two.
    pub(super) pending_close: Mutex<Option<CloseFrame>>,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SocketEvent>>,
    last_activity: Mutex<Instant>,
    /// Outstanding pings, keyed by payload.
    pongs: Mutex<HashMap<Bytes, oneshot::Sender<()>>>,
    closed: watch::Sender<bool>,
    connection_id: OnceLock<ConnectionId>,
}

/// A transport-agnostic socket with open/message/error/close events.
#[derive(Clone)]
pub struct FacadeSocket {
    pub(super) inner: Arc<SocketInner>,
}

impl FacadeSocket {
    /// Create a socket in the `Connecting` state. No events fire until attachment.
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(SocketInner {
                id: SocketId::next(),
                state: AtomicU8::new(SocketState::Connecting as u8),
                binary_type: AtomicU8::new(BinaryType::default() as u8),
                transport: OnceLock::new(),
                pending_close: Mutex::new(None),
                events_tx,
                events_rx: tokio::sync::Mutex::new(events_rx),
                last_activity: Mutex::new(Instant::now()),
                pongs: Mutex::new(HashMap::new()),
                closed,
                connection_id: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> SocketId {
        self.inner.id
    }

    pub fn state(&self) -> SocketState {
        SocketState::from(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_attached(&self) -> bool {
        self.inner.transport.get().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SocketState::Closed
    }

    pub fn binary_type(&self) -> BinaryType {
        BinaryType::from(self.inner.binary_type.load(Ordering::Acquire))
    }

    /// Choose how binary frames are delivered. Before attachment the choice
    /// is staged and takes effect when the transport is bound.
    pub fn set_binary_type(&self, binary_type: BinaryType) {
        self.inner.binary_type.store(binary_type as u8, Ordering::Release);
    }

    /// The connection ID, once the connection manager has registered this socket.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.inner.connection_id.get().copied()
    }

    pub fn last_activity(&self) -> Instant {
        *self.inner.last_activity.lock().expect("socket activity mutex poisoned")
    }

    /// Send a message. Fails unless the socket is attached and open.
    pub fn send(&self, message: impl Into<Message>) -> Result<(), SocketError> {
        let transport = self.inner.transport.get().ok_or(SocketError::NotAttached)?;
        let state = self.state();
        if state != SocketState::Open {
            return Err(SocketError::NotOpen(state));
        }
        transport.send(message.into())?;
        self.touch();
        Ok(())
    }

    /// Close with a normal close code.
    pub fn close(&self) -> Result<(), SocketError> {
        self.close_with(close_code::NORMAL, "")
    }

    /// Close with a code and reason.
    ///
    /// Before attachment this never fails: the close is remembered and
    /// replayed right after the socket opens.
    pub fn close_with(&self, code: u16, reason: impl Into<String>) -> Result<(), SocketError> {
        let frame = CloseFrame::new(code, reason);
        let transport = {
            let mut pending = self
                .inner
                .pending_close
                .lock()
                .expect("socket close mutex poisoned");
            match self.inner.transport.get() {
                Some(transport) => Arc::clone(transport),
                None => {
                    if pending.is_none() {
                        tracing::debug!(socket = %self.inner.id, code, "Close deferred until attachment");
                        *pending = Some(frame);
                    }
                    return Ok(());
                }
            }
        };

        match self.state() {
            SocketState::Closing | SocketState::Closed => return Ok(()),
            _ => self.set_state(SocketState::Closing),
        }
        match transport.close(Some(frame)) {
            Ok(()) | Err(TransportError::Closed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for the next event. Returns `None` only if the socket is dropped
    /// elsewhere while waiting, which cannot happen while `self` is alive.
    pub async fn recv(&self) -> Option<SocketEvent> {
        self.inner.events_rx.lock().await.recv().await
    }

    /// Take an already delivered event without waiting.
    pub fn try_recv(&self) -> Option<SocketEvent> {
        self.inner.events_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Resolve once the socket reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub(crate) fn closed_watch(&self) -> watch::Receiver<bool> {
        self.inner.closed.subscribe()
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner.transport.get().cloned()
    }

    /// Bind the registration ID. Fails with the existing ID if one is set.
    pub(crate) fn set_connection_id(&self, id: ConnectionId) -> Result<(), ConnectionId> {
        self.inner.connection_id.set(id).map_err(|_| self.connection_id().unwrap_or(id))
    }

    pub(crate) fn touch(&self) {
        *self.inner.last_activity.lock().expect("socket activity mutex poisoned") = Instant::now();
    }

    /// Send a ping and return a receiver that fires when the pong echoing
    /// `payload` arrives. Dropping the receiver does not unregister it; call
    /// `forget_ping` once the caller stops waiting.
    pub(crate) fn ping(&self, payload: Bytes) -> Result<oneshot::Receiver<()>, SocketError> {
        let transport = self.inner.transport.get().ok_or(SocketError::NotAttached)?;
        let (tx, rx) = oneshot::channel();
        self.pongs().insert(payload.clone(), tx);
        if let Err(e) = transport.ping(payload.clone()) {
            self.forget_ping(&payload);
            return Err(e.into());
        }
        Ok(rx)
    }

    pub(crate) fn forget_ping(&self, payload: &Bytes) {
        self.pongs().remove(payload);
    }

    /// Resolve the ping a pong answers. Returns false for unsolicited or
    /// late pongs.
    pub(super) fn acknowledge_pong(&self, payload: &Bytes) -> bool {
        match self.pongs().remove(payload) {
            Some(waiter) => waiter.send(()).is_ok(),
            None => false,
        }
    }

    fn pongs(&self) -> std::sync::MutexGuard<'_, HashMap<Bytes, oneshot::Sender<()>>> {
        self.inner.pongs.lock().expect("socket pong mutex poisoned")
    }

    /// Give up on a socket whose protocol switch never completed.
    pub(crate) fn abandon(&self) {
        self.mark_closed(CloseFrame::abnormal());
    }

    fn set_state(&self, state: SocketState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    pub(super) fn emit(&self, event: SocketEvent) {
        let _ = self.inner.events_tx.send(event);
    }

    /// Transition `Connecting → Open` and fire `Open`. Returns false if the
    /// socket had already left `Connecting`.
    pub(super) fn mark_open(&self) -> bool {
        let opened = self
            .inner
            .state
            .compare_exchange(
                SocketState::Connecting as u8,
                SocketState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if opened {
            self.touch();
            self.emit(SocketEvent::Open);
        }
        opened
    }

    pub(super) fn mark_closed(&self, frame: CloseFrame) {
        let previous = self.inner.state.swap(SocketState::Closed as u8, Ordering::AcqRel);
        if SocketState::from(previous) == SocketState::Closed {
            return;
        }
        tracing::debug!(socket = %self.inner.id, code = frame.code, reason = %frame.reason, "Socket closed");
        self.emit(SocketEvent::Close(frame));
        self.inner.closed.send_replace(true);
    }
}

impl Default for FacadeSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FacadeSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacadeSocket")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("attached", &self.is_attached())
            .finish()
    }
}
