//! WebSocket transport over an upgraded HTTP connection.
//!
//! # Responsibilities
//! - Own a `tokio_tungstenite::WebSocketStream` after the protocol switch
//! - Pump outbound messages on a writer task
//! - Translate inbound frames into `TransportEvent`s on a reader task
//!
//! # Design Decisions
//! - The stream is split; the reader keeps polling after a close frame so
//!   tungstenite can flush the close reply before the socket drops
//! - A stream that ends without a close frame reports 1006 (abnormal)

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::net::transport::{
    close_code, CloseFrame, Message, ReadyState, Transport, TransportError, TransportEvent,
};

/// A WebSocket connection driven by background reader/writer tasks.
pub struct WsTransport {
    outbound: mpsc::UnboundedSender<WsMessage>,
    state: Arc<AtomicU8>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    peer: Option<SocketAddr>,
    tasks: [AbortHandle; 2],
}

impl WsTransport {
    /// Start driving an already handshaken stream.
    pub fn spawn<S>(stream: WebSocketStream<S>, peer: Option<SocketAddr>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();
        let state = Arc::new(AtomicU8::new(ReadyState::Open as u8));
        let (mut sink, mut source) = stream.split();

        let writer_events = events_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, WsMessage::Close(_));
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    let _ = writer_events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_state = Arc::clone(&state);
        let reader = tokio::spawn(async move {
            let mut close = None;
            while let Some(result) = source.next().await {
                match result {
                    Ok(WsMessage::Text(text)) => {
                        let _ = events_tx.send(TransportEvent::Text(text.as_str().to_owned()));
                    }
                    Ok(WsMessage::Binary(data)) => {
                        let _ = events_tx.send(TransportEvent::Binary(data));
                    }
                    Ok(WsMessage::Pong(data)) => {
                        let _ = events_tx.send(TransportEvent::Pong(data));
                    }
                    Ok(WsMessage::Close(frame)) => {
                        reader_state.store(ReadyState::Closing as u8, Ordering::Release);
                        close = Some(match frame {
                            Some(f) => CloseFrame::new(u16::from(f.code), f.reason.as_str()),
                            None => CloseFrame::new(close_code::NO_STATUS, ""),
                        });
                    }
                    // Pings are answered by tungstenite itself.
                    Ok(WsMessage::Ping(_)) | Ok(WsMessage::Frame(_)) => {}
                    Err(e) => {
                        if close.is_none() {
                            let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                        }
                        break;
                    }
                }
            }
            reader_state.store(ReadyState::Closed as u8, Ordering::Release);
            let _ = events_tx.send(TransportEvent::Close(close.unwrap_or_else(CloseFrame::abnormal)));
        });

        Self {
            outbound,
            state,
            events: Mutex::new(Some(events_rx)),
            peer,
            tasks: [writer.abort_handle(), reader.abort_handle()],
        }
    }
}

impl Transport for WsTransport {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from(self.state.load(Ordering::Acquire))
    }

    fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::Closed);
        }
        let frame = match message {
            Message::Text(text) => WsMessage::Text(text.into()),
            Message::Binary(data) => WsMessage::Binary(data),
        };
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    fn ping(&self, payload: Bytes) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(WsMessage::Ping(payload))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self, frame: Option<CloseFrame>) -> Result<(), TransportError> {
        let previous = self.state.compare_exchange(
            ReadyState::Open as u8,
            ReadyState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if previous.is_err() {
            return Ok(());
        }
        let frame = frame.unwrap_or_else(|| CloseFrame::new(close_code::NORMAL, ""));
        let close = WsCloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.into(),
        };
        self.outbound
            .send(WsMessage::Close(Some(close)))
            .map_err(|_| TransportError::Closed)
    }

    fn terminate(&self) {
        self.state.store(ReadyState::Closed as u8, Ordering::Release);
        // Both halves of the stream drop with their tasks.
        for task in &self.tasks {
            task.abort();
        }
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.lock().expect("ws transport mutex poisoned").take()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}
