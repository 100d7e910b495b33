//! The raw side of an upgrade-eligible request.
//!
//! A raw upgrade is consumed exactly once: either an ordinary response is
//! written to it, or the protocol switch is completed and a transport comes out.

use axum::body::Body;
use axum::http::Response;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::net::transport::Transport;
use crate::net::ws::WsTransport;
use crate::upgrade::error::UpgradeError;
use crate::upgrade::handshake;

pub trait RawUpgrade: Send + 'static {
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Write an ordinary HTTP response, leaving the exchange a plain one.
    fn respond(self, response: Response<Body>) -> impl Future<Output = Result<(), UpgradeError>> + Send;

    /// Finish the handshake and hand back the resulting transport.
    fn switch(self) -> impl Future<Output = Result<Arc<dyn Transport>, UpgradeError>> + Send;
}

/// Raw upgrade backed by a hyper HTTP/1.1 connection.
///
/// The response goes through a oneshot slot the connection task is waiting
/// on; after a `101` the upgraded IO arrives through hyper's `OnUpgrade`.
pub struct HyperUpgrade {
    on_upgrade: OnUpgrade,
    accept_key: String,
    peer: Option<SocketAddr>,
    reply: oneshot::Sender<Response<Body>>,
}

impl HyperUpgrade {
    pub fn new(
        on_upgrade: OnUpgrade,
        accept_key: String,
        peer: Option<SocketAddr>,
    ) -> (Self, oneshot::Receiver<Response<Body>>) {
        let (reply, response) = oneshot::channel();
        let raw = Self {
            on_upgrade,
            accept_key,
            peer,
            reply,
        };
        (raw, response)
    }
}

impl RawUpgrade for HyperUpgrade {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    async fn respond(self, response: Response<Body>) -> Result<(), UpgradeError> {
        self.reply.send(response).map_err(|_| UpgradeError::ConnectionGone)
    }

    async fn switch(self) -> Result<Arc<dyn Transport>, UpgradeError> {
        self.reply
            .send(handshake::switching_protocols(&self.accept_key))
            .map_err(|_| UpgradeError::ConnectionGone)?;

        let upgraded = self.on_upgrade.await.map_err(UpgradeError::Switch)?;
        let stream = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        tracing::debug!(peer = ?self.peer, "Protocol switch complete");
        Ok(Arc::new(WsTransport::spawn(stream, self.peer)))
    }
}
