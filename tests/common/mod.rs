//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Request, Response, StatusCode};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use upgrade_gateway::config::ConnectionsConfig;
use upgrade_gateway::manager::ConnectionManager;
use upgrade_gateway::net::memory::{MemoryPeer, MemoryTransport};
use upgrade_gateway::net::transport::Transport;
use upgrade_gateway::socket::{attach, FacadeSocket};
use upgrade_gateway::upgrade::{RawUpgrade, UpgradeError};

/// What the correlator wrote back on an ordinary (non-switching) exchange.
#[derive(Debug, Clone)]
pub struct RecordedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Default)]
struct ExchangeState {
    response: Option<RecordedResponse>,
    peer: Option<MemoryPeer>,
}

/// Test-side view of a [`MemoryUpgrade`] after the correlator consumed it.
#[derive(Clone)]
pub struct Exchange {
    state: Arc<Mutex<ExchangeState>>,
}

impl Exchange {
    pub fn response(&self) -> Option<RecordedResponse> {
        self.state.lock().unwrap().response.clone()
    }

    /// Remote end of the transport, once the protocol switched.
    pub fn peer(&self) -> Option<MemoryPeer> {
        self.state.lock().unwrap().peer.clone()
    }

    pub fn switched(&self) -> bool {
        self.peer().is_some()
    }
}

/// A raw upgrade that records responses and switches to a `MemoryTransport`.
pub struct MemoryUpgrade {
    peer_addr: SocketAddr,
    fail_switch: bool,
    state: Arc<Mutex<ExchangeState>>,
}

impl MemoryUpgrade {
    pub fn new(peer_addr: SocketAddr) -> (Self, Exchange) {
        Self::build(peer_addr, false)
    }

    /// A raw upgrade whose client disappears during the switch.
    pub fn failing(peer_addr: SocketAddr) -> (Self, Exchange) {
        Self::build(peer_addr, true)
    }

    fn build(peer_addr: SocketAddr, fail_switch: bool) -> (Self, Exchange) {
        let state = Arc::new(Mutex::new(ExchangeState::default()));
        let raw = Self {
            peer_addr,
            fail_switch,
            state: Arc::clone(&state),
        };
        (raw, Exchange { state })
    }
}

impl RawUpgrade for MemoryUpgrade {
    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }

    async fn respond(self, response: Response<Body>) -> Result<(), UpgradeError> {
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
        self.state.lock().unwrap().response = Some(RecordedResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        });
        Ok(())
    }

    async fn switch(self) -> Result<Arc<dyn Transport>, UpgradeError> {
        if self.fail_switch {
            return Err(UpgradeError::ConnectionGone);
        }
        let (transport, peer) = MemoryTransport::with_peer_addr(self.peer_addr);
        self.state.lock().unwrap().peer = Some(peer);
        Ok(Arc::new(transport))
    }
}

/// `10.0.0.<host>:40000`
pub fn peer(host: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, host], 40000))
}

/// A WebSocket opening handshake for `path`.
pub fn handshake(path: &str) -> Request<Body> {
    Request::get(path)
        .header(header::HOST, "gateway.test")
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
        .header(header::SEC_WEBSOCKET_VERSION, "13")
        .body(Body::empty())
        .unwrap()
}

/// Manager settings with background loops off and generous limits.
pub fn connections_config() -> ConnectionsConfig {
    let mut config = ConnectionsConfig::default();
    config.health_check.enabled = false;
    config.cleanup.enabled = false;
    config.limits.rate_limit_enabled = false;
    config
}

pub fn manager(config: ConnectionsConfig) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(config))
}

/// A facade bound to an open in-memory transport.
pub fn attached_socket() -> (FacadeSocket, MemoryPeer) {
    let socket = FacadeSocket::new();
    let (transport, peer) = MemoryTransport::pair();
    attach(&socket, Arc::new(transport)).unwrap();
    (socket, peer)
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..600 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Run `future` with a test-sized timeout.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
