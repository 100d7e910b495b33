//! The request pipeline and the demo routes shipped with the binary.
//!
//! # Routes
//! - `GET /healthz`: ordinary response
//! - `GET /ws/echo`: upgrades and echoes every message back

use axum::{routing::get, Router};
use std::time::Duration;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::TimeoutConfig;
use crate::manager::ConnectionOptions;
use crate::socket::{FacadeSocket, SocketEvent};
use crate::upgrade::{Upgrade, UpgradeMarker};

/// Wrap application routes with the standard middleware stack.
#[allow(deprecated)]
pub fn layered(routes: Router, timeouts: &TimeoutConfig) -> Router {
    routes
        .layer(TimeoutLayer::new(Duration::from_secs(timeouts.request_secs)))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
}

pub fn demo_routes() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws/echo", get(echo))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn echo(upgrade: Upgrade) -> UpgradeMarker {
    let (socket, marker) = upgrade.accept_with(ConnectionOptions::default().pool("echo"));
    tokio::spawn(echo_loop(socket));
    marker
}

/// Send every received message straight back until the socket closes.
pub async fn echo_loop(socket: FacadeSocket) {
    while let Some(event) = socket.recv().await {
        match event {
            SocketEvent::Open => {
                tracing::debug!(socket = %socket.id(), "Echo socket open");
            }
            SocketEvent::Message(data) => {
                if let Err(e) = socket.send(data) {
                    tracing::debug!(socket = %socket.id(), error = %e, "Echo send failed");
                    break;
                }
            }
            SocketEvent::Error(error) => {
                tracing::warn!(socket = %socket.id(), error = %error, "Echo socket error");
            }
            SocketEvent::Close(frame) => {
                tracing::debug!(socket = %socket.id(), code = frame.code, "Echo socket closed");
                break;
            }
        }
    }
}
