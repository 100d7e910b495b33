//! HTTP server setup.
//!
//! # Responsibilities
//! - Accept connections on the bounded listener
//! - Serve HTTP/1.1 with upgrades enabled
//! - Send ordinary requests through the pipeline
//! - Hand WebSocket handshakes to the correlator
//! - On shutdown, stop accepting and drain managed connections

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::config::GatewayConfig;
use crate::manager::{ConnectionManager, ShutdownOptions, ShutdownReport};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::upgrade::{accept_key, is_upgrade_request, Correlator, HyperUpgrade, UpgradeOutcome};

/// HTTP/1.1 server that turns WebSocket handshakes into managed connections.
pub struct UpgradeServer {
    correlator: Arc<Correlator<Router>>,
    shutdown: ShutdownOptions,
}

impl UpgradeServer {
    /// `pipeline` should already carry its middleware (see [`layered`](crate::http::pipeline::layered)).
    pub fn new(pipeline: Router, manager: Arc<ConnectionManager>, config: &GatewayConfig) -> Self {
        Self {
            correlator: Arc::new(Correlator::new(pipeline, manager)),
            shutdown: ShutdownOptions::from(&config.connections.shutdown),
        }
    }

    pub fn correlator(&self) -> &Arc<Correlator<Router>> {
        &self.correlator
    }

    /// Run until `shutdown` fires, then drain connections.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<ShutdownReport, ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, "Upgrade server starting");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Closed) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    let correlator = Arc::clone(&self.correlator);
                    tokio::spawn(serve_connection(stream, peer, permit, correlator));
                }
                _ = shutdown.recv() => {
                    tracing::info!("Upgrade server received shutdown signal, no longer accepting");
                    break;
                }
            }
        }

        let report = self.correlator.manager().shutdown(self.shutdown).await;
        tracing::info!("Upgrade server stopped");
        Ok(report)
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    permit: ConnectionPermit,
    correlator: Arc<Correlator<Router>>,
) {
    // Shared with upgrade tasks so an upgraded connection keeps its slot.
    let permit = Arc::new(permit);
    let service = service_fn(move |request: Request<Incoming>| {
        let correlator = Arc::clone(&correlator);
        let permit = Arc::clone(&permit);
        async move { Ok::<_, Infallible>(dispatch(correlator, peer, permit, request).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        tracing::debug!(peer_addr = %peer, error = %e, "Connection ended with error");
    }
}

async fn dispatch(
    correlator: Arc<Correlator<Router>>,
    peer: SocketAddr,
    permit: Arc<ConnectionPermit>,
    mut request: Request<Incoming>,
) -> Response<Body> {
    if !is_upgrade_request(&request) {
        return correlator.serve(request.map(Body::new)).await;
    }

    let Some(key) = accept_key(&request) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let on_upgrade = hyper::upgrade::on(&mut request);
    let (raw, response) = HyperUpgrade::new(on_upgrade, key, Some(peer));
    let request = request.map(Body::new);

    tokio::spawn(async move {
        match correlator.handle(raw, request).await {
            Ok(UpgradeOutcome::Accepted(id)) => {
                if let Some(socket) = correlator.manager().socket(id) {
                    socket.closed().await;
                }
                drop(permit);
            }
            Ok(outcome) => {
                tracing::debug!(peer_addr = %peer, ?outcome, "Upgrade request finished without switching");
            }
            Err(e) => {
                tracing::warn!(peer_addr = %peer, error = %e, "Upgrade failed");
            }
        }
    });

    response
        .await
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
