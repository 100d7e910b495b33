//! The upgrade correlator.
//!
//! # Responsibilities
//! - Pre-check admission for upgrade-eligible requests and hold the reserved
//!   slot until the connection registers
//! - Run the pipeline with an upgrade context installed
//! - Route the result: ordinary responses go out verbatim, markers lead to
//!   switch → attach → register
//! - Turn pipeline failures into a generic 500 on the raw connection
//!
//! # Design Decisions
//! - The pipeline is any tower `Service`, typically an axum `Router`
//! - Pipeline panics are caught and treated as failures
//! - A socket whose switch never completes is abandoned, never leaked open

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use futures_util::FutureExt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tower::{BoxError, Service, ServiceExt};

use crate::manager::{AdmissionError, AdmissionTicket, ConnectionManager};
use crate::net::connection::ConnectionId;
use crate::net::transport::{close_code, CloseFrame};
use crate::observability::metrics;
use crate::socket::attach;
use crate::upgrade::context::{Binding, MarkerTable, UpgradeContext};
use crate::upgrade::error::UpgradeError;
use crate::upgrade::marker::UpgradeVerdict;
use crate::upgrade::raw::RawUpgrade;

/// How an upgrade-eligible request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The connection switched protocols and was registered.
    Accepted(ConnectionId),
    /// The pipeline answered with an ordinary response.
    Responded(StatusCode),
    /// Admission control refused the connection before the pipeline ran.
    Rejected(AdmissionError),
}

/// Key used for per-client limits.
pub fn remote_key(peer: Option<SocketAddr>) -> String {
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn internal_error() -> Response<Body> {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}

pub struct Correlator<S> {
    pipeline: S,
    manager: Arc<ConnectionManager>,
    bindings: Arc<MarkerTable>,
}

impl<S> Correlator<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    pub fn new(pipeline: S, manager: Arc<ConnectionManager>) -> Self {
        Self {
            pipeline,
            manager,
            bindings: Arc::new(MarkerTable::new()),
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Markers issued but not yet claimed or discarded.
    pub fn pending_bindings(&self) -> usize {
        self.bindings.len()
    }

    /// Serve a request that is not upgrade-eligible.
    pub async fn serve(&self, request: Request<Body>) -> Response<Body> {
        match self.invoke(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Pipeline failed");
                internal_error()
            }
        }
    }

    /// Handle one raw upgrade event end to end.
    pub async fn handle<R: RawUpgrade>(
        &self,
        raw: R,
        mut request: Request<Body>,
    ) -> Result<UpgradeOutcome, UpgradeError> {
        let peer = raw.peer_addr();
        let key = remote_key(peer);

        // Held until registration; every other exit releases the slot.
        let ticket = match self.manager.check_admission(&key) {
            Ok(ticket) => ticket,
            Err(rejection) => {
                metrics::record_upgrade("rejected");
                raw.respond(rejection.into_response()).await?;
                return Ok(UpgradeOutcome::Rejected(rejection));
            }
        };

        let context = UpgradeContext::new(key.clone(), peer, Arc::clone(&self.bindings));
        request.extensions_mut().insert(context.clone());
        let result = context.clone().scope(self.invoke(request)).await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                context.discard_unclaimed(None);
                metrics::record_upgrade("failed");
                tracing::error!(remote_key = %key, error = %e, "Pipeline failed during upgrade");
                if raw.respond(internal_error()).await.is_err() {
                    tracing::debug!(remote_key = %key, "Client gone before failure response");
                }
                return Err(e);
            }
        };

        match UpgradeVerdict::from_response(response) {
            UpgradeVerdict::Ordinary(response) => {
                context.discard_unclaimed(None);
                let status = response.status();
                raw.respond(response).await?;
                metrics::record_upgrade("responded");
                tracing::debug!(remote_key = %key, status = status.as_u16(), "Upgrade request answered without switching");
                Ok(UpgradeOutcome::Responded(status))
            }
            UpgradeVerdict::Upgrade(marker) => {
                let binding = self.bindings.remove(&marker).map(|(_, binding)| binding);
                context.discard_unclaimed(Some(marker));
                match binding {
                    Some(binding) => self.complete(raw, binding, ticket).await,
                    None => {
                        metrics::record_upgrade("failed");
                        tracing::error!(marker = %marker, "Pipeline returned an unknown upgrade marker");
                        raw.respond(internal_error()).await?;
                        Err(UpgradeError::UnknownMarker(marker))
                    }
                }
            }
        }
    }

    async fn complete<R: RawUpgrade>(
        &self,
        raw: R,
        binding: Binding,
        ticket: AdmissionTicket,
    ) -> Result<UpgradeOutcome, UpgradeError> {
        let Binding { socket, options } = binding;

        let transport = match raw.switch().await {
            Ok(transport) => transport,
            Err(e) => {
                metrics::record_upgrade("failed");
                tracing::warn!(socket = %socket.id(), error = %e, "Protocol switch failed");
                socket.abandon();
                return Err(e);
            }
        };

        if let Err(e) = attach(&socket, Arc::clone(&transport)) {
            metrics::record_upgrade("failed");
            let _ = transport.close(Some(CloseFrame::new(close_code::INTERNAL_ERROR, "")));
            socket.abandon();
            return Err(e.into());
        }

        let id = ticket.register(socket.clone(), options)?;
        metrics::record_upgrade("accepted");
        Ok(UpgradeOutcome::Accepted(id))
    }

    async fn invoke(&self, request: Request<Body>) -> Result<Response<Body>, UpgradeError> {
        let call = self.pipeline.clone().oneshot(request);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(UpgradeError::Pipeline(e.into())),
            Err(_) => Err(UpgradeError::Panicked),
        }
    }
}

impl<S: Clone> Clone for Correlator<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            manager: Arc::clone(&self.manager),
            bindings: Arc::clone(&self.bindings),
        }
    }
}
