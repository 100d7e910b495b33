//! Per-request upgrade context.
//!
//! # Responsibilities
//! - Carry the upgrade context through the pipeline without changing its signature
//! - Issue (socket, marker) pairs and record the marker → socket binding
//! - Discard bindings whose marker never came back
//!
//! # Design Decisions
//! - The context rides in both the request extensions (for extractors) and a
//!   task-local scope (for code that has no request at hand)
//! - Issuing is synchronous and does nothing beyond recording the binding

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::manager::ConnectionOptions;
use crate::socket::FacadeSocket;
use crate::upgrade::error::UpgradeError;
use crate::upgrade::marker::{MarkerId, UpgradeMarker};

/// A socket waiting for its marker to come back out of the pipeline.
pub(crate) struct Binding {
    pub(crate) socket: FacadeSocket,
    pub(crate) options: ConnectionOptions,
}

pub(crate) type MarkerTable = DashMap<MarkerId, Binding>;

tokio::task_local! {
    static CURRENT: UpgradeContext;
}

struct ContextInner {
    remote_key: String,
    peer_addr: Option<SocketAddr>,
    bindings: Arc<MarkerTable>,
    issued: Mutex<Vec<MarkerId>>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let issued = self.issued.get_mut().unwrap_or_else(PoisonError::into_inner);
        for id in issued.drain(..) {
            if let Some((_, binding)) = self.bindings.remove(&id) {
                binding.socket.abandon();
            }
        }
    }
}

/// Context of one in-flight upgrade-eligible request.
#[derive(Clone)]
pub struct UpgradeContext {
    inner: Arc<ContextInner>,
}

impl UpgradeContext {
    pub(crate) fn new(remote_key: String, peer_addr: Option<SocketAddr>, bindings: Arc<MarkerTable>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                remote_key,
                peer_addr,
                bindings,
                issued: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The context of the pipeline call currently running, if any.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    pub fn remote_key(&self) -> &str {
        &self.inner.remote_key
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    pub fn upgrade(&self) -> (FacadeSocket, UpgradeMarker) {
        self.upgrade_with(ConnectionOptions::default())
    }

    /// Issue a socket and its marker. `options` apply once the connection registers.
    pub fn upgrade_with(&self, options: ConnectionOptions) -> (FacadeSocket, UpgradeMarker) {
        let socket = FacadeSocket::new();
        let id = MarkerId::new();
        self.inner.bindings.insert(
            id,
            Binding {
                socket: socket.clone(),
                options,
            },
        );
        self.inner
            .issued
            .lock()
            .expect("upgrade context mutex poisoned")
            .push(id);

        tracing::debug!(marker = %id, socket = %socket.id(), "Upgrade marker issued");
        (socket, UpgradeMarker::new(id))
    }

    /// Run `future` with this context installed.
    pub(crate) async fn scope<F: Future>(self, future: F) -> F::Output {
        CURRENT.scope(self, future).await
    }

    /// Drop the bindings of every marker this context issued except `keep`.
    pub(crate) fn discard_unclaimed(&self, keep: Option<MarkerId>) -> usize {
        let issued = std::mem::take(
            &mut *self.inner.issued.lock().expect("upgrade context mutex poisoned"),
        );
        let mut discarded = 0;
        for id in issued {
            if Some(id) == keep {
                continue;
            }
            if let Some((_, binding)) = self.inner.bindings.remove(&id) {
                tracing::debug!(marker = %id, socket = %binding.socket.id(), "Discarding unclaimed upgrade marker");
                binding.socket.abandon();
                discarded += 1;
            }
        }
        discarded
    }
}

impl std::fmt::Debug for UpgradeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeContext")
            .field("remote_key", &self.inner.remote_key)
            .field("peer_addr", &self.inner.peer_addr)
            .finish()
    }
}

/// Issue a socket and marker from inside the pipeline.
///
/// Fails with [`UpgradeError::NoContext`] when the current call is not
/// handling an upgrade-eligible request.
pub fn upgrade() -> Result<(FacadeSocket, UpgradeMarker), UpgradeError> {
    upgrade_with(ConnectionOptions::default())
}

pub fn upgrade_with(options: ConnectionOptions) -> Result<(FacadeSocket, UpgradeMarker), UpgradeError> {
    let context = UpgradeContext::current().ok_or(UpgradeError::NoContext)?;
    Ok(context.upgrade_with(options))
}

/// Extractor for handlers that upgrade.
///
/// Rejects with `426 Upgrade Required` when the request is not upgrade-eligible.
#[derive(Debug, Clone)]
pub struct Upgrade(UpgradeContext);

impl Upgrade {
    pub fn accept(self) -> (FacadeSocket, UpgradeMarker) {
        self.0.upgrade()
    }

    pub fn accept_with(self, options: ConnectionOptions) -> (FacadeSocket, UpgradeMarker) {
        self.0.upgrade_with(options)
    }

    pub fn remote_key(&self) -> &str {
        self.0.remote_key()
    }

    pub fn context(&self) -> &UpgradeContext {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Upgrade
where
    S: Send + Sync,
{
    type Rejection = UpgradeRequired;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UpgradeContext>()
            .cloned()
            .or_else(UpgradeContext::current)
            .map(Upgrade)
            .ok_or(UpgradeRequired)
    }
}

/// Rejection for [`Upgrade`] outside an upgrade-eligible request.
#[derive(Debug, Clone, Copy)]
pub struct UpgradeRequired;

impl IntoResponse for UpgradeRequired {
    fn into_response(self) -> Response {
        (
            StatusCode::UPGRADE_REQUIRED,
            [(header::UPGRADE, "websocket")],
            "this endpoint requires a WebSocket upgrade",
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::SocketState;

    fn context(bindings: &Arc<MarkerTable>) -> UpgradeContext {
        UpgradeContext::new("127.0.0.1".into(), None, Arc::clone(bindings))
    }

    #[test]
    fn upgrade_outside_scope_fails() {
        assert!(matches!(upgrade(), Err(UpgradeError::NoContext)));
    }

    #[tokio::test]
    async fn upgrade_inside_scope_records_binding() {
        let bindings = Arc::new(MarkerTable::new());
        let cx = context(&bindings);

        let (socket, marker) = cx.clone().scope(async { upgrade().unwrap() }).await;
        assert_eq!(socket.state(), SocketState::Connecting);
        assert!(bindings.contains_key(&marker.id()));
    }

    #[tokio::test]
    async fn unclaimed_markers_are_discarded() {
        let bindings = Arc::new(MarkerTable::new());
        let cx = context(&bindings);
        let (_, kept) = cx.upgrade();
        let (dropped_socket, _) = cx.upgrade();

        assert_eq!(cx.discard_unclaimed(Some(kept.id())), 1);
        assert!(bindings.contains_key(&kept.id()));
        assert!(dropped_socket.is_closed());
    }

    #[test]
    fn dropping_the_context_clears_its_bindings() {
        let bindings = Arc::new(MarkerTable::new());
        {
            let cx = context(&bindings);
            let _ = cx.upgrade();
            let _ = cx.upgrade();
            assert_eq!(bindings.len(), 2);
        }
        assert!(bindings.is_empty());
    }
}
