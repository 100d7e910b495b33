//! The upgrade marker returned by the pipeline in place of a real response.

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use uuid::Uuid;

/// Identity of one issued marker. Travels in the response extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(Uuid);

impl MarkerId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for MarkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Returned from a handler to request that the connection switch protocols.
///
/// Converts into a `101 Switching Protocols` response tagged with its
/// [`MarkerId`]. The status alone is never trusted; the tag is what the
/// correlator looks for.
#[derive(Debug)]
#[must_use = "the marker must be returned from the handler for the upgrade to happen"]
pub struct UpgradeMarker {
    id: MarkerId,
}

impl UpgradeMarker {
    pub(crate) fn new(id: MarkerId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> MarkerId {
        self.id
    }
}

impl IntoResponse for UpgradeMarker {
    fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        response.extensions_mut().insert(self.id);
        response
    }
}

/// What the pipeline produced for an upgrade-eligible request.
#[derive(Debug)]
pub enum UpgradeVerdict {
    Ordinary(Response<Body>),
    Upgrade(MarkerId),
}

impl UpgradeVerdict {
    pub fn from_response(response: Response<Body>) -> Self {
        match marker_of(&response) {
            Some(id) => UpgradeVerdict::Upgrade(id),
            None => UpgradeVerdict::Ordinary(response),
        }
    }
}

/// True if `response` came from an [`UpgradeMarker`].
pub fn is_upgrade(response: &Response<Body>) -> bool {
    marker_of(response).is_some()
}

fn marker_of(response: &Response<Body>) -> Option<MarkerId> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return None;
    }
    response.extensions().get::<MarkerId>().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_becomes_tagged_101() {
        let id = MarkerId::new();
        let response = UpgradeMarker::new(id).into_response();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert!(is_upgrade(&response));
        assert!(matches!(UpgradeVerdict::from_response(response), UpgradeVerdict::Upgrade(found) if found == id));
    }

    #[test]
    fn bare_101_is_ordinary() {
        let response = StatusCode::SWITCHING_PROTOCOLS.into_response();
        assert!(!is_upgrade(&response));
        assert!(matches!(UpgradeVerdict::from_response(response), UpgradeVerdict::Ordinary(_)));
    }

    #[test]
    fn rewritten_status_is_ordinary() {
        let mut response = UpgradeMarker::new(MarkerId::new()).into_response();
        *response.status_mut() = StatusCode::OK;
        assert!(!is_upgrade(&response));
    }
}
