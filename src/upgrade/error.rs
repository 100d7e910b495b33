use thiserror::Error;
use tower::BoxError;

use crate::socket::{AttachError, SocketError};
use crate::upgrade::marker::MarkerId;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("upgrade requested outside an upgrade-eligible request")]
    NoContext,

    #[error("pipeline failed: {0}")]
    Pipeline(#[source] BoxError),

    #[error("pipeline panicked")]
    Panicked,

    #[error("no socket bound to upgrade marker {0}")]
    UnknownMarker(MarkerId),

    #[error("client connection went away before the response was written")]
    ConnectionGone,

    #[error("protocol switch failed: {0}")]
    Switch(#[source] hyper::Error),

    #[error(transparent)]
    Attach(#[from] AttachError),

    #[error("registration failed: {0}")]
    Register(#[from] SocketError),
}
