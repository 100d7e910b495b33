//! WebSocket upgrade gateway library.
//!
//! Application code runs in an ordinary axum pipeline; handlers that want a
//! WebSocket call [`upgrade()`](upgrade::upgrade) (or take the
//! [`Upgrade`](upgrade::Upgrade) extractor) and get a [`FacadeSocket`] that is
//! usable before the protocol switch has happened. The correlator completes
//! the switch and the [`ConnectionManager`] tracks the result.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod manager;
pub mod net;
pub mod observability;
pub mod socket;
pub mod upgrade;

pub use config::schema::GatewayConfig;
pub use http::UpgradeServer;
pub use lifecycle::Shutdown;
pub use manager::ConnectionManager;
pub use socket::FacadeSocket;
pub use upgrade::{upgrade, Upgrade, UpgradeMarker};
