//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::listener, bounded)
//!     → server.rs (hyper HTTP/1.1, upgrades enabled)
//!         ordinary request  → pipeline.rs (axum Router + tower-http layers)
//!         WebSocket handshake → upgrade::Correlator
//!     → Send to client
//! ```

pub mod pipeline;
pub mod server;

pub use pipeline::{demo_routes, layered};
pub use server::UpgradeServer;
