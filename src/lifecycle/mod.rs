//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → every background loop subscribed to the broadcast exits
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → stop accepting → ConnectionManager::shutdown → exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain connections, stop background tasks
//! - Connection drain has a timeout; stragglers are cleared

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
