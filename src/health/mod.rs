//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (active.rs HealthMonitor)
//!     → ConnectionManager::health_check_all (snapshot, batches)
//!     → probe(): ping → await pong with timeout
//!     → record status in state.rs terms on the connection record
//! ```
//!
//! # Design Decisions
//! - Probes are batched to bound concurrent load
//! - A connection is probed at most once per cycle
//! - Timeouts mark a connection unhealthy; they never fail the monitor

pub mod active;
pub mod state;

pub use active::{probe, HealthMonitor};
pub use state::HealthStatus;
