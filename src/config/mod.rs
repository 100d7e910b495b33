//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → sections handed to the server, manager, admin API
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → changed [connections.limits] forwarded
//!     → swapped into the running ConnectionManager
//! ```
//!
//! # Design Decisions
//! - Only admission limits reload live; intervals and addresses need a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, CleanupConfig, ConnectionsConfig, GatewayConfig, HealthCheckConfig,
    LimitsConfig, ListenerConfig, ObservabilityConfig, ShutdownConfig, TimeoutConfig,
};
