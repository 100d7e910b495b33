//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Resolve the log filter from the environment, then config
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - Initializing twice is harmless; the second call is ignored

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Default filter for a configured level: our crate at `level`, HTTP layers quieter.
pub fn default_filter(level: &str) -> String {
    format!("upgrade_gateway={level},tower_http={level},hyper=warn")
}

pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&config.log_level).into());

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
