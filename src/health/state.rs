//! Connection health state.
//!
//! # States
//! - Unknown: registered, never probed
//! - Healthy: last probe acknowledged in time
//! - Unhealthy: last probe timed out or the transport refused it
//!
//! Transitions happen only through health checks; there is no hysteresis,
//! each cycle's result replaces the previous one.

use serde::{Deserialize, Serialize};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl From<u8> for HealthStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}
