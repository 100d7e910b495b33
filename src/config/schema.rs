//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the upgrade gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, socket cap).
    pub listener: ListenerConfig,

    /// Connection manager policy.
    pub connections: ConnectionsConfig,

    /// Timeout configuration for ordinary requests.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent TCP connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Everything the connection manager is configured with.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ConnectionsConfig {
    pub limits: LimitsConfig,
    pub health_check: HealthCheckConfig,
    pub cleanup: CleanupConfig,
    pub shutdown: ShutdownConfig,
}

/// Admission limits. Reloadable at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum registered connections across all keys.
    pub max_connections: usize,

    /// Maximum registered connections per remote key (peer IP).
    pub max_per_key: usize,

    /// Enable the per-key admission rate limit.
    pub rate_limit_enabled: bool,

    /// Fixed window length in milliseconds.
    pub rate_limit_window_ms: u64,

    /// Admissions allowed per key within one window.
    pub rate_limit_max: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_per_key: 100,
            rate_limit_enabled: true,
            rate_limit_window_ms: 60_000,
            rate_limit_max: 60,
        }
    }
}

impl LimitsConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable periodic health checks.
    pub enabled: bool,

    /// Interval between check cycles in milliseconds.
    pub interval_ms: u64,

    /// How long to wait for a probe acknowledgment in milliseconds.
    pub timeout_ms: u64,

    /// Maximum probes in flight at once.
    pub batch_size: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 5_000,
            batch_size: 100,
        }
    }
}

impl HealthCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Cleanup sweep configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Enable the periodic sweep.
    pub enabled: bool,

    /// Interval between sweeps in milliseconds.
    pub interval_ms: u64,

    /// Close connections idle for longer than this (milliseconds).
    pub idle_timeout_ms: u64,

    /// Close code sent to idle connections.
    pub idle_close_code: u16,

    pub idle_close_reason: String,

    /// Close code sent to connections matched by the eviction policy.
    pub policy_close_code: u16,

    pub policy_close_reason: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 60_000,
            idle_timeout_ms: 300_000,
            idle_close_code: 1001,
            idle_close_reason: "idle timeout".to_string(),
            policy_close_code: 1008,
            policy_close_reason: "evicted".to_string(),
        }
    }
}

impl CleanupConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Graceful shutdown defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for connections to close (milliseconds).
    pub timeout_ms: u64,

    pub close_code: u16,

    pub close_reason: String,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            close_code: 1001,
            close_reason: "server shutting down".to_string(),
        }
    }
}

/// Timeout configuration for the request pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Ordinary request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
