//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, probe timeout below interval)
//! - Validate addresses and close codes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is not a valid socket address: {value}")]
    Address { field: &'static str, value: String },

    #[error("{field} must be a close code in 1000..=4999, got {code}")]
    CloseCode { field: &'static str, code: u16 },

    #[error("connections.health_check.timeout_ms ({timeout_ms}) must be below interval_ms ({interval_ms})")]
    ProbeTimeout { timeout_ms: u64, interval_ms: u64 },

    #[error("connections.limits.max_per_key ({per_key}) exceeds max_connections ({global})")]
    PerKeyAboveGlobal { per_key: usize, global: usize },
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_nonzero(&mut errors, "listener.max_connections", config.listener.max_connections as u64);

    let limits = &config.connections.limits;
    check_nonzero(&mut errors, "connections.limits.max_connections", limits.max_connections as u64);
    check_nonzero(&mut errors, "connections.limits.max_per_key", limits.max_per_key as u64);
    if limits.max_per_key > limits.max_connections {
        errors.push(ValidationError::PerKeyAboveGlobal {
            per_key: limits.max_per_key,
            global: limits.max_connections,
        });
    }
    if limits.rate_limit_enabled {
        check_nonzero(&mut errors, "connections.limits.rate_limit_window_ms", limits.rate_limit_window_ms);
        check_nonzero(&mut errors, "connections.limits.rate_limit_max", limits.rate_limit_max as u64);
    }

    let health = &config.connections.health_check;
    if health.enabled {
        check_nonzero(&mut errors, "connections.health_check.interval_ms", health.interval_ms);
        check_nonzero(&mut errors, "connections.health_check.timeout_ms", health.timeout_ms);
        check_nonzero(&mut errors, "connections.health_check.batch_size", health.batch_size as u64);
        if health.timeout_ms >= health.interval_ms && health.interval_ms > 0 {
            errors.push(ValidationError::ProbeTimeout {
                timeout_ms: health.timeout_ms,
                interval_ms: health.interval_ms,
            });
        }
    }

    let cleanup = &config.connections.cleanup;
    if cleanup.enabled {
        check_nonzero(&mut errors, "connections.cleanup.interval_ms", cleanup.interval_ms);
        check_nonzero(&mut errors, "connections.cleanup.idle_timeout_ms", cleanup.idle_timeout_ms);
    }
    check_close_code(&mut errors, "connections.cleanup.idle_close_code", cleanup.idle_close_code);
    check_close_code(&mut errors, "connections.cleanup.policy_close_code", cleanup.policy_close_code);

    let shutdown = &config.connections.shutdown;
    check_nonzero(&mut errors, "connections.shutdown.timeout_ms", shutdown.timeout_ms);
    check_close_code(&mut errors, "connections.shutdown.close_code", shutdown.close_code);

    check_nonzero(&mut errors, "timeouts.request_secs", config.timeouts.request_secs);

    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_nonzero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field,
            value: value.to_string(),
        });
    }
}

fn check_close_code(errors: &mut Vec<ValidationError>, field: &'static str, code: u16) {
    // 1005 and 1006 are reserved for reporting and must never be sent.
    if !(1000..=4999).contains(&code) || code == 1005 || code == 1006 {
        errors.push(ValidationError::CloseCode { field, code });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.connections.limits.max_per_key = 0;
        config.connections.health_check.timeout_ms = 60_000;
        config.connections.shutdown.close_code = 1006;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::Zero {
            field: "connections.limits.max_per_key"
        }));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ProbeTimeout { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::CloseCode { code: 1006, .. })));
    }
}
