//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (upgrades, admissions, connections, health)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_upgrades_total` (counter): upgrade requests by outcome
//! - `gateway_admission_rejected_total` (counter): refused admissions by reason
//! - `gateway_active_connections` (gauge): registered connection count
//! - `gateway_health_checks_total` (counter): probe results by status
//! - `gateway_evictions_total` (counter): sweep closures by reason
//!
//! # Design Decisions
//! - Low-overhead metric updates through the `metrics` facade
//! - Labels are static strings only, never peer-controlled values

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::health::HealthStatus;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Outcome is one of `accepted`, `responded`, `rejected`, `failed`.
pub fn record_upgrade(outcome: &'static str) {
    counter!("gateway_upgrades_total", "outcome" => outcome).increment(1);
}

pub fn record_admission_rejected(reason: &'static str) {
    counter!("gateway_admission_rejected_total", "reason" => reason).increment(1);
}

pub fn set_active_connections(count: usize) {
    gauge!("gateway_active_connections").set(count as f64);
}

pub fn record_health_check(status: HealthStatus) {
    counter!("gateway_health_checks_total", "status" => status.as_str()).increment(1);
}

pub fn record_eviction(reason: &'static str) {
    counter!("gateway_evictions_total", "reason" => reason).increment(1);
}
