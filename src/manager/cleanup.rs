//! Periodic cleanup sweep.
//!
//! # Responsibilities
//! - Drop records whose socket already reached `Closed`
//! - Close connections idle past the configured timeout
//! - Close connections selected by the eviction policy
//! - Garbage-collect stale rate-limit buckets
//!
//! # Design Decisions
//! - A failed close is logged; the record is removed either way
//! - The sweep works on a snapshot and never holds table locks while closing

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::CleanupConfig;
use crate::manager::record::ConnectionInfo;
use crate::manager::ConnectionManager;
use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::socket::FacadeSocket;

/// Predicate deciding whether a live connection should be evicted.
pub type EvictionPolicy = Arc<dyn Fn(&ConnectionInfo) -> bool + Send + Sync>;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed_closed: usize,
    pub idle_closed: usize,
    pub policy_closed: usize,
    pub buckets_collected: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

impl ConnectionManager {
    /// Install the eviction policy consulted by every sweep.
    pub fn set_eviction_policy<F>(&self, policy: F)
    where
        F: Fn(&ConnectionInfo) -> bool + Send + Sync + 'static,
    {
        *self.eviction.write().expect("eviction policy lock poisoned") = Some(Arc::new(policy));
    }

    pub fn clear_eviction_policy(&self) {
        *self.eviction.write().expect("eviction policy lock poisoned") = None;
    }

    /// Run one cleanup pass.
    pub fn sweep(&self) -> SweepReport {
        let config = &self.config.cleanup;
        let idle_timeout = config.idle_timeout().as_millis() as u64;
        let policy = self.eviction.read().expect("eviction policy lock poisoned").clone();
        let mut report = SweepReport::default();

        for (id, socket, info) in self.snapshot() {
            if socket.is_closed() {
                if self.remove(id).is_some() {
                    report.removed_closed += 1;
                }
                continue;
            }

            if info.idle_ms > idle_timeout {
                tracing::info!(connection_id = %id, idle_ms = info.idle_ms, "Closing idle connection");
                self.evict(id, &socket, config.idle_close_code, &config.idle_close_reason, "idle");
                report.idle_closed += 1;
                continue;
            }

            if let Some(policy) = &policy {
                if policy(&info) {
                    tracing::info!(connection_id = %id, "Evicting connection by policy");
                    self.evict(id, &socket, config.policy_close_code, &config.policy_close_reason, "policy");
                    report.policy_closed += 1;
                }
            }
        }

        report.buckets_collected = self.collect_rate_buckets(Instant::now());
        report
    }

    fn evict(&self, id: ConnectionId, socket: &FacadeSocket, code: u16, reason: &str, cause: &'static str) {
        if let Err(e) = socket.close_with(code, reason) {
            tracing::warn!(connection_id = %id, error = %e, "Failed to close evicted connection");
        }
        self.remove(id);
        metrics::record_eviction(cause);
    }
}

/// Background task running the sweep on a fixed interval.
pub struct CleanupTask {
    manager: Arc<ConnectionManager>,
    config: CleanupConfig,
}

impl CleanupTask {
    pub fn new(manager: Arc<ConnectionManager>, config: CleanupConfig) -> Self {
        Self { manager, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Connection cleanup disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            idle_timeout_ms = self.config.idle_timeout_ms,
            "Cleanup task starting"
        );

        let mut ticker = time::interval(Duration::from_millis(self.config.interval_ms));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.manager.sweep();
                    if !report.is_empty() {
                        tracing::debug!(
                            removed_closed = report.removed_closed,
                            idle_closed = report.idle_closed,
                            policy_closed = report.policy_closed,
                            buckets_collected = report.buckets_collected,
                            "Cleanup sweep finished"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cleanup task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
