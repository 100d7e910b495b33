//! Connection statistics.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

use crate::health::HealthStatus;
use crate::manager::admission::AdmissionError;
use crate::manager::ConnectionManager;

/// Monotonic counters kept alongside the live connection table.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    accepted: AtomicU64,
    too_many_global: AtomicU64,
    too_many_per_key: AtomicU64,
    rate_limited: AtomicU64,
    shutting_down: AtomicU64,
}

impl Counters {
    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self, rejection: AdmissionError) {
        let counter = match rejection {
            AdmissionError::TooManyGlobal => &self.too_many_global,
            AdmissionError::TooManyPerKey => &self.too_many_per_key,
            AdmissionError::RateLimited => &self.rate_limited,
            AdmissionError::ShuttingDown => &self.shutting_down,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn rejections(&self) -> RejectionCounts {
        RejectionCounts {
            too_many_global: self.too_many_global.load(Ordering::Relaxed),
            too_many_per_key: self.too_many_per_key.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            shutting_down: self.shutting_down.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejectionCounts {
    pub too_many_global: u64,
    pub too_many_per_key: u64,
    pub rate_limited: u64,
    pub shutting_down: u64,
}

/// Aggregate view of the connection table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub by_pool: BTreeMap<String, usize>,
    pub by_remote_key: BTreeMap<String, usize>,
    pub oldest_age_ms: Option<u64>,
    pub accepted_total: u64,
    pub rejected: RejectionCounts,
    pub shutting_down: bool,
}

impl ConnectionManager {
    pub fn stats(&self) -> ConnectionStats {
        let now = Instant::now();
        let mut stats = ConnectionStats {
            accepted_total: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejections(),
            shutting_down: self.is_shutting_down(),
            ..Default::default()
        };

        for record in self.connections.iter() {
            stats.total += 1;
            match record.health {
                HealthStatus::Healthy => stats.healthy += 1,
                HealthStatus::Unhealthy => stats.unhealthy += 1,
                HealthStatus::Unknown => stats.unknown += 1,
            }
            if let Some(pool) = &record.pool {
                *stats.by_pool.entry(pool.clone()).or_insert(0) += 1;
            }
            *stats.by_remote_key.entry(record.remote_key.clone()).or_insert(0) += 1;

            let age = now.saturating_duration_since(record.created_at).as_millis() as u64;
            stats.oldest_age_ms = Some(stats.oldest_age_ms.map_or(age, |oldest| oldest.max(age)));
        }

        stats
    }
}
