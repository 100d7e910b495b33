//! Selecting connections by attribute.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::health::HealthStatus;
use crate::manager::record::ConnectionInfo;
use crate::manager::ConnectionManager;

/// Attribute filter over connections. Every set field must match;
/// an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionFilter {
    /// Tags that must all be present.
    pub tags: Vec<String>,
    pub remote_key: Option<String>,
    pub pool: Option<String>,
    pub min_age_ms: Option<u64>,
    pub min_idle_ms: Option<u64>,
    pub priority: Option<u8>,
    pub health: Option<HealthStatus>,
}

impl ConnectionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn remote_key(mut self, key: impl Into<String>) -> Self {
        self.remote_key = Some(key.into());
        self
    }

    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn min_age(mut self, age: Duration) -> Self {
        self.min_age_ms = Some(age.as_millis() as u64);
        self
    }

    pub fn min_idle(mut self, idle: Duration) -> Self {
        self.min_idle_ms = Some(idle.as_millis() as u64);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn health(mut self, health: HealthStatus) -> Self {
        self.health = Some(health);
        self
    }

    pub fn matches(&self, info: &ConnectionInfo) -> bool {
        self.tags.iter().all(|tag| info.has_tag(tag))
            && self.remote_key.as_ref().map_or(true, |key| *key == info.remote_key)
            && self.pool.as_ref().map_or(true, |pool| info.pool.as_ref() == Some(pool))
            && self.min_age_ms.map_or(true, |min| info.age_ms >= min)
            && self.min_idle_ms.map_or(true, |min| info.idle_ms >= min)
            && self.priority.map_or(true, |priority| info.priority == priority)
            && self.health.map_or(true, |health| info.health == health)
    }
}

impl ConnectionManager {
    /// Snapshot every connection matching `filter`.
    pub fn find(&self, filter: &ConnectionFilter) -> Vec<ConnectionInfo> {
        self.connections()
            .into_iter()
            .filter(|info| filter.matches(info))
            .collect()
    }

    /// Close every connection matching `filter`. Returns how many close
    /// requests were issued.
    ///
    /// Records are removed when their close event arrives, not here.
    pub fn close_where(&self, filter: &ConnectionFilter, code: u16, reason: &str) -> usize {
        let mut closed = 0;
        for (id, socket, info) in self.snapshot() {
            if !filter.matches(&info) {
                continue;
            }
            match socket.close_with(code, reason) {
                Ok(()) => closed += 1,
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "Failed to close filtered connection");
                }
            }
        }
        tracing::info!(closed, code, "Closed connections by filter");
        closed
    }
}
