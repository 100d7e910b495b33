//! Connection manager subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade correlator
//!     → check_admission (admission.rs: shutdown, global cap, per-key cap, rate window)
//!         reserves a slot held by an AdmissionTicket
//!     → AdmissionTicket::register (record.rs: ConnectionRecord keyed by ConnectionId)
//!
//! Background (spawn_background):
//!     → HealthMonitor → health_check_all (batched probes)
//!     → CleanupTask → sweep (cleanup.rs: closed, idle, policy, buckets)
//!
//! Socket reaches Closed → record removed, slot released
//! shutdown (drain.rs) → close all → wait → clear remainder
//! ```
//!
//! # Design Decisions
//! - All tables are concurrent maps; no lock is held across an await
//! - Global and per-key counts track registered plus reserved connections
//! - Admission limits live behind `ArcSwap` so they can be reloaded without a restart

pub mod admission;
pub mod cleanup;
pub mod drain;
pub mod filter;
pub mod record;
pub mod stats;

pub use admission::{AdmissionError, AdmissionTicket, REJECTION_HEADER};
pub use cleanup::{CleanupTask, EvictionPolicy, SweepReport};
pub use drain::{ShutdownOptions, ShutdownReport};
pub use filter::ConnectionFilter;
pub use record::{ConnectionInfo, ConnectionOptions};
pub use stats::{ConnectionStats, RejectionCounts};

use arc_swap::ArcSwap;
use dashmap::{DashMap, DashSet};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{ConnectionsConfig, LimitsConfig};
use crate::health::{probe, HealthMonitor, HealthStatus};
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::socket::{FacadeSocket, SocketError};

use self::admission::RateBucket;
use self::record::ConnectionRecord;
use self::stats::Counters;

/// Result of one health check cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// Connections skipped because a probe was already in flight.
    pub skipped: usize,
}

/// Registry and policy engine for upgraded connections.
pub struct ConnectionManager {
    limits: ArcSwap<LimitsConfig>,
    config: ConnectionsConfig,
    connections: DashMap<ConnectionId, ConnectionRecord>,
    /// Registered plus reserved connections.
    slots: AtomicUsize,
    per_key: DashMap<String, usize>,
    buckets: DashMap<String, RateBucket>,
    probing: DashSet<ConnectionId>,
    live: watch::Sender<usize>,
    shutting_down: AtomicBool,
    background: Shutdown,
    eviction: RwLock<Option<EvictionPolicy>>,
    counters: Counters,
}

impl ConnectionManager {
    pub fn new(config: ConnectionsConfig) -> Self {
        let (live, _) = watch::channel(0);
        Self {
            limits: ArcSwap::from_pointee(config.limits.clone()),
            config,
            connections: DashMap::new(),
            slots: AtomicUsize::new(0),
            per_key: DashMap::new(),
            buckets: DashMap::new(),
            probing: DashSet::new(),
            live,
            shutting_down: AtomicBool::new(false),
            background: Shutdown::new(),
            eviction: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &ConnectionsConfig {
        &self.config
    }

    /// Current admission limits.
    pub fn limits(&self) -> Arc<LimitsConfig> {
        self.limits.load_full()
    }

    /// Swap in new admission limits. Existing connections are never closed
    /// by a tighter limit; it only affects later admissions.
    pub fn reload_limits(&self, limits: LimitsConfig) {
        tracing::info!(
            max_connections = limits.max_connections,
            max_per_key = limits.max_per_key,
            rate_limit_max = limits.rate_limit_max,
            "Admission limits reloaded"
        );
        self.limits.store(Arc::new(limits));
    }

    /// Track an attached socket that did not go through admission.
    /// Deregistration happens automatically once the socket reaches `Closed`.
    pub fn register(
        self: &Arc<Self>,
        socket: FacadeSocket,
        remote_key: impl Into<String>,
        options: ConnectionOptions,
    ) -> Result<ConnectionId, SocketError> {
        let remote_key: String = remote_key.into();
        self.reserve_unchecked(&remote_key).register(socket, options)
    }

    /// Insert the record for a socket whose slot is already held.
    fn track(
        self: &Arc<Self>,
        socket: &FacadeSocket,
        remote_key: &str,
        options: ConnectionOptions,
    ) -> Result<ConnectionId, SocketError> {
        let transport = socket.transport().ok_or(SocketError::NotAttached)?;
        let id = ConnectionId::next();
        socket
            .set_connection_id(id)
            .map_err(SocketError::AlreadyRegistered)?;

        let record = ConnectionRecord::new(id, socket.clone(), transport, remote_key.to_string(), options);
        let pool = record.pool.clone();
        self.connections.insert(id, record);
        self.live.send_modify(|count| *count += 1);
        self.counters.record_accepted();
        metrics::set_active_connections(self.connections.len());

        tracing::info!(
            connection_id = %id,
            socket = %socket.id(),
            remote_key = %remote_key,
            pool = pool.as_deref().unwrap_or("-"),
            "Connection registered"
        );

        let manager = Arc::downgrade(self);
        let mut closed = socket.closed_watch();
        tokio::spawn(async move {
            let _ = closed.wait_for(|closed| *closed).await;
            if let Some(manager) = manager.upgrade() {
                manager.remove(id);
            }
        });

        if self.is_shutting_down() {
            let shutdown = &self.config.shutdown;
            if let Err(e) = socket.close_with(shutdown.close_code, shutdown.close_reason.as_str()) {
                tracing::warn!(connection_id = %id, error = %e, "Failed to close connection registered during shutdown");
            }
        }

        Ok(id)
    }

    /// Remove a record, releasing its slot. Idempotent.
    pub(crate) fn remove(&self, id: ConnectionId) -> Option<ConnectionRecord> {
        let (_, record) = self.connections.remove(&id)?;
        self.release_slot(&record.remote_key);
        self.probing.remove(&id);
        self.live.send_modify(|count| *count = count.saturating_sub(1));
        metrics::set_active_connections(self.connections.len());

        tracing::debug!(
            connection_id = %id,
            remote_key = %record.remote_key,
            age_ms = record.created_at.elapsed().as_millis() as u64,
            "Connection deregistered"
        );
        Some(record)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Registered connections from one remote key, plus admitted handshakes
    /// that have not registered yet.
    pub fn connections_from(&self, remote_key: &str) -> usize {
        self.per_key.get(remote_key).map(|count| *count).unwrap_or(0)
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|record| record.info(Instant::now()))
    }

    pub fn socket(&self, id: ConnectionId) -> Option<FacadeSocket> {
        self.connections.get(&id).map(|record| record.socket.clone())
    }

    /// Snapshot of every registered connection.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let now = Instant::now();
        let mut infos: Vec<_> = self.connections.iter().map(|record| record.info(now)).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub(crate) fn snapshot(&self) -> Vec<(ConnectionId, FacadeSocket, ConnectionInfo)> {
        let now = Instant::now();
        self.connections
            .iter()
            .map(|record| (record.id, record.socket.clone(), record.info(now)))
            .collect()
    }

    pub fn add_tag(&self, id: ConnectionId, tag: impl Into<String>) -> bool {
        self.update(id, |record| {
            record.tags.insert(tag.into());
        })
    }

    pub fn remove_tag(&self, id: ConnectionId, tag: &str) -> bool {
        self.update(id, |record| {
            record.tags.remove(tag);
        })
    }

    pub fn set_metadata(&self, id: ConnectionId, key: impl Into<String>, value: Value) -> bool {
        self.update(id, |record| {
            record.metadata.insert(key.into(), value);
        })
    }

    pub fn metadata(&self, id: ConnectionId, key: &str) -> Option<Value> {
        self.connections.get(&id)?.metadata.get(key).cloned()
    }

    pub fn set_priority(&self, id: ConnectionId, priority: u8) -> bool {
        self.update(id, |record| record.priority = priority)
    }

    /// Count application-level activity so the idle sweep spares the connection.
    pub fn touch(&self, id: ConnectionId) -> bool {
        self.update(id, |record| record.socket.touch())
    }

    fn update(&self, id: ConnectionId, f: impl FnOnce(&mut ConnectionRecord)) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut record) => {
                f(&mut record);
                true
            }
            None => false,
        }
    }

    /// Probe every registered connection once, in batches of the configured size.
    pub async fn health_check_all(&self) -> HealthReport {
        let config = &self.config.health_check;
        let mut report = HealthReport::default();

        let mut targets = Vec::new();
        for (id, socket, _) in self.snapshot() {
            // DashSet::insert returns false when a probe is already running.
            if self.probing.insert(id) {
                targets.push((id, socket));
            } else {
                report.skipped += 1;
            }
        }

        for batch in targets.chunks(config.batch_size.max(1)) {
            let timeout = config.timeout();
            let results = join_all(
                batch
                    .iter()
                    .map(|(id, socket)| async move { (*id, probe(socket, timeout).await) }),
            )
            .await;

            let now = Instant::now();
            for (id, status) in results {
                self.probing.remove(&id);
                self.record_health(id, status, now);
                report.checked += 1;
                match status {
                    HealthStatus::Healthy => report.healthy += 1,
                    _ => report.unhealthy += 1,
                }
            }
        }

        report
    }

    /// Probe a single connection. `None` if it is not registered or already being probed.
    pub async fn check_health(&self, id: ConnectionId) -> Option<HealthStatus> {
        let socket = self.socket(id)?;
        if !self.probing.insert(id) {
            return None;
        }
        let status = probe(&socket, self.config.health_check.timeout()).await;
        self.probing.remove(&id);
        self.record_health(id, status, Instant::now());
        Some(status)
    }

    fn record_health(&self, id: ConnectionId, status: HealthStatus, at: Instant) {
        if let Some(mut record) = self.connections.get_mut(&id) {
            record.health = status;
            record.last_health_check = Some(at);
        }
        metrics::record_health_check(status);
    }

    /// Start the health monitor and the cleanup task. Both stop when
    /// [`shutdown`](Self::shutdown) runs.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let monitor = HealthMonitor::new(Arc::clone(self), self.config.health_check.clone());
        let cleanup = CleanupTask::new(Arc::clone(self), self.config.cleanup.clone());
        vec![
            tokio::spawn(monitor.run(self.background.subscribe())),
            tokio::spawn(cleanup.run(self.background.subscribe())),
        ]
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::memory::MemoryTransport;
    use crate::socket::attach;

    fn attached() -> (FacadeSocket, crate::net::memory::MemoryPeer) {
        let socket = FacadeSocket::new();
        let (transport, peer) = MemoryTransport::pair();
        attach(&socket, Arc::new(transport)).unwrap();
        (socket, peer)
    }

    #[tokio::test]
    async fn register_requires_attachment() {
        let manager = Arc::new(ConnectionManager::default());
        let result = manager.register(FacadeSocket::new(), "10.0.0.1", ConnectionOptions::default());
        assert_eq!(result, Err(SocketError::NotAttached));
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.connections_from("10.0.0.1"), 0);
    }

    #[tokio::test]
    async fn same_socket_cannot_register_twice() {
        let manager = Arc::new(ConnectionManager::default());
        let (socket, _peer) = attached();
        let id = manager
            .register(socket.clone(), "10.0.0.1", ConnectionOptions::default())
            .unwrap();

        let again = manager.register(socket.clone(), "10.0.0.1", ConnectionOptions::default());
        assert_eq!(again, Err(SocketError::AlreadyRegistered(id)));
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.connections_from("10.0.0.1"), 1);
        assert_eq!(socket.connection_id(), Some(id));
    }

    #[tokio::test]
    async fn reserved_slots_count_against_caps_until_dropped() {
        let mut config = ConnectionsConfig::default();
        config.limits.max_connections = 2;
        config.limits.max_per_key = 1;
        config.limits.rate_limit_enabled = false;
        let manager = Arc::new(ConnectionManager::new(config));

        let first = manager.check_admission("10.0.0.1").unwrap();
        assert_eq!(first.remote_key(), "10.0.0.1");
        assert_eq!(manager.connections_from("10.0.0.1"), 1);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.check_admission("10.0.0.1").err(), Some(AdmissionError::TooManyPerKey));

        let second = manager.check_admission("10.0.0.2").unwrap();
        assert_eq!(manager.check_admission("10.0.0.3").err(), Some(AdmissionError::TooManyGlobal));

        drop(first);
        drop(second);
        assert_eq!(manager.connections_from("10.0.0.1"), 0);
        assert!(manager.per_key.is_empty());
        assert!(manager.check_admission("10.0.0.1").is_ok());
    }

    #[tokio::test]
    async fn registered_ticket_keeps_its_slot() {
        let mut config = ConnectionsConfig::default();
        config.limits.max_per_key = 1;
        config.limits.rate_limit_enabled = false;
        let manager = Arc::new(ConnectionManager::new(config));
        let (socket, _peer) = attached();

        let ticket = manager.check_admission("10.0.0.1").unwrap();
        let id = ticket.register(socket.clone(), ConnectionOptions::default()).unwrap();
        assert_eq!(manager.connections_from("10.0.0.1"), 1);
        assert_eq!(manager.check_admission("10.0.0.1").err(), Some(AdmissionError::TooManyPerKey));

        assert!(manager.remove(id).is_some());
        assert_eq!(manager.connections_from("10.0.0.1"), 0);
        assert!(manager.check_admission("10.0.0.1").is_ok());
    }

    #[tokio::test]
    async fn remove_releases_per_key_slot_once() {
        let manager = Arc::new(ConnectionManager::default());
        let (socket, _peer) = attached();
        let id = manager
            .register(socket.clone(), "10.0.0.1", ConnectionOptions::default())
            .unwrap();

        assert_eq!(socket.connection_id(), Some(id));
        assert_eq!(manager.connections_from("10.0.0.1"), 1);

        assert!(manager.remove(id).is_some());
        assert!(manager.remove(id).is_none());
        assert_eq!(manager.connections_from("10.0.0.1"), 0);
        assert_eq!(*manager.live.borrow(), 0);
    }

    #[tokio::test]
    async fn tags_and_metadata_are_editable() {
        let manager = Arc::new(ConnectionManager::default());
        let (socket, _peer) = attached();
        let id = manager
            .register(socket, "10.0.0.1", ConnectionOptions::default().tag("chat"))
            .unwrap();

        assert!(manager.add_tag(id, "beta"));
        assert!(manager.remove_tag(id, "chat"));
        assert!(manager.set_metadata(id, "room", Value::from("lobby")));
        assert!(manager.set_priority(id, 7));

        let info = manager.get(id).unwrap();
        assert_eq!(info.tags, vec!["beta".to_string()]);
        assert_eq!(info.priority, 7);
        assert_eq!(manager.metadata(id, "room"), Some(Value::from("lobby")));
        assert!(!manager.add_tag(ConnectionId::from(u64::MAX), "x"));
    }
}
