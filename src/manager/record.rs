//! Connection records and their read-only snapshots.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Instant;

use crate::health::HealthStatus;
use crate::net::connection::ConnectionId;
use crate::net::transport::Transport;
use crate::socket::{FacadeSocket, SocketState};

/// Attributes the application may attach to a connection when it upgrades.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub pool: Option<String>,
    pub tags: Vec<String>,
    pub priority: u8,
    pub metadata: HashMap<String, Value>,
}

impl ConnectionOptions {
    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Bookkeeping for one attached connection. Lives from registration until close.
pub struct ConnectionRecord {
    pub(crate) id: ConnectionId,
    pub(crate) socket: FacadeSocket,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) created_at: Instant,
    pub(crate) remote_key: String,
    pub(crate) pool: Option<String>,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) metadata: HashMap<String, Value>,
    pub(crate) health: HealthStatus,
    pub(crate) last_health_check: Option<Instant>,
    pub(crate) priority: u8,
    /// Key of the rate-limit bucket this connection was admitted against.
    pub(crate) rate_bucket: String,
}

impl ConnectionRecord {
    pub(crate) fn new(
        id: ConnectionId,
        socket: FacadeSocket,
        transport: Arc<dyn Transport>,
        remote_key: String,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            id,
            socket,
            transport,
            created_at: Instant::now(),
            rate_bucket: remote_key.clone(),
            remote_key,
            pool: options.pool,
            tags: options.tags.into_iter().collect(),
            metadata: options.metadata,
            health: HealthStatus::Unknown,
            last_health_check: None,
            priority: options.priority,
        }
    }

    pub(crate) fn info(&self, now: Instant) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            remote_key: self.remote_key.clone(),
            peer_addr: self.transport.peer_addr().map(|addr| addr.to_string()),
            pool: self.pool.clone(),
            tags: self.tags.iter().cloned().collect(),
            metadata: self.metadata.clone(),
            health: self.health,
            priority: self.priority,
            state: self.socket.state(),
            rate_bucket: self.rate_bucket.clone(),
            age_ms: millis_since(now, self.created_at),
            idle_ms: millis_since(now, self.socket.last_activity()),
            last_health_check_ms: self.last_health_check.map(|at| millis_since(now, at)),
        }
    }
}

fn millis_since(now: Instant, then: Instant) -> u64 {
    now.saturating_duration_since(then).as_millis() as u64
}

/// Point-in-time view of a connection, used by filters, policies and the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_key: String,
    pub peer_addr: Option<String>,
    pub pool: Option<String>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub health: HealthStatus,
    pub priority: u8,
    pub state: SocketState,
    pub rate_bucket: String,
    pub age_ms: u64,
    pub idle_ms: u64,
    /// Milliseconds since the last health check, if any.
    pub last_health_check_ms: Option<u64>,
}

impl ConnectionInfo {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
