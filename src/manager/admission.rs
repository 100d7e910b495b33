//! Admission control.
//!
//! # Responsibilities
//! - Cap registered connections globally and per remote key
//! - Rate-limit admissions per remote key with a fixed window
//! - Hold a reserved slot from admission until registration
//!
//! # Design Decisions
//! - Checks run in a fixed order: shutdown, global, per-key, rate; the first
//!   failing check is the reported reason
//! - A successful check reserves its global and per-key slot in the same
//!   step, so handshakes still in the pipeline count against both caps
//! - Only a successful admission consumes a slot in the rate window
//! - Rejections are expected traffic: logged at debug, counted in metrics

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::manager::{ConnectionManager, ConnectionOptions};
use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::socket::{FacadeSocket, SocketError};

/// Header carrying the rejection reason on refused upgrades.
pub const REJECTION_HEADER: &str = "x-upgrade-rejected";

/// Why an upgrade was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionError {
    #[error("too many connections")]
    TooManyGlobal,

    #[error("too many connections from this client")]
    TooManyPerKey,

    #[error("connection rate limit exceeded")]
    RateLimited,

    #[error("server is shutting down")]
    ShuttingDown,
}

impl AdmissionError {
    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::TooManyGlobal => "too-many-global",
            AdmissionError::TooManyPerKey => "too-many-per-key",
            AdmissionError::RateLimited => "rate-limited",
            AdmissionError::ShuttingDown => "shutting-down",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::TooManyPerKey | AdmissionError::RateLimited => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AdmissionError::TooManyGlobal | AdmissionError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), self.to_string()).into_response();
        response
            .headers_mut()
            .insert(REJECTION_HEADER, HeaderValue::from_static(self.reason()));
        response
    }
}

/// Fixed-window admission counter for one remote key.
#[derive(Debug, Clone)]
pub(crate) struct RateBucket {
    count: u32,
    window_start: Instant,
}

impl RateBucket {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    /// Take a slot in the current window, starting a new window if the
    /// previous one has elapsed.
    pub(crate) fn try_acquire(&mut self, now: Instant, window: Duration, max: u32) -> bool {
        if now.saturating_duration_since(self.window_start) >= window {
            self.count = 0;
            self.window_start = now;
        }
        if self.count >= max {
            return false;
        }
        self.count += 1;
        true
    }

    pub(crate) fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }
}

/// A reserved admission slot.
///
/// Holds one global and one per-key slot until it is either registered or
/// dropped. Dropping releases the slot.
#[must_use = "dropping an admission ticket releases its slot"]
pub struct AdmissionTicket {
    manager: Arc<ConnectionManager>,
    remote_key: String,
    held: bool,
}

impl AdmissionTicket {
    pub fn remote_key(&self) -> &str {
        &self.remote_key
    }

    /// Track an attached socket under this ticket's slot.
    pub fn register(
        mut self,
        socket: FacadeSocket,
        options: ConnectionOptions,
    ) -> Result<ConnectionId, SocketError> {
        let id = self.manager.track(&socket, &self.remote_key, options)?;
        self.held = false;
        Ok(id)
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        if self.held {
            self.manager.release_slot(&self.remote_key);
            tracing::trace!(remote_key = %self.remote_key, "Admission slot released");
        }
    }
}

impl std::fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionTicket")
            .field("remote_key", &self.remote_key)
            .field("held", &self.held)
            .finish()
    }
}

impl ConnectionManager {
    /// Decide whether a new connection from `key` may be admitted, reserving
    /// a slot for it if so.
    pub fn check_admission(self: &Arc<Self>, key: &str) -> Result<AdmissionTicket, AdmissionError> {
        match self.reserve(key) {
            Ok(()) => Ok(self.ticket(key)),
            Err(rejection) => {
                self.counters.record_rejection(rejection);
                metrics::record_admission_rejected(rejection.reason());
                tracing::debug!(remote_key = %key, reason = rejection.reason(), "Admission rejected");
                Err(rejection)
            }
        }
    }

    /// Take a slot without checking any cap.
    pub(crate) fn reserve_unchecked(self: &Arc<Self>, key: &str) -> AdmissionTicket {
        self.slots.fetch_add(1, Ordering::AcqRel);
        *self.per_key.entry(key.to_string()).or_insert(0) += 1;
        self.ticket(key)
    }

    fn ticket(self: &Arc<Self>, key: &str) -> AdmissionTicket {
        AdmissionTicket {
            manager: Arc::clone(self),
            remote_key: key.to_string(),
            held: true,
        }
    }

    fn reserve(&self, key: &str) -> Result<(), AdmissionError> {
        if self.is_shutting_down() {
            return Err(AdmissionError::ShuttingDown);
        }

        let limits = self.limits.load();
        let global = self.slots.fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
            (held < limits.max_connections).then_some(held + 1)
        });
        if global.is_err() {
            return Err(AdmissionError::TooManyGlobal);
        }

        {
            // The entry guard locks the key's shard, so check and increment
            // cannot interleave with another admission for the same key.
            let mut from_key = self.per_key.entry(key.to_string()).or_insert(0);
            if *from_key >= limits.max_per_key {
                drop(from_key);
                self.slots.fetch_sub(1, Ordering::AcqRel);
                self.per_key.remove_if(key, |_, count| *count == 0);
                return Err(AdmissionError::TooManyPerKey);
            }
            *from_key += 1;
        }

        if limits.rate_limit_enabled {
            let now = Instant::now();
            let admitted = self
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| RateBucket::new(now))
                .try_acquire(now, limits.rate_limit_window(), limits.rate_limit_max);
            if !admitted {
                self.release_slot(key);
                return Err(AdmissionError::RateLimited);
            }
        }

        Ok(())
    }

    /// Give back one global and one per-key slot.
    pub(crate) fn release_slot(&self, key: &str) {
        {
            if let Some(mut count) = self.per_key.get_mut(key) {
                *count = count.saturating_sub(1);
            }
        }
        self.per_key.remove_if(key, |_, count| *count == 0);
        let _ = self
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| held.checked_sub(1));
    }

    /// Drop rate buckets whose window has elapsed and whose key has no live
    /// or reserved connections. Returns how many were dropped.
    pub(crate) fn collect_rate_buckets(&self, now: Instant) -> usize {
        let window = self.limits.load().rate_limit_window();
        let stale: Vec<String> = self
            .buckets
            .iter()
            .filter(|bucket| bucket.is_expired(now, window))
            .map(|bucket| bucket.key().clone())
            .collect();

        let mut collected = 0;
        for key in stale {
            if self.per_key.contains_key(&key) {
                continue;
            }
            if self
                .buckets
                .remove_if(&key, |_, bucket| bucket.is_expired(now, window))
                .is_some()
            {
                collected += 1;
            }
        }
        collected
    }
}
