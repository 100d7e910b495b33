//! Graceful shutdown of every managed connection.

use serde::Serialize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time;

use crate::config::ShutdownConfig;
use crate::manager::ConnectionManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownOptions {
    pub timeout: Duration,
    pub close_code: u16,
    pub close_reason: String,
}

impl From<&ShutdownConfig> for ShutdownOptions {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            close_code: config.close_code,
            close_reason: config.close_reason.clone(),
        }
    }
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        Self::from(&ShutdownConfig::default())
    }
}

/// Outcome of a shutdown call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Set when an earlier call already ran the shutdown; nothing else was done.
    pub already_shut_down: bool,
    /// Connections asked to close.
    pub requested: usize,
    /// Connections that closed within the timeout.
    pub drained: usize,
    /// Records cleared without a close acknowledgment.
    pub forced: usize,
}

impl ConnectionManager {
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Stop admitting, close every connection, and wait up to `options.timeout`
    /// for them to finish. Whatever remains afterwards is cleared.
    ///
    /// Only the first call does any work.
    pub async fn shutdown(&self, options: ShutdownOptions) -> ShutdownReport {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            tracing::debug!("Connection manager already shut down");
            return ShutdownReport {
                already_shut_down: true,
                ..Default::default()
            };
        }

        self.background.trigger();

        let targets = self.snapshot();
        tracing::info!(
            connections = targets.len(),
            timeout_ms = options.timeout.as_millis() as u64,
            "Connection manager shutting down"
        );

        for (id, socket, _) in &targets {
            if let Err(e) = socket.close_with(options.close_code, options.close_reason.as_str()) {
                tracing::warn!(connection_id = %id, error = %e, "Failed to close connection during shutdown");
            }
        }

        let mut live = self.live.subscribe();
        let drained_in_time = time::timeout(options.timeout, live.wait_for(|count| *count == 0))
            .await
            .is_ok();

        let forced = if drained_in_time { 0 } else { self.clear() };
        let report = ShutdownReport {
            already_shut_down: false,
            requested: targets.len(),
            drained: targets.len().saturating_sub(forced),
            forced,
        };

        if forced > 0 {
            tracing::warn!(forced, "Shutdown timeout reached, cleared remaining connections");
        }
        tracing::info!(requested = report.requested, drained = report.drained, "Connection manager shut down");
        report
    }

    /// Drop every remaining record and its connection, reporting each socket
    /// as abnormally closed.
    fn clear(&self) -> usize {
        let ids: Vec<_> = self.connections.iter().map(|record| *record.key()).collect();
        let mut cleared = 0;
        for id in ids {
            if let Some(record) = self.remove(id) {
                record.transport.terminate();
                record.socket.abandon();
                cleared += 1;
            }
        }
        cleared
    }
}
