//! Active health checking.
//!
//! # Responsibilities
//! - Probe a connection with a transport-level ping
//! - Periodically probe every registered connection in bounded batches

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::state::HealthStatus;
use crate::manager::ConnectionManager;
use crate::socket::FacadeSocket;

/// Send one liveness probe and wait for its acknowledgment.
///
/// Only a pong echoing this probe's payload counts. A timeout or a refused
/// ping both classify the connection as unhealthy; neither is an error for
/// the caller.
pub async fn probe(socket: &FacadeSocket, timeout: Duration) -> HealthStatus {
    let payload = Bytes::copy_from_slice(&fastrand::u64(..).to_be_bytes());
    let pong = match socket.ping(payload.clone()) {
        Ok(pong) => pong,
        Err(e) => {
            tracing::warn!(socket = %socket.id(), error = %e, "Health check failed: ping refused");
            return HealthStatus::Unhealthy;
        }
    };

    match time::timeout(timeout, pong).await {
        Ok(Ok(())) => HealthStatus::Healthy,
        Ok(Err(_)) => HealthStatus::Unhealthy,
        Err(_) => {
            socket.forget_ping(&payload);
            tracing::warn!(
                socket = %socket.id(),
                timeout_ms = timeout.as_millis() as u64,
                "Health check failed: timeout"
            );
            HealthStatus::Unhealthy
        }
    }
}

/// Background task running health checks on a fixed interval.
pub struct HealthMonitor {
    manager: Arc<ConnectionManager>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(manager: Arc<ConnectionManager>, config: HealthCheckConfig) -> Self {
        Self { manager, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Connection health checks disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            timeout_ms = self.config.timeout_ms,
            batch_size = self.config.batch_size,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_millis(self.config.interval_ms));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.manager.health_check_all().await;
                    if report.unhealthy > 0 {
                        tracing::info!(
                            checked = report.checked,
                            unhealthy = report.unhealthy,
                            "Health check cycle found unhealthy connections"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
