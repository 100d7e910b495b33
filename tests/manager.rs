//! Connection manager policy: admission, health, cleanup and shutdown.

use std::sync::Arc;
use std::time::Duration;

use upgrade_gateway::config::ConnectionsConfig;
use upgrade_gateway::health::HealthStatus;
use upgrade_gateway::manager::{
    AdmissionError, ConnectionFilter, ConnectionManager, ConnectionOptions, ShutdownOptions,
};
use upgrade_gateway::net::memory::MemoryPeer;
use upgrade_gateway::net::transport::{CloseFrame, ReadyState};
use upgrade_gateway::net::ConnectionId;
use upgrade_gateway::socket::{FacadeSocket, SocketEvent};

mod common;
use common::{attached_socket, connections_config, manager, wait_until, within};

fn register(
    manager: &Arc<ConnectionManager>,
    key: &str,
    options: ConnectionOptions,
) -> (ConnectionId, FacadeSocket, MemoryPeer) {
    let (socket, peer) = attached_socket();
    let id = manager.register(socket.clone(), key, options).unwrap();
    (id, socket, peer)
}

fn shutdown_options(timeout_ms: u64) -> ShutdownOptions {
    ShutdownOptions {
        timeout: Duration::from_millis(timeout_ms),
        close_code: 1001,
        close_reason: "server going away".into(),
    }
}

#[tokio::test]
async fn per_key_cap_recovers_after_close() {
    let mut config = connections_config();
    config.limits.max_per_key = 2;
    let manager = manager(config);

    let (_, _, first) = register(&manager, "10.0.0.1", ConnectionOptions::default());
    register(&manager, "10.0.0.1", ConnectionOptions::default());

    assert_eq!(manager.check_admission("10.0.0.1").err(), Some(AdmissionError::TooManyPerKey));
    assert!(manager.check_admission("10.0.0.2").is_ok());

    first.close(1000, "done");
    wait_until(|| manager.connections_from("10.0.0.1") == 1).await;
    assert!(manager.check_admission("10.0.0.1").is_ok());
}

#[tokio::test]
async fn global_cap_applies_across_keys() {
    let mut config = connections_config();
    config.limits.max_connections = 2;
    let manager = manager(config);

    register(&manager, "10.0.0.1", ConnectionOptions::default());
    register(&manager, "10.0.0.2", ConnectionOptions::default());

    assert_eq!(manager.check_admission("10.0.0.3").err(), Some(AdmissionError::TooManyGlobal));
    assert_eq!(manager.stats().rejected.too_many_global, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_window_resets() {
    let mut config = connections_config();
    config.limits.rate_limit_enabled = true;
    config.limits.rate_limit_window_ms = 1_000;
    config.limits.rate_limit_max = 2;
    let manager = manager(config);

    assert!(manager.check_admission("10.0.0.1").is_ok());
    assert!(manager.check_admission("10.0.0.1").is_ok());
    assert_eq!(manager.check_admission("10.0.0.1").err(), Some(AdmissionError::RateLimited));
    // Another key has its own window.
    assert!(manager.check_admission("10.0.0.2").is_ok());

    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert!(manager.check_admission("10.0.0.1").is_ok());
}

#[tokio::test]
async fn reloaded_limits_apply_to_later_admissions() {
    let manager = manager(connections_config());
    register(&manager, "10.0.0.1", ConnectionOptions::default());
    register(&manager, "10.0.0.1", ConnectionOptions::default());

    let mut limits = (*manager.limits()).clone();
    limits.max_per_key = 1;
    manager.reload_limits(limits);

    assert_eq!(manager.limits().max_per_key, 1);
    assert_eq!(manager.check_admission("10.0.0.1").err(), Some(AdmissionError::TooManyPerKey));
    // Existing connections are left alone.
    assert_eq!(manager.connections_from("10.0.0.1"), 2);
}

#[tokio::test(start_paused = true)]
async fn sweep_closes_idle_connections_only() {
    let mut config = connections_config();
    config.cleanup.idle_timeout_ms = 1_000;
    let manager = manager(config);

    let (idle_id, _, idle_peer) = register(&manager, "10.0.0.1", ConnectionOptions::default());
    let (busy_id, _, busy_peer) = register(&manager, "10.0.0.2", ConnectionOptions::default());

    tokio::time::advance(Duration::from_millis(600)).await;
    assert!(manager.touch(busy_id));
    tokio::time::advance(Duration::from_millis(600)).await;

    let report = manager.sweep();
    assert_eq!(report.idle_closed, 1);
    assert_eq!(report.policy_closed, 0);

    assert_eq!(idle_peer.close_requests(), vec![CloseFrame::new(1001, "idle timeout")]);
    assert!(busy_peer.close_requests().is_empty());
    assert!(manager.get(idle_id).is_none());
    assert!(manager.get(busy_id).is_some());
}

#[tokio::test]
async fn sweep_applies_eviction_policy() {
    let manager = manager(connections_config());
    let (legacy, _, legacy_peer) =
        register(&manager, "10.0.0.1", ConnectionOptions::default().tag("legacy"));
    let (_, _, current_peer) = register(&manager, "10.0.0.1", ConnectionOptions::default());

    manager.set_eviction_policy(|info| info.has_tag("legacy"));
    let report = manager.sweep();

    assert_eq!(report.policy_closed, 1);
    assert_eq!(legacy_peer.close_requests(), vec![CloseFrame::new(1008, "evicted")]);
    assert!(current_peer.close_requests().is_empty());
    assert!(manager.get(legacy).is_none());

    manager.clear_eviction_policy();
    assert_eq!(manager.sweep().policy_closed, 0);
}

#[tokio::test]
async fn sweep_drops_records_of_closed_sockets() {
    let manager = manager(connections_config());
    let (_, socket, _) = register(&manager, "10.0.0.1", ConnectionOptions::default());

    socket.close().unwrap();
    socket.closed().await;
    // Either the sweep or the deregistration task removes it; never both.
    let report = manager.sweep();
    assert!(report.removed_closed <= 1);
    wait_until(|| manager.connection_count() == 0).await;
    assert_eq!(manager.connections_from("10.0.0.1"), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_peer_is_marked_unhealthy() {
    let mut config = connections_config();
    config.health_check.timeout_ms = 100;
    let manager = manager(config);

    let (healthy, _, healthy_peer) = register(&manager, "10.0.0.1", ConnectionOptions::default());
    let (silent, _, silent_peer) = register(&manager, "10.0.0.2", ConnectionOptions::default());
    silent_peer.set_auto_pong(false);

    let report = manager.health_check_all().await;
    assert_eq!(report.checked, 2);
    assert_eq!(report.healthy, 1);
    assert_eq!(report.unhealthy, 1);
    assert_eq!(healthy_peer.ping_count(), 1);
    assert_eq!(silent_peer.ping_count(), 1);

    assert_eq!(manager.get(healthy).unwrap().health, HealthStatus::Healthy);
    let info = manager.get(silent).unwrap();
    assert_eq!(info.health, HealthStatus::Unhealthy);
    assert!(info.last_health_check_ms.is_some());

    let stats = manager.stats();
    assert_eq!((stats.healthy, stats.unhealthy, stats.unknown), (1, 1, 0));
}

#[tokio::test(start_paused = true)]
async fn probe_in_flight_is_not_repeated() {
    let mut config = connections_config();
    config.health_check.timeout_ms = 100;
    let manager = manager(config);

    let (id, _, peer) = register(&manager, "10.0.0.1", ConnectionOptions::default());
    peer.set_auto_pong(false);

    let (single, cycle) = tokio::join!(manager.check_health(id), async {
        tokio::task::yield_now().await;
        manager.health_check_all().await
    });

    assert_eq!(single, Some(HealthStatus::Unhealthy));
    assert_eq!(cycle.skipped, 1);
    assert_eq!(cycle.checked, 0);
    assert_eq!(peer.ping_count(), 1);
}

#[tokio::test]
async fn shutdown_drains_every_connection() {
    let manager = manager(connections_config());
    let mut peers = Vec::new();
    for host in 1..=3 {
        let (_, socket, peer) = register(&manager, &format!("10.0.0.{host}"), ConnectionOptions::default());
        peers.push((socket, peer));
    }

    let report = within(manager.shutdown(shutdown_options(1_000))).await;
    assert_eq!(report.requested, 3);
    assert_eq!(report.drained, 3);
    assert_eq!(report.forced, 0);
    assert_eq!(manager.connection_count(), 0);

    for (socket, peer) in peers {
        assert_eq!(peer.close_requests(), vec![CloseFrame::new(1001, "server going away")]);
        assert!(socket.is_closed());
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_clears_connections_that_never_close() {
    let manager = manager(connections_config());
    let (_, _, polite_peer) = register(&manager, "10.0.0.1", ConnectionOptions::default());
    let (_, stuck, stuck_peer) = register(&manager, "10.0.0.2", ConnectionOptions::default());
    stuck_peer.set_ack_close(false);

    let report = manager.shutdown(shutdown_options(100)).await;
    assert_eq!(report.requested, 2);
    assert_eq!(report.drained, 1);
    assert_eq!(report.forced, 1);

    assert_eq!(manager.connection_count(), 0);
    assert!(stuck_peer.terminated());
    assert_eq!(stuck_peer.ready_state(), ReadyState::Closed);
    assert!(!polite_peer.terminated());
    assert!(stuck.is_closed());
    assert_eq!(stuck.recv().await, Some(SocketEvent::Open));
    assert_eq!(stuck.recv().await, Some(SocketEvent::Close(CloseFrame::abnormal())));
}

#[tokio::test]
async fn shutdown_runs_once_and_refuses_admissions() {
    let manager = manager(connections_config());
    register(&manager, "10.0.0.1", ConnectionOptions::default());

    let first = manager.shutdown(shutdown_options(1_000)).await;
    assert!(!first.already_shut_down);
    let second = manager.shutdown(shutdown_options(1_000)).await;
    assert!(second.already_shut_down);
    assert_eq!(second.requested, 0);

    assert!(manager.is_shutting_down());
    assert_eq!(manager.check_admission("10.0.0.9").err(), Some(AdmissionError::ShuttingDown));
    let stats = manager.stats();
    assert!(stats.shutting_down);
    assert_eq!(stats.rejected.shutting_down, 1);
}

#[tokio::test]
async fn registration_during_shutdown_is_closed() {
    let manager = manager(connections_config());
    manager.shutdown(shutdown_options(100)).await;

    let (_, _, peer) = register(&manager, "10.0.0.1", ConnectionOptions::default());
    assert_eq!(
        peer.close_requests(),
        vec![CloseFrame::new(1001, "server shutting down")]
    );
    wait_until(|| manager.connection_count() == 0).await;
}

#[tokio::test]
async fn close_where_selects_by_tag() {
    let manager = manager(connections_config());
    let (_, _, beta_one) = register(&manager, "10.0.0.1", ConnectionOptions::default().tag("beta"));
    let (_, _, beta_two) = register(&manager, "10.0.0.2", ConnectionOptions::default().tag("beta"));
    let (stable, _, stable_peer) = register(&manager, "10.0.0.3", ConnectionOptions::default());

    let filter = ConnectionFilter::new().tag("beta");
    assert_eq!(manager.find(&filter).len(), 2);
    assert_eq!(manager.close_where(&filter, 4001, "migrating"), 2);

    assert_eq!(beta_one.close_requests(), vec![CloseFrame::new(4001, "migrating")]);
    assert_eq!(beta_two.close_requests(), vec![CloseFrame::new(4001, "migrating")]);
    assert!(stable_peer.close_requests().is_empty());

    wait_until(|| manager.connection_count() == 1).await;
    assert!(manager.get(stable).is_some());
}

#[tokio::test]
async fn stats_and_record_edits() {
    let manager = manager(connections_config());
    let (id, _, _) = register(
        &manager,
        "10.0.0.1",
        ConnectionOptions::default().pool("chat").priority(3),
    );
    register(&manager, "10.0.0.1", ConnectionOptions::default().pool("chat"));
    register(&manager, "10.0.0.2", ConnectionOptions::default());

    let stats = manager.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.unknown, 3);
    assert_eq!(stats.accepted_total, 3);
    assert_eq!(stats.by_pool.get("chat"), Some(&2));
    assert_eq!(stats.by_remote_key.get("10.0.0.1"), Some(&2));

    assert!(manager.add_tag(id, "vip"));
    assert!(manager.set_metadata(id, "user", serde_json::json!("alice")));
    let info = manager.get(id).unwrap();
    assert!(info.has_tag("vip"));
    assert_eq!(info.priority, 3);
    assert_eq!(manager.metadata(id, "user"), Some(serde_json::json!("alice")));

    assert!(manager.remove_tag(id, "vip"));
    assert!(!manager.get(id).unwrap().has_tag("vip"));
    assert!(!manager.add_tag(ConnectionId::from(u64::MAX), "ghost"));
}

fn background_config() -> ConnectionsConfig {
    let mut config = connections_config();
    config.cleanup.enabled = true;
    config.cleanup.interval_ms = 50;
    config.cleanup.idle_timeout_ms = 100;
    config.health_check.enabled = true;
    config.health_check.interval_ms = 1_000;
    config.health_check.timeout_ms = 100;
    config
}

#[tokio::test(start_paused = true)]
async fn background_sweep_evicts_idle_connections() {
    let manager = manager(background_config());
    let (_, socket, peer) = register(&manager, "10.0.0.1", ConnectionOptions::default());
    let handles = manager.spawn_background();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(socket.is_closed());
    assert_eq!(peer.close_requests(), vec![CloseFrame::new(1001, "idle timeout")]);
    assert_eq!(manager.connection_count(), 0);

    manager.shutdown(shutdown_options(100)).await;
    for handle in handles {
        within(handle).await.unwrap();
    }
}

#[tokio::test]
async fn background_tasks_stop_on_shutdown() {
    let manager = manager(background_config());
    let handles = manager.spawn_background();

    manager.shutdown(shutdown_options(100)).await;
    for handle in handles {
        within(handle).await.unwrap();
    }
}
