//! WebSocket Upgrade Gateway
//!
//! # Architecture Overview
//!
//! ```text
//!     Client                 ┌──────────────────────────────────────────────────┐
//!     ──────────────────────▶│  net::Listener ─▶ http::UpgradeServer (hyper)    │
//!                            │                      │                           │
//!                            │        ordinary ─────┼───── WebSocket handshake  │
//!                            │           ▼          │             ▼             │
//!                            │   axum pipeline ◀────┴──── upgrade::Correlator   │
//!                            │   (handlers call          │ admission            │
//!                            │    upgrade())             │ switch → attach      │
//!                            │                           ▼                      │
//!                            │                  manager::ConnectionManager      │
//!                            │                  health monitor, cleanup sweep   │
//!                            │                                                  │
//!                            │  admin API ─ config watcher ─ metrics ─ signals  │
//!                            └──────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use upgrade_gateway::admin::{setup_admin_router, AdminState};
use upgrade_gateway::config::loader::load_config;
use upgrade_gateway::config::watcher::LimitsWatcher;
use upgrade_gateway::config::GatewayConfig;
use upgrade_gateway::http::{demo_routes, layered, UpgradeServer};
use upgrade_gateway::lifecycle::{shutdown_signal, Shutdown};
use upgrade_gateway::manager::ConnectionManager;
use upgrade_gateway::net::listener::Listener;
use upgrade_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "upgrade-gateway", version)]
#[command(about = "WebSocket upgrade gateway with managed connections", long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!("upgrade-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.connections.limits.max_connections,
        max_per_key = config.connections.limits.max_per_key,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let manager = Arc::new(ConnectionManager::new(config.connections.clone()));
    let background = manager.spawn_background();

    let process = Arc::new(Shutdown::new());
    let server_shutdown = process.subscribe();

    // Keep the watcher alive for the life of the process.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = LimitsWatcher::new(path, config.connections.limits.clone());
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                while let Some(limits) = updates.recv().await {
                    manager.reload_limits(limits);
                }
            });
            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload unavailable");
                    None
                }
            }
        }
        None => None,
    };

    if config.admin.enabled {
        let router = setup_admin_router(AdminState::new(
            Arc::clone(&manager),
            &config.admin,
            Arc::clone(&process),
        ));
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");

        let mut stop = process.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API stopped with error");
            }
        });
    }

    let listener = Listener::bind(&config.listener).await?;
    let pipeline = layered(demo_routes(), &config.timeouts);
    let server = UpgradeServer::new(pipeline, Arc::clone(&manager), &config);

    let signals = Arc::clone(&process);
    tokio::spawn(async move {
        shutdown_signal().await;
        signals.trigger();
    });

    let report = server.run(listener, server_shutdown).await?;
    tracing::info!(
        requested = report.requested,
        drained = report.drained,
        forced = report.forced,
        "Connections drained"
    );

    for handle in background {
        let _ = handle.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
