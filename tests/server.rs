//! The server over real TCP, driven by a WebSocket client.

use axum::http::{HeaderMap, StatusCode};
use axum::{routing::get, Router};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use upgrade_gateway::http::{demo_routes, layered, UpgradeServer};
use upgrade_gateway::manager::{ConnectionManager, ShutdownReport, REJECTION_HEADER};
use upgrade_gateway::net::listener::{Listener, ListenerError};
use upgrade_gateway::upgrade::Upgrade;
use upgrade_gateway::GatewayConfig;

mod common;
use common::{connections_config, wait_until, within};

struct TestServer {
    addr: SocketAddr,
    manager: Arc<ConnectionManager>,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<Result<ShutdownReport, ListenerError>>,
}

impl TestServer {
    async fn start(routes: Router, mut config: GatewayConfig) -> Self {
        config.connections = {
            let mut connections = connections_config();
            connections.limits = config.connections.limits.clone();
            connections.shutdown.timeout_ms = 2_000;
            connections
        };

        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let listener = Listener::from_tcp(tcp, 64);

        let manager = Arc::new(ConnectionManager::new(config.connections.clone()));
        let server = UpgradeServer::new(layered(routes, &config.timeouts), Arc::clone(&manager), &config);
        let (shutdown, rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.run(listener, rx));

        Self {
            addr,
            manager,
            shutdown,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

fn unlimited() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.connections.limits.rate_limit_enabled = false;
    config
}

/// Status, headers and body of a handshake the server refused.
fn refused(result: Result<impl Sized, tungstenite::Error>) -> (StatusCode, HeaderMap, Option<Vec<u8>>) {
    match result {
        Err(tungstenite::Error::Http(response)) => (
            response.status(),
            response.headers().clone(),
            response.body().clone(),
        ),
        Err(e) => panic!("expected an HTTP rejection, got {e}"),
        Ok(_) => panic!("expected the handshake to be refused"),
    }
}

#[tokio::test]
async fn echo_round_trip_registers_the_connection() {
    let server = TestServer::start(demo_routes(), unlimited()).await;

    let (mut client, response) = within(connect_async(server.url("/ws/echo"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);

    client.send(Message::text("ping")).await.unwrap();
    let reply = within(client.next()).await.unwrap().unwrap();
    assert_eq!(reply.to_text().unwrap(), "ping");

    wait_until(|| server.manager.connection_count() == 1).await;
    let info = &server.manager.connections()[0];
    assert_eq!(info.pool.as_deref(), Some("echo"));
    assert_eq!(info.remote_key, "127.0.0.1");

    client.close(None).await.unwrap();
    wait_until(|| server.manager.connection_count() == 0).await;
}

#[tokio::test]
async fn ordinary_requests_pass_through_the_pipeline() {
    let server = TestServer::start(demo_routes(), unlimited()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: gateway.test\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    within(stream.read_to_end(&mut raw)).await.unwrap();
    let text = String::from_utf8_lossy(&raw).to_lowercase();

    assert!(text.starts_with("http/1.1 200"), "{text}");
    assert!(text.contains("x-request-id"));
    assert!(text.ends_with("ok"));
    assert_eq!(server.manager.connection_count(), 0);
}

async fn members_only(upgrade: Upgrade) -> (StatusCode, [(&'static str, &'static str); 1], &'static str) {
    tracing::debug!(remote_key = upgrade.remote_key(), "Declining upgrade");
    (StatusCode::FORBIDDEN, [("x-reason", "members-only")], "members only")
}

#[tokio::test]
async fn declined_handshake_gets_the_pipeline_response() {
    let routes = Router::new().route("/ws/private", get(members_only));
    let server = TestServer::start(routes, unlimited()).await;

    let (status, headers, body) = refused(within(connect_async(server.url("/ws/private"))).await);
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(headers["x-reason"], "members-only");
    assert_eq!(body.as_deref(), Some(&b"members only"[..]));
    assert_eq!(server.manager.connection_count(), 0);
}

#[tokio::test]
async fn per_client_cap_refuses_second_handshake() {
    let mut config = unlimited();
    config.connections.limits.max_per_key = 1;
    let server = TestServer::start(demo_routes(), config).await;

    let (_first, _) = within(connect_async(server.url("/ws/echo"))).await.unwrap();
    wait_until(|| server.manager.connection_count() == 1).await;

    let (status, headers, _) = refused(within(connect_async(server.url("/ws/echo"))).await);
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers[REJECTION_HEADER], "too-many-per-key");
    assert_eq!(server.manager.connection_count(), 1);
}

#[tokio::test]
async fn shutdown_closes_clients_with_going_away() {
    let server = TestServer::start(demo_routes(), unlimited()).await;

    let (mut client, _) = within(connect_async(server.url("/ws/echo"))).await.unwrap();
    wait_until(|| server.manager.connection_count() == 1).await;

    server.shutdown.send(()).unwrap();

    let frame = loop {
        match within(client.next()).await {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            other => panic!("expected a close frame, got {other:?}"),
        }
    };
    let frame = frame.expect("close frame carries a code");
    assert_eq!(u16::from(frame.code), 1001);
    assert_eq!(&*frame.reason, "server shutting down");

    // Let the client's close reply go out.
    while let Some(Ok(_)) = within(client.next()).await {}

    let report = within(server.handle).await.unwrap().unwrap();
    assert_eq!(report.requested, 1);
    assert_eq!(report.forced, 0);
    assert!(server.manager.is_shutting_down());
}
