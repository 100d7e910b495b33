//! Admin API behind its bearer token.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use upgrade_gateway::admin::{setup_admin_router, AdminState};
use upgrade_gateway::config::AdminConfig;
use upgrade_gateway::lifecycle::Shutdown;
use upgrade_gateway::manager::{ConnectionManager, ConnectionOptions};
use upgrade_gateway::net::transport::CloseFrame;

mod common;
use common::{attached_socket, connections_config, manager, wait_until};

const TOKEN: &str = "test-admin-key";

fn router(manager: &Arc<ConnectionManager>, process: Arc<Shutdown>) -> Router {
    let config = AdminConfig {
        enabled: true,
        api_key: TOKEN.to_string(),
        ..AdminConfig::default()
    };
    setup_admin_router(AdminState::new(Arc::clone(manager), &config, process))
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn requests_without_the_token_are_refused() {
    let manager = manager(connections_config());
    let app = router(&manager, Arc::new(Shutdown::new()));

    let anonymous = Request::get("/admin/status").body(Body::empty()).unwrap();
    assert_eq!(call(&app, anonymous).await.0, StatusCode::UNAUTHORIZED);

    let wrong = Request::get("/admin/status")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(call(&app, wrong).await.0, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_and_connection_views() {
    let manager = manager(connections_config());
    let (socket, _peer) = attached_socket();
    let id = manager
        .register(socket, "10.0.0.1", ConnectionOptions::default().pool("chat"))
        .unwrap();
    let app = router(&manager, Arc::new(Shutdown::new()));

    let (status, body) = call(&app, request(Method::GET, "/admin/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "operational");
    assert_eq!(body["connections"], 1);

    let (_, stats) = call(&app, request(Method::GET, "/admin/connections", None)).await;
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["by_pool"]["chat"], 1);

    let uri = format!("/admin/connections/{id}");
    let (status, info) = call(&app, request(Method::GET, &uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["remote_key"], "10.0.0.1");
    assert_eq!(info["state"], "open");

    let (status, _) = call(&app, request(Method::GET, "/admin/connections/999999", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, request(Method::GET, "/admin/connections/bogus", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tags_and_metadata_are_editable() {
    let manager = manager(connections_config());
    let (socket, _peer) = attached_socket();
    let id = manager.register(socket, "10.0.0.1", ConnectionOptions::default()).unwrap();
    let app = router(&manager, Arc::new(Shutdown::new()));

    let tag_uri = format!("/admin/connections/{}/tags/vip", id.as_u64());
    let (status, _) = call(&app, request(Method::PUT, &tag_uri, None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(manager.get(id).unwrap().has_tag("vip"));

    let meta_uri = format!("/admin/connections/{id}/metadata/region");
    let (status, _) = call(&app, request(Method::PUT, &meta_uri, Some(json!("eu-west")))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(manager.metadata(id, "region"), Some(json!("eu-west")));

    let (status, _) = call(&app, request(Method::DELETE, &tag_uri, None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!manager.get(id).unwrap().has_tag("vip"));
}

#[tokio::test]
async fn close_by_filter() {
    let manager = manager(connections_config());
    let (legacy, legacy_peer) = attached_socket();
    manager
        .register(legacy, "10.0.0.1", ConnectionOptions::default().tag("legacy"))
        .unwrap();
    let (current, current_peer) = attached_socket();
    manager.register(current, "10.0.0.2", ConnectionOptions::default()).unwrap();
    let app = router(&manager, Arc::new(Shutdown::new()));

    let body = json!({ "filter": { "tags": ["legacy"] }, "code": 4002, "reason": "upgrade client" });
    let (status, response) =
        call(&app, request(Method::POST, "/admin/connections/close", Some(body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["closed"], 1);
    assert_eq!(legacy_peer.close_requests(), vec![CloseFrame::new(4002, "upgrade client")]);
    assert!(current_peer.close_requests().is_empty());
    wait_until(|| manager.connection_count() == 1).await;

    let reserved = json!({ "code": 1006 });
    let (status, _) =
        call(&app, request(Method::POST, "/admin/connections/close", Some(reserved))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_checks_on_demand() {
    let manager = manager(connections_config());
    let (socket, _peer) = attached_socket();
    let id = manager.register(socket, "10.0.0.1", ConnectionOptions::default()).unwrap();
    let app = router(&manager, Arc::new(Shutdown::new()));

    let (status, report) = call(&app, request(Method::POST, "/admin/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["checked"], 1);
    assert_eq!(report["healthy"], 1);

    let uri = format!("/admin/connections/{id}/health");
    let (status, body) = call(&app, request(Method::POST, &uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["health"], "healthy");
}

#[tokio::test]
async fn shutdown_drains_and_signals_the_process() {
    let manager = manager(connections_config());
    let (socket, peer) = attached_socket();
    manager.register(socket, "10.0.0.1", ConnectionOptions::default()).unwrap();

    let process = Arc::new(Shutdown::new());
    let mut exit = process.subscribe();
    let app = router(&manager, Arc::clone(&process));

    let body = json!({ "timeout_ms": 500, "close_reason": "maintenance" });
    let (status, report) = call(&app, request(Method::POST, "/admin/shutdown", Some(body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["requested"], 1);
    assert_eq!(report["drained"], 1);
    assert_eq!(peer.close_requests(), vec![CloseFrame::new(1001, "maintenance")]);

    assert!(exit.try_recv().is_ok());
    let (_, status_body) = call(&app, request(Method::GET, "/admin/status", None)).await;
    assert_eq!(status_body["status"], "shutting_down");
}
