use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::admin::AdminState;
use crate::health::HealthStatus;
use crate::manager::{ConnectionFilter, ConnectionInfo, ConnectionStats, HealthReport, ShutdownOptions, ShutdownReport};
use crate::net::connection::ConnectionId;
use crate::net::transport::close_code;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct CloseRequest {
    #[serde(default)]
    pub filter: ConnectionFilter,
    #[serde(default = "default_close_code")]
    pub code: u16,
    #[serde(default)]
    pub reason: String,
}

fn default_close_code() -> u16 {
    close_code::NORMAL
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CloseResponse {
    pub closed: usize,
}

/// Optional overrides for a shutdown; unset fields use the configured defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ShutdownRequest {
    pub timeout_ms: Option<u64>,
    pub close_code: Option<u16>,
    pub close_reason: Option<String>,
}

#[derive(Serialize)]
pub struct ConnectionHealth {
    pub id: ConnectionId,
    pub health: HealthStatus,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let status = if state.manager.is_shutting_down() {
        "shutting_down"
    } else {
        "operational"
    };
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status,
        connections: state.manager.connection_count(),
    })
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<ConnectionStats> {
    Json(state.manager.stats())
}

pub async fn list_connections(State(state): State<AdminState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.manager.connections())
}

pub async fn close_connections(
    State(state): State<AdminState>,
    Json(request): Json<CloseRequest>,
) -> Result<Json<CloseResponse>, (StatusCode, &'static str)> {
    if !is_sendable_close_code(request.code) {
        return Err((StatusCode::BAD_REQUEST, "close code must be in 1000..=4999 and not reserved"));
    }
    let closed = state
        .manager
        .close_where(&request.filter, request.code, &request.reason);
    Ok(Json(CloseResponse { closed }))
}

pub async fn run_health_checks(State(state): State<AdminState>) -> Json<HealthReport> {
    Json(state.manager.health_check_all().await)
}

pub async fn check_connection(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionHealth>, StatusCode> {
    let id = parse_id(&id)?;
    let health = state.manager.check_health(id).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(ConnectionHealth { id, health }))
}

pub async fn shutdown(
    State(state): State<AdminState>,
    Json(request): Json<ShutdownRequest>,
) -> Json<ShutdownReport> {
    let defaults = ShutdownOptions::from(&state.manager.config().shutdown);
    let options = ShutdownOptions {
        timeout: request.timeout_ms.map(Duration::from_millis).unwrap_or(defaults.timeout),
        close_code: request.close_code.unwrap_or(defaults.close_code),
        close_reason: request.close_reason.unwrap_or(defaults.close_reason),
    };

    tracing::warn!(timeout_ms = options.timeout.as_millis() as u64, "Shutdown requested through admin API");
    let report = state.manager.shutdown(options).await;
    state.process.trigger();
    Json(report)
}

pub async fn get_connection(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionInfo>, StatusCode> {
    let id = parse_id(&id)?;
    state.manager.get(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn add_tag(
    State(state): State<AdminState>,
    Path((id, tag)): Path<(String, String)>,
) -> StatusCode {
    match parse_id(&id) {
        Ok(id) if state.manager.add_tag(id, tag) => StatusCode::NO_CONTENT,
        Ok(_) => StatusCode::NOT_FOUND,
        Err(status) => status,
    }
}

pub async fn remove_tag(
    State(state): State<AdminState>,
    Path((id, tag)): Path<(String, String)>,
) -> StatusCode {
    match parse_id(&id) {
        Ok(id) if state.manager.remove_tag(id, &tag) => StatusCode::NO_CONTENT,
        Ok(_) => StatusCode::NOT_FOUND,
        Err(status) => status,
    }
}

pub async fn set_metadata(
    State(state): State<AdminState>,
    Path((id, key)): Path<(String, String)>,
    Json(value): Json<Value>,
) -> StatusCode {
    match parse_id(&id) {
        Ok(id) if state.manager.set_metadata(id, key, value) => StatusCode::NO_CONTENT,
        Ok(_) => StatusCode::NOT_FOUND,
        Err(status) => status,
    }
}

/// Accepts both `conn-7` and `7`.
fn parse_id(raw: &str) -> Result<ConnectionId, StatusCode> {
    raw.strip_prefix("conn-")
        .unwrap_or(raw)
        .parse::<u64>()
        .map(ConnectionId::from)
        .map_err(|_| StatusCode::BAD_REQUEST)
}

fn is_sendable_close_code(code: u16) -> bool {
    (1000..=4999).contains(&code) && code != close_code::NO_STATUS && code != close_code::ABNORMAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_id_forms() {
        assert_eq!(parse_id("conn-42"), Ok(ConnectionId::from(42)));
        assert_eq!(parse_id("42"), Ok(ConnectionId::from(42)));
        assert_eq!(parse_id("conn-x"), Err(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn reserved_close_codes_are_refused() {
        assert!(is_sendable_close_code(1000));
        assert!(is_sendable_close_code(4001));
        assert!(!is_sendable_close_code(1006));
        assert!(!is_sendable_close_code(999));
    }
}
