//! Admin API.
//!
//! Every route sits behind a bearer-token check against `admin.api_key`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::config::AdminConfig;
use crate::lifecycle::Shutdown;
use crate::manager::ConnectionManager;

use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub manager: Arc<ConnectionManager>,
    pub api_key: Arc<str>,
    /// Fired after an admin-requested shutdown so the process can exit.
    pub process: Arc<Shutdown>,
}

impl AdminState {
    pub fn new(manager: Arc<ConnectionManager>, config: &AdminConfig, process: Arc<Shutdown>) -> Self {
        Self {
            manager,
            api_key: Arc::from(config.api_key.as_str()),
            process,
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/connections", get(get_stats))
        .route("/admin/connections/list", get(list_connections))
        .route("/admin/connections/close", post(close_connections))
        .route("/admin/connections/{id}", get(get_connection))
        .route("/admin/connections/{id}/health", post(check_connection))
        .route("/admin/connections/{id}/tags/{tag}", put(add_tag).delete(remove_tag))
        .route("/admin/connections/{id}/metadata/{key}", put(set_metadata))
        .route("/admin/health", post(run_health_checks))
        .route("/admin/shutdown", post(shutdown))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
