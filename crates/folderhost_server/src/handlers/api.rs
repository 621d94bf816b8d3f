use axum::{
    Router,
    extract::State,
    response::{IntoResponse, Json},
    routing::get,
};
use folderhost_core::Hub;
use serde::Serialize;
use std::sync::Arc;

/// Server status response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub active_connections: usize,
    pub active_paths: usize,
}

/// Create API routes
pub fn api_routes(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(hub)
}

/// GET /api/status - Get server status (public endpoint)
async fn get_status(State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    let stats = hub.roster.stats();

    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_connections: stats.active_connections,
        active_paths: stats.active_paths,
    })
}
