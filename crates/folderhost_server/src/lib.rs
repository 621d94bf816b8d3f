#![doc = include_str!("../README.md")]

//! ## Environment Variables
//!
//! - `HOST`: Server host (default: 0.0.0.0)
//! - `PORT`: Server port (default: 5000)
//! - `FOLDER`: Served folder (default: ./folder)
//! - `STORAGE_LIMIT`: Storage limit such as `10 GB` (default: unlimited)
//! - `ACCOUNTS_PATH`: YAML account store (default: ./accounts.yaml)
//! - `WATCH_POLL_INTERVAL_MS`: External change poll period (default: 1000)
//! - `EDIT_LOG_DEBOUNCE_SECS`: Quiet period before an edit is audited (default: 10)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins

pub mod audit;
pub mod auth;
pub mod config;
pub mod handlers;
pub mod storage;

pub use config::Config;

use axum::{
    Router,
    extract::Extension,
    http::{HeaderValue, Method, header},
    routing::get,
};
use folderhost_core::Hub;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{AuthExtractor, YamlAccountStore};
use crate::handlers::{api_routes, explorer_routes, ws_handler, ws_root_handler};

/// Build the application router.
pub fn app(hub: Arc<Hub>, accounts: Arc<YamlAccountStore>, cors_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::list(origins));

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Live state endpoints
        .route("/ws", get(ws_root_handler).with_state(Arc::clone(&hub)))
        .route("/ws/{*path}", get(ws_handler).with_state(Arc::clone(&hub)))
        .nest("/api/explorer", explorer_routes(Arc::clone(&hub)))
        .nest("/api", api_routes(hub))
        // Add layers
        .layer(Extension(AuthExtractor::new(accounts)))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
