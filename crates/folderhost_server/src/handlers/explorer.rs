use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use folderhost_core::Hub;
use folderhost_core::cache::{DirectoryError, DirectoryRead, ListingMode};
use folderhost_core::scope::resolve_within;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

use crate::auth::RequireAuth;

#[derive(Debug, Deserialize)]
pub struct ReadDirQuery {
    /// Scope-relative directory; empty or `/` for the scope root
    #[serde(default)]
    pub folder: String,
    pub mode: Option<String>,
    /// `false` recomputes the listing without announcing it
    pub caching: Option<String>,
}

/// Create explorer routes
pub fn explorer_routes(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/read-dir", get(read_dir))
        .with_state(hub)
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "err": message.into() }))).into_response()
}

/// GET /api/explorer/read-dir - List a directory of the caller's scope
async fn read_dir(
    State(hub): State<Arc<Hub>>,
    RequireAuth(account): RequireAuth,
    Query(query): Query<ReadDirQuery>,
) -> Response {
    if !account.permissions.read_directories {
        return failure(StatusCode::FORBIDDEN, "No permission!");
    }

    let resolved = resolve_within(&hub.storage_root, &account.scope)
        .and_then(|root| resolve_within(&root, &query.folder).map(|dir| (root, dir)));
    let (scope_root, dir) = match resolved {
        Ok(paths) => paths,
        Err(e) => {
            debug!("Rejected read-dir for {}: {}", account.username, e);
            return failure(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let read = DirectoryRead {
        dir: &dir,
        scope_root: &scope_root,
        scope: &account.scope,
        mode: ListingMode::from_query(query.mode.as_deref()),
        caching: query.caching.as_deref() != Some("false"),
    };

    match hub.directory_cache.read(read).await {
        Ok(snapshot) => Json(&*snapshot).into_response(),
        Err(e @ DirectoryError::Listing(_)) => {
            error!("Failed to list {:?}: {}", dir, e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => failure(StatusCode::BAD_REQUEST, e.to_string()),
    }
}
