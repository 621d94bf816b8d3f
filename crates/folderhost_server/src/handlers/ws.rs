use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use folderhost_core::{Account, ClientHandle, ErrorClass, Hub, Session};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::auth::RequireAuth;

/// WebSocket upgrade handler for `/ws/{*path}`
pub async fn ws_handler(
    State(hub): State<Arc<Hub>>,
    RequireAuth(account): RequireAuth,
    Path(path): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    info!("WebSocket upgrade: user={}, path={}", account.username, path);
    ws.on_upgrade(move |socket| handle_socket(socket, hub, account, path))
}

/// WebSocket upgrade handler for `/ws`, the scope root
pub async fn ws_root_handler(
    State(hub): State<Arc<Hub>>,
    RequireAuth(account): RequireAuth,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    info!("WebSocket upgrade: user={}, path=/", account.username);
    ws.on_upgrade(move |socket| handle_socket(socket, hub, account, String::new()))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, account: Account, path: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, mut outbound) = ClientHandle::channel();
    let username = account.username.clone();

    let mut session = match Session::open(hub, account, handle, &path).await {
        Ok(session) => session,
        Err(e) => {
            match e.class() {
                ErrorClass::Security => warn!("Rejected connection of {} to {:?}: {}", username, path, e),
                _ => debug!("Cannot open {:?} for {}: {}", path, username, e),
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    info!("WebSocket connected: user={}, path={:?}", username, session.path());

    // Outbound messages are written by their own task so archive progress
    // keeps flowing while the read loop waits on an operation
    let mut writer = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(payload.as_ref().into())).await {
                debug!("Failed to send message: {}", e);
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = session.handle_text(text.as_str()).await {
                            if !report(&session, &e) {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            _ = &mut writer => break,
        }
    }

    info!("WebSocket disconnected: user={}, path={:?}", username, session.path());

    // Releases the watcher lease and leaves the roster
    drop(session);
    writer.abort();
}

/// Surface a failed message according to its error class.
///
/// Returns `false` when the connection must be closed.
fn report(session: &Session, e: &folderhost_core::SessionError) -> bool {
    let username = &session.account().username;
    match e.class() {
        ErrorClass::Security => warn!("Security error from {}: {}", username, e),
        ErrorClass::Quota => warn!("Quota exceeded for {}: {}", username, e),
        ErrorClass::TransientIo => error!("I/O error for {}: {}", username, e),
        ErrorClass::Validation | ErrorClass::Permission => {
            debug!("Rejected message from {}: {}", username, e)
        }
    }

    if e.notifies_sender() {
        session.send_error(e.to_string());
    }
    !e.closes_connection()
}
