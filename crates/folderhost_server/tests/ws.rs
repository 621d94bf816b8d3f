use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use folderhost_core::{Account, Hub, HubConfig, Permissions};
use folderhost_server::{
    app,
    audit::TracingAuditLog,
    auth::YamlAccountStore,
    storage::{FolderQuota, FsDirectoryLister},
};
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const REPLACE: &str = r#"{"type":"editor-change","change":{"type":"replace","range":{"startLineNumber":1,"startColumn":2,"endLineNumber":2,"endColumn":2},"text":"Z"}}"#;

struct Server {
    addr: SocketAddr,
    dir: TempDir,
    hub: Arc<Hub>,
}

async fn spawn_server() -> Server {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "foo\nbar").unwrap();
    std::fs::create_dir(dir.path().join("docs")).unwrap();

    let viewer = Permissions {
        read_files: true,
        ..Default::default()
    };
    let accounts = YamlAccountStore::from_accounts([
        (
            "editor-token".to_string(),
            Account {
                username: "ada".into(),
                scope: String::new(),
                permissions: Permissions::all(),
            },
        ),
        (
            "viewer-token".to_string(),
            Account {
                username: "bob".into(),
                scope: String::new(),
                permissions: viewer,
            },
        ),
    ])
    .unwrap();

    let hub = Hub::new(
        HubConfig {
            storage_root: dir.path().to_path_buf(),
            storage_limit: None,
            poll_interval: Duration::from_secs(3600),
            edit_log_debounce: Duration::from_secs(3600),
        },
        Arc::new(FsDirectoryLister),
        Arc::new(FolderQuota::new(dir.path(), None)),
        Arc::new(TracingAuditLog),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(Arc::clone(&hub), Arc::new(accounts), &[]);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Server { addr, dir, hub }
}

async fn connect(addr: SocketAddr, path: &str, token: &str) -> Ws {
    let url = format!("ws://{}/ws/{}?token={}", addr, path, token);
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn next_text(ws: &mut Ws) -> String {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return text.as_str().to_string();
        }
    }
}

async fn next_json(ws: &mut Ws) -> serde_json::Value {
    serde_json::from_str(&next_text(ws).await).unwrap()
}

async fn http_get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    let status = raw.split_whitespace().nth(1).unwrap().parse().unwrap();
    let body = raw
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

#[tokio::test]
async fn test_edit_is_forwarded_and_written() {
    let server = spawn_server().await;

    let mut a = connect(server.addr, "notes.txt", "editor-token").await;
    assert_eq!(
        next_json(&mut a).await,
        serde_json::json!({ "type": "editor-update-usercount", "count": 1 })
    );

    let mut b = connect(server.addr, "notes.txt", "editor-token").await;
    assert_eq!(next_json(&mut a).await["count"], 2);
    assert_eq!(next_json(&mut b).await["count"], 2);

    a.send(Message::Text(REPLACE.into())).await.unwrap();
    assert_eq!(next_text(&mut b).await, REPLACE);

    let file = server.dir.path().join("notes.txt");
    let mut content = String::new();
    for _ in 0..50 {
        content = std::fs::read_to_string(&file).unwrap();
        if content == "fZar" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(content, "fZar");

    // Leaving announces the new count to the remaining viewer
    a.close(None).await.unwrap();
    assert_eq!(next_json(&mut b).await["count"], 1);
}

#[tokio::test]
async fn test_edit_without_permission_gets_error() {
    let server = spawn_server().await;

    let mut viewer = connect(server.addr, "notes.txt", "viewer-token").await;
    next_json(&mut viewer).await;

    viewer.send(Message::Text(REPLACE.into())).await.unwrap();
    assert_eq!(
        next_json(&mut viewer).await,
        serde_json::json!({ "type": "error", "error": "You don't have permission to change!" })
    );
    assert_eq!(
        std::fs::read_to_string(server.dir.path().join("notes.txt")).unwrap(),
        "foo\nbar"
    );
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let server = spawn_server().await;
    let url = format!("ws://{}/ws/notes.txt", server.addr);
    assert!(connect_async(url).await.is_err());

    let url = format!("ws://{}/ws/notes.txt?token=wrong", server.addr);
    assert!(connect_async(url).await.is_err());
}

#[tokio::test]
async fn test_escaping_path_closes_connection() {
    let server = spawn_server().await;
    let mut ws = connect(server.addr, "..%2F..%2Fetc", "editor-token").await;

    let next = timeout(Duration::from_secs(2), ws.next()).await.unwrap();
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    assert_eq!(server.hub.roster.stats().active_connections, 0);
}

#[tokio::test]
async fn test_status_counts_connections() {
    let server = spawn_server().await;
    let mut ws = connect(server.addr, "docs", "editor-token").await;
    next_json(&mut ws).await;

    let (status, body) = http_get(server.addr, "/api/status").await;
    assert_eq!(status, 200);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["activeConnections"], 1);
    assert_eq!(body["activePaths"], 1);
}

#[tokio::test]
async fn test_read_dir() {
    let server = spawn_server().await;

    let (status, body) =
        http_get(server.addr, "/api/explorer/read-dir?folder=/&token=editor-token").await;
    assert_eq!(status, 200);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    let names: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["docs", "notes.txt"]);
    assert_eq!(body["directoryInfo"]["path"], "./");
    assert_eq!(body["directoryInfo"]["storageLimit"], "UNLIMITED");

    let (status, _) =
        http_get(server.addr, "/api/explorer/read-dir?folder=/&token=viewer-token").await;
    assert_eq!(status, 403);

    let (status, body) =
        http_get(server.addr, "/api/explorer/read-dir?folder=missing&token=editor-token").await;
    assert_eq!(status, 400);
    assert!(body.contains("Wrong dirpath!"));

    let (status, _) = http_get(server.addr, "/api/explorer/read-dir?folder=/").await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_directory_viewers_get_updates() {
    let server = spawn_server().await;
    let mut ws = connect(server.addr, "docs", "editor-token").await;
    next_json(&mut ws).await;

    let (status, _) =
        http_get(server.addr, "/api/explorer/read-dir?folder=docs&token=editor-token").await;
    assert_eq!(status, 200);

    assert_eq!(
        next_json(&mut ws).await,
        serde_json::json!({ "type": "directory-update" })
    );
}
