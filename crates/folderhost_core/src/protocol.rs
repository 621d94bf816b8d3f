//! WebSocket message envelopes.
//!
//! Every message is a JSON object tagged by its `type` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveProgress;
use crate::editor::EditOperation;
use crate::size::format_size;

/// Messages sent by clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// A single resolved edit against the file the connection is viewing.
    EditorChange { change: EditOperation },
    /// Switch the connection to another path of the same scope.
    ChangePath { path: String },
    Unzip { path: String },
    Zip { path: String },
}

/// Messages sent by the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Number of connections viewing the path.
    EditorUpdateUsercount { count: usize },
    /// The directory listing changed; clients should re-read it.
    DirectoryUpdate,
    /// The open file was modified by another process.
    EditorExternalChange { modified_at: DateTime<Utc> },
    UnzipProgress {
        total_size: String,
        is_completed: bool,
        abort_msg: String,
    },
    ZipProgress {
        total_size: String,
        is_completed: bool,
        abort_msg: String,
    },
    Error { error: String },
}

/// Which archive operation a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Unzip,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: message.into(),
        }
    }

    pub fn progress(kind: ArchiveKind, progress: &ArchiveProgress) -> Self {
        let total_size = format_size(progress.cumulative_bytes);
        let is_completed = progress.done;
        let abort_msg = progress.abort_reason.clone().unwrap_or_default();

        match kind {
            ArchiveKind::Zip => ServerMessage::ZipProgress {
                total_size,
                is_completed,
                abort_msg,
            },
            ArchiveKind::Unzip => ServerMessage::UnzipProgress {
                total_size,
                is_completed,
                abort_msg,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::EditKind;

    #[test]
    fn test_parse_editor_change() {
        let raw = r#"{
            "type": "editor-change",
            "change": {
                "type": "replace",
                "range": { "startLineNumber": 1, "startColumn": 2, "endLineNumber": 2, "endColumn": 2 },
                "text": "Z"
            }
        }"#;

        let ClientMessage::EditorChange { change } = serde_json::from_str(raw).unwrap() else {
            panic!("expected editor-change");
        };
        assert_eq!(change.kind, EditKind::Replace);
        assert_eq!(change.range.start_column, 2);
        assert_eq!(change.text, "Z");
    }

    #[test]
    fn test_parse_path_messages() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"unzip","path":"/a.zip"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unzip { path } if path == "/a.zip"));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"change-path","path":"docs"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::ChangePath { path } if path == "docs"));
    }

    #[test]
    fn test_server_message_shapes() {
        let json = serde_json::to_value(ServerMessage::EditorUpdateUsercount { count: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "editor-update-usercount", "count": 2 }));

        let progress = ArchiveProgress {
            cumulative_bytes: 2048,
            done: false,
            abort_reason: Some("Unzip process exceeds storage limit!".into()),
        };
        let json = serde_json::to_value(ServerMessage::progress(ArchiveKind::Unzip, &progress)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "unzip-progress",
                "totalSize": "2.00 KB",
                "isCompleted": false,
                "abortMsg": "Unzip process exceeds storage limit!"
            })
        );

        let json = serde_json::to_value(ServerMessage::error("nope")).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "error", "error": "nope" }));
    }
}
