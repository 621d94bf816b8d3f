//! One live WebSocket connection.
//!
//! A [`Session`] owns a connection's subscriptions. Opening it joins the
//! roster and leases a file watch on the requested path; dropping it gives
//! both back in reverse order, whichever way the connection ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, warn};
use thiserror::Error;

use crate::account::{Account, Capability, permission_denied_message};
use crate::archive::{self, ArchiveError, ArchiveProgress};
use crate::audit::AuditEntry;
use crate::editor::{EditError, EditOperation};
use crate::error::ErrorClass;
use crate::hub::Hub;
use crate::protocol::{ArchiveKind, ClientMessage, ServerMessage};
use crate::quota::EDITOR_MIN_FREE_SPACE;
use crate::roster::ClientHandle;
use crate::scope::{PathError, display_path, is_within, resolve_within};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Cannot open {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Not enough free space to open a file for editing")]
    InsufficientSpace,

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Archive worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SessionError::Path(e) => e.class(),
            SessionError::Open { .. } => ErrorClass::TransientIo,
            SessionError::InsufficientSpace => ErrorClass::Quota,
            SessionError::Malformed(_) => ErrorClass::Validation,
            SessionError::Edit(e) => e.class(),
            SessionError::Archive(e) => e.class(),
            SessionError::Worker(_) => ErrorClass::TransientIo,
        }
    }

    /// Whether the connection must be closed after this error.
    ///
    /// Besides security errors, a connection whose target cannot be opened
    /// has nothing left to view.
    pub fn closes_connection(&self) -> bool {
        self.class().closes_connection()
            || matches!(
                self,
                SessionError::Open { .. } | SessionError::InsufficientSpace
            )
    }

    /// Whether the sender should get an `error` message for this error.
    ///
    /// Quota aborts were already reported on the progress stream.
    pub fn notifies_sender(&self) -> bool {
        !matches!(self.class(), ErrorClass::Quota | ErrorClass::Security)
    }
}

pub struct Session {
    hub: Arc<Hub>,
    account: Account,
    scope_root: PathBuf,
    handle: ClientHandle,
    path: PathBuf,
    is_directory: bool,
}

impl Session {
    /// Subscribe `handle` to `relative_path` within the account's scope.
    pub async fn open(
        hub: Arc<Hub>,
        account: Account,
        handle: ClientHandle,
        relative_path: &str,
    ) -> Result<Self, SessionError> {
        let scope_root = resolve_within(&hub.storage_root, &account.scope)?;
        let path = resolve_within(&scope_root, relative_path)?;
        let (is_directory, modified) = stat(&path).await?;

        if !is_directory {
            ensure_editor_space(&hub, &path, &scope_root).await?;
        }

        hub.roster.join(handle.clone(), path.clone(), is_directory);
        hub.watchers.acquire(&path, is_directory, modified);
        hub.roster.announce_count(&path);

        debug!("{} opened {:?}", account.username, path);

        Ok(Self {
            hub,
            account,
            scope_root,
            handle,
            path,
            is_directory,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Handle one text frame from the client.
    pub async fn handle_text(&mut self, raw: &str) -> Result<(), SessionError> {
        let message: ClientMessage = serde_json::from_str(raw)?;

        match message {
            ClientMessage::EditorChange { change } => {
                if self.require(Capability::Change) {
                    self.apply_change(raw, &change).await?;
                }
            }
            ClientMessage::ChangePath { path } => {
                if self.require(Capability::ReadDirectories) {
                    self.change_path(&path).await?;
                }
            }
            ClientMessage::Unzip { path } => {
                if self.require(Capability::Extract) {
                    self.audit(
                        "Extract file",
                        format!("{} started unzipping {} file.", self.account.username, path),
                    );
                    self.run_archive(ArchiveKind::Unzip, &path).await?;
                }
            }
            ClientMessage::Zip { path } => {
                if self.require(Capability::Archive) {
                    self.audit(
                        "Archive file",
                        format!("{} started zipping {} file.", self.account.username, path),
                    );
                    self.run_archive(ArchiveKind::Zip, &path).await?;
                }
            }
        }
        Ok(())
    }

    /// Send an error envelope to this connection only.
    pub fn send_error(&self, message: impl Into<String>) {
        self.handle.send(&ServerMessage::error(message));
    }

    fn require(&self, capability: Capability) -> bool {
        if self.account.permissions.allows(capability) {
            return true;
        }
        debug!("{} lacks {:?}", self.account.username, capability);
        self.send_error(permission_denied_message(capability));
        false
    }

    fn audit(&self, action: &str, description: String) {
        self.hub
            .audit
            .create_log(AuditEntry::new(&self.account.username, action, description));
    }

    async fn apply_change(&self, raw: &str, change: &EditOperation) -> Result<(), SessionError> {
        let display = display_path(&self.scope_root, &self.path);
        self.hub
            .edit_logs
            .schedule(&self.account.username, &self.path, &display);

        // Other editors apply the change locally; forward it as received
        self.hub
            .roster
            .broadcast_except(&self.path, self.handle.id(), Arc::from(raw));

        self.hub
            .editor
            .apply(&self.path, &self.account.scope, change)
            .await?;
        Ok(())
    }

    async fn change_path(&mut self, relative_path: &str) -> Result<(), SessionError> {
        let path = resolve_within(&self.scope_root, relative_path)?;
        let (is_directory, modified) = stat(&path).await?;
        if path == self.path {
            return Ok(());
        }
        if !is_directory {
            ensure_editor_space(&self.hub, &path, &self.scope_root).await?;
        }

        self.hub
            .edit_logs
            .flush(&self.account.username, &self.path);
        self.hub.watchers.release(&self.path);
        self.hub
            .roster
            .move_to(self.handle.id(), path.clone(), is_directory);
        self.hub.watchers.acquire(&path, is_directory, modified);

        self.hub.roster.announce_count(&self.path);
        self.hub.roster.announce_count(&path);

        debug!("{} moved from {:?} to {:?}", self.account.username, self.path, path);
        self.path = path;
        self.is_directory = is_directory;
        Ok(())
    }

    async fn run_archive(&self, kind: ArchiveKind, relative_path: &str) -> Result<u64, SessionError> {
        let src = resolve_within(&self.scope_root, relative_path)?;
        // The result lands next to the source, so the scope root itself has
        // no place to put it
        if src == self.scope_root {
            return Err(ArchiveError::Security(relative_path.to_string()).into());
        }
        let dest = archive_destination(&src, kind);
        if !is_within(&self.scope_root, &dest) {
            return Err(ArchiveError::Security(relative_path.to_string()).into());
        }

        let quota = Arc::clone(&self.hub.quota);
        let scope_root = self.scope_root.clone();
        let handle = self.handle.clone();
        let report = move |progress: ArchiveProgress| {
            handle.send(&ServerMessage::progress(kind, &progress));
        };

        let outcome = tokio::task::spawn_blocking(move || match kind {
            ArchiveKind::Unzip => archive::unzip(&src, &dest, &scope_root, quota.as_ref(), report),
            ArchiveKind::Zip => archive::zip(&src, &dest, &scope_root, quota.as_ref(), report),
        })
        .await?;

        match outcome {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                warn!("{:?} of {} failed: {}", kind, relative_path, e);
                Err(e.into())
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.hub
            .edit_logs
            .flush(&self.account.username, &self.path);
        self.hub.watchers.release(&self.path);
        if let Some((path, remaining)) = self.hub.roster.leave(self.handle.id())
            && remaining > 0
        {
            self.hub.roster.announce_count(&path);
        }
        debug!("{} closed {:?}", self.account.username, self.path);
    }
}

async fn stat(path: &Path) -> Result<(bool, SystemTime), SessionError> {
    let open_error = |source| SessionError::Open {
        path: path.to_path_buf(),
        source,
    };
    let metadata = tokio::fs::metadata(path).await.map_err(open_error)?;
    let modified = metadata.modified().map_err(open_error)?;
    Ok((metadata.is_dir(), modified))
}

/// A file nobody is editing yet may only be opened with some free space left.
async fn ensure_editor_space(hub: &Hub, path: &Path, scope_root: &Path) -> Result<(), SessionError> {
    if hub.roster.contains(path) {
        return Ok(());
    }

    let quota = Arc::clone(&hub.quota);
    let root = scope_root.to_path_buf();
    let remaining = match tokio::task::spawn_blocking(move || quota.remaining_bytes(&root)).await? {
        Ok(remaining) => remaining,
        Err(e) => {
            warn!("Cannot compute free space for {:?}: {}", scope_root, e);
            0
        }
    };

    if remaining < EDITOR_MIN_FREE_SPACE {
        return Err(SessionError::InsufficientSpace);
    }
    Ok(())
}

/// First free sibling path for the result of an archive operation:
/// `name`, `name (1)`, `name (2)` and so on, with `.zip` appended for zips.
fn archive_destination(src: &Path, kind: ArchiveKind) -> PathBuf {
    let parent = src.parent().unwrap_or(src);
    let stem = src
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = match kind {
        ArchiveKind::Zip => ".zip",
        ArchiveKind::Unzip => "",
    };

    let mut candidate = parent.join(format!("{stem}{extension}"));
    let mut index = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{stem} ({index}){extension}"));
        index += 1;
    }
    candidate
}
