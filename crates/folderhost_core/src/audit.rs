//! Audit trail of user actions.
//!
//! Editing produces a burst of changes per keystroke, so edit entries go
//! through [`EditLogDebouncer`], which collapses each `(user, file)` burst
//! into one entry written after a quiet period or when the editor leaves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub username: String,
    pub action: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        username: impl Into<String>,
        action: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            action: action.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

/// Sink for audit entries.
pub trait AuditLog: Send + Sync {
    fn create_log(&self, entry: AuditEntry);
}

type PendingKey = (String, PathBuf);

struct PendingLog {
    generation: u64,
    entry: AuditEntry,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct PendingState {
    next_generation: u64,
    logs: HashMap<PendingKey, PendingLog>,
}

/// Collapses repeated "Edit file" entries per user and file.
pub struct EditLogDebouncer {
    log: Arc<dyn AuditLog>,
    delay: Duration,
    pending: Arc<Mutex<PendingState>>,
}

impl EditLogDebouncer {
    pub fn new(log: Arc<dyn AuditLog>, delay: Duration) -> Self {
        Self {
            log,
            delay,
            pending: Arc::new(Mutex::new(PendingState::default())),
        }
    }

    /// Record an edit by `username` to `file`, restarting its quiet period.
    ///
    /// `display` is the scope-relative path used in the description.
    pub fn schedule(&self, username: &str, file: &Path, display: &str) {
        let key: PendingKey = (username.to_string(), file.to_path_buf());
        let entry = AuditEntry::new(
            username,
            "Edit file",
            format!("{} edited the file {}", username, display),
        );

        let mut state = self.pending.lock();
        state.next_generation += 1;
        let generation = state.next_generation;

        let timer = {
            let pending = Arc::clone(&self.pending);
            let sink = Arc::clone(&self.log);
            let key = key.clone();
            let delay = self.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let fired = {
                    let mut state = pending.lock();
                    let current = state
                        .logs
                        .get(&key)
                        .is_some_and(|pending| pending.generation == generation);
                    if current { state.logs.remove(&key) } else { None }
                };
                if let Some(fired) = fired {
                    sink.create_log(fired.entry);
                }
            })
        };

        if let Some(previous) = state.logs.insert(
            key,
            PendingLog {
                generation,
                entry,
                timer,
            },
        ) {
            previous.timer.abort();
        }
    }

    /// Write the pending entry for `username` and `file` now, if there is one.
    pub fn flush(&self, username: &str, file: &Path) {
        let key: PendingKey = (username.to_string(), file.to_path_buf());
        let Some(pending) = self.pending.lock().logs.remove(&key) else {
            return;
        };
        pending.timer.abort();
        debug!("Flushing pending edit log for {} on {:?}", username, file);
        self.log.create_log(pending.entry);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().logs.len()
    }
}
