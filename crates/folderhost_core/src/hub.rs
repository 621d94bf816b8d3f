//! Process-wide live state shared by every connection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::audit::{AuditLog, EditLogDebouncer};
use crate::cache::{DirectoryCache, DirectoryLister, FileWatchCache, new_file_watch_cache};
use crate::editor::EditEngine;
use crate::quota::StorageQuota;
use crate::roster::Roster;
use crate::watch::{DEFAULT_POLL_INTERVAL, FileWatchers};

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Served folder; every account scope is resolved below it.
    pub storage_root: PathBuf,
    /// Echoed to clients in `directoryInfo`. `None` means unlimited.
    pub storage_limit: Option<u64>,
    pub poll_interval: Duration,
    pub edit_log_debounce: Duration,
}

impl HubConfig {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            storage_limit: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            edit_log_debounce: Duration::from_secs(10),
        }
    }
}

pub struct Hub {
    pub storage_root: PathBuf,
    pub roster: Arc<Roster>,
    pub directory_cache: Arc<DirectoryCache>,
    pub watch_cache: Arc<FileWatchCache>,
    pub watchers: FileWatchers,
    pub editor: EditEngine,
    pub quota: Arc<dyn StorageQuota>,
    pub audit: Arc<dyn AuditLog>,
    pub edit_logs: EditLogDebouncer,
    tasks: Vec<JoinHandle<()>>,
}

impl Hub {
    /// Wire up the caches and start the directory update broadcaster and
    /// index pruner.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: HubConfig,
        lister: Arc<dyn DirectoryLister>,
        quota: Arc<dyn StorageQuota>,
        audit: Arc<dyn AuditLog>,
    ) -> Arc<Self> {
        let roster = Arc::new(Roster::new());
        let directory_cache = Arc::new(DirectoryCache::new(lister, config.storage_limit));
        let watch_cache = new_file_watch_cache();
        let tasks: Vec<JoinHandle<()>> = directory_cache
            .spawn_update_broadcaster(Arc::clone(&roster))
            .into_iter()
            .chain(directory_cache.spawn_index_pruner())
            .collect();

        Arc::new(Self {
            storage_root: config.storage_root,
            watchers: FileWatchers::new(
                Arc::clone(&watch_cache),
                Arc::clone(&roster),
                config.poll_interval,
            ),
            editor: EditEngine::new(Arc::clone(&watch_cache), Arc::clone(&directory_cache)),
            edit_logs: EditLogDebouncer::new(Arc::clone(&audit), config.edit_log_debounce),
            roster,
            directory_cache,
            watch_cache,
            quota,
            audit,
            tasks,
        })
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
