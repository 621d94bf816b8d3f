use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use super::expiring::{CacheOptions, ExpiringCache};

/// Last known state of a file that has at least one connected editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileWatchState {
    pub last_modified_at: SystemTime,
    /// `true` only while this process writes the file back. A modification
    /// time change observed while this is `false` came from someone else.
    pub is_writing: bool,
}

impl FileWatchState {
    pub fn clean(last_modified_at: SystemTime) -> Self {
        Self {
            last_modified_at,
            is_writing: false,
        }
    }
}

/// Watch entries keyed by absolute path. Never swept; entries are removed
/// when the last viewer of a path leaves.
pub type FileWatchCache = ExpiringCache<PathBuf, FileWatchState>;

pub fn new_file_watch_cache() -> Arc<FileWatchCache> {
    ExpiringCache::new(CacheOptions::unswept())
}
