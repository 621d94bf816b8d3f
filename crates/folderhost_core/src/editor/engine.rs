use std::fs::Metadata;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use log::debug;

use super::{EditError, EditOperation, apply_edit};
use crate::cache::{DirectoryCache, DirectoryCacheKey, FileWatchCache};

/// Applies edits to files on disk and keeps the caches in step.
///
/// Every write is bracketed by the file's `is_writing` flag so the external
/// change watcher can tell our own modification time bumps from foreign ones.
pub struct EditEngine {
    watch_cache: Arc<FileWatchCache>,
    directory_cache: Arc<DirectoryCache>,
}

impl EditEngine {
    pub fn new(watch_cache: Arc<FileWatchCache>, directory_cache: Arc<DirectoryCache>) -> Self {
        Self {
            watch_cache,
            directory_cache,
        }
    }

    /// Read `file`, apply `op` and write the result back.
    ///
    /// `scope` selects which cached view of the parent directory gets its
    /// size column patched.
    pub async fn apply(&self, file: &Path, scope: &str, op: &EditOperation) -> Result<(), EditError> {
        let content = tokio::fs::read_to_string(file)
            .await
            .map_err(|source| EditError::Read {
                path: file.to_path_buf(),
                source,
            })?;

        match apply_edit(&content, op)? {
            Some(updated) => self.write_back(file, scope, updated).await,
            None => Ok(()),
        }
    }

    async fn write_back(&self, file: &Path, scope: &str, content: String) -> Result<(), EditError> {
        let key = file.to_path_buf();
        if !self.watch_cache.modify(&key, |state| state.is_writing = true) {
            return Err(EditError::NotWatched(key));
        }

        let written = persist(file, &content).await;

        let modified = written.as_ref().ok().and_then(|meta| meta.modified().ok());
        self.watch_cache.modify(&key, |state| {
            if let Some(modified) = modified {
                state.last_modified_at = modified;
            }
            state.is_writing = false;
        });

        let metadata = written.map_err(|source| EditError::Write {
            path: file.to_path_buf(),
            source,
        })?;
        debug!("Wrote {} bytes to {:?}", metadata.len(), file);

        if let (Some(parent), Some(name)) = (file.parent(), file.file_name()) {
            self.directory_cache.patch_item_size(
                &DirectoryCacheKey::new(parent, scope),
                &name.to_string_lossy(),
                metadata.len(),
            );
        }
        Ok(())
    }

    /// Modification time last recorded for a watched file.
    pub fn last_modified(&self, file: &Path) -> Option<SystemTime> {
        self.watch_cache
            .get(&file.to_path_buf())
            .map(|state| state.last_modified_at)
    }
}

async fn persist(file: &Path, content: &str) -> std::io::Result<Metadata> {
    tokio::fs::write(file, content).await?;
    tokio::fs::metadata(file).await
}
