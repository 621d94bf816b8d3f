//! Directory snapshot cache.
//!
//! Listings are cached per `(path, scope)`. A snapshot stays valid only while
//! the directory's own modification time matches the one recorded in it; on
//! mismatch every scope's view of that path is dropped, since all of them
//! project the same physical change.
//!
//! A secondary index maps each physical path to the scopes holding a snapshot
//! of it. Snapshots that expire are pruned from the index by
//! [`DirectoryCache::spawn_index_pruner`].

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use super::expiring::{CacheOptions, ExpiringCache};
use crate::error::ErrorClass;
use crate::protocol::ServerMessage;
use crate::roster::Roster;
use crate::scope::{display_path, parent_display_path};
use crate::size::format_size;

/// How long a snapshot lives without being re-read.
pub const DIRECTORY_CACHE_TTL: Duration = Duration::from_secs(600);

const DIRECTORY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryCacheKey {
    /// Absolute path of the directory.
    pub path: PathBuf,
    /// Scope of the account that read it. Different scopes never share entries.
    pub scope: String,
}

impl DirectoryCacheKey {
    pub fn new(path: impl Into<PathBuf>, scope: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            scope: scope.into(),
        }
    }
}

/// Listing mode requested by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingMode {
    /// Shallow sizes straight from `stat`.
    #[default]
    #[serde(rename = "Optimized mode")]
    Optimized,
    /// Recursive directory sizes.
    #[serde(rename = "Quality mode")]
    Quality,
}

impl ListingMode {
    /// Parse the `mode` query value. Anything unrecognised is `Optimized`.
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("Quality mode") => ListingMode::Quality,
            _ => ListingMode::Optimized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryItem {
    pub name: String,
    pub parent_path: String,
    /// Scope-relative path, `./`-prefixed.
    pub path: String,
    pub is_directory: bool,
    pub modified_at: DateTime<Utc>,
    pub size_bytes: u64,
    #[serde(rename = "size")]
    pub size_display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryInfo {
    #[serde(flatten)]
    pub item: DirectoryItem,
    pub storage_limit: String,
}

/// Result of the external directory listing.
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    pub items: Vec<DirectoryItem>,
    /// Aggregate size, or 0 when the mode does not compute one.
    pub total_size: u64,
}

/// Turns a directory path into its entries.
#[async_trait]
pub trait DirectoryLister: Send + Sync {
    async fn list(
        &self,
        dir: &Path,
        scope_root: &Path,
        mode: ListingMode,
    ) -> io::Result<DirectoryListing>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySnapshot {
    pub items: Vec<DirectoryItem>,
    pub directory_info: DirectoryInfo,
    /// Whether the listing resolved recursive sizes.
    #[serde(skip)]
    pub quality_mode: bool,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Wrong dirpath!")]
    NotFound(PathBuf),

    #[error("Dirpath is not a directory!")]
    NotADirectory(PathBuf),

    #[error("Unknown error!")]
    Unknown(#[source] io::Error),

    #[error("Failed to list directory: {0}")]
    Listing(#[source] io::Error),
}

impl DirectoryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DirectoryError::NotFound(_) | DirectoryError::NotADirectory(_) => {
                ErrorClass::Validation
            }
            DirectoryError::Unknown(_) | DirectoryError::Listing(_) => ErrorClass::TransientIo,
        }
    }
}

/// A single directory read.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryRead<'a> {
    /// Absolute directory to list.
    pub dir: &'a Path,
    /// Root of the reader's scope, used for display paths.
    pub scope_root: &'a Path,
    pub scope: &'a str,
    pub mode: ListingMode,
    /// `false` for the `caching=false` bypass: always recompute and store
    /// without announcing the change.
    pub caching: bool,
}

pub struct DirectoryCache {
    cache: Arc<ExpiringCache<DirectoryCacheKey, Arc<DirectorySnapshot>>>,
    /// Scopes with a cached snapshot, per physical path.
    scopes_by_path: Mutex<HashMap<PathBuf, HashSet<String>>>,
    lister: Arc<dyn DirectoryLister>,
    storage_limit: String,
}

impl DirectoryCache {
    /// `storage_limit` is only echoed back to clients in `directoryInfo`.
    pub fn new(lister: Arc<dyn DirectoryLister>, storage_limit: Option<u64>) -> Self {
        Self {
            cache: ExpiringCache::new(
                CacheOptions::swept_every(DIRECTORY_SWEEP_INTERVAL)
                    .with_set_events()
                    .with_expire_events(),
            ),
            scopes_by_path: Mutex::new(HashMap::new()),
            lister,
            storage_limit: storage_limit
                .map(format_size)
                .unwrap_or_else(|| "UNLIMITED".to_string()),
        }
    }

    pub async fn read(
        &self,
        read: DirectoryRead<'_>,
    ) -> Result<Arc<DirectorySnapshot>, DirectoryError> {
        let metadata = match tokio::fs::metadata(read.dir).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DirectoryError::NotFound(read.dir.to_path_buf()));
            }
            Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
                return Err(DirectoryError::NotADirectory(read.dir.to_path_buf()));
            }
            Err(e) => return Err(DirectoryError::Unknown(e)),
        };
        if !metadata.is_dir() {
            return Err(DirectoryError::NotADirectory(read.dir.to_path_buf()));
        }
        let modified_at: DateTime<Utc> = metadata
            .modified()
            .map_err(DirectoryError::Unknown)?
            .into();

        let key = DirectoryCacheKey::new(read.dir, read.scope);
        let mut cached = self.cache.get(&key);

        if cached
            .as_ref()
            .is_some_and(|snapshot| snapshot.directory_info.item.modified_at != modified_at)
        {
            debug!("Directory {:?} changed on disk, dropping cached views", read.dir);
            self.invalidate_path(read.dir);
            cached = None;
        }

        if read.caching
            && let Some(snapshot) = cached
            && (read.mode == ListingMode::Optimized || snapshot.quality_mode)
        {
            return Ok(snapshot);
        }

        let listing = self
            .lister
            .list(read.dir, read.scope_root, read.mode)
            .await
            .map_err(DirectoryError::Listing)?;

        let (size_bytes, size_display) = if listing.total_size != 0 {
            (listing.total_size, format_size(listing.total_size))
        } else {
            (metadata.len(), "N/A".to_string())
        };

        let directory_info = DirectoryInfo {
            item: DirectoryItem {
                name: read
                    .dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                parent_path: parent_display_path(read.scope_root, read.dir),
                path: display_path(read.scope_root, read.dir),
                is_directory: true,
                modified_at,
                size_bytes,
                size_display,
            },
            storage_limit: self.storage_limit.clone(),
        };

        let snapshot = Arc::new(DirectorySnapshot {
            items: listing.items,
            directory_info,
            quality_mode: read.mode == ListingMode::Quality,
        });

        // Stored before it is indexed, so a concurrent prune never drops the
        // index entry of a live snapshot
        if read.caching {
            self.cache.set(key.clone(), Arc::clone(&snapshot), DIRECTORY_CACHE_TTL);
        } else {
            self.cache.set_silent(key.clone(), Arc::clone(&snapshot), DIRECTORY_CACHE_TTL);
        }
        self.scopes_by_path
            .lock()
            .entry(key.path)
            .or_default()
            .insert(key.scope);

        Ok(snapshot)
    }

    pub fn get(&self, key: &DirectoryCacheKey) -> Option<Arc<DirectorySnapshot>> {
        self.cache.get(key)
    }

    /// Drop every scope's snapshot of `path`.
    pub fn invalidate_path(&self, path: &Path) {
        let scopes = self.scopes_by_path.lock().remove(path).unwrap_or_default();
        for scope in scopes {
            self.cache.delete(&DirectoryCacheKey::new(path, scope));
        }
    }

    /// Drop the snapshots of `path` held for every scope except `scope`.
    pub fn invalidate_other_scopes(&self, path: &Path, scope: &str) {
        let mut index = self.scopes_by_path.lock();
        let Some(scopes) = index.get_mut(path) else {
            return;
        };
        scopes.retain(|other| {
            if other == scope {
                return true;
            }
            self.cache.delete(&DirectoryCacheKey::new(path, other.as_str()));
            false
        });
        if scopes.is_empty() {
            index.remove(path);
        }
    }

    /// Forget indexed scopes whose snapshot is no longer cached.
    ///
    /// Returns how many `(path, scope)` pairs were dropped.
    pub fn prune_index(&self) -> usize {
        let mut removed = 0;
        self.scopes_by_path.lock().retain(|path, scopes| {
            scopes.retain(|scope| {
                let live = self
                    .cache
                    .contains_key(&DirectoryCacheKey::new(path.as_path(), scope.as_str()));
                if !live {
                    removed += 1;
                }
                live
            });
            !scopes.is_empty()
        });
        removed
    }

    /// Prune the path index whenever snapshots expire.
    ///
    /// Each wake-up reconciles the whole index, so expire events dropped on a
    /// full channel are caught up by the next one. Returns `None` if the
    /// pruner was already started.
    pub fn spawn_index_pruner(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.cache.take_expire_events()?;
        let cache = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            while events.recv().await.is_some() {
                while events.try_recv().is_ok() {}
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.prune_index();
                if removed > 0 {
                    debug!("Pruned {} expired directory views from the index", removed);
                }
            }
        }))
    }

    /// Update the size of one item in one cached snapshot, if that snapshot is
    /// cached. Other scopes' views of the same directory are left as they are.
    pub fn patch_item_size(&self, key: &DirectoryCacheKey, name: &str, size: u64) -> bool {
        let mut patched = false;
        self.cache.modify(key, |snapshot| {
            let snapshot = Arc::make_mut(snapshot);
            if let Some(item) = snapshot.items.iter_mut().find(|item| item.name == name) {
                item.size_bytes = size;
                item.size_display = format_size(size);
                patched = true;
            }
        });
        patched
    }

    /// Forward every announced snapshot to the viewers of that directory as a
    /// `directory-update` message.
    ///
    /// Returns `None` if the broadcaster was already started.
    pub fn spawn_update_broadcaster(&self, roster: Arc<Roster>) -> Option<JoinHandle<()>> {
        let mut events = self.cache.take_set_events()?;
        Some(tokio::spawn(async move {
            while let Some(key) = events.recv().await {
                roster.broadcast_all(&key.path, &ServerMessage::DirectoryUpdate);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    use crate::roster::ClientHandle;

    /// Lists file names only and counts how often it was asked.
    #[derive(Default)]
    struct CountingLister {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DirectoryLister for CountingLister {
        async fn list(
            &self,
            dir: &Path,
            scope_root: &Path,
            mode: ListingMode,
        ) -> io::Result<DirectoryListing> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut items = Vec::new();
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let metadata = entry.metadata()?;
                items.push(DirectoryItem {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    parent_path: display_path(scope_root, dir),
                    path: display_path(scope_root, &entry.path()),
                    is_directory: metadata.is_dir(),
                    modified_at: metadata.modified()?.into(),
                    size_bytes: metadata.len(),
                    size_display: format_size(metadata.len()),
                });
            }
            items.sort_by(|a, b| a.name.cmp(&b.name));
            let total_size = match mode {
                ListingMode::Quality => items.iter().map(|i| i.size_bytes).sum(),
                ListingMode::Optimized => 0,
            };
            Ok(DirectoryListing { items, total_size })
        }
    }

    fn setup() -> (TempDir, Arc<CountingLister>, DirectoryCache) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let lister = Arc::new(CountingLister::default());
        let cache = DirectoryCache::new(lister.clone(), None);
        (dir, lister, cache)
    }

    fn request<'a>(dir: &'a Path, scope: &'a str, mode: ListingMode) -> DirectoryRead<'a> {
        DirectoryRead {
            dir,
            scope_root: dir,
            scope,
            mode,
            caching: true,
        }
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let (dir, lister, cache) = setup();

        let first = cache.read(request(dir.path(), "", ListingMode::Optimized)).await.unwrap();
        let second = cache.read(request(dir.path(), "", ListingMode::Optimized)).await.unwrap();

        assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.items, second.items);
        assert_eq!(first.directory_info, second.directory_info);
        assert_eq!(first.items[0].name, "a.txt");
        assert_eq!(first.directory_info.item.path, "./");
        assert_eq!(first.directory_info.storage_limit, "UNLIMITED");
    }

    #[tokio::test]
    async fn test_modification_invalidates_every_scope() {
        let (dir, lister, cache) = setup();

        cache.read(request(dir.path(), "alice", ListingMode::Optimized)).await.unwrap();
        cache.read(request(dir.path(), "bob", ListingMode::Optimized)).await.unwrap();
        assert_eq!(lister.calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        std::fs::write(dir.path().join("b.txt"), "new").unwrap();

        let fresh = cache.read(request(dir.path(), "alice", ListingMode::Optimized)).await.unwrap();
        assert_eq!(lister.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fresh.items.len(), 2);

        // bob's stale view was dropped along with alice's
        assert!(cache.get(&DirectoryCacheKey::new(dir.path(), "bob")).is_none());
        assert!(cache.get(&DirectoryCacheKey::new(dir.path(), "alice")).is_some());
    }

    #[tokio::test]
    async fn test_quality_request_needs_quality_snapshot() {
        let (dir, lister, cache) = setup();

        cache.read(request(dir.path(), "", ListingMode::Optimized)).await.unwrap();
        let quality = cache.read(request(dir.path(), "", ListingMode::Quality)).await.unwrap();
        assert_eq!(lister.calls.load(Ordering::SeqCst), 2);
        assert!(quality.quality_mode);
        assert_eq!(quality.directory_info.item.size_bytes, 5);

        // An optimized request may use the quality snapshot
        cache.read(request(dir.path(), "", ListingMode::Optimized)).await.unwrap();
        cache.read(request(dir.path(), "", ListingMode::Quality)).await.unwrap();
        assert_eq!(lister.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bypass_recomputes_silently() {
        let (dir, lister, cache) = setup();
        let mut events = cache.cache.take_set_events().unwrap();

        cache.read(request(dir.path(), "", ListingMode::Optimized)).await.unwrap();
        assert!(events.try_recv().is_ok());

        let bypass = DirectoryRead {
            caching: false,
            ..request(dir.path(), "", ListingMode::Optimized)
        };
        cache.read(bypass).await.unwrap();
        cache.read(bypass).await.unwrap();

        assert_eq!(lister.calls.load(Ordering::SeqCst), 3);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_read_errors() {
        let (dir, _lister, cache) = setup();

        let missing = dir.path().join("missing");
        let err = cache.read(request(&missing, "", ListingMode::Optimized)).await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));

        let file = dir.path().join("a.txt");
        let err = cache.read(request(&file, "", ListingMode::Optimized)).await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotADirectory(_)));
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[tokio::test]
    async fn test_invalidate_other_scopes() {
        let (dir, _lister, cache) = setup();
        for scope in ["a", "b", "c"] {
            cache.read(request(dir.path(), scope, ListingMode::Optimized)).await.unwrap();
        }

        cache.invalidate_other_scopes(dir.path(), "b");

        assert!(cache.get(&DirectoryCacheKey::new(dir.path(), "a")).is_none());
        assert!(cache.get(&DirectoryCacheKey::new(dir.path(), "b")).is_some());
        assert!(cache.get(&DirectoryCacheKey::new(dir.path(), "c")).is_none());
    }

    #[tokio::test]
    async fn test_patch_item_size_touches_only_exact_key() {
        let (dir, _lister, cache) = setup();
        cache.read(request(dir.path(), "a", ListingMode::Optimized)).await.unwrap();
        cache.read(request(dir.path(), "b", ListingMode::Optimized)).await.unwrap();

        let key = DirectoryCacheKey::new(dir.path(), "a");
        assert!(cache.patch_item_size(&key, "a.txt", 2048));
        assert!(!cache.patch_item_size(&key, "nope.txt", 1));

        let patched = cache.get(&key).unwrap();
        assert_eq!(patched.items[0].size_bytes, 2048);
        assert_eq!(patched.items[0].size_display, "2.00 KB");

        let other = cache.get(&DirectoryCacheKey::new(dir.path(), "b")).unwrap();
        assert_eq!(other.items[0].size_bytes, 5);
    }

    fn indexed_paths(cache: &DirectoryCache) -> usize {
        cache.scopes_by_path.lock().len()
    }

    #[tokio::test]
    async fn test_prune_index_drops_views_that_left_the_cache() {
        let (root, _lister, cache) = setup();
        let mut dirs = Vec::new();
        for i in 0..50 {
            let dir = root.path().join(format!("dir{i}"));
            std::fs::create_dir(&dir).unwrap();
            cache.read(request(&dir, "", ListingMode::Optimized)).await.unwrap();
            dirs.push(dir);
        }
        cache.read(request(root.path(), "", ListingMode::Optimized)).await.unwrap();
        assert_eq!(indexed_paths(&cache), 51);

        for dir in &dirs {
            std::fs::remove_dir(dir).unwrap();
            cache.cache.delete(&DirectoryCacheKey::new(dir.as_path(), ""));
        }

        assert_eq!(cache.prune_index(), 50);
        assert_eq!(indexed_paths(&cache), 1);
        assert!(cache.get(&DirectoryCacheKey::new(root.path(), "")).is_some());
    }

    #[tokio::test]
    async fn test_index_pruner_follows_expiry() {
        let (dir, _lister, cache) = setup();
        let cache = Arc::new(cache);
        cache.read(request(dir.path(), "a", ListingMode::Optimized)).await.unwrap();
        cache.read(request(dir.path(), "b", ListingMode::Optimized)).await.unwrap();

        cache.spawn_index_pruner().unwrap();
        assert!(cache.spawn_index_pruner().is_none());

        // Shorten a's lifetime and let a sweep remove it
        let key = DirectoryCacheKey::new(dir.path(), "a");
        let snapshot = cache.get(&key).unwrap();
        cache.cache.set_silent(key.clone(), snapshot, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.cache.sweep(), 1);

        let mut scopes = Vec::new();
        for _ in 0..50 {
            scopes = cache
                .scopes_by_path
                .lock()
                .get(dir.path())
                .map(|scopes| scopes.iter().cloned().collect())
                .unwrap_or_default();
            if scopes.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(scopes, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_update_broadcaster_notifies_viewers() {
        let (dir, _lister, cache) = setup();
        let roster = Arc::new(Roster::new());
        let (handle, mut rx) = ClientHandle::channel();
        roster.join(handle, dir.path().to_path_buf(), true);

        cache.spawn_update_broadcaster(roster.clone()).unwrap();
        assert!(cache.spawn_update_broadcaster(roster.clone()).is_none());

        cache.read(request(dir.path(), "", ListingMode::Optimized)).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&*message, r#"{"type":"directory-update"}"#);
    }
}
