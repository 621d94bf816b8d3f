//! Filesystem-backed directory listing and storage quota.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use folderhost_core::cache::{DirectoryItem, DirectoryLister, DirectoryListing, ListingMode};
use folderhost_core::quota::StorageQuota;
use folderhost_core::scope::{display_path, parent_display_path};
use folderhost_core::size::format_size;
use tracing::warn;

/// Total size of the regular files below `path`. Symlinks are not followed.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    let mut stack = vec![path.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                total += entry.metadata()?.len();
            }
        }
    }

    Ok(total)
}

/// Lists a directory straight from disk.
///
/// In quality mode sub-directory sizes are computed recursively and the sum
/// of all entries is reported as the listing total.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDirectoryLister;

#[async_trait]
impl DirectoryLister for FsDirectoryLister {
    async fn list(
        &self,
        dir: &Path,
        scope_root: &Path,
        mode: ListingMode,
    ) -> io::Result<DirectoryListing> {
        let dir = dir.to_path_buf();
        let scope_root = scope_root.to_path_buf();
        tokio::task::spawn_blocking(move || list_blocking(&dir, &scope_root, mode))
            .await
            .map_err(io::Error::other)?
    }
}

fn list_blocking(dir: &Path, scope_root: &Path, mode: ListingMode) -> io::Result<DirectoryListing> {
    let mut items = Vec::new();
    let mut total_size = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping {:?}: {}", path, e);
                continue;
            }
        };

        let is_directory = metadata.is_dir();
        let (size_bytes, size_display) = match (is_directory, mode) {
            (true, ListingMode::Quality) => {
                let size = dir_size(&path).unwrap_or_else(|e| {
                    warn!("Cannot size {:?}: {}", path, e);
                    0
                });
                (size, format_size(size))
            }
            (true, ListingMode::Optimized) => (metadata.len(), "N/A".to_string()),
            (false, _) => (metadata.len(), format_size(metadata.len())),
        };
        if mode == ListingMode::Quality {
            total_size += size_bytes;
        }

        let modified_at: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        items.push(DirectoryItem {
            name: entry.file_name().to_string_lossy().into_owned(),
            parent_path: parent_display_path(scope_root, &path),
            path: display_path(scope_root, &path),
            is_directory,
            modified_at,
            size_bytes,
            size_display,
        });
    }

    items.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    Ok(DirectoryListing { items, total_size })
}

/// Quota of the whole served folder against the configured storage limit.
///
/// Every scope shares the folder's limit.
#[derive(Debug, Clone)]
pub struct FolderQuota {
    root: PathBuf,
    limit: Option<u64>,
}

impl FolderQuota {
    pub fn new(root: impl Into<PathBuf>, limit: Option<u64>) -> Self {
        Self {
            root: root.into(),
            limit,
        }
    }
}

impl StorageQuota for FolderQuota {
    fn remaining_bytes(&self, _scope_root: &Path) -> io::Result<u64> {
        match self.limit {
            None => Ok(u64::MAX),
            Some(limit) => Ok(limit.saturating_sub(dir_size(&self.root)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b_dir/nested")).unwrap();
        fs::write(dir.path().join("b_dir/one.txt"), "12345").unwrap();
        fs::write(dir.path().join("b_dir/nested/two.txt"), "123").unwrap();
        fs::write(dir.path().join("a.txt"), "1234567890").unwrap();
        dir
    }

    #[test]
    fn test_dir_size() {
        let dir = tree();
        assert_eq!(dir_size(dir.path()).unwrap(), 18);
        assert_eq!(dir_size(&dir.path().join("b_dir")).unwrap(), 8);
    }

    #[tokio::test]
    async fn test_optimized_listing() {
        let dir = tree();
        let listing = FsDirectoryLister
            .list(dir.path(), dir.path(), ListingMode::Optimized)
            .await
            .unwrap();

        assert_eq!(listing.total_size, 0);
        let names: Vec<_> = listing.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["b_dir", "a.txt"]);

        let folder = &listing.items[0];
        assert!(folder.is_directory);
        assert_eq!(folder.size_display, "N/A");
        assert_eq!(folder.path, "./b_dir");
        assert_eq!(folder.parent_path, "./");

        assert_eq!(listing.items[1].size_display, "10 B");
    }

    #[tokio::test]
    async fn test_quality_listing_sums_sizes() {
        let dir = tree();
        let listing = FsDirectoryLister
            .list(dir.path(), dir.path(), ListingMode::Quality)
            .await
            .unwrap();

        assert_eq!(listing.total_size, 18);
        assert_eq!(listing.items[0].size_bytes, 8);
        assert_eq!(listing.items[0].size_display, "8 B");
    }

    #[test]
    fn test_folder_quota() {
        let dir = tree();
        assert_eq!(
            FolderQuota::new(dir.path(), Some(100))
                .remaining_bytes(dir.path())
                .unwrap(),
            82
        );
        assert_eq!(
            FolderQuota::new(dir.path(), Some(10))
                .remaining_bytes(dir.path())
                .unwrap(),
            0
        );
        assert_eq!(
            FolderQuota::new(dir.path(), None)
                .remaining_bytes(dir.path())
                .unwrap(),
            u64::MAX
        );
    }
}
