//! Zip extraction and creation under a storage quota.
//!
//! Both operations are blocking and meant to run on `spawn_blocking`. They
//! report progress through a callback: one event before each entry with the
//! bytes processed so far, then either one completion event or one event
//! carrying the abort reason.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ErrorClass;
use crate::quota::StorageQuota;
use crate::scope::is_within;

pub const UNZIP_QUOTA_MESSAGE: &str = "Unzip process exceeds storage limit!";
pub const ZIP_QUOTA_MESSAGE: &str = "Zip process exceeds storage limit!";

/// One progress event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveProgress {
    pub cumulative_bytes: u64,
    pub done: bool,
    pub abort_reason: Option<String>,
}

impl ArchiveProgress {
    fn running(cumulative_bytes: u64) -> Self {
        Self {
            cumulative_bytes,
            ..Default::default()
        }
    }

    fn completed(cumulative_bytes: u64) -> Self {
        Self {
            cumulative_bytes,
            done: true,
            abort_reason: None,
        }
    }

    fn aborted(cumulative_bytes: u64, reason: impl Into<String>) -> Self {
        Self {
            cumulative_bytes,
            done: false,
            abort_reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot open zip file: {0}")]
    Open(#[source] ZipError),

    #[error("Cannot access {path:?}: {source}")]
    Source { path: PathBuf, source: io::Error },

    #[error("Cannot get remaining folder space: {0}")]
    QuotaUnavailable(#[source] io::Error),

    #[error("Unable to process entry '{entry}': {source}")]
    Entry { entry: String, source: io::Error },

    #[error(transparent)]
    Zip(#[from] ZipError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Security risk: '{0}' points outside of its folder")]
    Security(String),

    #[error("{0}")]
    Quota(&'static str),

    #[error("{message} Cleanup failed: {source}")]
    QuotaCleanupFailed {
        message: &'static str,
        source: io::Error,
    },
}

impl ArchiveError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ArchiveError::Security(_) => ErrorClass::Security,
            ArchiveError::Quota(_) | ArchiveError::QuotaCleanupFailed { .. } => ErrorClass::Quota,
            ArchiveError::Open(_) => ErrorClass::Validation,
            _ => ErrorClass::TransientIo,
        }
    }
}

/// Extract `src` into the new directory `dest`.
///
/// `dest` must not exist yet. On a quota abort the partially extracted
/// directory is removed; a rejected entry stops extraction and leaves what
/// was already written in place. Returns the number of bytes written.
pub fn unzip(
    src: &Path,
    dest: &Path,
    scope_root: &Path,
    quota: &dyn StorageQuota,
    mut progress: impl FnMut(ArchiveProgress),
) -> Result<u64, ArchiveError> {
    let file = File::open(src).map_err(|source| ArchiveError::Source {
        path: src.to_path_buf(),
        source,
    })?;
    let mut archive = ZipArchive::new(file).map_err(ArchiveError::Open)?;
    let remaining = quota
        .remaining_bytes(scope_root)
        .map_err(ArchiveError::QuotaUnavailable)?;

    fs::create_dir_all(dest)?;
    let owner = Owner::current();
    let mut total: u64 = 0;

    debug!("Extracting {:?} into {:?} ({} entries)", src, dest, archive.len());

    for index in 0..archive.len() {
        progress(ArchiveProgress::running(total));

        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        let target = entry
            .enclosed_name()
            .map(|relative| dest.join(relative))
            .filter(|target| is_within(dest, target));
        let Some(target) = target else {
            warn!("Rejected archive entry {:?} in {:?}", name, src);
            return Err(ArchiveError::Security(name));
        };

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|source| entry_error(&name, source))?;
            owner.apply(&target);
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| entry_error(&name, source))?;
        }
        let mut out = File::create(&target).map_err(|source| entry_error(&name, source))?;
        let budget = remaining.saturating_sub(total).saturating_add(1);
        let written = io::copy(&mut entry.by_ref().take(budget), &mut out)
            .map_err(|source| entry_error(&name, source))?;
        drop(out);
        owner.apply(&target);
        total += written;

        if total > remaining {
            warn!("Extraction of {:?} exceeded the storage limit", src);
            return match fs::remove_dir_all(dest) {
                Ok(()) => {
                    progress(ArchiveProgress::aborted(total, UNZIP_QUOTA_MESSAGE));
                    Err(ArchiveError::Quota(UNZIP_QUOTA_MESSAGE))
                }
                Err(source) => {
                    progress(ArchiveProgress::aborted(
                        total,
                        format!("{} Error while deleting the extracted folder.", UNZIP_QUOTA_MESSAGE),
                    ));
                    Err(ArchiveError::QuotaCleanupFailed {
                        message: UNZIP_QUOTA_MESSAGE,
                        source,
                    })
                }
            };
        }
    }

    progress(ArchiveProgress::completed(total));
    Ok(total)
}

/// Archive the file or directory `src` into the new zip file `dest`.
///
/// Entries whose real location is outside `scope_root` (through a symlink)
/// abort the operation without touching the partial archive. On a quota
/// abort the partial archive is removed.
/// Returns the number of source bytes read.
pub fn zip(
    src: &Path,
    dest: &Path,
    scope_root: &Path,
    quota: &dyn StorageQuota,
    mut progress: impl FnMut(ArchiveProgress),
) -> Result<u64, ArchiveError> {
    let entries = collect_entries(src).map_err(|source| ArchiveError::Source {
        path: src.to_path_buf(),
        source,
    })?;
    let real_root = fs::canonicalize(scope_root)?;
    let remaining = quota
        .remaining_bytes(scope_root)
        .map_err(ArchiveError::QuotaUnavailable)?;

    let mut writer = ZipWriter::new(File::create(dest)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut total: u64 = 0;

    debug!("Archiving {:?} into {:?} ({} entries)", src, dest, entries.len());

    for entry in &entries {
        progress(ArchiveProgress::running(total));

        let real = fs::canonicalize(&entry.path).map_err(|source| entry_error(&entry.name, source))?;
        if !is_within(&real_root, &real) {
            warn!("Rejected {:?} outside of {:?}", entry.path, scope_root);
            return Err(ArchiveError::Security(entry.name.clone()));
        }

        if entry.is_directory {
            writer.add_directory(format!("{}/", entry.name), options)?;
            continue;
        }

        writer.start_file(entry.name.as_str(), options)?;
        let mut input = File::open(&entry.path).map_err(|source| entry_error(&entry.name, source))?;
        let budget = remaining.saturating_sub(total).saturating_add(1);
        total += io::copy(&mut input.by_ref().take(budget), &mut writer)
            .map_err(|source| entry_error(&entry.name, source))?;

        if total > remaining {
            warn!("Archiving {:?} exceeded the storage limit", src);
            drop(writer);
            return match fs::remove_file(dest) {
                Ok(()) => {
                    progress(ArchiveProgress::aborted(total, ZIP_QUOTA_MESSAGE));
                    Err(ArchiveError::Quota(ZIP_QUOTA_MESSAGE))
                }
                Err(source) => {
                    progress(ArchiveProgress::aborted(
                        total,
                        format!("{} Error while deleting the archive.", ZIP_QUOTA_MESSAGE),
                    ));
                    Err(ArchiveError::QuotaCleanupFailed {
                        message: ZIP_QUOTA_MESSAGE,
                        source,
                    })
                }
            };
        }
    }

    writer.finish()?;
    progress(ArchiveProgress::completed(total));
    Ok(total)
}

fn entry_error(name: &str, source: io::Error) -> ArchiveError {
    ArchiveError::Entry {
        entry: name.to_string(),
        source,
    }
}

struct SourceEntry {
    path: PathBuf,
    /// Name inside the archive, `/`-separated and relative to the source.
    name: String,
    is_directory: bool,
}

/// List `src` depth first in name order. A plain file yields one entry named
/// after itself. Symlinked directories are not descended into.
fn collect_entries(src: &Path) -> io::Result<Vec<SourceEntry>> {
    let metadata = fs::metadata(src)?;
    if !metadata.is_dir() {
        let name = src
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok(vec![SourceEntry {
            path: src.to_path_buf(),
            name,
            is_directory: false,
        }]);
    }

    let mut entries = Vec::new();
    let mut stack = vec![(src.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = stack.pop() {
        let mut children: Vec<_> = fs::read_dir(&dir)?.collect::<io::Result<_>>()?;
        children.sort_by_key(|child| child.file_name());

        let mut subdirs = Vec::new();
        for child in children {
            let name = format!("{}{}", prefix, child.file_name().to_string_lossy());
            let file_type = child.file_type()?;
            let is_directory = if file_type.is_symlink() {
                fs::metadata(child.path())?.is_dir()
            } else {
                file_type.is_dir()
            };

            entries.push(SourceEntry {
                path: child.path(),
                name: name.clone(),
                is_directory,
            });
            if is_directory && !file_type.is_symlink() {
                subdirs.push((child.path(), format!("{}/", name)));
            }
        }
        // Reverse so the stack pops them in name order
        stack.extend(subdirs.into_iter().rev());
    }

    Ok(entries)
}

/// Owner and group given to extracted entries: the user running the
/// process, never the ids stored in the archive.
struct Owner {
    #[cfg(unix)]
    ids: (u32, u32),
}

impl Owner {
    #[cfg(unix)]
    fn current() -> Self {
        use nix::unistd::{getgid, getuid};
        Self {
            ids: (getuid().as_raw(), getgid().as_raw()),
        }
    }

    #[cfg(not(unix))]
    fn current() -> Self {
        Self {}
    }

    #[cfg(unix)]
    fn apply(&self, path: &Path) {
        let (uid, gid) = self.ids;
        if let Err(e) = std::os::unix::fs::chown(path, Some(uid), Some(gid)) {
            warn!("Failed to set owner of {:?}: {}", path, e);
        }
    }

    #[cfg(not(unix))]
    fn apply(&self, _path: &Path) {}
}
