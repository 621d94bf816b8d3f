//! External change detection for open files.
//!
//! Each viewed path holds a lease per connection. The first lease creates the
//! path's watch entry and, for files, starts a poller; the last release
//! removes the entry and stops the poller.

mod poller;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::debug;
use parking_lot::Mutex;

use crate::cache::{FileWatchCache, FileWatchState};
use crate::roster::Roster;
use poller::{PollerHandle, spawn_poller};

/// How often open files are checked when nothing else is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct Lease {
    holders: usize,
    poller: Option<PollerHandle>,
}

pub struct FileWatchers {
    leases: Mutex<HashMap<PathBuf, Lease>>,
    cache: Arc<FileWatchCache>,
    roster: Arc<Roster>,
    poll_interval: Duration,
}

impl FileWatchers {
    pub fn new(cache: Arc<FileWatchCache>, roster: Arc<Roster>, poll_interval: Duration) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            cache,
            roster,
            poll_interval,
        }
    }

    /// Take a lease on `path`, recording `modified` if this is the first one.
    ///
    /// Must be called from within a Tokio runtime when `path` is a file.
    pub fn acquire(&self, path: &Path, is_directory: bool, modified: SystemTime) {
        let mut leases = self.leases.lock();
        let lease = leases.entry(path.to_path_buf()).or_insert_with(|| {
            self.cache
                .set_without_ttl(path.to_path_buf(), FileWatchState::clean(modified));
            let poller = (!is_directory).then(|| {
                debug!("Watching {:?} for external changes", path);
                spawn_poller(
                    path.to_path_buf(),
                    Arc::clone(&self.cache),
                    Arc::clone(&self.roster),
                    self.poll_interval,
                )
            });
            Lease { holders: 0, poller }
        });
        lease.holders += 1;
    }

    /// Give back one lease on `path`.
    pub fn release(&self, path: &Path) {
        let mut leases = self.leases.lock();
        let Some(lease) = leases.get_mut(path) else {
            return;
        };
        lease.holders -= 1;
        if lease.holders > 0 {
            return;
        }

        if let Some(lease) = leases.remove(path) {
            self.cache.delete(&path.to_path_buf());
            if lease.poller.is_some() {
                debug!("Stopped watching {:?}", path);
            }
        }
    }

    pub fn holders(&self, path: &Path) -> usize {
        self.leases.lock().get(path).map_or(0, |lease| lease.holders)
    }

    /// Number of paths with at least one lease.
    pub fn watched_paths(&self) -> usize {
        self.leases.lock().len()
    }
}
