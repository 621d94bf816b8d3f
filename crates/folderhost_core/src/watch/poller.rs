use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, warn};
use tokio::sync::oneshot;
use tokio::time::{MissedTickBehavior, interval};

use crate::cache::FileWatchCache;
use crate::protocol::ServerMessage;
use crate::roster::Roster;

/// Keeps a poller alive; dropping it stops the poller at its next tick.
#[derive(Debug)]
pub(crate) struct PollerHandle {
    _stop: oneshot::Sender<()>,
}

#[derive(Debug, PartialEq, Eq)]
enum Observation {
    Unchanged,
    Changed,
    /// The watch entry is gone; nobody views the file anymore.
    Unwatched,
}

/// Compare a fresh modification time with the watch entry.
///
/// Only a time newer than the recorded one counts, and only while no write
/// of our own is in flight.
fn observe(cache: &FileWatchCache, path: &Path, modified: SystemTime) -> Observation {
    let mut changed = false;
    let watched = cache.modify(&path.to_path_buf(), |state| {
        if !state.is_writing && modified > state.last_modified_at {
            state.last_modified_at = modified;
            changed = true;
        }
    });

    match (watched, changed) {
        (false, _) => Observation::Unwatched,
        (true, true) => Observation::Changed,
        (true, false) => Observation::Unchanged,
    }
}

/// Poll `path` every `period` and tell its viewers about foreign writes.
pub(crate) fn spawn_poller(
    path: PathBuf,
    cache: Arc<FileWatchCache>,
    roster: Arc<Roster>,
    period: Duration,
) -> PollerHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {}
            }

            let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Stopped watching {:?}: {}", path, e);
                    break;
                }
            };

            match observe(&cache, &path, modified) {
                Observation::Unchanged => {}
                Observation::Changed => {
                    debug!("External change detected on {:?}", path);
                    roster.broadcast_all(
                        &path,
                        &ServerMessage::EditorExternalChange {
                            modified_at: modified.into(),
                        },
                    );
                }
                Observation::Unwatched => break,
            }
        }

        debug!("Watcher for {:?} stopped", path);
    });

    PollerHandle { _stop: stop_tx }
}
