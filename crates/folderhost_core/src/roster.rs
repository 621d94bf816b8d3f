//! Client roster and broadcast router.
//!
//! Maps every viewed path to the live connections subscribed to it. Each
//! connection is reached through a bounded outbound channel drained by its own
//! socket writer, so broadcasting never blocks on a slow socket.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// Unique id of a WebSocket connection.
pub type ConnectionId = Uuid;

/// Outbound messages queued per connection before new ones are dropped.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
}

impl ClientHandle {
    /// Create a handle with a fresh id, plus the receiver the socket writer drains.
    pub fn channel() -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message for this connection only.
    ///
    /// Returns `false` once the connection is gone.
    pub fn send(&self, message: &ServerMessage) -> bool {
        match encode(message) {
            Some(payload) => self.send_raw(payload),
            None => true,
        }
    }

    pub fn send_raw(&self, payload: Arc<str>) -> bool {
        match self.tx.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for connection {}, dropping message", self.id);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

fn encode(message: &impl Serialize) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!("Failed to encode outbound message: {}", e);
            None
        }
    }
}

struct RosterEntry {
    is_directory: bool,
    connections: HashMap<ConnectionId, ClientHandle>,
}

#[derive(Default)]
struct RosterInner {
    paths: HashMap<PathBuf, RosterEntry>,
    locations: HashMap<ConnectionId, PathBuf>,
}

impl RosterInner {
    fn insert(&mut self, handle: ClientHandle, path: PathBuf, is_directory: bool) -> usize {
        self.locations.insert(handle.id, path.clone());
        let entry = self.paths.entry(path).or_insert_with(|| RosterEntry {
            is_directory,
            connections: HashMap::new(),
        });
        entry.connections.insert(handle.id, handle);
        entry.connections.len()
    }

    fn remove(&mut self, id: ConnectionId) -> Option<(ClientHandle, PathBuf, usize)> {
        let path = self.locations.remove(&id)?;
        let entry = self.paths.get_mut(&path)?;
        let handle = entry.connections.remove(&id)?;
        let remaining = entry.connections.len();
        if remaining == 0 {
            self.paths.remove(&path);
        }
        Some((handle, path, remaining))
    }
}

/// Counts reported by `/api/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStats {
    pub active_connections: usize,
    pub active_paths: usize,
}

/// Process-wide registry of which connection views which path.
#[derive(Default)]
pub struct Roster {
    inner: Mutex<RosterInner>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handle` to `path`. Returns the number of viewers afterwards.
    ///
    /// A connection views one path at a time; joining again moves it.
    pub fn join(&self, handle: ClientHandle, path: PathBuf, is_directory: bool) -> usize {
        let mut inner = self.inner.lock();
        inner.remove(handle.id);
        let count = inner.insert(handle, path.clone(), is_directory);
        debug!("Connection joined {:?} ({} viewers)", path, count);
        count
    }

    /// Unsubscribe a connection. Returns the path it was viewing and how many
    /// viewers remain there, or `None` if it was not in the roster.
    pub fn leave(&self, id: ConnectionId) -> Option<(PathBuf, usize)> {
        let (_, path, remaining) = self.inner.lock().remove(id)?;
        debug!("Connection left {:?} ({} viewers)", path, remaining);
        Some((path, remaining))
    }

    /// Move a connection to another path in one step.
    ///
    /// Returns the previous path and its remaining viewer count.
    pub fn move_to(
        &self,
        id: ConnectionId,
        path: PathBuf,
        is_directory: bool,
    ) -> Option<(PathBuf, usize)> {
        let mut inner = self.inner.lock();
        let (handle, old_path, remaining) = inner.remove(id)?;
        inner.insert(handle, path, is_directory);
        Some((old_path, remaining))
    }

    pub fn count_at(&self, path: &Path) -> usize {
        self.inner
            .lock()
            .paths
            .get(path)
            .map_or(0, |entry| entry.connections.len())
    }

    /// Whether anyone currently views `path`.
    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().paths.contains_key(path)
    }

    pub fn is_directory(&self, path: &Path) -> Option<bool> {
        self.inner.lock().paths.get(path).map(|entry| entry.is_directory)
    }

    /// The path a connection currently views.
    pub fn location(&self, id: ConnectionId) -> Option<PathBuf> {
        self.inner.lock().locations.get(&id).cloned()
    }

    pub fn stats(&self) -> RosterStats {
        let inner = self.inner.lock();
        RosterStats {
            active_connections: inner.locations.len(),
            active_paths: inner.paths.len(),
        }
    }

    /// Send `message` to every viewer of `path`.
    pub fn broadcast_all(&self, path: &Path, message: &impl Serialize) {
        if let Some(payload) = encode(message) {
            self.deliver(path, payload, None);
        }
    }

    /// Send an already encoded payload to every viewer of `path` except `sender`.
    pub fn broadcast_except(&self, path: &Path, sender: ConnectionId, payload: Arc<str>) {
        self.deliver(path, payload, Some(sender));
    }

    /// Tell every viewer of `path` how many viewers there are.
    pub fn announce_count(&self, path: &Path) {
        let count = self.count_at(path);
        self.broadcast_all(path, &ServerMessage::EditorUpdateUsercount { count });
    }

    fn deliver(&self, path: &Path, payload: Arc<str>, except: Option<ConnectionId>) {
        let targets: Vec<ClientHandle> = {
            let inner = self.inner.lock();
            let Some(entry) = inner.paths.get(path) else {
                return;
            };
            entry
                .connections
                .values()
                .filter(|handle| Some(handle.id) != except)
                .cloned()
                .collect()
        };

        let dead: Vec<ConnectionId> = targets
            .iter()
            .filter(|handle| !handle.send_raw(Arc::clone(&payload)))
            .map(|handle| handle.id)
            .collect();

        if dead.is_empty() {
            return;
        }

        let mut removed = false;
        for id in dead {
            debug!("Dropping closed connection {} from {:?}", id, path);
            removed |= self.leave(id).is_some();
        }
        if removed {
            self.announce_count(path);
        }
    }
}
