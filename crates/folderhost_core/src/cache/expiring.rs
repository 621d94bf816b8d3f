//! Generic key/value cache with per-entry TTL and optional change events.
//!
//! Expiry is enforced twice: `get` treats an entry past its deadline as
//! absent and evicts it on the spot, and a background task sweeps the whole
//! map on a fixed interval. Entries stored with [`ExpiringCache::set_without_ttl`]
//! never expire.
//!
//! The cache knows nothing about what it stores. Consumers that need to react
//! to changes take the receiving end of the set/expire channels and run their
//! own listener; delivery is best-effort and never blocks the cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

/// Capacity of the set and expire event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Construction options for an [`ExpiringCache`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// How often the background sweep runs. Zero disables sweeping.
    pub sweep_interval: Duration,
    /// Emit the key of every `set` on the set-event channel.
    pub set_events: bool,
    /// Emit key and last value of every expired entry on the expire-event channel.
    pub expire_events: bool,
}

impl CacheOptions {
    pub fn swept_every(sweep_interval: Duration) -> Self {
        Self {
            sweep_interval,
            ..Self::default()
        }
    }

    /// Options for a cache that is never time-bounded.
    pub fn unswept() -> Self {
        Self::default()
    }

    pub fn with_set_events(mut self) -> Self {
        self.set_events = true;
        self
    }

    pub fn with_expire_events(mut self) -> Self {
        self.expire_events = true;
        self
    }
}

/// An entry removed because its TTL elapsed.
#[derive(Debug, Clone)]
pub struct CacheEvent<K, V> {
    pub key: K,
    pub value: V,
}

struct CacheEntry<V> {
    value: V,
    /// `None` never expires.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

pub struct ExpiringCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    set_tx: Option<mpsc::Sender<K>>,
    set_rx: Mutex<Option<mpsc::Receiver<K>>>,
    expire_tx: Option<mpsc::Sender<CacheEvent<K, V>>>,
    expire_rx: Mutex<Option<mpsc::Receiver<CacheEvent<K, V>>>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache and, when `options.sweep_interval` is non-zero, start its
    /// sweep task on the current tokio runtime.
    ///
    /// The sweep task only holds a weak reference and stops once the cache is
    /// dropped. Outside of a runtime the cache falls back to lazy expiry.
    pub fn new(options: CacheOptions) -> Arc<Self> {
        let (set_tx, set_rx) = if options.set_events {
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (expire_tx, expire_rx) = if options.expire_events {
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let cache = Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            set_tx,
            set_rx: Mutex::new(set_rx),
            expire_tx,
            expire_rx: Mutex::new(expire_rx),
        });

        if !options.sweep_interval.is_zero() {
            Self::spawn_sweeper(Arc::downgrade(&cache), options.sweep_interval);
        }

        cache
    }

    fn spawn_sweeper(cache: Weak<Self>, period: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available, cache entries will only expire lazily");
            return;
        };

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.sweep();
                if removed > 0 {
                    debug!("Cache sweep removed {} expired entries", removed);
                }
            }
        });
    }

    /// Store `value` for `ttl`, replacing any previous value.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        self.insert(key.clone(), value, Some(Instant::now() + ttl));
        self.emit_set(key);
    }

    /// Store `value` forever. It is never swept.
    pub fn set_without_ttl(&self, key: K, value: V) {
        self.insert(key.clone(), value, None);
        self.emit_set(key);
    }

    /// Like [`set`](Self::set) but without emitting a set event.
    pub fn set_silent(&self, key: K, value: V, ttl: Duration) {
        self.insert(key, value, Some(Instant::now() + ttl));
    }

    fn insert(&self, key: K, value: V, expires_at: Option<Instant>) {
        self.entries
            .write()
            .insert(key, CacheEntry { value, expires_at });
    }

    /// Look up a live value. An entry past its TTL is evicted and reported missing,
    /// even if the sweep has not reached it yet.
    pub fn get(&self, key: &K) -> Option<V> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(Instant::now()) => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        match entries.get(key) {
            None => return None,
            // Replaced between the two lock acquisitions.
            Some(entry) if !entry.is_expired(Instant::now()) => {
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }

        let evicted = entries.remove(key);
        drop(entries);
        if let Some(evicted) = evicted {
            self.emit_expired(vec![(key.clone(), evicted.value)]);
        }
        None
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Mutate a live entry in place, keeping its expiry. No event is emitted.
    ///
    /// Returns `false` if the key is absent or expired.
    pub fn modify(&self, key: &K, f: impl FnOnce(&mut V)) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                f(&mut entry.value);
                true
            }
            _ => false,
        }
    }

    /// Remove an entry. Returns whether it was present.
    pub fn delete(&self, key: &K) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove every entry for which `keep` returns `false`.
    pub fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.entries
            .write()
            .retain(|key, entry| keep(key, &entry.value));
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of stored entries, including expired ones the sweep has not
    /// removed yet.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let track = self.expire_tx.is_some();
        let mut removed = Vec::new();
        let mut count = 0;

        self.entries.write().retain(|key, entry| {
            if !entry.is_expired(now) {
                return true;
            }
            count += 1;
            if track {
                removed.push((key.clone(), entry.value.clone()));
            }
            false
        });

        self.emit_expired(removed);
        count
    }

    /// Take the receiving end of the set-event channel.
    ///
    /// Returns `None` if set events are disabled or the receiver was already taken.
    pub fn take_set_events(&self) -> Option<mpsc::Receiver<K>> {
        self.set_rx.lock().take()
    }

    /// Take the receiving end of the expire-event channel.
    pub fn take_expire_events(&self) -> Option<mpsc::Receiver<CacheEvent<K, V>>> {
        self.expire_rx.lock().take()
    }

    fn emit_set(&self, key: K) {
        if let Some(tx) = &self.set_tx
            && tx.try_send(key).is_err()
        {
            debug!("Set event dropped: channel full or closed");
        }
    }

    fn emit_expired(&self, removed: Vec<(K, V)>) {
        let Some(tx) = &self.expire_tx else {
            return;
        };
        for (key, value) in removed {
            if tx.try_send(CacheEvent { key, value }).is_err() {
                debug!("Expire event dropped: channel full or closed");
            }
        }
    }
}
