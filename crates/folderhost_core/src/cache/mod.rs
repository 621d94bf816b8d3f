//! Caches shared across connection workers.
//!
//! [`ExpiringCache`] is the generic building block; [`DirectoryCache`] and
//! [`FileWatchCache`] specialise it for directory listings and open files.

mod directory;
mod expiring;
mod watch;

pub use directory::{
    DIRECTORY_CACHE_TTL, DirectoryCache, DirectoryCacheKey, DirectoryError, DirectoryInfo,
    DirectoryItem, DirectoryLister, DirectoryListing, DirectoryRead, DirectorySnapshot,
    ListingMode,
};
pub use expiring::{CacheEvent, CacheOptions, EVENT_CHANNEL_CAPACITY, ExpiringCache};
pub use watch::{FileWatchCache, FileWatchState, new_file_watch_cache};
