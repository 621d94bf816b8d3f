//! Storage quota lookups.

use std::io;
use std::path::Path;

/// Free space an account needs before it may open a file in the editor.
pub const EDITOR_MIN_FREE_SPACE: u64 = 200 * 1024;

/// Reports how many bytes may still be written under a scope.
///
/// Implementations may walk the filesystem, so callers on the async runtime
/// should run them with `spawn_blocking`.
pub trait StorageQuota: Send + Sync {
    fn remaining_bytes(&self, scope_root: &Path) -> io::Result<u64>;
}

/// A quota that never runs out.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl StorageQuota for Unlimited {
    fn remaining_bytes(&self, _scope_root: &Path) -> io::Result<u64> {
        Ok(u64::MAX)
    }
}
