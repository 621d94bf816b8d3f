#![doc = include_str!("../README.md")]

/// Accounts and permission checks
pub mod account;

/// Zip extraction and creation under a storage quota
pub mod archive;

/// Audit entries and edit log debouncing
pub mod audit;

/// Expiring, directory and file watch caches
pub mod cache;

/// Positional edits and the write-back engine
pub mod editor;

/// Error classes shared across modules
pub mod error;

/// Shared live state
pub mod hub;

/// WebSocket message types
pub mod protocol;

/// Storage quota lookups
pub mod quota;

/// Path to connection registry and broadcasts
pub mod roster;

/// Scope-relative path resolution
pub mod scope;

/// Per-connection lifecycle and message dispatch
pub mod session;

/// Human-readable sizes
pub mod size;

/// External change polling for open files
pub mod watch;

pub use account::{Account, Capability, Permissions};
pub use error::ErrorClass;
pub use hub::{Hub, HubConfig};
pub use roster::{ClientHandle, Roster};
pub use session::{Session, SessionError};
