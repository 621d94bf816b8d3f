//! Accounts and their precomputed capability set.

use serde::{Deserialize, Serialize};

/// An authenticated account, as attached to each request by the auth layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    /// Sub-directory of the served folder this account is confined to.
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub permissions: Permissions,
}

/// Named booleans granting access to individual operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub read_directories: bool,
    pub read_files: bool,
    pub create: bool,
    pub change: bool,
    pub delete: bool,
    #[serde(rename = "move")]
    pub move_items: bool,
    pub download_files: bool,
    pub upload_files: bool,
    pub rename: bool,
    pub extract: bool,
    pub archive: bool,
    pub copy: bool,
    pub read_recovery: bool,
    pub use_recovery: bool,
    pub read_users: bool,
    pub edit_users: bool,
    pub read_logs: bool,
}

/// Capabilities checked by the live layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ReadDirectories,
    ReadFiles,
    Change,
    Extract,
    Archive,
}

impl Capability {
    /// The verb used in permission error messages.
    pub fn verb(self) -> &'static str {
        match self {
            Capability::ReadDirectories => "read-directories",
            Capability::ReadFiles => "read-files",
            Capability::Change => "change",
            Capability::Extract => "unzip",
            Capability::Archive => "zip",
        }
    }
}

impl Permissions {
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::ReadDirectories => self.read_directories,
            Capability::ReadFiles => self.read_files,
            Capability::Change => self.change,
            Capability::Extract => self.extract,
            Capability::Archive => self.archive,
        }
    }

    /// Every permission granted; handy for administrators and tests.
    pub fn all() -> Self {
        Self {
            read_directories: true,
            read_files: true,
            create: true,
            change: true,
            delete: true,
            move_items: true,
            download_files: true,
            upload_files: true,
            rename: true,
            extract: true,
            archive: true,
            copy: true,
            read_recovery: true,
            use_recovery: true,
            read_users: true,
            edit_users: true,
            read_logs: true,
        }
    }
}

/// Message sent to a client whose account lacks `capability`.
pub fn permission_denied_message(capability: Capability) -> String {
    format!("You don't have permission to {}!", capability.verb())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_deserialize_partial() {
        let json = r#"{ "username": "ada", "scope": "team", "permissions": { "change": true, "move": true } }"#;
        let account: Account = serde_json::from_str(json).unwrap();

        assert!(account.permissions.allows(Capability::Change));
        assert!(account.permissions.move_items);
        assert!(!account.permissions.allows(Capability::Extract));
    }

    #[test]
    fn test_permission_message() {
        assert_eq!(
            permission_denied_message(Capability::Change),
            "You don't have permission to change!"
        );
    }
}
