use std::collections::HashMap;
use std::path::{Path, PathBuf};

use folderhost_core::Account;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountStoreError {
    #[error("Failed to read account file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse account file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Duplicate token for account {0}")]
    DuplicateToken(String),
}

#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<AccountRecord>,
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    token: String,
    #[serde(flatten)]
    account: Account,
}

/// Accounts keyed by their access token.
///
/// ```yaml
/// accounts:
///   - token: s3cret
///     username: admin
///     scope: ""
///     permissions:
///       read_directories: true
///       change: true
/// ```
#[derive(Debug, Default)]
pub struct YamlAccountStore {
    by_token: HashMap<String, Account>,
}

impl YamlAccountStore {
    pub fn load(path: &Path) -> Result<Self, AccountStoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AccountStoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, AccountStoreError> {
        let file: AccountsFile = serde_yaml::from_str(raw)?;
        Self::from_accounts(
            file.accounts
                .into_iter()
                .map(|record| (record.token, record.account)),
        )
    }

    pub fn from_accounts(
        accounts: impl IntoIterator<Item = (String, Account)>,
    ) -> Result<Self, AccountStoreError> {
        let mut by_token = HashMap::new();
        for (token, account) in accounts {
            if let Some(existing) = by_token.insert(token, account) {
                return Err(AccountStoreError::DuplicateToken(existing.username));
            }
        }
        Ok(Self { by_token })
    }

    pub fn authenticate(&self, token: &str) -> Option<Account> {
        self.by_token.get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNTS: &str = r#"
accounts:
  - token: admin-token
    username: admin
    permissions:
      read_directories: true
      change: true
      move: true
  - token: guest-token
    username: guest
    scope: guests
"#;

    #[test]
    fn test_load_accounts() {
        let store = YamlAccountStore::from_yaml(ACCOUNTS).unwrap();
        assert_eq!(store.len(), 2);

        let admin = store.authenticate("admin-token").unwrap();
        assert_eq!(admin.username, "admin");
        assert_eq!(admin.scope, "");
        assert!(admin.permissions.change);
        assert!(admin.permissions.move_items);
        assert!(!admin.permissions.extract);

        let guest = store.authenticate("guest-token").unwrap();
        assert_eq!(guest.scope, "guests");
        assert!(!guest.permissions.read_directories);

        assert!(store.authenticate("nope").is_none());
    }

    #[test]
    fn test_duplicate_token_is_rejected() {
        let raw = r#"
accounts:
  - { token: same, username: a }
  - { token: same, username: b }
"#;
        assert!(matches!(
            YamlAccountStore::from_yaml(raw),
            Err(AccountStoreError::DuplicateToken(_))
        ));
    }

    #[test]
    fn test_empty_file() {
        let store = YamlAccountStore::from_yaml("accounts: []").unwrap();
        assert!(store.is_empty());
    }
}
