use std::env;
use std::path::PathBuf;
use std::time::Duration;

use folderhost_core::HubConfig;
use folderhost_core::size::parse_size;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 5000)
    pub port: u16,
    /// Served folder (default: ./folder)
    pub folder: PathBuf,
    /// Storage limit in bytes; `None` when unlimited
    pub storage_limit: Option<u64>,
    /// YAML account store (default: ./accounts.yaml)
    pub accounts_path: PathBuf,
    /// How often open files are checked for external changes (default: 1000 ms)
    pub watch_poll_interval: Duration,
    /// Quiet period before an edit audit entry is written (default: 10 s)
    pub edit_log_debounce: Duration,
    /// CORS allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let folder = PathBuf::from(env::var("FOLDER").unwrap_or_else(|_| "./folder".to_string()));

        let storage_limit = match env::var("STORAGE_LIMIT") {
            Ok(value) if !value.trim().is_empty() => {
                Some(parse_size(&value).ok_or(ConfigError::InvalidStorageLimit(value))?)
            }
            _ => None,
        };

        let accounts_path = PathBuf::from(
            env::var("ACCOUNTS_PATH").unwrap_or_else(|_| "./accounts.yaml".to_string()),
        );

        let watch_poll_interval = Duration::from_millis(
            env::var("WATCH_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPollInterval)?,
        );

        let edit_log_debounce = Duration::from_secs(
            env::var("EDIT_LOG_DEBOUNCE_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidDebounce)?,
        );

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173,http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            host,
            port,
            folder,
            storage_limit,
            accounts_path,
            watch_poll_interval,
            edit_log_debounce,
            cors_origins,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the live state hub
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            storage_root: self.folder.clone(),
            storage_limit: self.storage_limit,
            poll_interval: self.watch_poll_interval,
            edit_log_debounce: self.edit_log_debounce,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidStorageLimit(String),
    InvalidPollInterval,
    InvalidDebounce,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
            ConfigError::InvalidStorageLimit(value) => {
                write!(f, "Invalid STORAGE_LIMIT environment variable: {:?}", value)
            }
            ConfigError::InvalidPollInterval => {
                write!(f, "Invalid WATCH_POLL_INTERVAL_MS environment variable")
            }
            ConfigError::InvalidDebounce => {
                write!(f, "Invalid EDIT_LOG_DEBOUNCE_SECS environment variable")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
