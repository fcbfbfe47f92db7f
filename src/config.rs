use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Failed to create config directory")]
    CreateDirError,

    #[error("No accounts configured")]
    NoAccounts,

    #[error("Account index {0} out of bounds")]
    InvalidAccount(usize),
}

/// One remote mail account. The API token lives in the credential store,
/// never in this file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    pub user_id: i64,
    pub api_url: String,
    pub email: String,
}

impl AccountConfig {
    /// Key under which the account's token is stored.
    pub fn credential_id(&self) -> String {
        format!("{}@{}", self.user_id, self.api_url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Directory of the SQLite stores. `~` is expanded.
    pub data_dir: String,
    pub sync_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.local/share/mailsync".to_string(),
            sync_interval_secs: 300,
            request_timeout_secs: 30,
            max_retries: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
        }
    }
}

impl SyncSettings {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).into_owned())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub default_account: usize,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let path = Path::new(path);

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;

        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let path = Path::new(path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::CreateDirError)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    pub fn current_account(&self) -> Result<&AccountConfig, ConfigError> {
        if self.accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }
        self.accounts
            .get(self.default_account)
            .ok_or(ConfigError::InvalidAccount(self.default_account))
    }

    /// Adds an account; the first one becomes the default.
    pub fn add_account(&mut self, account: AccountConfig) {
        self.accounts.push(account);
        if self.accounts.len() == 1 {
            self.default_account = 0;
        }
    }

    pub fn remove_account(&mut self, index: usize) -> Result<AccountConfig, ConfigError> {
        if index >= self.accounts.len() {
            return Err(ConfigError::InvalidAccount(index));
        }

        let removed = self.accounts.remove(index);

        if self.default_account >= self.accounts.len() {
            self.default_account = self.accounts.len().saturating_sub(1);
        }

        Ok(removed)
    }

    pub fn set_default_account(&mut self, index: usize) -> Result<(), ConfigError> {
        if index >= self.accounts.len() {
            return Err(ConfigError::InvalidAccount(index));
        }

        self.default_account = index;
        Ok(())
    }
}
