//! API tokens, kept in the system keyring or, where there is none, in a
//! token file only the current user can read.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use keyring::Entry;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SERVICE: &str = "mailsync-api-token";
const TOKEN_FILE: &str = "tokens.json";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Token file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token file is malformed: {0}")]
    Format(#[from] serde_json::Error),

    #[error("No configuration directory on this system")]
    NoConfigDir,
}

/// An API token. Formatting never shows the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(***)")
    }
}

#[derive(Clone)]
pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE.to_string(),
        }
    }

    fn entry(&self, credential_id: &str) -> Result<Entry, CredentialError> {
        Ok(Entry::new(&self.service, credential_id)?)
    }

    pub fn store_token(&self, credential_id: &str, token: &Token) -> Result<(), CredentialError> {
        self.entry(credential_id)?.set_password(token.expose())?;
        debug!("Token stored in keyring for {}", credential_id);
        Ok(())
    }

    pub fn get_token(&self, credential_id: &str) -> Result<Option<Token>, CredentialError> {
        match self.entry(credential_id)?.get_password() {
            Ok(secret) => Ok(Some(Token(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_token(&self, credential_id: &str) -> Result<(), CredentialError> {
        match self.entry(credential_id)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a keyring backend accepts writes on this system.
    pub fn is_available() -> bool {
        let Ok(entry) = Entry::new("mailsync-availability-check", "test") else {
            return false;
        };
        if entry.set_password("ok").is_err() {
            return false;
        }
        let _ = entry.delete_password();
        true
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    saved_at: DateTime<Utc>,
}

/// All tokens in one JSON file, replaced atomically on every change and
/// readable by the owner only.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new() -> Result<Self, CredentialError> {
        let dir = dirs::config_dir()
            .ok_or(CredentialError::NoConfigDir)?
            .join("mailsync");
        Self::in_dir(&dir)
    }

    pub fn in_dir(dir: &Path) -> Result<Self, CredentialError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(TOKEN_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, StoredToken>, CredentialError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if is_shared(&self.path)? {
            warn!(
                "Token file {} is readable by other users; it will be tightened on the next write",
                self.path.display()
            );
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    fn save(&self, tokens: &BTreeMap<String, StoredToken>) -> Result<(), CredentialError> {
        let raw = serde_json::to_vec_pretty(tokens)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = create_private(&tmp)?;
            file.write_all(&raw)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn store_token(&self, credential_id: &str, token: &Token) -> Result<(), CredentialError> {
        let mut tokens = self.load()?;
        tokens.insert(
            credential_id.to_string(),
            StoredToken {
                token: token.expose().to_string(),
                saved_at: Utc::now(),
            },
        );
        self.save(&tokens)?;
        warn!(
            "No keyring available, token for {} stored in {}",
            credential_id,
            self.path.display()
        );
        Ok(())
    }

    pub fn get_token(&self, credential_id: &str) -> Result<Option<Token>, CredentialError> {
        Ok(self
            .load()?
            .remove(credential_id)
            .map(|stored| Token(stored.token)))
    }

    pub fn delete_token(&self, credential_id: &str) -> Result<(), CredentialError> {
        let mut tokens = self.load()?;
        if tokens.remove(credential_id).is_some() {
            self.save(&tokens)?;
            debug!("Token deleted for {}", credential_id);
        }
        Ok(())
    }
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies to new files.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}

#[cfg(unix)]
fn is_shared(path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    Ok(fs::metadata(path)?.permissions().mode() & 0o077 != 0)
}

#[cfg(not(unix))]
fn is_shared(_path: &Path) -> std::io::Result<bool> {
    Ok(false)
}

/// Keyring when available, the token file otherwise.
#[derive(Clone)]
pub enum TokenStore {
    SystemKeyring(KeyringTokenStore),
    File(FileTokenStore),
}

impl TokenStore {
    pub fn open() -> Result<Self, CredentialError> {
        if KeyringTokenStore::is_available() {
            Ok(Self::SystemKeyring(KeyringTokenStore::new()))
        } else {
            Ok(Self::File(FileTokenStore::new()?))
        }
    }

    pub fn store_token(&self, credential_id: &str, token: &Token) -> Result<(), CredentialError> {
        match self {
            Self::SystemKeyring(store) => store.store_token(credential_id, token),
            Self::File(store) => store.store_token(credential_id, token),
        }
    }

    pub fn get_token(&self, credential_id: &str) -> Result<Option<Token>, CredentialError> {
        match self {
            Self::SystemKeyring(store) => store.get_token(credential_id),
            Self::File(store) => store.get_token(credential_id),
        }
    }

    pub fn delete_token(&self, credential_id: &str) -> Result<(), CredentialError> {
        match self {
            Self::SystemKeyring(store) => store.delete_token(credential_id),
            Self::File(store) => store.delete_token(credential_id),
        }
    }
}
