use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store is corrupted: {0}")]
    Corrupted(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// How a failed remote call should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, connectivity, 5xx: retry later.
    Transient,
    /// 401/403: needs a new login, never retried automatically.
    Auth,
    /// Other 4xx and business errors: discard and tell the user.
    Validation,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Authentication failed ({status})")]
    Auth { status: u16 },

    #[error("Request rejected ({status}): {message}")]
    Validation { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        let message = message.unwrap_or_else(|| "no description".to_string());
        match status {
            401 | 403 => Self::Auth { status },
            400..=499 => Self::Validation { status, message },
            _ => Self::Server { status, message },
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) | Self::Server { .. } | Self::Decode(_) => ErrorClass::Transient,
            Self::Auth { .. } => ErrorClass::Auth,
            Self::Validation { .. } => ErrorClass::Validation,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), Some(err.to_string())),
            None => Self::Network(err.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Folder {0} is not cached locally")]
    UnknownFolder(String),

    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Api(err) => Some(err.class()),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        self.class() == Some(ErrorClass::Auth)
    }

    pub fn is_transient(&self) -> bool {
        self.class() == Some(ErrorClass::Transient)
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}
