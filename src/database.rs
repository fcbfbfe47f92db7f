//! Local store: one SQLite file per mailbox for cached content, plus a shared
//! file for mailbox info and one for app-wide settings.
//!
//! Every write runs inside a single transaction. Change notifications are
//! broadcast only after the transaction commits.

pub(crate) mod content;
pub(crate) mod mailboxes;
mod settings;

pub use content::{MailboxContentStore, MutationRecord};
pub use mailboxes::MailboxInfoStore;
pub use settings::{ActiveMailbox, SettingsStore};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, Row, Transaction};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use crate::error::StoreError;

const EVENT_CAPACITY: usize = 256;

/// Published to subscribers after a write has committed.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    MailboxesChanged { user_id: i64 },
    FoldersChanged,
    /// Every message and thread of the folder was dropped.
    FolderCleared { folder_id: String },
    ThreadsChanged { folder_id: String, conversation_keys: Vec<String> },
    NewMessages { folder_id: String, uids: Vec<String> },
    DraftChanged { local_uuid: String },
    DraftDeleted { local_uuid: String },
    MutationsChanged,
}

/// A SQLite connection with serialized writers and a change feed.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    events: broadcast::Sender<StoreEvent>,
}

impl Database {
    pub fn open(path: &Path, schema: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let db = Self::with_connection(conn, Some(path.to_path_buf()));
        db.initialize(schema)?;
        Ok(db)
    }

    pub fn in_memory(schema: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self::with_connection(conn, None);
        db.initialize(schema)?;
        Ok(db)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            conn: Mutex::new(conn),
            path,
            events,
        }
    }

    fn initialize(&self, schema: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(schema)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Runs `f` against a consistent view of the store. Writers are excluded
    /// for the duration of the call.
    pub fn read<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` in one transaction: committed if `f` returns `Ok`, rolled back
    /// otherwise.
    pub fn write<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn publish(&self, events: impl IntoIterator<Item = StoreEvent>) {
        for event in events {
            // No receivers is not an error: nobody is watching yet.
            let _ = self.events.send(event);
        }
    }
}

/// True for errors that mean the file is not a usable SQLite database.
pub fn is_corruption(err: &StoreError) -> bool {
    match err {
        StoreError::Corrupted(_) => true,
        StoreError::Database(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
            failure.code,
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase
        ),
        _ => false,
    }
}

/// Removes a database file and its journal side files.
pub fn remove_database_files(path: &Path) -> Result<(), StoreError> {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Reads a nullable JSON text column.
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
}

/// Hands out at most one open content store per mailbox.
pub struct StorePool {
    data_dir: PathBuf,
    open: Mutex<HashMap<String, Arc<MailboxContentStore>>>,
}

impl StorePool {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn content_path(&self, object_id: &str) -> PathBuf {
        self.data_dir.join(format!("mailbox_{}.db", object_id))
    }

    pub fn content(&self, object_id: &str) -> Result<Arc<MailboxContentStore>, StoreError> {
        let mut open = self.open.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(store) = open.get(object_id) {
            return Ok(store.clone());
        }

        let store = Arc::new(MailboxContentStore::open_or_recreate(
            &self.content_path(object_id),
            object_id,
        )?);
        open.insert(object_id.to_string(), store.clone());
        debug!("Opened content store for mailbox {}", object_id);
        Ok(store)
    }

    pub fn is_open(&self, object_id: &str) -> bool {
        self.open
            .lock()
            .map(|open| open.contains_key(object_id))
            .unwrap_or(false)
    }

    /// Closes the mailbox's store and deletes its file with all cached content.
    pub fn remove(&self, object_id: &str) -> Result<(), StoreError> {
        let removed = {
            let mut open = self.open.lock().map_err(|_| StoreError::Poisoned)?;
            open.remove(object_id)
        };
        if let Some(store) = removed {
            if Arc::strong_count(&store) > 1 {
                warn!(
                    "Content store for {} is still referenced while being removed",
                    object_id
                );
            }
        }
        remove_database_files(&self.content_path(object_id))
    }
}
