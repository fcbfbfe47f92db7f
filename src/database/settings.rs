use std::path::Path;

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::Database;
use crate::error::StoreError;
use crate::models::Mailbox;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const ACTIVE_MAILBOX_KEY: &str = "active_mailbox";
const PENDING_REMOVALS_KEY: &str = "pending_content_removals";

/// The mailbox currently shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveMailbox {
    pub user_id: i64,
    pub mailbox_id: i64,
}

impl ActiveMailbox {
    pub fn object_id(&self) -> String {
        Mailbox::object_id_for(self.user_id, self.mailbox_id)
    }
}

impl From<&Mailbox> for ActiveMailbox {
    fn from(mailbox: &Mailbox) -> Self {
        Self {
            user_id: mailbox.user_id,
            mailbox_id: mailbox.mailbox_id,
        }
    }
}

/// App-wide key/value settings.
pub struct SettingsStore {
    db: Database,
}

impl SettingsStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::open(path, SCHEMA)?,
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::in_memory(SCHEMA)?,
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.db.read(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.db.write(|tx| {
            tx.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.db.write(|tx| {
            tx.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    pub fn active_mailbox(&self) -> Result<Option<ActiveMailbox>, StoreError> {
        match self.get(ACTIVE_MAILBOX_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_active_mailbox(&self, active: Option<ActiveMailbox>) -> Result<(), StoreError> {
        match active {
            Some(active) => self.set(ACTIVE_MAILBOX_KEY, &serde_json::to_string(&active)?),
            None => self.remove(ACTIVE_MAILBOX_KEY),
        }
    }

    /// Mailboxes whose content files still have to be deleted.
    pub fn pending_removals(&self) -> Result<Vec<String>, StoreError> {
        match self.get(PENDING_REMOVALS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_pending_removals(&self, object_ids: &[String]) -> Result<(), StoreError> {
        if object_ids.is_empty() {
            return self.remove(PENDING_REMOVALS_KEY);
        }
        self.set(PENDING_REMOVALS_KEY, &serde_json::to_string(object_ids)?)
    }
}
