use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{json_column, Database, StoreEvent};
use crate::error::StoreError;
use crate::models::{Mailbox, MailboxPermissions, Quotas};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS mailboxes (
    object_id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL,
    mailbox_id INTEGER NOT NULL,
    email TEXT NOT NULL,
    unread_count INTEGER NOT NULL DEFAULT 0,
    is_primary BOOLEAN NOT NULL DEFAULT 0,
    quotas TEXT,        -- JSON object
    permissions TEXT,   -- JSON object
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);
CREATE INDEX IF NOT EXISTS idx_mailboxes_user ON mailboxes(user_id);
";

/// Cross-mailbox info shared by every account of the device.
pub struct MailboxInfoStore {
    db: Database,
}

impl MailboxInfoStore {
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

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn mailbox(&self, object_id: &str) -> Result<Option<Mailbox>, StoreError> {
        self.db.read(|conn| get_mailbox(conn, object_id))
    }

    /// Mailboxes of one user, primary first.
    pub fn mailboxes_for_user(&self, user_id: i64) -> Result<Vec<Mailbox>, StoreError> {
        self.db.read(|conn| list_for_user(conn, user_id))
    }

    pub fn all_mailboxes(&self) -> Result<Vec<Mailbox>, StoreError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, mailbox_id, email, unread_count, is_primary, quotas, permissions
                 FROM mailboxes ORDER BY user_id, is_primary DESC, mailbox_id",
            )?;
            let rows = stmt.query_map([], row_to_mailbox)?;
            let mut mailboxes = Vec::new();
            for row in rows {
                mailboxes.push(row?);
            }
            Ok(mailboxes)
        })
    }

    pub fn upsert(&self, mailbox: &Mailbox) -> Result<(), StoreError> {
        self.db.write(|tx| upsert_mailbox(tx, mailbox))?;
        self.db.publish([StoreEvent::MailboxesChanged {
            user_id: mailbox.user_id,
        }]);
        Ok(())
    }
}

pub(crate) fn get_mailbox(conn: &Connection, object_id: &str) -> Result<Option<Mailbox>, StoreError> {
    let row = conn
        .query_row(
            "SELECT user_id, mailbox_id, email, unread_count, is_primary, quotas, permissions
             FROM mailboxes WHERE object_id = ?1",
            params![object_id],
            row_to_mailbox,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn list_for_user(conn: &Connection, user_id: i64) -> Result<Vec<Mailbox>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT user_id, mailbox_id, email, unread_count, is_primary, quotas, permissions
         FROM mailboxes WHERE user_id = ?1 ORDER BY is_primary DESC, mailbox_id",
    )?;
    let rows = stmt.query_map(params![user_id], row_to_mailbox)?;
    let mut mailboxes = Vec::new();
    for row in rows {
        mailboxes.push(row?);
    }
    Ok(mailboxes)
}

/// Inserts or refreshes a mailbox. Quota and permission sub-objects the
/// remote payload does not carry keep their stored value.
pub(crate) fn upsert_mailbox(conn: &Connection, mailbox: &Mailbox) -> Result<(), StoreError> {
    let quotas = mailbox.quotas.as_ref().map(serde_json::to_string).transpose()?;
    let permissions = mailbox
        .permissions
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO mailboxes (object_id, user_id, mailbox_id, email, unread_count, is_primary, quotas, permissions)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(object_id) DO UPDATE SET
            email = excluded.email,
            unread_count = excluded.unread_count,
            is_primary = excluded.is_primary,
            quotas = COALESCE(excluded.quotas, mailboxes.quotas),
            permissions = COALESCE(excluded.permissions, mailboxes.permissions),
            updated_at = strftime('%s', 'now')",
        params![
            mailbox.object_id(),
            mailbox.user_id,
            mailbox.mailbox_id,
            mailbox.email,
            mailbox.unread_count,
            mailbox.is_primary,
            quotas,
            permissions,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_mailbox(conn: &Connection, object_id: &str) -> Result<bool, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM mailboxes WHERE object_id = ?1",
        params![object_id],
    )?;
    Ok(deleted > 0)
}

fn row_to_mailbox(row: &Row) -> rusqlite::Result<Mailbox> {
    Ok(Mailbox {
        user_id: row.get(0)?,
        mailbox_id: row.get(1)?,
        email: row.get(2)?,
        unread_count: row.get(3)?,
        is_primary: row.get(4)?,
        quotas: json_column::<Quotas>(row, 5)?,
        permissions: json_column::<MailboxPermissions>(row, 6)?,
    })
}
