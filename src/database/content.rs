use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::warn;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{is_corruption, remove_database_files, to_datetime, Database, StoreEvent};
use crate::error::StoreError;
use crate::models::{Draft, DraftAction, Folder, FolderRole, Message, MessageFlags, Thread, OLD_MESSAGES_BUDGET};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS folders (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    role TEXT,
    remote_unread_count INTEGER NOT NULL DEFAULT 0,
    cursor TEXT,
    unread_count INTEGER NOT NULL DEFAULT 0,
    thread_count INTEGER NOT NULL DEFAULT 0,
    snoozed_count INTEGER NOT NULL DEFAULT 0,
    remaining_old_messages INTEGER NOT NULL DEFAULT 0,
    history_complete BOOLEAN NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS messages (
    folder_id TEXT NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
    uid TEXT NOT NULL,
    conversation_key TEXT NOT NULL,
    message_id TEXT,
    in_reply_to TEXT,
    refs TEXT NOT NULL,             -- JSON array
    subject TEXT NOT NULL,
    from_addresses TEXT NOT NULL,   -- JSON array
    to_addresses TEXT NOT NULL,     -- JSON array
    cc_addresses TEXT NOT NULL,     -- JSON array
    bcc_addresses TEXT NOT NULL,    -- JSON array
    date_received INTEGER NOT NULL, -- Unix timestamp
    body_text TEXT,
    body_html TEXT,
    seen BOOLEAN NOT NULL DEFAULT 0,
    answered BOOLEAN NOT NULL DEFAULT 0,
    favorite BOOLEAN NOT NULL DEFAULT 0,
    forwarded BOOLEAN NOT NULL DEFAULT 0,
    snoozed BOOLEAN NOT NULL DEFAULT 0,
    snooze_end INTEGER,
    PRIMARY KEY(folder_id, uid)
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(folder_id, conversation_key);

CREATE TABLE IF NOT EXISTS threads (
    folder_id TEXT NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
    conversation_key TEXT NOT NULL,
    subject TEXT NOT NULL,
    last_date INTEGER NOT NULL,
    message_count INTEGER NOT NULL,
    unseen_count INTEGER NOT NULL,
    favorite BOOLEAN NOT NULL DEFAULT 0,
    answered BOOLEAN NOT NULL DEFAULT 0,
    forwarded BOOLEAN NOT NULL DEFAULT 0,
    snoozed BOOLEAN NOT NULL DEFAULT 0,
    PRIMARY KEY(folder_id, conversation_key)
);
CREATE INDEX IF NOT EXISTS idx_threads_date ON threads(folder_id, last_date DESC);

CREATE TABLE IF NOT EXISTS drafts (
    local_uuid TEXT PRIMARY KEY,
    remote_uuid TEXT,
    to_addresses TEXT NOT NULL,
    cc_addresses TEXT NOT NULL,
    bcc_addresses TEXT NOT NULL,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    in_reply_to TEXT,
    action TEXT NOT NULL,
    schedule_date INTEGER,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS mutations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,          -- JSON object
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

const FOLDER_COLUMNS: &str = "id, name, role, remote_unread_count, cursor, unread_count,
    thread_count, snoozed_count, remaining_old_messages, history_complete";

const MESSAGE_COLUMNS: &str = "folder_id, uid, message_id, in_reply_to, refs, subject,
    from_addresses, to_addresses, cc_addresses, bcc_addresses, date_received,
    body_text, body_html, seen, answered, favorite, forwarded, snoozed, snooze_end";

const THREAD_COLUMNS: &str = "folder_id, conversation_key, subject, last_date, message_count,
    unseen_count, favorite, answered, forwarded, snoozed";

/// A queued mutation as stored; the payload is decoded by the action manager.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub id: i64,
    pub kind: String,
    pub payload: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Cached content of one mailbox: folders, messages, threads, drafts and the
/// mutation queue.
pub struct MailboxContentStore {
    db: Database,
    object_id: String,
}

impl MailboxContentStore {
    pub fn open(path: &Path, object_id: &str) -> Result<Self, StoreError> {
        let db = Database::open(path, SCHEMA)?;
        let store = Self {
            db,
            object_id: object_id.to_string(),
        };
        store.check_integrity()?;
        Ok(store)
    }

    /// Opens the store, replacing the file with an empty one if it is
    /// corrupted. The server stays the source of truth, so only this
    /// mailbox's cache is lost.
    pub fn open_or_recreate(path: &Path, object_id: &str) -> Result<Self, StoreError> {
        match Self::open(path, object_id) {
            Ok(store) => Ok(store),
            Err(err) if is_corruption(&err) => {
                warn!(
                    "Content store for mailbox {} is corrupted ({}), recreating it",
                    object_id, err
                );
                remove_database_files(path)?;
                Self::open(path, object_id)
            }
            Err(err) => Err(err),
        }
    }

    pub fn in_memory(object_id: &str) -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::in_memory(SCHEMA)?,
            object_id: object_id.to_string(),
        })
    }

    fn check_integrity(&self) -> Result<(), StoreError> {
        let result: String = self
            .db
            .read(|conn| Ok::<_, StoreError>(conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?))?;
        if result != "ok" {
            return Err(StoreError::Corrupted(result));
        }
        Ok(())
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // Folders

    pub fn folder(&self, folder_id: &str) -> Result<Option<Folder>, StoreError> {
        self.db.read(|conn| get_folder(conn, folder_id))
    }

    pub fn folders(&self) -> Result<Vec<Folder>, StoreError> {
        self.db.read(list_folders)
    }

    pub fn folder_by_role(&self, role: FolderRole) -> Result<Option<Folder>, StoreError> {
        Ok(self.folders()?.into_iter().find(|f| f.role == Some(role)))
    }

    pub fn upsert_folder(&self, folder: &Folder) -> Result<(), StoreError> {
        self.db.write(|tx| upsert_folder(tx, folder))?;
        self.db.publish([StoreEvent::FoldersChanged]);
        Ok(())
    }

    /// Drops the folder's messages, threads and sync state so the next sync
    /// starts over from an empty cursor.
    pub fn reset_folder(&self, folder_id: &str) -> Result<(), StoreError> {
        self.db.write(|tx| reset_folder(tx, folder_id))?;
        self.db.publish([
            StoreEvent::FolderCleared {
                folder_id: folder_id.to_string(),
            },
            StoreEvent::FoldersChanged,
        ]);
        Ok(())
    }

    // Messages

    pub fn message(&self, folder_id: &str, uid: &str) -> Result<Option<Message>, StoreError> {
        self.db.read(|conn| get_message(conn, folder_id, uid))
    }

    pub fn messages_in_folder(&self, folder_id: &str) -> Result<Vec<Message>, StoreError> {
        self.db.read(|conn| {
            query_messages(
                conn,
                "WHERE folder_id = ?1 ORDER BY date_received DESC, uid",
                params![folder_id],
            )
        })
    }

    pub fn thread_messages(
        &self,
        folder_id: &str,
        conversation_key: &str,
    ) -> Result<Vec<Message>, StoreError> {
        self.db
            .read(|conn| messages_for_thread(conn, folder_id, conversation_key))
    }

    /// UID of the folder's oldest cached message.
    pub fn oldest_uid(&self, folder_id: &str) -> Result<Option<String>, StoreError> {
        self.db.read(|conn| {
            let uid = conn
                .query_row(
                    "SELECT uid FROM messages WHERE folder_id = ?1
                     ORDER BY date_received ASC, uid ASC LIMIT 1",
                    params![folder_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(uid)
        })
    }

    /// Which of `uids` are not cached in the folder.
    pub fn missing_uids(&self, folder_id: &str, uids: &[String]) -> Result<Vec<String>, StoreError> {
        self.db.read(|conn| {
            let present = existing_uids(conn, folder_id)?;
            Ok(uids
                .iter()
                .filter(|uid| !present.contains(*uid))
                .cloned()
                .collect())
        })
    }

    // Threads

    pub fn thread(&self, folder_id: &str, conversation_key: &str) -> Result<Option<Thread>, StoreError> {
        self.db.read(|conn| get_thread(conn, folder_id, conversation_key))
    }

    /// Threads of a folder, newest first.
    pub fn threads_in_folder(&self, folder_id: &str) -> Result<Vec<Thread>, StoreError> {
        self.db.read(|conn| {
            query_threads(
                conn,
                "WHERE folder_id = ?1 ORDER BY last_date DESC, conversation_key",
                params![folder_id],
            )
        })
    }

    pub fn unread_threads(&self, folder_id: &str) -> Result<Vec<Thread>, StoreError> {
        self.db.read(|conn| {
            query_threads(
                conn,
                "WHERE folder_id = ?1 AND unseen_count > 0 ORDER BY last_date DESC, conversation_key",
                params![folder_id],
            )
        })
    }

    // Drafts

    pub fn draft(&self, local_uuid: &str) -> Result<Option<Draft>, StoreError> {
        self.db.read(|conn| get_draft(conn, local_uuid))
    }

    pub fn drafts(&self) -> Result<Vec<Draft>, StoreError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM drafts ORDER BY updated_at DESC",
                DRAFT_COLUMNS
            ))?;
            let rows = stmt.query_map([], row_to_draft)?;
            let mut drafts = Vec::new();
            for row in rows {
                drafts.push(row?);
            }
            Ok(drafts)
        })
    }

    pub fn delete_draft(&self, local_uuid: &str) -> Result<bool, StoreError> {
        let deleted = self.db.write(|tx| delete_draft(tx, local_uuid))?;
        if deleted {
            self.db.publish([StoreEvent::DraftDeleted {
                local_uuid: local_uuid.to_string(),
            }]);
        }
        Ok(deleted)
    }

    pub fn set_draft_remote_uuid(&self, local_uuid: &str, remote_uuid: &str) -> Result<(), StoreError> {
        self.db.write(|tx| {
            tx.execute(
                "UPDATE drafts SET remote_uuid = ?1 WHERE local_uuid = ?2",
                params![remote_uuid, local_uuid],
            )?;
            Ok::<_, StoreError>(())
        })?;
        self.db.publish([StoreEvent::DraftChanged {
            local_uuid: local_uuid.to_string(),
        }]);
        Ok(())
    }

    // Mutations

    pub fn mutation(&self, id: i64) -> Result<Option<MutationRecord>, StoreError> {
        self.db.read(|conn| {
            let record = conn
                .query_row(
                    "SELECT id, kind, payload, attempts, last_error, created_at
                     FROM mutations WHERE id = ?1",
                    params![id],
                    row_to_mutation,
                )
                .optional()?;
            Ok(record)
        })
    }

    /// Queued mutations, oldest first.
    pub fn pending_mutations(&self) -> Result<Vec<MutationRecord>, StoreError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, payload, attempts, last_error, created_at
                 FROM mutations ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map([], row_to_mutation)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
    }

    pub fn record_mutation_failure(&self, id: i64, error: &str) -> Result<(), StoreError> {
        self.db.write(|tx| {
            tx.execute(
                "UPDATE mutations SET attempts = attempts + 1, last_error = ?1,
                    updated_at = strftime('%s', 'now')
                 WHERE id = ?2",
                params![error, id],
            )?;
            Ok::<_, StoreError>(())
        })?;
        self.db.publish([StoreEvent::MutationsChanged]);
        Ok(())
    }

    pub fn delete_mutation(&self, id: i64) -> Result<bool, StoreError> {
        let deleted = self.db.write(|tx| delete_mutation(tx, id))?;
        if deleted {
            self.db.publish([StoreEvent::MutationsChanged]);
        }
        Ok(deleted)
    }
}

// Row-level operations. They take a plain connection so callers can compose
// several of them inside one transaction.

pub(crate) fn get_folder(conn: &Connection, folder_id: &str) -> Result<Option<Folder>, StoreError> {
    let folder = conn
        .query_row(
            &format!("SELECT {} FROM folders WHERE id = ?1", FOLDER_COLUMNS),
            params![folder_id],
            row_to_folder,
        )
        .optional()?;
    Ok(folder)
}

pub(crate) fn list_folders(conn: &Connection) -> Result<Vec<Folder>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM folders ORDER BY name", FOLDER_COLUMNS))?;
    let rows = stmt.query_map([], row_to_folder)?;
    let mut folders = Vec::new();
    for row in rows {
        folders.push(row?);
    }
    Ok(folders)
}

/// Updates the server-owned columns only. Cursor, counters and history are
/// local state and an upsert must never replace the row, which would cascade
/// into its messages.
pub(crate) fn upsert_folder(conn: &Connection, folder: &Folder) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO folders (id, name, role, remote_unread_count, remaining_old_messages)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, role = excluded.role,
            remote_unread_count = excluded.remote_unread_count",
        params![
            folder.id,
            folder.name,
            folder.role.map(|r| r.as_str()),
            folder.remote_unread_count,
            folder.remaining_old_messages,
        ],
    )?;
    Ok(())
}

pub(crate) fn reset_folder(conn: &Connection, folder_id: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM threads WHERE folder_id = ?1", params![folder_id])?;
    conn.execute("DELETE FROM messages WHERE folder_id = ?1", params![folder_id])?;
    conn.execute(
        "UPDATE folders SET cursor = NULL, unread_count = 0, thread_count = 0, snoozed_count = 0,
            remaining_old_messages = ?1, history_complete = 0
         WHERE id = ?2",
        params![OLD_MESSAGES_BUDGET, folder_id],
    )?;
    Ok(())
}

pub(crate) fn set_remote_unread_count(conn: &Connection, folder_id: &str, count: u32) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE folders SET remote_unread_count = ?1 WHERE id = ?2",
        params![count, folder_id],
    )?;
    Ok(())
}

pub(crate) fn set_history(
    conn: &Connection,
    folder_id: &str,
    remaining_old_messages: u32,
    complete: bool,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE folders SET remaining_old_messages = ?1, history_complete = ?2 WHERE id = ?3",
        params![remaining_old_messages, complete, folder_id],
    )?;
    Ok(())
}

pub(crate) fn delete_folder(conn: &Connection, folder_id: &str) -> Result<bool, StoreError> {
    let deleted = conn.execute("DELETE FROM folders WHERE id = ?1", params![folder_id])?;
    Ok(deleted > 0)
}

pub(crate) fn set_cursor(conn: &Connection, folder_id: &str, cursor: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE folders SET cursor = ?1 WHERE id = ?2",
        params![cursor, folder_id],
    )?;
    Ok(())
}

pub(crate) fn set_folder_counters(
    conn: &Connection,
    folder_id: &str,
    unread: u32,
    threads: u32,
    snoozed: u32,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE folders SET unread_count = ?1, thread_count = ?2, snoozed_count = ?3 WHERE id = ?4",
        params![unread, threads, snoozed, folder_id],
    )?;
    Ok(())
}

pub(crate) fn get_message(conn: &Connection, folder_id: &str, uid: &str) -> Result<Option<Message>, StoreError> {
    let mut messages = query_messages(
        conn,
        "WHERE folder_id = ?1 AND uid = ?2",
        params![folder_id, uid],
    )?;
    Ok(messages.pop())
}

pub(crate) fn messages_for_thread(
    conn: &Connection,
    folder_id: &str,
    conversation_key: &str,
) -> Result<Vec<Message>, StoreError> {
    query_messages(
        conn,
        "WHERE folder_id = ?1 AND conversation_key = ?2 ORDER BY date_received ASC, uid",
        params![folder_id, conversation_key],
    )
}

pub(crate) fn existing_uids(conn: &Connection, folder_id: &str) -> Result<HashSet<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT uid FROM messages WHERE folder_id = ?1")?;
    let rows = stmt.query_map(params![folder_id], |row| row.get::<_, String>(0))?;
    let mut uids = HashSet::new();
    for row in rows {
        uids.insert(row?);
    }
    Ok(uids)
}

/// Inserts the message into `message.folder_id`, replacing any cached copy
/// with the same UID.
pub(crate) fn insert_message(conn: &Connection, message: &Message) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO messages (conversation_key, {})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            MESSAGE_COLUMNS
        ),
        params![
            message.conversation_key(),
            message.folder_id,
            message.uid,
            message.message_id,
            message.in_reply_to,
            serde_json::to_string(&message.references)?,
            message.subject,
            serde_json::to_string(&message.from)?,
            serde_json::to_string(&message.to)?,
            serde_json::to_string(&message.cc)?,
            serde_json::to_string(&message.bcc)?,
            message.date.timestamp(),
            message.body_text,
            message.body_html,
            message.flags.seen,
            message.flags.answered,
            message.flags.favorite,
            message.flags.forwarded,
            message.flags.snoozed,
            message.flags.snooze_end.map(|d| d.timestamp()),
        ],
    )?;
    Ok(())
}

/// Deletes a message and returns the conversation it belonged to, or `None`
/// when the UID was not cached.
pub(crate) fn delete_message(conn: &Connection, folder_id: &str, uid: &str) -> Result<Option<String>, StoreError> {
    let key = conversation_key_of(conn, folder_id, uid)?;
    if key.is_some() {
        conn.execute(
            "DELETE FROM messages WHERE folder_id = ?1 AND uid = ?2",
            params![folder_id, uid],
        )?;
    }
    Ok(key)
}

/// Overwrites the flags of a cached message, leaving content untouched.
/// Returns the message's conversation, or `None` when the UID is not cached.
pub(crate) fn update_flags(
    conn: &Connection,
    folder_id: &str,
    uid: &str,
    flags: &MessageFlags,
) -> Result<Option<String>, StoreError> {
    let key = conversation_key_of(conn, folder_id, uid)?;
    if key.is_some() {
        conn.execute(
            "UPDATE messages SET seen = ?1, answered = ?2, favorite = ?3, forwarded = ?4,
                snoozed = ?5, snooze_end = ?6
             WHERE folder_id = ?7 AND uid = ?8",
            params![
                flags.seen,
                flags.answered,
                flags.favorite,
                flags.forwarded,
                flags.snoozed,
                flags.snooze_end.map(|d| d.timestamp()),
                folder_id,
                uid,
            ],
        )?;
    }
    Ok(key)
}

fn conversation_key_of(conn: &Connection, folder_id: &str, uid: &str) -> Result<Option<String>, StoreError> {
    let key = conn
        .query_row(
            "SELECT conversation_key FROM messages WHERE folder_id = ?1 AND uid = ?2",
            params![folder_id, uid],
            |row| row.get(0),
        )
        .optional()?;
    Ok(key)
}

fn query_messages(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Message>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM messages {}", MESSAGE_COLUMNS, filter))?;
    let rows = stmt.query_map(params, row_to_message)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

pub(crate) fn get_thread(
    conn: &Connection,
    folder_id: &str,
    conversation_key: &str,
) -> Result<Option<Thread>, StoreError> {
    let mut threads = query_threads(
        conn,
        "WHERE folder_id = ?1 AND conversation_key = ?2",
        params![folder_id, conversation_key],
    )?;
    Ok(threads.pop())
}

pub(crate) fn query_threads(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Thread>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM threads {}", THREAD_COLUMNS, filter))?;
    let rows = stmt.query_map(params, row_to_thread)?;
    let mut threads = Vec::new();
    for row in rows {
        threads.push(row?);
    }
    Ok(threads)
}

pub(crate) fn upsert_thread(conn: &Connection, thread: &Thread) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO threads ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            THREAD_COLUMNS
        ),
        params![
            thread.folder_id,
            thread.conversation_key,
            thread.subject,
            thread.last_date.timestamp(),
            thread.message_count,
            thread.unseen_count,
            thread.favorite,
            thread.answered,
            thread.forwarded,
            thread.snoozed,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_thread(conn: &Connection, folder_id: &str, conversation_key: &str) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM threads WHERE folder_id = ?1 AND conversation_key = ?2",
        params![folder_id, conversation_key],
    )?;
    Ok(())
}

const DRAFT_COLUMNS: &str = "local_uuid, remote_uuid, to_addresses, cc_addresses, bcc_addresses,
    subject, body, in_reply_to, action, schedule_date, updated_at";

pub(crate) fn get_draft(conn: &Connection, local_uuid: &str) -> Result<Option<Draft>, StoreError> {
    let draft = conn
        .query_row(
            &format!("SELECT {} FROM drafts WHERE local_uuid = ?1", DRAFT_COLUMNS),
            params![local_uuid],
            row_to_draft,
        )
        .optional()?;
    Ok(draft)
}

/// Stores the draft. A remote id already recorded locally is kept when the
/// incoming copy has none.
pub(crate) fn upsert_draft(conn: &Connection, draft: &Draft) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO drafts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(local_uuid) DO UPDATE SET
                remote_uuid = COALESCE(excluded.remote_uuid, drafts.remote_uuid),
                to_addresses = excluded.to_addresses,
                cc_addresses = excluded.cc_addresses,
                bcc_addresses = excluded.bcc_addresses,
                subject = excluded.subject,
                body = excluded.body,
                in_reply_to = excluded.in_reply_to,
                action = excluded.action,
                schedule_date = excluded.schedule_date,
                updated_at = excluded.updated_at",
            DRAFT_COLUMNS
        ),
        params![
            draft.local_uuid,
            draft.remote_uuid,
            serde_json::to_string(&draft.to)?,
            serde_json::to_string(&draft.cc)?,
            serde_json::to_string(&draft.bcc)?,
            draft.subject,
            draft.body,
            draft.in_reply_to,
            draft.action.as_str(),
            draft.schedule_date.map(|d| d.timestamp()),
            draft.updated_at.timestamp(),
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_draft(conn: &Connection, local_uuid: &str) -> Result<bool, StoreError> {
    let deleted = conn.execute("DELETE FROM drafts WHERE local_uuid = ?1", params![local_uuid])?;
    Ok(deleted > 0)
}

pub(crate) fn insert_mutation(conn: &Connection, kind: &str, payload: &str) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO mutations (kind, payload, created_at, updated_at)
         VALUES (?1, ?2, strftime('%s', 'now'), strftime('%s', 'now'))",
        params![kind, payload],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn delete_mutation(conn: &Connection, id: i64) -> Result<bool, StoreError> {
    let deleted = conn.execute("DELETE FROM mutations WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

fn row_to_folder(row: &Row) -> rusqlite::Result<Folder> {
    let role: Option<String> = row.get(2)?;
    Ok(Folder {
        id: row.get(0)?,
        name: row.get(1)?,
        role: role.as_deref().and_then(FolderRole::parse),
        remote_unread_count: row.get(3)?,
        cursor: row.get(4)?,
        unread_count: row.get(5)?,
        thread_count: row.get(6)?,
        snoozed_count: row.get(7)?,
        remaining_old_messages: row.get(8)?,
        history_complete: row.get(9)?,
    })
}

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let snooze_end: Option<i64> = row.get(18)?;
    Ok(Message {
        folder_id: row.get(0)?,
        uid: row.get(1)?,
        message_id: row.get(2)?,
        in_reply_to: row.get(3)?,
        references: super::json_column(row, 4)?.unwrap_or_default(),
        subject: row.get(5)?,
        from: super::json_column(row, 6)?.unwrap_or_default(),
        to: super::json_column(row, 7)?.unwrap_or_default(),
        cc: super::json_column(row, 8)?.unwrap_or_default(),
        bcc: super::json_column(row, 9)?.unwrap_or_default(),
        date: to_datetime(row.get(10)?),
        body_text: row.get(11)?,
        body_html: row.get(12)?,
        flags: MessageFlags {
            seen: row.get(13)?,
            answered: row.get(14)?,
            favorite: row.get(15)?,
            forwarded: row.get(16)?,
            snoozed: row.get(17)?,
            snooze_end: snooze_end.map(to_datetime),
        },
    })
}

fn row_to_thread(row: &Row) -> rusqlite::Result<Thread> {
    Ok(Thread {
        folder_id: row.get(0)?,
        conversation_key: row.get(1)?,
        subject: row.get(2)?,
        last_date: to_datetime(row.get(3)?),
        message_count: row.get(4)?,
        unseen_count: row.get(5)?,
        favorite: row.get(6)?,
        answered: row.get(7)?,
        forwarded: row.get(8)?,
        snoozed: row.get(9)?,
    })
}

fn row_to_draft(row: &Row) -> rusqlite::Result<Draft> {
    let action: String = row.get(8)?;
    let schedule_date: Option<i64> = row.get(9)?;
    Ok(Draft {
        local_uuid: row.get(0)?,
        remote_uuid: row.get(1)?,
        to: super::json_column(row, 2)?.unwrap_or_default(),
        cc: super::json_column(row, 3)?.unwrap_or_default(),
        bcc: super::json_column(row, 4)?.unwrap_or_default(),
        subject: row.get(5)?,
        body: row.get(6)?,
        in_reply_to: row.get(7)?,
        action: DraftAction::parse(&action),
        schedule_date: schedule_date.map(to_datetime),
        updated_at: to_datetime(row.get(10)?),
    })
}

fn row_to_mutation(row: &Row) -> rusqlite::Result<MutationRecord> {
    Ok(MutationRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        payload: row.get(2)?,
        attempts: row.get(3)?,
        last_error: row.get(4)?,
        created_at: to_datetime(row.get(5)?),
    })
}
