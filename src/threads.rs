//! Thread derivation. Threads are never edited directly: whenever a member
//! message changes, the thread row is rebuilt from the messages that carry
//! its conversation key, and the folder counters from the thread rows.

use rusqlite::{params, Connection};

use crate::database::content as ops;
use crate::error::StoreError;
use crate::models::{Message, Thread};

/// Builds the aggregate for one conversation, or `None` if it has no members.
pub fn aggregate(folder_id: &str, conversation_key: &str, members: &[Message]) -> Option<Thread> {
    let first = members.iter().min_by_key(|m| (m.date, m.uid.clone()))?;
    let last_date = members.iter().map(|m| m.date).max()?;

    Some(Thread {
        folder_id: folder_id.to_string(),
        conversation_key: conversation_key.to_string(),
        subject: first.subject.clone(),
        last_date,
        message_count: members.len() as u32,
        unseen_count: members.iter().filter(|m| !m.flags.seen).count() as u32,
        favorite: members.iter().any(|m| m.flags.favorite),
        answered: members.iter().any(|m| m.flags.answered),
        forwarded: members.iter().any(|m| m.flags.forwarded),
        snoozed: members.iter().any(|m| m.flags.snoozed),
    })
}

/// Rebuilds one thread row from its members, deleting it when none remain.
pub fn recompute_thread(
    conn: &Connection,
    folder_id: &str,
    conversation_key: &str,
) -> Result<Option<Thread>, StoreError> {
    let members = ops::messages_for_thread(conn, folder_id, conversation_key)?;
    match aggregate(folder_id, conversation_key, &members) {
        Some(thread) => {
            ops::upsert_thread(conn, &thread)?;
            Ok(Some(thread))
        }
        None => {
            ops::delete_thread(conn, folder_id, conversation_key)?;
            Ok(None)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FolderCounters {
    pub unread: u32,
    pub threads: u32,
    pub snoozed: u32,
}

/// Recounts unread, total and snoozed threads of a folder and stores them.
pub fn recompute_folder_counters(conn: &Connection, folder_id: &str) -> Result<FolderCounters, StoreError> {
    let counters = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN unseen_count > 0 THEN 1 ELSE 0 END), 0),
            COUNT(*),
            COALESCE(SUM(CASE WHEN snoozed THEN 1 ELSE 0 END), 0)
         FROM threads WHERE folder_id = ?1",
        params![folder_id],
        |row| {
            Ok(FolderCounters {
                unread: row.get(0)?,
                threads: row.get(1)?,
                snoozed: row.get(2)?,
            })
        },
    )?;
    ops::set_folder_counters(conn, folder_id, counters.unread, counters.threads, counters.snoozed)?;
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageFlags;
    use chrono::{TimeZone, Utc};

    fn member(uid: &str, secs: i64, flags: MessageFlags) -> Message {
        Message {
            uid: uid.to_string(),
            folder_id: "inbox".to_string(),
            message_id: None,
            in_reply_to: None,
            references: vec!["<root@x>".to_string()],
            subject: format!("Subject {}", uid),
            from: Vec::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            date: Utc.timestamp_opt(secs, 0).unwrap(),
            body_text: None,
            body_html: None,
            flags,
        }
    }

    #[test]
    fn thread_is_unread_if_any_member_is_unread() {
        let members = vec![
            member("1", 100, MessageFlags::read()),
            member("2", 200, MessageFlags::default()),
        ];
        let thread = aggregate("inbox", "<root@x>", &members).unwrap();
        assert!(thread.is_unread());
        assert_eq!(thread.unseen_count, 1);
        assert_eq!(thread.message_count, 2);
    }

    #[test]
    fn thread_takes_subject_of_oldest_and_date_of_newest() {
        let members = vec![
            member("2", 300, MessageFlags::read()),
            member("1", 100, MessageFlags::read()),
        ];
        let thread = aggregate("inbox", "<root@x>", &members).unwrap();
        assert_eq!(thread.subject, "Subject 1");
        assert_eq!(thread.last_date, Utc.timestamp_opt(300, 0).unwrap());
        assert!(!thread.is_unread());
    }

    #[test]
    fn flags_are_any_of_members() {
        let favorite = MessageFlags {
            seen: true,
            favorite: true,
            ..MessageFlags::default()
        };
        let members = vec![member("1", 100, MessageFlags::read()), member("2", 200, favorite)];
        let thread = aggregate("inbox", "<root@x>", &members).unwrap();
        assert!(thread.favorite);
        assert!(!thread.answered);
        assert!(!thread.snoozed);
    }

    #[test]
    fn empty_thread_has_no_aggregate() {
        assert_eq!(aggregate("inbox", "<root@x>", &[]), None);
    }
}
