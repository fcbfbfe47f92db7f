//! Delta synchronization of one mailbox's folders.
//!
//! A folder is brought up to date by asking the server for everything that
//! changed since the folder's cursor and applying the answer in a single
//! transaction: deletions, then additions, then flag updates, then the
//! derived thread rows, folder counters and the new cursor. If anything fails
//! before the commit, nothing of the batch is visible and the cursor stays
//! where it was, so the same delta is simply requested again.
//!
//! Long deltas arrive in pages, each applied in its own transaction. After
//! the newest changes, older history is paged in until the folder's budget of
//! old messages is spent or its first message is cached.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use rusqlite::Connection;

use crate::api::MailApi;
use crate::database::content as ops;
use crate::database::{MailboxContentStore, StoreEvent};
use crate::error::{ErrorClass, StoreError, SyncError};
use crate::models::{Folder, Mailbox, Message, MessageDelta, MessageFlags, Uid, PAGE_SIZE};
use crate::threads;

/// What one `sync_folder` call changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub folder_id: String,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Messages added from older history.
    pub older: usize,
    pub pages: usize,
    pub cursor: String,
    /// The server refused the stored cursor and the folder was rebuilt.
    pub reset: bool,
}

/// A delta normalized for application: added UIDs that are also deleted
/// are dropped, and updates for deleted UIDs are ignored.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DeltaPlan {
    pub deleted: Vec<Uid>,
    pub added: Vec<Uid>,
    pub updated: BTreeMap<Uid, MessageFlags>,
    /// `None` leaves the folder's cursor alone, as for history pages.
    pub cursor: Option<String>,
    pub remote_unread_count: Option<u32>,
}

impl DeltaPlan {
    pub fn from_delta(delta: MessageDelta) -> Self {
        let deleted: BTreeSet<Uid> = delta.deleted.into_iter().collect();

        let mut seen = HashSet::new();
        let added = delta
            .added
            .into_iter()
            .filter(|uid| !deleted.contains(uid) && seen.insert(uid.clone()))
            .collect();

        let updated = delta
            .updated
            .into_iter()
            .filter(|(uid, _)| !deleted.contains(uid))
            .collect();

        Self {
            deleted: deleted.into_iter().collect(),
            added,
            updated,
            cursor: Some(delta.cursor),
            remote_unread_count: delta.unread_count,
        }
    }

    fn history_page(added: Vec<Uid>) -> Self {
        Self {
            deleted: Vec::new(),
            added,
            updated: BTreeMap::new(),
            cursor: None,
            remote_unread_count: None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct BatchOutcome {
    pub added: Vec<Uid>,
    pub updated: usize,
    pub deleted: usize,
    pub touched_threads: Vec<String>,
}

/// Applies a planned delta to `folder_id` on an open transaction.
///
/// `fetched` holds the bodies returned for the added UIDs and for updated
/// UIDs that were not cached. Bodies the server did not return are skipped.
pub(crate) fn apply_batch(
    conn: &Connection,
    folder_id: &str,
    plan: &DeltaPlan,
    fetched: Vec<Message>,
) -> Result<BatchOutcome, StoreError> {
    let mut touched = BTreeSet::new();
    let mut outcome = BatchOutcome::default();
    let mut bodies: HashMap<Uid, Message> = fetched
        .into_iter()
        .map(|mut message| {
            message.folder_id = folder_id.to_string();
            (message.uid.clone(), message)
        })
        .collect();

    for uid in &plan.deleted {
        if let Some(key) = ops::delete_message(conn, folder_id, uid)? {
            touched.insert(key);
            outcome.deleted += 1;
        }
    }

    let added: HashSet<&Uid> = plan.added.iter().collect();
    for uid in &plan.added {
        match bodies.remove(uid) {
            Some(mut message) => {
                // A flag update in the same batch wins over the fetched flags.
                if let Some(flags) = plan.updated.get(uid) {
                    message.flags = flags.clone();
                }
                insert_fetched(conn, folder_id, &message, &mut touched)?;
                outcome.added.push(uid.clone());
            }
            None => warn!("No body returned for added message {} in folder {}", uid, folder_id),
        }
    }

    for (uid, flags) in &plan.updated {
        if added.contains(uid) {
            continue;
        }
        match ops::update_flags(conn, folder_id, uid, flags)? {
            Some(key) => {
                touched.insert(key);
                outcome.updated += 1;
            }
            None => match bodies.remove(uid) {
                Some(mut message) => {
                    message.flags = flags.clone();
                    insert_fetched(conn, folder_id, &message, &mut touched)?;
                    outcome.added.push(uid.clone());
                }
                None => warn!(
                    "Update for unknown message {} in folder {} has no body, skipping",
                    uid, folder_id
                ),
            },
        }
    }

    for key in &touched {
        threads::recompute_thread(conn, folder_id, key)?;
    }
    threads::recompute_folder_counters(conn, folder_id)?;
    if let Some(count) = plan.remote_unread_count {
        ops::set_remote_unread_count(conn, folder_id, count)?;
    }
    if let Some(cursor) = &plan.cursor {
        ops::set_cursor(conn, folder_id, cursor)?;
    }

    outcome.touched_threads = touched.into_iter().collect();
    Ok(outcome)
}

fn insert_fetched(
    conn: &Connection,
    folder_id: &str,
    message: &Message,
    touched: &mut BTreeSet<String>,
) -> Result<(), StoreError> {
    // Replacing a cached copy may move it to another conversation.
    if let Some(previous) = ops::delete_message(conn, folder_id, &message.uid)? {
        touched.insert(previous);
    }
    ops::insert_message(conn, message)?;
    touched.insert(message.conversation_key());
    Ok(())
}

/// Removes messages from a folder after the server confirmed they left it.
/// Returns the conversations that changed.
pub fn apply_local_removal(
    store: &MailboxContentStore,
    folder_id: &str,
    uids: &[Uid],
) -> Result<Vec<String>, StoreError> {
    let touched = store.db().write(|tx| {
        let mut touched = BTreeSet::new();
        for uid in uids {
            if let Some(key) = ops::delete_message(tx, folder_id, uid)? {
                touched.insert(key);
            }
        }
        refresh_derived(tx, folder_id, &touched)?;
        Ok::<_, StoreError>(touched.into_iter().collect::<Vec<_>>())
    })?;
    publish_thread_changes(store, folder_id, &touched);
    Ok(touched)
}

/// Patches the flags of cached messages after a confirmed flag or snooze
/// action. Returns the conversations that changed.
pub fn apply_local_flags(
    store: &MailboxContentStore,
    folder_id: &str,
    uids: &[Uid],
    patch: impl Fn(&mut MessageFlags),
) -> Result<Vec<String>, StoreError> {
    let touched = store.db().write(|tx| {
        let mut touched = BTreeSet::new();
        for uid in uids {
            let Some(message) = ops::get_message(tx, folder_id, uid)? else {
                continue;
            };
            let mut flags = message.flags;
            patch(&mut flags);
            if let Some(key) = ops::update_flags(tx, folder_id, uid, &flags)? {
                touched.insert(key);
            }
        }
        refresh_derived(tx, folder_id, &touched)?;
        Ok::<_, StoreError>(touched.into_iter().collect::<Vec<_>>())
    })?;
    publish_thread_changes(store, folder_id, &touched);
    Ok(touched)
}

fn refresh_derived(conn: &Connection, folder_id: &str, touched: &BTreeSet<String>) -> Result<(), StoreError> {
    for key in touched {
        threads::recompute_thread(conn, folder_id, key)?;
    }
    if !touched.is_empty() {
        threads::recompute_folder_counters(conn, folder_id)?;
    }
    Ok(())
}

fn publish_thread_changes(store: &MailboxContentStore, folder_id: &str, keys: &[String]) {
    if keys.is_empty() {
        return;
    }
    store.db().publish([
        StoreEvent::ThreadsChanged {
            folder_id: folder_id.to_string(),
            conversation_keys: keys.to_vec(),
        },
        StoreEvent::FoldersChanged,
    ]);
}

/// Keeps one mailbox's content store in step with the server.
pub struct DeltaSynchronizer {
    api: Arc<dyn MailApi>,
    mailbox: Mailbox,
    store: Arc<MailboxContentStore>,
}

impl DeltaSynchronizer {
    pub fn new(api: Arc<dyn MailApi>, mailbox: Mailbox, store: Arc<MailboxContentStore>) -> Self {
        Self { api, mailbox, store }
    }

    pub fn store(&self) -> &Arc<MailboxContentStore> {
        &self.store
    }

    /// Reconciles the folder list. Known folders keep their cursor and
    /// content; folders gone from the server are dropped with everything in
    /// them.
    pub async fn sync_folders(&self) -> Result<Vec<Folder>, SyncError> {
        let remote = self.api.list_folders(&self.mailbox).await?;
        let remote_ids: HashSet<&str> = remote.iter().map(|f| f.id.as_str()).collect();

        let removed = self.store.db().write(|tx| {
            for folder in &remote {
                ops::upsert_folder(tx, folder)?;
            }
            let mut removed = Vec::new();
            for local in ops::list_folders(tx)? {
                if !remote_ids.contains(local.id.as_str()) {
                    ops::delete_folder(tx, &local.id)?;
                    removed.push(local.id);
                }
            }
            Ok::<_, StoreError>(removed)
        })?;
        self.store.db().publish([StoreEvent::FoldersChanged]);

        if !removed.is_empty() {
            info!(
                "Removed {} folder(s) of mailbox {} no longer on the server",
                removed.len(),
                self.mailbox.object_id()
            );
        }
        Ok(self.store.folders()?)
    }

    fn cached_folder(&self, folder_id: &str) -> Result<Folder, SyncError> {
        self.store
            .folder(folder_id)?
            .ok_or_else(|| SyncError::UnknownFolder(folder_id.to_string()))
    }

    /// Brings one folder up to date: every change since its cursor, page by
    /// page, then older history while the folder's budget lasts.
    ///
    /// When the server refuses the stored cursor with a validation error (it
    /// expired, or points at messages the server no longer has), the folder's
    /// cached content and cursor are dropped and it is synced from scratch.
    pub async fn sync_folder(&self, folder_id: &str) -> Result<SyncReport, SyncError> {
        let folder = self.cached_folder(folder_id)?;
        let mut report = SyncReport {
            folder_id: folder_id.to_string(),
            ..SyncReport::default()
        };
        let mut cursor = folder.cursor;

        loop {
            let delta = match self
                .api
                .message_delta(&self.mailbox, folder_id, cursor.as_deref())
                .await
            {
                Ok(delta) => delta,
                Err(err) if cursor.is_some() && !report.reset && err.class() == ErrorClass::Validation => {
                    warn!(
                        "Cursor of {}/{} refused ({}), rebuilding the folder",
                        self.mailbox.object_id(),
                        folder_id,
                        err
                    );
                    self.store.reset_folder(folder_id)?;
                    report.reset = true;
                    cursor = None;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let has_more = delta.has_more;
            let first_page = cursor.is_none();
            let next = self.apply_delta(folder_id, delta, first_page, &mut report).await?;
            if !has_more {
                break;
            }
            if cursor.as_deref() == Some(next.as_str()) {
                warn!("Delta of {} announced more changes without moving its cursor", folder_id);
                break;
            }
            cursor = Some(next);
        }

        loop {
            let folder = self.cached_folder(folder_id)?;
            if folder.history_complete || folder.remaining_old_messages == 0 {
                break;
            }
            report.older += self.load_older(folder_id).await?;
        }

        Ok(report)
    }

    /// Applies one delta page and returns the cursor it moved to.
    async fn apply_delta(
        &self,
        folder_id: &str,
        delta: MessageDelta,
        first_page: bool,
        report: &mut SyncReport,
    ) -> Result<String, SyncError> {
        let plan = DeltaPlan::from_delta(delta);
        debug!(
            "Delta for {}/{}: -{} +{} ~{}",
            self.mailbox.object_id(),
            folder_id,
            plan.deleted.len(),
            plan.added.len(),
            plan.updated.len()
        );

        let updated_uids: Vec<Uid> = plan.updated.keys().cloned().collect();
        let mut to_fetch = plan.added.clone();
        for uid in self.store.missing_uids(folder_id, &updated_uids)? {
            if !to_fetch.contains(&uid) {
                to_fetch.push(uid);
            }
        }
        let fetched = self.fetch(folder_id, &to_fetch).await?;

        // A first page that is not full already holds the whole folder.
        let whole_folder = first_page && plan.added.len() < PAGE_SIZE;
        let outcome = self.store.db().write(|tx| {
            let outcome = apply_batch(tx, folder_id, &plan, fetched)?;
            if whole_folder {
                ops::set_history(tx, folder_id, 0, true)?;
            }
            Ok::<_, StoreError>(outcome)
        })?;
        self.publish_outcome(folder_id, &outcome);

        report.added += outcome.added.len();
        report.updated += outcome.updated;
        report.deleted += outcome.deleted;
        report.pages += 1;
        let cursor = plan.cursor.unwrap_or_default();
        report.cursor = cursor.clone();
        Ok(cursor)
    }

    /// Pages in the messages just older than the oldest cached one and
    /// returns how many were added. Does nothing once the folder's history
    /// is complete.
    pub async fn load_older(&self, folder_id: &str) -> Result<usize, SyncError> {
        let folder = self.cached_folder(folder_id)?;
        if folder.history_complete {
            return Ok(0);
        }

        let before = self.store.oldest_uid(folder_id)?;
        let uids = self
            .api
            .older_messages(&self.mailbox, folder_id, before.as_deref(), PAGE_SIZE)
            .await?;
        let page_len = uids.len();
        let plan = DeltaPlan::history_page(self.store.missing_uids(folder_id, &uids)?);
        let fetched = self.fetch(folder_id, &plan.added).await?;

        let (remaining, complete) = if page_len < PAGE_SIZE {
            (0, true)
        } else {
            let fetched_count = u32::try_from(page_len).unwrap_or(u32::MAX);
            (folder.remaining_old_messages.saturating_sub(fetched_count), false)
        };
        let outcome = self.store.db().write(|tx| {
            let outcome = apply_batch(tx, folder_id, &plan, fetched)?;
            ops::set_history(tx, folder_id, remaining, complete)?;
            Ok::<_, StoreError>(outcome)
        })?;
        self.publish_outcome(folder_id, &outcome);

        debug!(
            "History of {}/{}: +{}, {} left{}",
            self.mailbox.object_id(),
            folder_id,
            outcome.added.len(),
            remaining,
            if complete { ", complete" } else { "" }
        );
        Ok(outcome.added.len())
    }

    /// Syncs a folder, then the folders whose content usually changes with
    /// it: Inbox, Sent and Drafts are refreshed together.
    pub async fn sync_with_linked(&self, folder_id: &str) -> Result<Vec<SyncReport>, SyncError> {
        let role = self.cached_folder(folder_id)?.role;
        let mut reports = vec![self.sync_folder(folder_id).await?];

        for linked_role in role.map_or(&[][..], |role| role.linked_roles()) {
            if let Some(linked) = self.store.folder_by_role(*linked_role)? {
                reports.push(self.sync_folder(&linked.id).await?);
            }
        }
        Ok(reports)
    }

    async fn fetch(&self, folder_id: &str, uids: &[Uid]) -> Result<Vec<Message>, SyncError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.api.fetch_messages(&self.mailbox, folder_id, uids).await?)
    }

    fn publish_outcome(&self, folder_id: &str, outcome: &BatchOutcome) {
        let mut events = vec![StoreEvent::FoldersChanged];
        if !outcome.touched_threads.is_empty() {
            events.push(StoreEvent::ThreadsChanged {
                folder_id: folder_id.to_string(),
                conversation_keys: outcome.touched_threads.clone(),
            });
        }
        if !outcome.added.is_empty() {
            events.push(StoreEvent::NewMessages {
                folder_id: folder_id.to_string(),
                uids: outcome.added.clone(),
            });
        }
        self.store.db().publish(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FolderRole;
    use chrono::{TimeZone, Utc};

    fn store() -> MailboxContentStore {
        let store = MailboxContentStore::in_memory("1_1").unwrap();
        store
            .upsert_folder(&Folder::new("inbox", "Inbox", Some(FolderRole::Inbox)))
            .unwrap();
        store
    }

    fn message(uid: &str, root: &str, secs: i64) -> Message {
        Message {
            uid: uid.to_string(),
            folder_id: String::new(),
            message_id: Some(format!("<{}@example.com>", uid)),
            in_reply_to: None,
            references: vec![root.to_string()],
            subject: format!("Subject {}", uid),
            from: Vec::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            date: Utc.timestamp_opt(secs, 0).unwrap(),
            body_text: Some("body".to_string()),
            body_html: None,
            flags: MessageFlags::default(),
        }
    }

    fn delta(deleted: &[&str], added: &[&str], updated: &[(&str, MessageFlags)], cursor: &str) -> DeltaPlan {
        DeltaPlan::from_delta(MessageDelta {
            deleted: deleted.iter().map(|s| s.to_string()).collect(),
            added: added.iter().map(|s| s.to_string()).collect(),
            updated: updated
                .iter()
                .map(|(uid, flags)| (uid.to_string(), flags.clone()))
                .collect(),
            cursor: cursor.to_string(),
            ..MessageDelta::default()
        })
    }

    fn apply(store: &MailboxContentStore, plan: &DeltaPlan, fetched: Vec<Message>) -> BatchOutcome {
        store
            .db()
            .write(|tx| apply_batch(tx, "inbox", plan, fetched))
            .unwrap()
    }

    fn seed(store: &MailboxContentStore) {
        let plan = delta(&[], &["1", "2", "3"], &[], "c1");
        apply(
            store,
            &plan,
            vec![message("1", "<a>", 100), message("2", "<a>", 200), message("3", "<b>", 300)],
        );
    }

    #[test]
    fn additions_build_threads_and_counters() {
        let store = store();
        seed(&store);

        let threads = store.threads_in_folder("inbox").unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].conversation_key, "<b>");
        assert_eq!(store.thread("inbox", "<a>").unwrap().unwrap().message_count, 2);

        let folder = store.folder("inbox").unwrap().unwrap();
        assert_eq!(folder.cursor.as_deref(), Some("c1"));
        assert_eq!(folder.thread_count, 2);
        assert_eq!(folder.unread_count, 2);
    }

    #[test]
    fn deleting_last_member_prunes_thread() {
        let store = store();
        seed(&store);

        let outcome = apply(&store, &delta(&["3", "99"], &[], &[], "c2"), Vec::new());
        assert_eq!(outcome.deleted, 1);
        assert!(store.thread("inbox", "<b>").unwrap().is_none());
        assert_eq!(store.folder("inbox").unwrap().unwrap().thread_count, 1);
    }

    #[test]
    fn flag_update_marks_thread_read_only_when_all_members_read() {
        let store = store();
        seed(&store);

        apply(&store, &delta(&[], &[], &[("1", MessageFlags::read())], "c2"), Vec::new());
        assert!(store.thread("inbox", "<a>").unwrap().unwrap().is_unread());

        apply(&store, &delta(&[], &[], &[("2", MessageFlags::read())], "c3"), Vec::new());
        assert!(!store.thread("inbox", "<a>").unwrap().unwrap().is_unread());
        assert_eq!(store.folder("inbox").unwrap().unwrap().unread_count, 1);
        assert_eq!(store.message("inbox", "2").unwrap().unwrap().subject, "Subject 2");
    }

    #[test]
    fn add_and_delete_of_same_uid_nets_to_absence() {
        let plan = delta(&["5"], &["5", "6"], &[("5", MessageFlags::read())], "c2");
        assert_eq!(plan.added, vec!["6".to_string()]);
        assert!(plan.updated.is_empty());

        let store = store();
        apply(&store, &plan, vec![message("5", "<x>", 100), message("6", "<y>", 100)]);
        assert!(store.message("inbox", "5").unwrap().is_none());
        assert!(store.message("inbox", "6").unwrap().is_some());
    }

    #[test]
    fn update_for_uncached_uid_adds_it_with_update_flags() {
        let store = store();
        let plan = delta(&[], &[], &[("7", MessageFlags::read())], "c1");

        let outcome = apply(&store, &plan, vec![message("7", "<z>", 100)]);
        assert_eq!(outcome.added, vec!["7".to_string()]);
        assert!(store.message("inbox", "7").unwrap().unwrap().flags.seen);
    }

    #[test]
    fn update_for_uncached_uid_without_body_is_skipped() {
        let store = store();
        let plan = delta(&[], &[], &[("7", MessageFlags::read())], "c1");

        let outcome = apply(&store, &plan, Vec::new());
        assert!(outcome.added.is_empty());
        assert_eq!(outcome.updated, 0);
        assert_eq!(store.folder("inbox").unwrap().unwrap().cursor.as_deref(), Some("c1"));
    }

    #[test]
    fn empty_delta_still_advances_cursor() {
        let store = store();
        seed(&store);

        let outcome = apply(&store, &delta(&[], &[], &[], "c9"), Vec::new());
        assert!(outcome.touched_threads.is_empty());
        assert_eq!(store.folder("inbox").unwrap().unwrap().cursor.as_deref(), Some("c9"));
        assert_eq!(store.messages_in_folder("inbox").unwrap().len(), 3);
    }

    #[test]
    fn history_page_keeps_cursor_and_takes_remote_count_from_delta_only() {
        let store = store();
        seed(&store);

        let plan = DeltaPlan::history_page(vec!["0".to_string()]);
        apply(&store, &plan, vec![message("0", "<old>", 10)]);
        let folder = store.folder("inbox").unwrap().unwrap();
        assert_eq!(folder.cursor.as_deref(), Some("c1"));
        assert_eq!(folder.remote_unread_count, 0);
        assert!(store.message("inbox", "0").unwrap().is_some());

        let mut plan = delta(&[], &[], &[], "c2");
        plan.remote_unread_count = Some(12);
        apply(&store, &plan, Vec::new());
        let folder = store.folder("inbox").unwrap().unwrap();
        assert_eq!(folder.cursor.as_deref(), Some("c2"));
        assert_eq!(folder.remote_unread_count, 12);
    }

    #[test]
    fn failure_after_apply_rolls_back_batch_and_cursor() {
        let store = store();
        seed(&store);
        let plan = delta(&["1"], &["4"], &[("3", MessageFlags::read())], "c2");

        let result: Result<(), StoreError> = store.db().write(|tx| {
            apply_batch(tx, "inbox", &plan, vec![message("4", "<c>", 400)])?;
            Err(StoreError::Corrupted("crash".to_string()))
        });
        assert!(result.is_err());

        assert_eq!(store.folder("inbox").unwrap().unwrap().cursor.as_deref(), Some("c1"));
        assert!(store.message("inbox", "1").unwrap().is_some());
        assert!(store.message("inbox", "4").unwrap().is_none());
        assert!(!store.message("inbox", "3").unwrap().unwrap().flags.seen);
        assert!(store.thread("inbox", "<c>").unwrap().is_none());
    }

    #[test]
    fn replaying_a_batch_is_idempotent() {
        let store = store();
        seed(&store);
        let plan = delta(&["2"], &["4"], &[("1", MessageFlags::read())], "c2");
        let bodies = || vec![message("4", "<a>", 400)];

        apply(&store, &plan, bodies());
        let messages = store.messages_in_folder("inbox").unwrap();
        let threads = store.threads_in_folder("inbox").unwrap();
        let folder = store.folder("inbox").unwrap();

        apply(&store, &plan, bodies());
        assert_eq!(store.messages_in_folder("inbox").unwrap(), messages);
        assert_eq!(store.threads_in_folder("inbox").unwrap(), threads);
        assert_eq!(store.folder("inbox").unwrap(), folder);
    }

    #[test]
    fn local_removal_and_flag_patch_recompute_threads() {
        let store = store();
        seed(&store);
        let mut events = store.db().subscribe();

        let touched = apply_local_flags(&store, "inbox", &["1".to_string(), "2".to_string()], |flags| {
            flags.seen = true
        })
        .unwrap();
        assert_eq!(touched, vec!["<a>".to_string()]);
        assert!(!store.thread("inbox", "<a>").unwrap().unwrap().is_unread());
        assert!(matches!(
            events.try_recv().unwrap(),
            StoreEvent::ThreadsChanged { .. }
        ));

        apply_local_removal(&store, "inbox", &["3".to_string()]).unwrap();
        assert!(store.thread("inbox", "<b>").unwrap().is_none());
        let folder = store.folder("inbox").unwrap().unwrap();
        assert_eq!(folder.thread_count, 1);
        assert_eq!(folder.unread_count, 0);
    }
}
