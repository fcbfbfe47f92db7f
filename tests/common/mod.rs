#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use mailsync::api::{FlagKind, ItemResult, MailApi};
use mailsync::database::{MailboxContentStore, StorePool};
use mailsync::models::{Draft, Folder, FolderRole, Mailbox, Message, MessageDelta, MessageFlags};
use mailsync::ApiError;

#[derive(Default)]
struct FakeState {
    mailboxes: HashMap<i64, Vec<Mailbox>>,
    folders: Vec<Folder>,
    bodies: HashMap<(String, String), Message>,
    deltas: HashMap<String, VecDeque<MessageDelta>>,
    delta_failures: HashMap<String, VecDeque<(u16, Option<String>)>>,
    older: HashMap<String, VecDeque<Vec<String>>>,
    older_requests: Vec<(String, Option<String>)>,
    scheduled: Vec<(String, DateTime<Utc>)>,
    batch_results: VecDeque<Vec<ItemResult>>,
    failures: HashMap<&'static str, VecDeque<(u16, Option<String>)>>,
    calls: Vec<String>,
}

/// Scripted in-memory stand-in for the remote mail API.
#[derive(Default)]
pub struct FakeMailApi {
    state: Mutex<FakeState>,
}

impl FakeMailApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_mailboxes(&self, user_id: i64, mailboxes: Vec<Mailbox>) {
        self.state.lock().unwrap().mailboxes.insert(user_id, mailboxes);
    }

    pub fn set_folders(&self, folders: Vec<Folder>) {
        self.state.lock().unwrap().folders = folders;
    }

    pub fn put_message(&self, folder_id: &str, message: Message) {
        self.state
            .lock()
            .unwrap()
            .bodies
            .insert((folder_id.to_string(), message.uid.clone()), message);
    }

    pub fn push_delta(&self, folder_id: &str, delta: MessageDelta) {
        self.state
            .lock()
            .unwrap()
            .deltas
            .entry(folder_id.to_string())
            .or_default()
            .push_back(delta);
    }

    /// Makes the next delta request of `folder_id` fail with `status`.
    pub fn fail_delta(&self, folder_id: &str, status: u16, message: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .delta_failures
            .entry(folder_id.to_string())
            .or_default()
            .push_back((status, message.map(str::to_string)));
    }

    /// Queues one page of older UIDs for `folder_id`. Unscripted requests
    /// get an empty page.
    pub fn push_older(&self, folder_id: &str, uids: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .older
            .entry(folder_id.to_string())
            .or_default()
            .push_back(uids.iter().map(|s| s.to_string()).collect());
    }

    /// `(folder_id, before)` of every older-messages request, in order.
    pub fn older_requests(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().unwrap().older_requests.clone()
    }

    pub fn scheduled(&self) -> Vec<(String, DateTime<Utc>)> {
        self.state.lock().unwrap().scheduled.clone()
    }

    pub fn push_batch_result(&self, results: Vec<ItemResult>) {
        self.state.lock().unwrap().batch_results.push_back(results);
    }

    /// Makes the next call of `operation` fail with the given HTTP status.
    pub fn fail_next(&self, operation: &'static str, status: u16, message: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(operation)
            .or_default()
            .push_back((status, message.map(str::to_string)));
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == operation)
            .count()
    }

    fn enter(&self, operation: &'static str) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(operation.to_string());
        match state.failures.get_mut(operation).and_then(|q| q.pop_front()) {
            Some((status, message)) => Err(ApiError::from_status(status, message)),
            None => Ok(()),
        }
    }

    fn batch(&self, uids: &[String]) -> Vec<ItemResult> {
        let scripted = self.state.lock().unwrap().batch_results.pop_front();
        scripted.unwrap_or_else(|| {
            uids.iter()
                .map(|uid| ItemResult {
                    uid: uid.clone(),
                    success: true,
                    error: None,
                })
                .collect()
        })
    }
}

#[async_trait]
impl MailApi for FakeMailApi {
    async fn list_mailboxes(&self, user_id: i64) -> Result<Vec<Mailbox>, ApiError> {
        self.enter("list_mailboxes")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .mailboxes
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_folders(&self, _mailbox: &Mailbox) -> Result<Vec<Folder>, ApiError> {
        self.enter("list_folders")?;
        Ok(self.state.lock().unwrap().folders.clone())
    }

    async fn message_delta(
        &self,
        _mailbox: &Mailbox,
        folder_id: &str,
        cursor: Option<&str>,
    ) -> Result<MessageDelta, ApiError> {
        self.enter("message_delta")?;
        let mut state = self.state.lock().unwrap();
        if let Some((status, message)) = state.delta_failures.get_mut(folder_id).and_then(|q| q.pop_front()) {
            return Err(ApiError::from_status(status, message));
        }
        let next = state.deltas.get_mut(folder_id).and_then(|q| q.pop_front());
        Ok(next.unwrap_or_else(|| MessageDelta {
            cursor: cursor.unwrap_or("c0").to_string(),
            ..MessageDelta::default()
        }))
    }

    async fn fetch_messages(
        &self,
        _mailbox: &Mailbox,
        folder_id: &str,
        uids: &[String],
    ) -> Result<Vec<Message>, ApiError> {
        self.enter("fetch_messages")?;
        let state = self.state.lock().unwrap();
        Ok(uids
            .iter()
            .filter_map(|uid| state.bodies.get(&(folder_id.to_string(), uid.clone())).cloned())
            .collect())
    }

    async fn older_messages(
        &self,
        _mailbox: &Mailbox,
        folder_id: &str,
        before: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<String>, ApiError> {
        self.enter("older_messages")?;
        let mut state = self.state.lock().unwrap();
        state
            .older_requests
            .push((folder_id.to_string(), before.map(str::to_string)));
        Ok(state
            .older
            .get_mut(folder_id)
            .and_then(|q| q.pop_front())
            .unwrap_or_default())
    }

    async fn save_draft(&self, _mailbox: &Mailbox, draft: &Draft) -> Result<String, ApiError> {
        self.enter("save_draft")?;
        Ok(format!("remote-{}", draft.local_uuid))
    }

    async fn send_draft(&self, _mailbox: &Mailbox, _draft: &Draft) -> Result<(), ApiError> {
        self.enter("send_draft")?;
        Ok(())
    }

    async fn schedule_draft(
        &self,
        _mailbox: &Mailbox,
        draft: &Draft,
        send_at: DateTime<Utc>,
    ) -> Result<String, ApiError> {
        self.enter("schedule_draft")?;
        self.state
            .lock()
            .unwrap()
            .scheduled
            .push((draft.local_uuid.clone(), send_at));
        Ok(format!("/scheduled/{}/cancel", draft.local_uuid))
    }

    async fn move_messages(
        &self,
        _mailbox: &Mailbox,
        _folder_id: &str,
        uids: &[String],
        _destination: &str,
    ) -> Result<Vec<ItemResult>, ApiError> {
        self.enter("move_messages")?;
        Ok(self.batch(uids))
    }

    async fn flag_messages(
        &self,
        _mailbox: &Mailbox,
        _folder_id: &str,
        uids: &[String],
        _flag: FlagKind,
        _value: bool,
    ) -> Result<Vec<ItemResult>, ApiError> {
        self.enter("flag_messages")?;
        Ok(self.batch(uids))
    }

    async fn snooze_messages(
        &self,
        _mailbox: &Mailbox,
        _folder_id: &str,
        uids: &[String],
        _until: DateTime<Utc>,
    ) -> Result<Vec<ItemResult>, ApiError> {
        self.enter("snooze_messages")?;
        Ok(self.batch(uids))
    }

    async fn unsnooze_messages(
        &self,
        _mailbox: &Mailbox,
        _folder_id: &str,
        uids: &[String],
    ) -> Result<Vec<ItemResult>, ApiError> {
        self.enter("unsnooze_messages")?;
        Ok(self.batch(uids))
    }
}

pub fn mailbox(user_id: i64, mailbox_id: i64) -> Mailbox {
    Mailbox {
        user_id,
        mailbox_id,
        email: format!("box{}@example.com", mailbox_id),
        unread_count: 0,
        is_primary: mailbox_id == 1,
        quotas: None,
        permissions: None,
    }
}

pub fn standard_folders() -> Vec<Folder> {
    vec![
        Folder::new("inbox", "Inbox", Some(FolderRole::Inbox)),
        Folder::new("archive", "Archive", Some(FolderRole::Archive)),
        Folder::new("snoozed", "Snoozed", Some(FolderRole::Snoozed)),
        Folder::new("drafts", "Drafts", Some(FolderRole::Draft)),
        Folder::new("sent", "Sent", Some(FolderRole::Sent)),
    ]
}

/// A message of conversation `root`, `secs` seconds after the epoch.
pub fn message(uid: &str, root: &str, secs: i64) -> Message {
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
        body_text: Some(format!("Body of {}", uid)),
        body_html: None,
        flags: MessageFlags::default(),
    }
}

pub fn added(uids: &[&str], cursor: &str) -> MessageDelta {
    MessageDelta {
        added: uids.iter().map(|s| s.to_string()).collect(),
        cursor: cursor.to_string(),
        ..MessageDelta::default()
    }
}

pub fn page(uids: &[&str], cursor: &str, has_more: bool) -> MessageDelta {
    MessageDelta {
        has_more,
        ..added(uids, cursor)
    }
}

pub fn item(uid: &str, success: bool) -> ItemResult {
    ItemResult {
        uid: uid.to_string(),
        success,
        error: None,
    }
}

/// A content store in `pool` with the standard folders.
pub fn seeded_store(pool: &StorePool, object_id: &str) -> Arc<MailboxContentStore> {
    let store = pool.content(object_id).unwrap();
    for folder in standard_folders() {
        store.upsert_folder(&folder).unwrap();
    }
    store
}
