use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned message identifier, unique within a folder.
pub type Uid = String;

/// Number of UIDs the server returns per page of folder history.
pub const PAGE_SIZE: usize = 50;

/// Older messages fetched automatically after a folder's first page.
pub const OLD_MESSAGES_BUDGET: u32 = 450;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotas {
    pub size_used: u64,
    pub size_limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxPermissions {
    #[serde(default)]
    pub can_send: bool,
    #[serde(default)]
    pub can_manage_filters: bool,
    #[serde(default)]
    pub can_manage_signatures: bool,
}

/// A (user, mailbox) pair as returned by the mailbox list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mailbox {
    #[serde(default)]
    pub user_id: i64,
    pub mailbox_id: i64,
    pub email: String,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub quotas: Option<Quotas>,
    #[serde(default)]
    pub permissions: Option<MailboxPermissions>,
}

impl Mailbox {
    pub fn object_id(&self) -> String {
        Self::object_id_for(self.user_id, self.mailbox_id)
    }

    pub fn object_id_for(user_id: i64, mailbox_id: i64) -> String {
        format!("{}_{}", user_id, mailbox_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FolderRole {
    Inbox,
    Draft,
    Sent,
    Trash,
    Archive,
    Spam,
    Snoozed,
    ScheduledDrafts,
    Commercial,
    Social,
}

impl FolderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "INBOX",
            Self::Draft => "DRAFT",
            Self::Sent => "SENT",
            Self::Trash => "TRASH",
            Self::Archive => "ARCHIVE",
            Self::Spam => "SPAM",
            Self::Snoozed => "SNOOZED",
            Self::ScheduledDrafts => "SCHEDULED_DRAFTS",
            Self::Commercial => "COMMERCIAL",
            Self::Social => "SOCIAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INBOX" => Some(Self::Inbox),
            "DRAFT" => Some(Self::Draft),
            "SENT" => Some(Self::Sent),
            "TRASH" => Some(Self::Trash),
            "ARCHIVE" => Some(Self::Archive),
            "SPAM" => Some(Self::Spam),
            "SNOOZED" => Some(Self::Snoozed),
            "SCHEDULED_DRAFTS" => Some(Self::ScheduledDrafts),
            "COMMERCIAL" => Some(Self::Commercial),
            "SOCIAL" => Some(Self::Social),
            _ => None,
        }
    }

    /// Folders refreshed together with this one, because actions on one of
    /// them routinely change the others.
    pub fn linked_roles(&self) -> &'static [FolderRole] {
        match self {
            Self::Inbox => &[Self::Sent, Self::Draft],
            Self::Sent => &[Self::Inbox, Self::Draft],
            Self::Draft => &[Self::Inbox, Self::Sent],
            _ => &[],
        }
    }
}

/// A folder of one mailbox. Only id, name, role and the server's unread
/// count come from the server; the rest is local sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<FolderRole>,
    #[serde(default, rename = "unread_count")]
    pub remote_unread_count: u32,
    #[serde(skip)]
    pub cursor: Option<String>,
    /// Unread threads among the cached messages.
    #[serde(skip)]
    pub unread_count: u32,
    #[serde(skip)]
    pub thread_count: u32,
    #[serde(skip)]
    pub snoozed_count: u32,
    /// How many older messages may still be fetched without being asked.
    #[serde(skip, default = "default_old_messages")]
    pub remaining_old_messages: u32,
    /// The oldest message of the folder is cached.
    #[serde(skip)]
    pub history_complete: bool,
}

fn default_old_messages() -> u32 {
    OLD_MESSAGES_BUDGET
}

impl Folder {
    pub fn new(id: &str, name: &str, role: Option<FolderRole>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            role,
            remote_unread_count: 0,
            cursor: None,
            unread_count: 0,
            thread_count: 0,
            snoozed_count: 0,
            remaining_old_messages: OLD_MESSAGES_BUDGET,
            history_complete: false,
        }
    }

    /// The server knows of unread mail that is not cached yet.
    pub fn has_unseen_remote_mail(&self) -> bool {
        self.unread_count == 0 && self.remote_unread_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
}

impl Recipient {
    pub fn new(email: &str) -> Self {
        Self {
            name: None,
            email: email.to_string(),
        }
    }
}

/// Mutable per-message state. This is what a delta update patches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub answered: bool,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub forwarded: bool,
    #[serde(default)]
    pub snoozed: bool,
    #[serde(default)]
    pub snooze_end: Option<DateTime<Utc>>,
}

impl MessageFlags {
    pub fn read() -> Self {
        Self {
            seen: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub uid: Uid,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: Vec<Recipient>,
    #[serde(default)]
    pub to: Vec<Recipient>,
    #[serde(default)]
    pub cc: Vec<Recipient>,
    #[serde(default)]
    pub bcc: Vec<Recipient>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub flags: MessageFlags,
}

impl Message {
    /// Key shared by every message of one conversation: the thread root from
    /// `References`, then `In-Reply-To`, then the message's own id.
    pub fn conversation_key(&self) -> String {
        self.references
            .first()
            .or(self.in_reply_to.as_ref())
            .or(self.message_id.as_ref())
            .cloned()
            .unwrap_or_else(|| format!("uid:{}", self.uid))
    }
}

/// Aggregate over the messages of one folder sharing a conversation key.
/// Always derived from its members, never written independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub folder_id: String,
    pub conversation_key: String,
    pub subject: String,
    pub last_date: DateTime<Utc>,
    pub message_count: u32,
    pub unseen_count: u32,
    pub favorite: bool,
    pub answered: bool,
    pub forwarded: bool,
    pub snoozed: bool,
}

impl Thread {
    pub fn is_unread(&self) -> bool {
        self.unseen_count > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftAction {
    Save,
    Send,
    Schedule,
}

impl DraftAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Send => "send",
            Self::Schedule => "schedule",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "send" => Self::Send,
            "schedule" => Self::Schedule,
            _ => Self::Save,
        }
    }
}

/// A locally composed message. `local_uuid` is stable for the draft's whole
/// life; `remote_uuid` appears once the server has saved it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub local_uuid: String,
    #[serde(default)]
    pub remote_uuid: Option<String>,
    pub to: Vec<Recipient>,
    #[serde(default)]
    pub cc: Vec<Recipient>,
    #[serde(default)]
    pub bcc: Vec<Recipient>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    pub action: DraftAction,
    #[serde(default)]
    pub schedule_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Draft {
    pub fn new(to: Vec<Recipient>, subject: &str, body: &str) -> Self {
        Self {
            local_uuid: uuid::Uuid::new_v4().to_string(),
            remote_uuid: None,
            to,
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.to_string(),
            body: body.to_string(),
            in_reply_to: None,
            action: DraftAction::Save,
            schedule_date: None,
            updated_at: Utc::now(),
        }
    }
}

/// One response of the cursor-based delta feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub deleted: Vec<Uid>,
    #[serde(default)]
    pub added: Vec<Uid>,
    #[serde(default)]
    pub updated: BTreeMap<Uid, MessageFlags>,
    pub cursor: String,
    /// More changes are waiting past `cursor`.
    #[serde(default)]
    pub has_more: bool,
    /// The folder's unread count on the server, when reported.
    #[serde(default)]
    pub unread_count: Option<u32>,
}

impl MessageDelta {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.added.is_empty() && self.updated.is_empty()
    }
}
