//! Durable queue of user actions against the server.
//!
//! Every action is written to the mailbox's `mutations` table before the
//! first network attempt, so it survives a crash. Processing a record either
//! completes it (record deleted, local cache patched), leaves it queued for a
//! later attempt, or discards it with a message for the user.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::api::{FlagKind, ItemResult, MailApi};
use crate::database::content as ops;
use crate::database::{MailboxContentStore, StoreEvent};
use crate::error::{ApiError, ErrorClass, StoreError};
use crate::events::{AppEvent, EventBus};
use crate::models::{Draft, DraftAction, FolderRole, Mailbox, Uid};
use crate::sync;

const UNKNOWN_ERROR: &str = "unknown error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    SaveDraft {
        local_uuid: String,
    },
    SendDraft {
        local_uuid: String,
    },
    ScheduleDraft {
        local_uuid: String,
        send_at: DateTime<Utc>,
    },
    Move {
        folder_id: String,
        uids: Vec<Uid>,
        destination: String,
    },
    Flag {
        folder_id: String,
        uids: Vec<Uid>,
        flag: FlagKind,
        value: bool,
    },
    Snooze {
        folder_id: String,
        uids: Vec<Uid>,
        until: DateTime<Utc>,
    },
    Unsnooze {
        folder_id: String,
        uids: Vec<Uid>,
    },
}

impl Mutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SaveDraft { .. } => "save_draft",
            Self::SendDraft { .. } => "send_draft",
            Self::ScheduleDraft { .. } => "schedule_draft",
            Self::Move { .. } => "move",
            Self::Flag { .. } => "flag",
            Self::Snooze { .. } => "snooze",
            Self::Unsnooze { .. } => "unsnooze",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Done remotely and locally. Counters of these folders have changed.
    Completed { impacted_folders: Vec<String> },
    /// Transient failure, still queued.
    Retry { error: String },
    /// Credentials were rejected, still queued.
    AuthRequired,
    /// Rejected by the server and removed from the queue.
    Failed { message: String },
    /// The record no longer exists, typically because another attempt
    /// already completed it.
    Skipped,
}

/// Resolves per-item results of a batch action: the batch succeeds if any
/// item did, and otherwise fails with the first item error the server
/// described.
pub fn resolve_batch(results: &[ItemResult]) -> Result<Vec<Uid>, String> {
    let succeeded: Vec<Uid> = results
        .iter()
        .filter(|r| r.success)
        .map(|r| r.uid.clone())
        .collect();
    if !succeeded.is_empty() {
        return Ok(succeeded);
    }

    let message = results
        .iter()
        .filter_map(|r| r.error.as_ref())
        .find_map(|e| e.description.clone())
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
    Err(message)
}

enum Failure {
    Api(ApiError),
    Rejected(String),
    Store(StoreError),
}

impl From<ApiError> for Failure {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// What the server confirmed for a mutation.
enum Confirmed {
    DraftSaved { remote_uuid: String },
    DraftSent,
    DraftScheduled { unschedule_url: String },
    Items(Vec<Uid>),
    /// The local object the mutation referred to is gone.
    Orphaned,
}

pub struct ActionManager {
    api: Arc<dyn MailApi>,
    mailbox: Mailbox,
    store: Arc<MailboxContentStore>,
    events: EventBus,
    in_flight: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ActionManager {
    pub fn new(
        api: Arc<dyn MailApi>,
        mailbox: Mailbox,
        store: Arc<MailboxContentStore>,
        events: EventBus,
    ) -> Self {
        Self {
            api,
            mailbox,
            store,
            events,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Persists a mutation and returns its record id.
    pub fn enqueue(&self, mutation: &Mutation) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(mutation)?;
        let id = self
            .store
            .db()
            .write(|tx| ops::insert_mutation(tx, mutation.kind(), &payload))?;
        self.store.db().publish([StoreEvent::MutationsChanged]);
        debug!("Queued {} as mutation {}", mutation.kind(), id);
        Ok(id)
    }

    /// Stores the draft locally and queues a remote save.
    pub fn save_draft(&self, draft: &Draft) -> Result<i64, StoreError> {
        let mutation = Mutation::SaveDraft {
            local_uuid: draft.local_uuid.clone(),
        };
        self.queue_draft(draft, DraftAction::Save, None, &mutation)
    }

    /// Stores the draft locally and queues it for sending.
    pub fn send_draft(&self, draft: &Draft) -> Result<i64, StoreError> {
        let mutation = Mutation::SendDraft {
            local_uuid: draft.local_uuid.clone(),
        };
        self.queue_draft(draft, DraftAction::Send, None, &mutation)
    }

    /// Stores the draft locally and queues it for sending at `send_at`.
    pub fn schedule_draft(&self, draft: &Draft, send_at: DateTime<Utc>) -> Result<i64, StoreError> {
        let mutation = Mutation::ScheduleDraft {
            local_uuid: draft.local_uuid.clone(),
            send_at,
        };
        self.queue_draft(draft, DraftAction::Schedule, Some(send_at), &mutation)
    }

    fn queue_draft(
        &self,
        draft: &Draft,
        action: DraftAction,
        schedule_date: Option<DateTime<Utc>>,
        mutation: &Mutation,
    ) -> Result<i64, StoreError> {
        let mut draft = draft.clone();
        draft.action = action;
        draft.schedule_date = schedule_date;
        draft.updated_at = Utc::now();

        let payload = serde_json::to_string(&mutation)?;

        let id = self.store.db().write(|tx| {
            ops::upsert_draft(tx, &draft)?;
            ops::insert_mutation(tx, mutation.kind(), &payload)
        })?;
        self.store.db().publish([
            StoreEvent::DraftChanged {
                local_uuid: draft.local_uuid.clone(),
            },
            StoreEvent::MutationsChanged,
        ]);
        Ok(id)
    }

    fn record_lock(&self, id: i64) -> Result<Arc<tokio::sync::Mutex<()>>, StoreError> {
        let mut in_flight = self.in_flight.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(in_flight.entry(id).or_default().clone())
    }

    fn release_lock(&self, id: i64, lock: Arc<tokio::sync::Mutex<()>>) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            // Only the map and this caller hold it: nobody is waiting.
            if Arc::strong_count(&lock) <= 2 {
                in_flight.remove(&id);
            }
        }
    }

    /// Makes one attempt at a queued mutation. Concurrent calls for the same
    /// record run one after the other.
    pub async fn process(&self, id: i64) -> Result<ActionOutcome, StoreError> {
        let lock = self.record_lock(id)?;
        let outcome = {
            let _guard = lock.lock().await;
            self.attempt(id).await
        };
        self.release_lock(id, lock);
        outcome
    }

    async fn attempt(&self, id: i64) -> Result<ActionOutcome, StoreError> {
        let Some(record) = self.store.mutation(id)? else {
            return Ok(ActionOutcome::Skipped);
        };

        let mutation: Mutation = match serde_json::from_str(&record.payload) {
            Ok(mutation) => mutation,
            Err(err) => {
                warn!("Dropping unreadable mutation {} ({}): {}", id, record.kind, err);
                self.store.delete_mutation(id)?;
                return Ok(self.fail(id, err.to_string()));
            }
        };

        match self.execute_remote(&mutation).await {
            Ok(confirmed) => {
                if !self.store.delete_mutation(id)? {
                    debug!("Mutation {} was removed while in flight", id);
                }
                let impacted_folders = self.apply_locally(&mutation, confirmed)?;
                info!("Mutation {} ({}) completed", id, mutation.kind());
                Ok(ActionOutcome::Completed { impacted_folders })
            }
            Err(Failure::Store(err)) => Err(err),
            Err(Failure::Rejected(message)) => {
                self.store.delete_mutation(id)?;
                Ok(self.fail(id, message))
            }
            Err(Failure::Api(err)) => match err.class() {
                ErrorClass::Transient => {
                    warn!(
                        "Mutation {} ({}) failed on attempt {}, keeping it queued: {}",
                        id,
                        mutation.kind(),
                        record.attempts + 1,
                        err
                    );
                    self.store.record_mutation_failure(id, &err.to_string())?;
                    Ok(ActionOutcome::Retry {
                        error: err.to_string(),
                    })
                }
                ErrorClass::Auth => {
                    self.store.record_mutation_failure(id, &err.to_string())?;
                    self.events.emit(AppEvent::AuthRequired {
                        user_id: self.mailbox.user_id,
                    });
                    Ok(ActionOutcome::AuthRequired)
                }
                ErrorClass::Validation => {
                    self.store.delete_mutation(id)?;
                    let message = match err {
                        ApiError::Validation { message, .. } => message,
                        other => other.to_string(),
                    };
                    Ok(self.fail(id, message))
                }
            },
        }
    }

    fn fail(&self, id: i64, message: String) -> ActionOutcome {
        warn!("Mutation {} discarded: {}", id, message);
        self.events.emit(AppEvent::MutationFailed {
            id,
            message: message.clone(),
        });
        ActionOutcome::Failed { message }
    }

    async fn execute_remote(&self, mutation: &Mutation) -> Result<Confirmed, Failure> {
        let api = self.api.as_ref();
        let mailbox = &self.mailbox;

        let results = match mutation {
            Mutation::SaveDraft { local_uuid } => {
                let Some(draft) = self.store.draft(local_uuid)? else {
                    return Ok(Confirmed::Orphaned);
                };
                let remote_uuid = api.save_draft(mailbox, &draft).await?;
                return Ok(Confirmed::DraftSaved { remote_uuid });
            }
            Mutation::SendDraft { local_uuid } => {
                let Some(draft) = self.store.draft(local_uuid)? else {
                    return Ok(Confirmed::Orphaned);
                };
                api.send_draft(mailbox, &draft).await?;
                return Ok(Confirmed::DraftSent);
            }
            Mutation::ScheduleDraft { local_uuid, send_at } => {
                let Some(draft) = self.store.draft(local_uuid)? else {
                    return Ok(Confirmed::Orphaned);
                };
                let unschedule_url = api.schedule_draft(mailbox, &draft, *send_at).await?;
                return Ok(Confirmed::DraftScheduled { unschedule_url });
            }
            Mutation::Move {
                folder_id,
                uids,
                destination,
            } => api.move_messages(mailbox, folder_id, uids, destination).await?,
            Mutation::Flag {
                folder_id,
                uids,
                flag,
                value,
            } => api.flag_messages(mailbox, folder_id, uids, *flag, *value).await?,
            Mutation::Snooze {
                folder_id,
                uids,
                until,
            } => api.snooze_messages(mailbox, folder_id, uids, *until).await?,
            Mutation::Unsnooze { folder_id, uids } => {
                api.unsnooze_messages(mailbox, folder_id, uids).await?
            }
        };

        resolve_batch(&results)
            .map(Confirmed::Items)
            .map_err(Failure::Rejected)
    }

    /// Brings the local cache in line with what the server confirmed.
    /// Returns the folders whose counters changed.
    fn apply_locally(&self, mutation: &Mutation, confirmed: Confirmed) -> Result<Vec<String>, StoreError> {
        let uids = match confirmed {
            Confirmed::Orphaned => return Ok(Vec::new()),
            Confirmed::DraftSaved { remote_uuid } => {
                if let Mutation::SaveDraft { local_uuid } = mutation {
                    self.store.set_draft_remote_uuid(local_uuid, &remote_uuid)?;
                }
                return Ok(Vec::new());
            }
            Confirmed::DraftSent => {
                if let Mutation::SendDraft { local_uuid } = mutation {
                    self.store.delete_draft(local_uuid)?;
                }
                return self.folders_with_roles(&[FolderRole::Draft, FolderRole::Sent]);
            }
            Confirmed::DraftScheduled { unschedule_url } => {
                if let Mutation::ScheduleDraft { local_uuid, send_at } = mutation {
                    self.store.delete_draft(local_uuid)?;
                    info!(
                        "Draft {} scheduled for {}, cancel with {}",
                        local_uuid, send_at, unschedule_url
                    );
                }
                return self.folders_with_roles(&[FolderRole::Draft, FolderRole::ScheduledDrafts]);
            }
            Confirmed::Items(uids) => uids,
        };

        match mutation {
            Mutation::Move {
                folder_id,
                destination,
                ..
            } => {
                // The destination copies get new UIDs and arrive with the
                // destination folder's next delta.
                sync::apply_local_removal(&self.store, folder_id, &uids)?;
                Ok(vec![folder_id.clone(), destination.clone()])
            }
            Mutation::Flag {
                folder_id,
                flag,
                value,
                ..
            } => {
                let (flag, value) = (*flag, *value);
                sync::apply_local_flags(&self.store, folder_id, &uids, |flags| match flag {
                    FlagKind::Seen => flags.seen = value,
                    FlagKind::Favorite => flags.favorite = value,
                })?;
                Ok(vec![folder_id.clone()])
            }
            Mutation::Snooze {
                folder_id, until, ..
            } => {
                let until = *until;
                sync::apply_local_flags(&self.store, folder_id, &uids, |flags| {
                    flags.snoozed = true;
                    flags.snooze_end = Some(until);
                })?;
                self.with_role_folder(folder_id, FolderRole::Snoozed)
            }
            Mutation::Unsnooze { folder_id, .. } => {
                sync::apply_local_flags(&self.store, folder_id, &uids, |flags| {
                    flags.snoozed = false;
                    flags.snooze_end = None;
                })?;
                self.with_role_folder(folder_id, FolderRole::Snoozed)
            }
            Mutation::SaveDraft { .. } | Mutation::SendDraft { .. } | Mutation::ScheduleDraft { .. } => {
                Ok(Vec::new())
            }
        }
    }

    fn folders_with_roles(&self, roles: &[FolderRole]) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .folders()?
            .into_iter()
            .filter(|f| f.role.map_or(false, |role| roles.contains(&role)))
            .map(|f| f.id)
            .collect())
    }

    fn with_role_folder(&self, folder_id: &str, role: FolderRole) -> Result<Vec<String>, StoreError> {
        let mut folders = vec![folder_id.to_string()];
        if let Some(folder) = self.store.folder_by_role(role)? {
            if folder.id != folder_id {
                folders.push(folder.id);
            }
        }
        Ok(folders)
    }

    /// Attempts every queued mutation, oldest first. Stops early when the
    /// server rejects our credentials.
    pub async fn flush(&self) -> Result<Vec<(i64, ActionOutcome)>, StoreError> {
        let mut outcomes = Vec::new();
        for record in self.store.pending_mutations()? {
            let outcome = self.process(record.id).await?;
            let stop = outcome == ActionOutcome::AuthRequired;
            outcomes.push((record.id, outcome));
            if stop {
                break;
            }
        }
        Ok(outcomes)
    }
}
