//! Reconciles the locally known mailboxes of a user with the server's list.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::api::MailApi;
use crate::database::mailboxes as ops;
use crate::database::{ActiveMailbox, MailboxInfoStore, SettingsStore, StoreEvent, StorePool};
use crate::error::{StoreError, SyncError};
use crate::events::{AppEvent, EventBus};
use crate::models::Mailbox;

const MAILBOXES_DB: &str = "mailboxes.db";
const SETTINGS_DB: &str = "settings.db";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryReport {
    pub upserted: Vec<String>,
    pub deleted: Vec<String>,
    /// True when the active mailbox was among the deleted ones.
    pub active_reset: bool,
    /// Content stores that could not be deleted yet.
    pub pending_removals: Vec<String>,
}

pub struct MailboxRegistry {
    mailboxes: Arc<MailboxInfoStore>,
    settings: Arc<SettingsStore>,
    pool: Arc<StorePool>,
    events: EventBus,
}

impl MailboxRegistry {
    pub fn new(
        mailboxes: Arc<MailboxInfoStore>,
        settings: Arc<SettingsStore>,
        pool: Arc<StorePool>,
        events: EventBus,
    ) -> Self {
        Self {
            mailboxes,
            settings,
            pool,
            events,
        }
    }

    /// Opens the shared stores under `data_dir`.
    pub fn open(data_dir: &Path, events: EventBus) -> Result<Self, StoreError> {
        Ok(Self::new(
            Arc::new(MailboxInfoStore::open(&data_dir.join(MAILBOXES_DB))?),
            Arc::new(SettingsStore::open(&data_dir.join(SETTINGS_DB))?),
            Arc::new(StorePool::new(data_dir)),
            events,
        ))
    }

    pub fn mailboxes(&self) -> &Arc<MailboxInfoStore> {
        &self.mailboxes
    }

    pub fn pool(&self) -> &Arc<StorePool> {
        &self.pool
    }

    /// Fetches the user's mailboxes from the server and applies them.
    pub async fn refresh(&self, api: &dyn MailApi, user_id: i64) -> Result<RegistryReport, SyncError> {
        self.refresh_with(api, user_id, |_| {}).await
    }

    /// Like `refresh`, calling `before_removal` with the deleted mailboxes
    /// after their rows are gone but before their content files are.
    pub async fn refresh_with<F>(
        &self,
        api: &dyn MailApi,
        user_id: i64,
        before_removal: F,
    ) -> Result<RegistryReport, SyncError>
    where
        F: FnOnce(&[String]) + Send,
    {
        let remote = api.list_mailboxes(user_id).await?;
        Ok(self.apply_with(user_id, &remote, before_removal)?)
    }

    pub fn apply(&self, user_id: i64, remote: &[Mailbox]) -> Result<RegistryReport, StoreError> {
        self.apply_with(user_id, remote, |_| {})
    }

    /// Makes the local mailboxes of `user_id` match `remote`.
    ///
    /// Row changes commit in one transaction. If the active mailbox was
    /// deleted the selection falls back to the user's first remaining mailbox
    /// and `ReloadRequired` is emitted before this returns.
    ///
    /// Content files of deleted mailboxes are removed afterwards. Their ids
    /// are recorded in the settings first, and a removal that fails stays
    /// recorded and is retried by the next call. A mailbox that appears for
    /// the first time never reuses a content file left on disk.
    pub fn apply_with(
        &self,
        user_id: i64,
        remote: &[Mailbox],
        before_removal: impl FnOnce(&[String]),
    ) -> Result<RegistryReport, StoreError> {
        let remote: Vec<Mailbox> = remote
            .iter()
            .cloned()
            .map(|mut mailbox| {
                mailbox.user_id = user_id;
                mailbox
            })
            .collect();
        let keep: HashSet<String> = remote.iter().map(Mailbox::object_id).collect();

        let (upserted, inserted, deleted) = self.mailboxes.db().write(|tx| {
            let mut upserted = Vec::new();
            let mut inserted = Vec::new();
            for mailbox in &remote {
                let object_id = mailbox.object_id();
                if ops::get_mailbox(tx, &object_id)?.is_none() {
                    inserted.push(object_id.clone());
                }
                ops::upsert_mailbox(tx, mailbox)?;
                upserted.push(object_id);
            }

            let mut deleted = Vec::new();
            for local in ops::list_for_user(tx, user_id)? {
                let object_id = local.object_id();
                if !keep.contains(&object_id) && ops::delete_mailbox(tx, &object_id)? {
                    deleted.push(object_id);
                }
            }
            Ok::<_, StoreError>((upserted, inserted, deleted))
        })?;
        self.mailboxes
            .db()
            .publish([StoreEvent::MailboxesChanged { user_id }]);

        let active_reset = self.reset_active_if_deleted(user_id, &deleted)?;

        let mut targets = self.settings.pending_removals()?;
        for object_id in &deleted {
            info!("Mailbox {} is gone from the server, dropping its cache", object_id);
            if !targets.contains(object_id) {
                targets.push(object_id.clone());
            }
        }
        self.settings.set_pending_removals(&targets)?;
        for object_id in &inserted {
            if !targets.contains(object_id) && self.pool.content_path(object_id).exists() {
                warn!("Discarding leftover content store of new mailbox {}", object_id);
                targets.push(object_id.clone());
            }
        }

        before_removal(&deleted);
        let pending_removals = self.remove_content(&targets, &inserted)?;

        if active_reset {
            self.events.emit(AppEvent::ReloadRequired { user_id });
        }

        Ok(RegistryReport {
            upserted,
            deleted,
            active_reset,
            pending_removals,
        })
    }

    /// Deletes the content files of `targets`, skipping mailboxes that are
    /// known and in use, and records the ones that could not be deleted.
    fn remove_content(&self, targets: &[String], inserted: &[String]) -> Result<Vec<String>, StoreError> {
        let mut failed = Vec::new();
        for object_id in targets {
            if !inserted.contains(object_id) && self.mailboxes.mailbox(object_id)?.is_some() {
                debug!("Mailbox {} is known again, keeping its content store", object_id);
                continue;
            }
            if let Err(err) = self.pool.remove(object_id) {
                error!("Failed to remove content store of {}: {}", object_id, err);
                failed.push(object_id.clone());
            }
        }
        self.settings.set_pending_removals(&failed)?;
        Ok(failed)
    }

    fn reset_active_if_deleted(&self, user_id: i64, deleted: &[String]) -> Result<bool, StoreError> {
        let Some(active) = self.settings.active_mailbox()? else {
            return Ok(false);
        };
        if !deleted.contains(&active.object_id()) {
            return Ok(false);
        }

        let replacement = self
            .mailboxes
            .mailboxes_for_user(user_id)?
            .first()
            .map(ActiveMailbox::from);
        self.settings.set_active_mailbox(replacement)?;
        info!(
            "Active mailbox {} was deleted, switched to {:?}",
            active.object_id(),
            replacement.map(|a| a.object_id())
        );
        self.events.emit(AppEvent::ActiveMailboxChanged {
            object_id: replacement.map(|a| a.object_id()),
        });
        Ok(true)
    }

    /// The selected mailbox, falling back to the first known one when
    /// nothing is selected yet.
    pub fn active_mailbox(&self) -> Result<Option<Mailbox>, StoreError> {
        if let Some(active) = self.settings.active_mailbox()? {
            if let Some(mailbox) = self.mailboxes.mailbox(&active.object_id())? {
                return Ok(Some(mailbox));
            }
        }
        Ok(self.mailboxes.all_mailboxes()?.into_iter().next())
    }

    pub fn select(&self, mailbox: &Mailbox) -> Result<(), StoreError> {
        self.settings
            .set_active_mailbox(Some(ActiveMailbox::from(mailbox)))?;
        self.events.emit(AppEvent::ActiveMailboxChanged {
            object_id: Some(mailbox.object_id()),
        });
        Ok(())
    }
}
