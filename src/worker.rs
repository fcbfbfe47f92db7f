//! Background synchronization of one user's mailboxes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::actions::{ActionManager, ActionOutcome};
use crate::api::MailApi;
use crate::config::SyncSettings;
use crate::error::{ErrorClass, StoreError, SyncError};
use crate::events::{AppEvent, EventBus};
use crate::models::Mailbox;
use crate::registry::{MailboxRegistry, RegistryReport};
use crate::sync::{DeltaSynchronizer, SyncReport};

/// Exponential backoff: `base * 2^attempt`, capped at `max`, for at most
/// `max_retries` consecutive failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_retries: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max,
            max_retries,
            attempt: 0,
        }
    }

    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.backoff_base_ms),
            Duration::from_millis(settings.backoff_max_ms),
            settings.max_retries,
        )
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.checked_pow(self.attempt).unwrap_or(u32::MAX);
        self.attempt += 1;
        Some(self.base.saturating_mul(factor).min(self.max))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// A mailbox or folder that could not be synced during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderFailure {
    pub object_id: String,
    /// `None` when the folder list itself failed.
    pub folder_id: Option<String>,
    pub class: Option<ErrorClass>,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct PassReport {
    pub registry: RegistryReport,
    pub folders: Vec<SyncReport>,
    pub actions: Vec<(i64, ActionOutcome)>,
    /// Folders re-synced because a completed action changed them.
    pub refreshed: Vec<SyncReport>,
    pub failures: Vec<FolderFailure>,
    /// A queued action was refused for bad credentials.
    pub auth_required: bool,
}

impl PassReport {
    /// Some folder failed for a reason worth retrying soon.
    pub fn has_transient_failures(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.class == Some(ErrorClass::Transient))
    }

    fn record_failure(&mut self, object_id: &str, folder_id: Option<&str>, err: &SyncError) {
        warn!(
            "Sync of {}{} failed: {}",
            object_id,
            folder_id.map(|id| format!("/{}", id)).unwrap_or_default(),
            err
        );
        self.failures.push(FolderFailure {
            object_id: object_id.to_string(),
            folder_id: folder_id.map(str::to_string),
            class: err.class(),
            error: err.to_string(),
        });
    }
}

/// Errors that end a pass instead of being recorded against one folder.
fn aborts_pass(err: &SyncError) -> bool {
    err.is_auth() || matches!(err, SyncError::Cancelled)
}

pub struct SyncWorker {
    api: Arc<dyn MailApi>,
    registry: Arc<MailboxRegistry>,
    events: EventBus,
    user_id: i64,
    settings: SyncSettings,
    managers: Mutex<HashMap<String, Arc<ActionManager>>>,
    running: AtomicBool,
    wake: Notify,
}

impl SyncWorker {
    pub fn new(
        api: Arc<dyn MailApi>,
        registry: Arc<MailboxRegistry>,
        events: EventBus,
        user_id: i64,
        settings: SyncSettings,
    ) -> Self {
        Self {
            api,
            registry,
            events,
            user_id,
            settings,
            managers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// The action manager of a mailbox, shared by every caller so that the
    /// per-record ordering holds across them.
    pub fn action_manager(&self, mailbox: &Mailbox) -> Result<Arc<ActionManager>, StoreError> {
        let object_id = mailbox.object_id();
        let mut managers = self.managers.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(manager) = managers.get(&object_id) {
            return Ok(manager.clone());
        }
        let store = self.registry.pool().content(&object_id)?;
        let manager = Arc::new(ActionManager::new(
            self.api.clone(),
            mailbox.clone(),
            store,
            self.events.clone(),
        ));
        managers.insert(object_id, manager.clone());
        Ok(manager)
    }

    fn forget_managers(&self, object_ids: &[String]) {
        if let Ok(mut managers) = self.managers.lock() {
            for object_id in object_ids {
                managers.remove(object_id);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn check_cancelled(&self, cancellable: bool) -> Result<(), SyncError> {
        if cancellable && !self.is_running() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// One full pass: mailbox list, folders and deltas of every mailbox,
    /// then the action queues.
    ///
    /// A folder that fails to sync is recorded in the report and the pass
    /// goes on; the action queues are flushed either way. Rejected
    /// credentials and cancellation end the pass with an error.
    pub async fn run_pass(&self) -> Result<PassReport, SyncError> {
        self.pass(false).await
    }

    async fn pass(&self, cancellable: bool) -> Result<PassReport, SyncError> {
        // Managers of deleted mailboxes hold their stores open; drop them
        // before the files go.
        let registry = self
            .registry
            .refresh_with(self.api.as_ref(), self.user_id, |deleted| {
                self.forget_managers(deleted)
            })
            .await?;
        let mut report = PassReport {
            registry,
            ..PassReport::default()
        };

        let mailboxes = self.registry.mailboxes().mailboxes_for_user(self.user_id)?;
        for mailbox in &mailboxes {
            self.check_cancelled(cancellable)?;
            let object_id = mailbox.object_id();
            let synchronizer = self.synchronizer(mailbox)?;

            let folders = match synchronizer.sync_folders().await {
                Ok(folders) => folders,
                Err(err) if aborts_pass(&err) => return Err(err),
                Err(err) => {
                    report.record_failure(&object_id, None, &err);
                    continue;
                }
            };
            for folder in folders {
                self.check_cancelled(cancellable)?;
                match synchronizer.sync_folder(&folder.id).await {
                    Ok(folder_report) => {
                        debug!(
                            "{}/{}: +{} ~{} -{}{}",
                            object_id,
                            folder.id,
                            folder_report.added,
                            folder_report.updated,
                            folder_report.deleted,
                            if folder_report.reset { " (rebuilt)" } else { "" }
                        );
                        report.folders.push(folder_report);
                    }
                    Err(err) if aborts_pass(&err) => return Err(err),
                    Err(err) => report.record_failure(&object_id, Some(&folder.id), &err),
                }
            }
        }

        for mailbox in &mailboxes {
            self.check_cancelled(cancellable)?;
            let outcomes = self.action_manager(mailbox)?.flush().await?;
            let auth_required = outcomes
                .iter()
                .any(|(_, outcome)| *outcome == ActionOutcome::AuthRequired);
            let impacted = impacted_folders(&outcomes);
            report.actions.extend(outcomes);
            if auth_required {
                report.auth_required = true;
                break;
            }
            self.refresh_impacted(mailbox, &impacted, &mut report).await?;
        }

        Ok(report)
    }

    fn synchronizer(&self, mailbox: &Mailbox) -> Result<DeltaSynchronizer, StoreError> {
        let store = self.registry.pool().content(&mailbox.object_id())?;
        Ok(DeltaSynchronizer::new(self.api.clone(), mailbox.clone(), store))
    }

    /// Pulls the server's view of folders a completed action changed, so
    /// the destination of a move shows its new copies in the same pass.
    async fn refresh_impacted(
        &self,
        mailbox: &Mailbox,
        folder_ids: &[String],
        report: &mut PassReport,
    ) -> Result<(), SyncError> {
        if folder_ids.is_empty() {
            return Ok(());
        }
        let object_id = mailbox.object_id();
        let synchronizer = self.synchronizer(mailbox)?;
        for folder_id in folder_ids {
            match synchronizer.sync_folder(folder_id).await {
                Ok(folder_report) => report.refreshed.push(folder_report),
                Err(SyncError::UnknownFolder(_)) => {}
                Err(err) if aborts_pass(&err) => return Err(err),
                Err(err) => report.record_failure(&object_id, Some(folder_id), &err),
            }
        }
        Ok(())
    }

    /// Syncs one folder of `mailbox` now, together with the folders linked
    /// to its role.
    pub async fn refresh_folder(&self, mailbox: &Mailbox, folder_id: &str) -> Result<Vec<SyncReport>, SyncError> {
        self.synchronizer(mailbox)?.sync_with_linked(folder_id).await
    }

    /// Spawns the sync loop. It runs until `stop` is called or the server
    /// rejects the credentials.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            worker.run().await;
            worker.running.store(false, Ordering::SeqCst);
        })
    }

    /// Requests the loop to end. Work already committed stays; the unit in
    /// progress either commits whole or not at all.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    async fn run(&self) {
        let mut backoff = Backoff::from_settings(&self.settings);
        info!("Sync worker started for user {}", self.user_id);

        while self.is_running() {
            let delay = match self.pass(true).await {
                Ok(report) if report.auth_required => {
                    warn!("Credentials rejected while flushing actions, stopping");
                    break;
                }
                Ok(report) if report.has_transient_failures() => {
                    match backoff.next_delay() {
                        Some(delay) => {
                            warn!(
                                "{} folder(s) failed to sync (attempt {}), retrying in {:?}",
                                report.failures.len(),
                                backoff.attempts(),
                                delay
                            );
                            delay
                        }
                        None => {
                            error!("Folders still failing after {} retries", backoff.attempts());
                            backoff.reset();
                            self.settings.sync_interval()
                        }
                    }
                }
                Ok(report) => {
                    backoff.reset();
                    info!(
                        "Sync pass done: {} folder(s), {} action(s), {} failure(s)",
                        report.folders.len(),
                        report.actions.len(),
                        report.failures.len()
                    );
                    self.settings.sync_interval()
                }
                Err(SyncError::Cancelled) => break,
                Err(err) if err.is_auth() => {
                    error!("Authentication failed: {}", err);
                    self.events.emit(AppEvent::AuthRequired {
                        user_id: self.user_id,
                    });
                    break;
                }
                Err(err) if err.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            "Sync failed (attempt {}), retrying in {:?}: {}",
                            backoff.attempts(),
                            delay,
                            err
                        );
                        delay
                    }
                    None => {
                        error!("Sync failed after {} retries: {}", backoff.attempts(), err);
                        backoff.reset();
                        self.settings.sync_interval()
                    }
                },
                Err(err) => {
                    error!("Sync failed: {}", err);
                    self.settings.sync_interval()
                }
            };

            if !self.is_running() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {}
            }
        }

        info!("Sync worker stopped for user {}", self.user_id);
    }
}

/// Folders changed by completed actions, each once, in first-seen order.
fn impacted_folders(outcomes: &[(i64, ActionOutcome)]) -> Vec<String> {
    let mut folders: Vec<String> = Vec::new();
    for (_, outcome) in outcomes {
        if let ActionOutcome::Completed { impacted_folders } = outcome {
            for folder in impacted_folders {
                if !folders.contains(folder) {
                    folders.push(folder.clone());
                }
            }
        }
    }
    folders
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impacted_folders_come_from_completed_actions_only() {
        let outcomes = vec![
            (
                1,
                ActionOutcome::Completed {
                    impacted_folders: vec!["inbox".to_string(), "archive".to_string()],
                },
            ),
            (2, ActionOutcome::Retry { error: "timeout".to_string() }),
            (
                3,
                ActionOutcome::Completed {
                    impacted_folders: vec!["archive".to_string(), "snoozed".to_string()],
                },
            ),
        ];
        assert_eq!(impacted_folders(&outcomes), vec!["inbox", "archive", "snoozed"]);
    }

    #[test]
    fn only_transient_failures_ask_for_a_quick_retry() {
        let mut report = PassReport::default();
        report.record_failure("7_1", Some("inbox"), &SyncError::UnknownFolder("inbox".to_string()));
        assert!(!report.has_transient_failures());

        let err = SyncError::Api(crate::error::ApiError::Network("reset".to_string()));
        report.record_failure("7_1", Some("sent"), &err);
        assert!(report.has_transient_failures());
        assert_eq!(report.failures[1].folder_id.as_deref(), Some("sent"));
    }

    #[test]
    fn backoff_doubles_up_to_cap_and_gives_up() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350), 4);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(350)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(350)));
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn backoff_does_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 100);
        let mut last = Duration::ZERO;
        while let Some(delay) = backoff.next_delay() {
            last = delay;
        }
        assert_eq!(last, Duration::from_secs(60));
    }
}
