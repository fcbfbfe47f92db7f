//! App-level signals for whoever drives the sync layer (CLI, UI).

use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The active mailbox went away; app state must be reloaded.
    ReloadRequired { user_id: i64 },
    ActiveMailboxChanged { object_id: Option<String> },
    /// The remote rejected our credentials. Nothing is retried until the
    /// user logs in again.
    AuthRequired { user_id: i64 },
    /// A queued mutation was discarded; `message` is shown to the user.
    MutationFailed { id: i64, message: String },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: AppEvent) {
        log::debug!("Emitting {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
