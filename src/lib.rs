pub mod actions;
pub mod api;
pub mod config;
pub mod credentials;
pub mod database;
pub mod error;
pub mod events;
pub mod models;
pub mod registry;
pub mod sync;
pub mod threads;
pub mod worker;

// Re-export commonly used types
pub use actions::{ActionManager, ActionOutcome, Mutation};
pub use api::{HttpMailApi, MailApi};
pub use config::{AccountConfig, Config, SyncSettings};
pub use database::{MailboxContentStore, StoreEvent, StorePool};
pub use error::{ApiError, ErrorClass, StoreError, SyncError};
pub use events::{AppEvent, EventBus};
pub use registry::{MailboxRegistry, RegistryReport};
pub use sync::{DeltaSynchronizer, SyncReport};
pub use worker::{FolderFailure, PassReport, SyncWorker};
