use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};

use mailsync::config::{AccountConfig, Config};
use mailsync::credentials::{Token, TokenStore};
use mailsync::{AppEvent, EventBus, HttpMailApi, MailApi, MailboxRegistry, SyncWorker};

/// Keeps a local cache of a remote mail account in sync
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to config file
    #[clap(short, long, default_value = "~/.config/mailsync/config.json")]
    config: String,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a new account
    AddAccount {
        /// Account name
        #[clap(short, long)]
        name: String,

        /// Remote user id
        #[clap(short, long)]
        user_id: i64,

        /// Base URL of the mail API
        #[clap(short, long)]
        api_url: String,

        /// Email address
        #[clap(short, long)]
        email: String,

        /// API token, stored in the keyring
        #[clap(short, long)]
        token: Option<String>,
    },

    /// List configured accounts
    ListAccounts,

    /// Set default account
    SetDefaultAccount {
        /// Account index (starting from 0)
        #[clap(short, long)]
        index: usize,
    },

    /// Store the API token of the default account
    SetToken {
        #[clap(short, long)]
        token: String,
    },

    /// Run one synchronization pass, or refresh one folder of the active
    /// mailbox together with its linked folders
    Sync {
        /// Folder id to refresh
        #[clap(short, long)]
        folder: Option<String>,
    },

    /// Keep synchronizing until interrupted
    Watch,

    /// Show cached folders and queued actions
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let config_path = shellexpand::tilde(&args.config).into_owned();
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    match args.command {
        Commands::AddAccount {
            name,
            user_id,
            api_url,
            email,
            token,
        } => {
            let account = AccountConfig {
                name,
                user_id,
                api_url,
                email,
            };
            if let Some(token) = token {
                TokenStore::open()?.store_token(&account.credential_id(), &Token::new(token))?;
            }
            config.add_account(account);
            config.save(&config_path).context("Failed to save config")?;
            println!("Account added successfully!");
        }
        Commands::ListAccounts => {
            println!("Configured accounts:");
            for (i, account) in config.accounts.iter().enumerate() {
                println!(
                    "{}. {} <{}> user {} at {} {}",
                    i,
                    account.name,
                    account.email,
                    account.user_id,
                    account.api_url,
                    if i == config.default_account { "(default)" } else { "" }
                );
            }
        }
        Commands::SetDefaultAccount { index } => {
            config.set_default_account(index)?;
            config.save(&config_path).context("Failed to save config")?;
            let account = config.current_account()?;
            println!("Default account set to: {} <{}>", account.name, account.email);
        }
        Commands::SetToken { token } => {
            let account = config.current_account()?;
            TokenStore::open()?.store_token(&account.credential_id(), &Token::new(token))?;
            println!("Token stored for {}", account.name);
        }
        Commands::Sync { folder: Some(folder) } => {
            let (worker, registry, _) = build_worker(&config)?;
            let mailbox = registry
                .active_mailbox()?
                .ok_or_else(|| anyhow!("No mailbox cached yet; run sync without --folder first"))?;
            for report in worker.refresh_folder(&mailbox, &folder).await? {
                println!(
                    "{}: +{} ~{} -{} ({} older){}",
                    report.folder_id,
                    report.added,
                    report.updated,
                    report.deleted,
                    report.older,
                    if report.reset { ", rebuilt" } else { "" }
                );
            }
        }
        Commands::Sync { folder: None } => {
            let (worker, _, _) = build_worker(&config)?;
            let report = worker.run_pass().await?;
            println!(
                "Synced {} mailbox folder(s), removed {} mailbox(es), processed {} action(s)",
                report.folders.len(),
                report.registry.deleted.len(),
                report.actions.len()
            );
            for failure in &report.failures {
                println!(
                    "Could not sync {}/{}: {}",
                    failure.object_id,
                    failure.folder_id.as_deref().unwrap_or("folders"),
                    failure.error
                );
            }
            if report.auth_required {
                println!("The server rejected the token; run set-token and try again.");
            }
        }
        Commands::Watch => {
            let (worker, _, events) = build_worker(&config)?;
            let mut rx = events.subscribe();
            let handle = worker.start();

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted, stopping");
                        break;
                    }
                    event = rx.recv() => match event {
                        Ok(AppEvent::AuthRequired { user_id }) => {
                            error!("Authentication required for user {}", user_id);
                            break;
                        }
                        Ok(AppEvent::MutationFailed { id, message }) => {
                            println!("Action {} failed: {}", id, message);
                        }
                        Ok(other) => info!("{:?}", other),
                        Err(_) => {}
                    },
                }
            }

            worker.stop();
            handle.await.context("Sync worker panicked")?;
        }
        Commands::Status => {
            let account = config.current_account()?;
            let registry = MailboxRegistry::open(&config.sync.data_dir(), EventBus::new())?;
            let active = registry.active_mailbox()?.map(|m| m.object_id());

            for mailbox in registry.mailboxes().mailboxes_for_user(account.user_id)? {
                let marker = if Some(mailbox.object_id()) == active { "*" } else { " " };
                println!("{} {} ({} unread)", marker, mailbox.email, mailbox.unread_count);

                let store = registry.pool().content(&mailbox.object_id())?;
                for folder in store.folders()? {
                    println!(
                        "    {:<24} {:>5} threads {:>5} unread {:>5} snoozed{}{}",
                        folder.name,
                        folder.thread_count,
                        folder.unread_count,
                        folder.snoozed_count,
                        if folder.has_unseen_remote_mail() {
                            format!(" ({} unread on server)", folder.remote_unread_count)
                        } else {
                            String::new()
                        },
                        if folder.history_complete { "" } else { " (partial history)" }
                    );
                }
                for record in store.pending_mutations()? {
                    println!(
                        "    queued #{} {} (attempts: {}{})",
                        record.id,
                        record.kind,
                        record.attempts,
                        record
                            .last_error
                            .map(|e| format!(", last error: {}", e))
                            .unwrap_or_default()
                    );
                }
            }
        }
    }

    Ok(())
}

fn build_worker(config: &Config) -> Result<(Arc<SyncWorker>, Arc<MailboxRegistry>, EventBus)> {
    let account = config.current_account()?;
    let token = TokenStore::open()?
        .get_token(&account.credential_id())?
        .ok_or_else(|| anyhow!("No token stored for {}; run set-token first", account.name))?;

    let api: Arc<dyn MailApi> = Arc::new(HttpMailApi::new(
        &account.api_url,
        token.expose(),
        config.sync.request_timeout(),
    )?);
    let events = EventBus::new();
    let registry = Arc::new(MailboxRegistry::open(&config.sync.data_dir(), events.clone())?);

    let worker = Arc::new(SyncWorker::new(
        api,
        registry.clone(),
        events.clone(),
        account.user_id,
        config.sync.clone(),
    ));
    Ok((worker, registry, events))
}
