//! Process wiring: open the store, declare the schema, build the repository,
//! service, session authority and outbox dispatcher, and run the background
//! loops until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::accounts::{ensure_schema, AccountRepository, AccountService, OutboxDispatcher, OutboxSignal};
use crate::config::AppConfig;
use crate::identity::SessionManager;
use crate::security::{Argon2Hasher, CredentialHasher};
use crate::storage::Store;

pub struct App {
    pub config: AppConfig,
    pub store: Store,
    pub sessions: SessionManager,
    pub repository: AccountRepository,
    pub service: AccountService,
    pub dispatcher: Arc<OutboxDispatcher>,
}

impl App {
    /// Build on a store under `config.data_dir` when persistence is enabled,
    /// otherwise on a volatile store that never reads or writes snapshots.
    pub fn open(config: AppConfig) -> Result<Self> {
        let store = if config.store.persistence.enabled {
            std::fs::create_dir_all(&config.data_dir)
                .with_context(|| format!("Failed to create or access data dir: {}", config.data_dir.display()))?;
            Store::open(&config.data_dir, config.store.clone())
                .with_context(|| format!("While opening store at {}", config.data_dir.display()))?
        } else {
            info!(target: "startup", "persistence disabled; starting with an empty in-memory store");
            Store::in_memory(config.store.clone())
        };
        Self::assemble(config, store, Arc::new(Argon2Hasher::default()))
    }

    /// Build around an existing store and hasher.
    pub fn assemble(config: AppConfig, store: Store, hasher: Arc<dyn CredentialHasher>) -> Result<Self> {
        ensure_schema(&store).context("While declaring collections")?;
        let signal = OutboxSignal::new();
        let sessions = SessionManager::new(config.sessions.ttl());
        let repository = AccountRepository::new(store.clone(), signal.clone());
        let service = AccountService::new(repository.clone(), hasher);
        let dispatcher = Arc::new(OutboxDispatcher::new(store.clone(), Arc::new(sessions.clone()), signal, config.outbox.clone()));
        Ok(Self { config, store, sessions, repository, service, dispatcher })
    }

    /// Start the dispatcher and (if enabled) the snapshot loop.
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![tokio::spawn(self.dispatcher.clone().run(shutdown.clone()))];
        let persistence = &self.config.store.persistence;
        if persistence.enabled {
            let store = self.store.clone();
            let interval = Duration::from_millis(persistence.interval_ms.max(1));
            let mut shutdown = shutdown;
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        changed = shutdown.changed() => { if changed.is_err() || *shutdown.borrow() { break; } }
                    }
                    if let Err(e) = store.save_snapshot() {
                        warn!(target: "accountd::storage", error = %e, "periodic snapshot failed");
                    }
                }
            }));
        } else {
            info!(target: "startup", "snapshot persistence disabled");
        }
        handles
    }

    /// Run background work until `stop` resolves, then drain and, with persistence
    /// enabled, write a final snapshot.
    pub async fn run_until<F>(self, stop: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let (tx, rx) = watch::channel(false);
        let handles = self.spawn_background(rx);
        stop.await;
        info!(target: "startup", "shutdown requested");
        let _ = tx.send(true);
        for h in handles {
            if let Err(e) = h.await { warn!(target: "startup", error = %e, "background task ended abnormally"); }
        }
        if self.config.store.persistence.enabled {
            self.store.save_snapshot().context("final snapshot")?;
        }
        info!(target: "startup", commits = self.store.commit_count(), "accountd stopped");
        Ok(())
    }
}
