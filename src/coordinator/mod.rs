// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Directory sync coordinator.
//!
//! [`DirectorySync`] assembles the components from configuration and owns
//! the scheduler loop:
//!
//! ```text
//!                ┌─────────────────┐
//!  webhook ─────►│ EventDispatcher │──┐
//!                └─────────────────┘  │   ┌──────────────┐     ┌─────────────────┐
//!                ┌─────────────────┐  ├──►│ UpsertEngine │────►│   RecordStore   │
//!  timer ───────►│  SyncScheduler  │──┘   └──────┬───────┘     └─────────────────┘
//!                └────────┬────────┘             │                      ▲
//!                         │ cursor + lock        ▼                      │
//!                ┌────────┴────────┐    ┌────────────────┐     ┌────────┴────────┐
//!                │  Redis / memory │    │ DirectoryStore │     │ BindingService  │◄── QR, callback
//!                └─────────────────┘    └────────────────┘     │ CustomerService │◄── sidebar
//!                                                              └─────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → ShuttingDown → Stopped
//! ```
//!
//! Events and binding calls work in every state; only the periodic job
//! follows the lifecycle.

mod types;

pub use types::{EngineState, StartupError};

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::binding::{BindingService, CustomerService};
use crate::config::{ConfigError, DirectorySyncConfig};
use crate::directory::{ContactApi, DirectoryStore, SqlDirectory, WeComContactApi};
use crate::record_store::{self, RecordStore};
use crate::storage::{CursorStore, InMemoryStore, LockStore, RedisStore};
use crate::sync::{EventDispatcher, SyncScheduler, UpsertEngine};

const DIRECTORY_POOL_SIZE: u32 = 5;

/// External systems the coordinator talks to.
#[derive(Clone)]
pub struct Backends {
    pub record_store: Arc<dyn RecordStore>,
    pub directory: Arc<dyn DirectoryStore>,
    pub contacts: Arc<dyn ContactApi>,
    pub cursors: Arc<dyn CursorStore>,
    pub locks: Arc<dyn LockStore>,
}

impl Backends {
    /// Connect every backend named in `config`. Without a Redis URL the
    /// cursor and lock live in process memory, which is only correct for a
    /// single instance.
    pub async fn connect(config: &DirectorySyncConfig) -> Result<Self, StartupError> {
        config.validate()?;

        let record_store = record_store::connect(&config.record_store)?;

        let directory_url = config
            .directory_url
            .as_deref()
            .ok_or(ConfigError::Missing("directory_url"))?;
        let directory = Arc::new(SqlDirectory::connect(directory_url, DIRECTORY_POOL_SIZE).await?);

        let contacts = Arc::new(WeComContactApi::new(config.contact_api.clone())?);

        let (cursors, locks): (Arc<dyn CursorStore>, Arc<dyn LockStore>) = match config.redis_url.as_deref() {
            Some(url) => {
                let redis = Arc::new(RedisStore::new(url).await?);
                info!("Cursor and lock backed by Redis");
                (redis.clone() as Arc<dyn CursorStore>, redis as Arc<dyn LockStore>)
            }
            None => {
                warn!("No Redis URL configured, cursor and lock are process-local");
                let memory = Arc::new(InMemoryStore::new());
                (memory.clone() as Arc<dyn CursorStore>, memory as Arc<dyn LockStore>)
            }
        };

        Ok(Self { record_store, directory, contacts, cursors, locks })
    }
}

/// The assembled directory sync system.
pub struct DirectorySync {
    config: DirectorySyncConfig,
    engine: Arc<UpsertEngine>,
    scheduler: Arc<SyncScheduler>,
    events: EventDispatcher,
    binding: BindingService,
    customers: CustomerService,
    state: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
    shutdown: watch::Sender<bool>,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
}

impl DirectorySync {
    /// Connect the configured backends and assemble the system.
    pub async fn connect(config: DirectorySyncConfig) -> Result<Self, StartupError> {
        let backends = Backends::connect(&config).await?;
        Ok(Self::with_backends(config, backends))
    }

    /// Assemble the system on top of already-built backends.
    pub fn with_backends(config: DirectorySyncConfig, backends: Backends) -> Self {
        let engine = Arc::new(UpsertEngine::new(
            backends.record_store.clone(),
            backends.directory,
            config.retry.clone(),
        ));
        let scheduler = Arc::new(SyncScheduler::new(engine.clone(), backends.cursors, backends.locks, &config));
        let events = EventDispatcher::new(engine.clone(), &config);
        let binding = BindingService::new(backends.record_store.clone(), backends.contacts);
        let customers = CustomerService::new(backends.record_store);

        let (state, state_rx) = watch::channel(EngineState::Created);
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            engine,
            scheduler,
            events,
            binding,
            customers,
            state,
            state_rx,
            shutdown,
            scheduler_task: Mutex::new(None),
        }
    }

    /// Spawn the periodic scheduler loop. Calling it again while running does
    /// nothing.
    pub fn start(&self) {
        let mut task = self.scheduler_task.lock();
        if task.is_some() {
            warn!("Scheduler already started");
            return;
        }
        if !self.config.staff_sync_enabled {
            info!(tenant = %self.config.tenant_id, "Staff sync disabled, scheduled runs will be no-ops");
        }

        let scheduler = self.scheduler.clone();
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(async move { scheduler.run(shutdown).await }));
        let _ = self.state.send(EngineState::Running);
    }

    /// Stop the scheduler loop after its current tick.
    pub async fn shutdown(&self) {
        let task = self.scheduler_task.lock().take();
        let Some(task) = task else {
            let _ = self.state.send(EngineState::Stopped);
            return;
        };

        let _ = self.state.send(EngineState::ShuttingDown);
        let _ = self.shutdown.send(true);
        if let Err(e) = task.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
        let _ = self.state.send(EngineState::Stopped);
        info!("Directory sync stopped");
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn config(&self) -> &DirectorySyncConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<UpsertEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn binding(&self) -> &BindingService {
        &self.binding
    }

    pub fn customers(&self) -> &CustomerService {
        &self.customers
    }
}
