// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full and incremental sync passes, and the periodic catch-up job.
//!
//! # Pass shape
//!
//! ```text
//! pass start ──► departments (updated_at > cursor) ──► staff (updated_at > cursor)
//!      │              one upsert, throttle, ...          one upsert, throttle, ...
//!      └──────────────────────────────────────────────► cursor := pass start
//! ```
//!
//! Every department upsert of a pass completes before the first staff upsert
//! starts. The cursor moves to the pass *start* so that a change landing
//! mid-pass is picked up by the next one.
//!
//! # Scheduling
//!
//! [`SyncScheduler::run`] ticks every `interval` and calls
//! [`SyncScheduler::run_scheduled`], which takes the distributed lock, loads
//! the cursor, runs one incremental pass, persists the new cursor and releases
//! the lock. When another instance holds the lock the tick does nothing.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::cursor::SyncCursor;
use super::upsert::{SyncError, UpsertEngine};
use crate::config::{DirectorySyncConfig, SchedulerConfig};
use crate::directory::{ChangeAction, DirectoryEntity, EntityKind};
use crate::metrics;
use crate::storage::{CursorStore, LockStore};

/// Success/failure counts for one entity kind within a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl KindReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub departments: KindReport,
    pub staff: KindReport,
}

impl PassReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.departments.failed + self.staff.failed
    }

    fn kind_mut(&mut self, kind: EntityKind) -> &mut KindReport {
        match kind {
            EntityKind::Department => &mut self.departments,
            EntityKind::Staff => &mut self.staff,
        }
    }
}

/// What a scheduled tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledRun {
    Completed { cursor: SyncCursor, report: PassReport },
    /// Another instance holds the lock
    LockHeld,
    /// Staff sync is switched off
    Disabled,
}

pub struct SyncScheduler {
    engine: Arc<UpsertEngine>,
    cursors: Arc<dyn CursorStore>,
    locks: Arc<dyn LockStore>,
    config: SchedulerConfig,
    tenant_id: String,
    enabled: bool,
}

impl SyncScheduler {
    pub fn new(
        engine: Arc<UpsertEngine>,
        cursors: Arc<dyn CursorStore>,
        locks: Arc<dyn LockStore>,
        config: &DirectorySyncConfig,
    ) -> Self {
        Self {
            engine,
            cursors,
            locks,
            config: config.scheduler.clone(),
            tenant_id: config.tenant_id.clone(),
            enabled: config.staff_sync_enabled,
        }
    }

    /// Upsert every entity of `kind`, ignoring the cursor.
    #[instrument(skip(self))]
    pub async fn full_sync(&self, tenant: &str, kind: EntityKind) -> Result<KindReport, SyncError> {
        self.full_sync_kind(tenant, kind, &mut true).await
    }

    /// Full sync of departments, then staff, throttled as one pass.
    pub async fn full_sync_all(&self, tenant: &str) -> Result<PassReport, SyncError> {
        let mut first = true;
        Ok(PassReport {
            departments: self.full_sync_kind(tenant, EntityKind::Department, &mut first).await?,
            staff: self.full_sync_kind(tenant, EntityKind::Staff, &mut first).await?,
        })
    }

    async fn full_sync_kind(&self, tenant: &str, kind: EntityKind, first: &mut bool) -> Result<KindReport, SyncError> {
        if !self.enabled {
            info!(tenant, %kind, "Staff sync disabled, skipping full sync");
            return Ok(KindReport::default());
        }

        let start = Instant::now();
        let entities = self.engine.directory().list(tenant, kind).await?;
        info!(tenant, %kind, count = entities.len(), "Starting full sync");

        let report = self.sync_entities(&entities, first).await;
        metrics::record_pass_duration("full", start.elapsed());
        self.record_report(kind, &report);
        info!(tenant, %kind, succeeded = report.succeeded, failed = report.failed, "Full sync complete");
        Ok(report)
    }

    /// Sync everything changed after `cursor` and return the cursor moved to
    /// the pass start. A failed Directory read aborts the pass and leaves the
    /// cursor where it was.
    #[instrument(skip(self), fields(tenant = %cursor.tenant_id, since = %cursor.last_synced_at))]
    pub async fn incremental_pass(&self, cursor: &SyncCursor) -> Result<(SyncCursor, PassReport), SyncError> {
        let pass_start = Utc::now();
        let start = Instant::now();
        let mut report = PassReport::default();
        let mut first = true;

        if !self.enabled {
            debug!("Staff sync disabled, skipping incremental pass");
            return Ok((cursor.clone(), report));
        }

        for kind in [EntityKind::Department, EntityKind::Staff] {
            let changed = self
                .engine
                .directory()
                .list_changed_since(&cursor.tenant_id, kind, cursor.last_synced_at)
                .await?;
            if changed.is_empty() {
                debug!(%kind, "No changes");
                continue;
            }
            info!(%kind, count = changed.len(), "Syncing changed entities");
            *report.kind_mut(kind) = self.sync_entities(&changed, &mut first).await;
            self.record_report(kind, report.kind_mut(kind));
        }

        metrics::record_pass_duration("incremental", start.elapsed());
        info!(
            departments_ok = report.departments.succeeded,
            departments_failed = report.departments.failed,
            staff_ok = report.staff.succeeded,
            staff_failed = report.staff.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Incremental pass complete"
        );
        Ok((cursor.advanced_to(pass_start), report))
    }

    /// One scheduled tick for `tenant`: lock, load cursor, pass, persist,
    /// unlock.
    #[instrument(skip(self))]
    pub async fn run_scheduled(&self, tenant: &str) -> Result<ScheduledRun, SyncError> {
        if !self.enabled {
            debug!("Staff sync disabled, skipping scheduled run");
            return Ok(ScheduledRun::Disabled);
        }

        let task = self.config.task_name.as_str();
        let Some(lock) = self.locks.try_acquire(task, self.config.lock_lease()).await? else {
            metrics::record_lock_attempt(task, false);
            debug!(task, "Lock held elsewhere, skipping this run");
            return Ok(ScheduledRun::LockHeld);
        };
        metrics::record_lock_attempt(task, true);

        let result = self.locked_pass(tenant).await;

        match self.locks.release(&lock).await {
            Ok(true) => {}
            Ok(false) => warn!(task, "Lock lease expired before release"),
            Err(e) => error!(task, error = %e, "Failed to release lock"),
        }

        result
    }

    async fn locked_pass(&self, tenant: &str) -> Result<ScheduledRun, SyncError> {
        let cursor = SyncCursor::load(self.cursors.as_ref(), tenant, self.config.interval()).await;
        let (next, report) = self.incremental_pass(&cursor).await?;

        if let Err(e) = next.persist(self.cursors.as_ref()).await {
            error!(tenant, error = %e, "Failed to persist sync cursor");
        }
        metrics::set_cursor_lag(tenant, next.lag_secs(Utc::now()));

        Ok(ScheduledRun::Completed { cursor: next, report })
    }

    /// Tick every interval until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tenant = %self.tenant_id,
            interval_secs = self.config.interval_secs,
            "Directory sync scheduler running"
        );
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_scheduled(&self.tenant_id).await {
                        error!(tenant = %self.tenant_id, error = %e, "Scheduled sync run failed");
                    }
                }
            }
        }
        info!("Directory sync scheduler stopped");
    }

    /// Upsert `entities` in order. `first` is shared by every call of one
    /// pass so the throttle also spaces the last department from the first
    /// staff member.
    async fn sync_entities(&self, entities: &[DirectoryEntity], first: &mut bool) -> KindReport {
        let mut report = KindReport::default();
        for entity in entities {
            if !std::mem::take(first) {
                sleep(self.config.throttle()).await;
            }
            match self.engine.upsert_with_retry(entity, ChangeAction::Update).await {
                Some(_) => report.succeeded += 1,
                None => report.failed += 1,
            }
        }
        report
    }

    fn record_report(&self, kind: EntityKind, report: &KindReport) {
        metrics::record_pass_entities(kind.as_str(), "success", report.succeeded);
        metrics::record_pass_entities(kind.as_str(), "failure", report.failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::record_store::{InMemoryRecordStore, StoreOperation, Worksheet};
    use crate::resilience::retry::RetryPolicy;
    use crate::storage::InMemoryStore;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::time::Duration;

    struct Harness {
        scheduler: SyncScheduler,
        store: Arc<InMemoryRecordStore>,
        directory: Arc<InMemoryDirectory>,
        kv: Arc<InMemoryStore>,
    }

    fn harness(enabled: bool) -> Harness {
        let store = Arc::new(InMemoryRecordStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let kv = Arc::new(InMemoryStore::new());
        let engine = Arc::new(UpsertEngine::new(
            store.clone(),
            directory.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        ));
        let mut config = DirectorySyncConfig {
            tenant_id: "corp".into(),
            staff_sync_enabled: enabled,
            ..Default::default()
        };
        config.scheduler.throttle_ms = 0;
        let scheduler = SyncScheduler::new(engine, kv.clone(), kv.clone(), &config);
        Harness { scheduler, store, directory, kv }
    }

    #[tokio::test]
    async fn test_incremental_pass_selects_changed_and_advances_to_start() {
        let h = harness(true);
        let old = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let since = old + ChronoDuration::seconds(10);
        let new = old + ChronoDuration::seconds(20);
        h.directory.put(DirectoryEntity::department("corp", "1").with_attribute("name", "Old").with_updated_at(old));
        h.directory.put(DirectoryEntity::department("corp", "2").with_attribute("name", "New").with_updated_at(new));

        let before = Utc::now();
        let (next, report) = h.scheduler.incremental_pass(&SyncCursor::new("corp", since)).await.unwrap();

        assert_eq!(report.departments, KindReport { succeeded: 1, failed: 0 });
        assert_eq!(h.store.rows(Worksheet::Department).len(), 1);
        assert!(next.last_synced_at >= before);
        assert!(next.last_synced_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_directory_failure_keeps_cursor() {
        let h = harness(true);
        let since = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        h.directory.fail_next(crate::directory::DirectoryError::Database("down".into()));

        assert!(h.scheduler.incremental_pass(&SyncCursor::new("corp", since)).await.is_err());
    }

    #[tokio::test]
    async fn test_run_scheduled_persists_cursor_and_releases_lock() {
        let h = harness(true);
        h.directory.put(DirectoryEntity::department("corp", "1").with_attribute("name", "Sales"));

        let run = h.scheduler.run_scheduled("corp").await.unwrap();
        let ScheduledRun::Completed { cursor, report } = run else {
            panic!("expected a completed run, got {run:?}");
        };
        assert_eq!(report.departments.succeeded, 1);
        assert_eq!(
            h.kv.load("corp").await.unwrap().map(|t| t.timestamp()),
            Some(cursor.last_synced_at.timestamp())
        );
        assert!(!h.kv.is_locked("directory_sync"));
    }

    #[tokio::test]
    async fn test_run_scheduled_skips_when_locked() {
        let h = harness(true);
        let _held = h.kv.try_acquire("directory_sync", Duration::from_secs(300)).await.unwrap().unwrap();

        assert_eq!(h.scheduler.run_scheduled("corp").await.unwrap(), ScheduledRun::LockHeld);
        assert!(h.store.calls().is_empty());
        assert!(h.kv.load("corp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_is_a_no_op() {
        let h = harness(false);
        h.directory.put(DirectoryEntity::department("corp", "1").with_attribute("name", "Sales"));

        assert_eq!(h.scheduler.run_scheduled("corp").await.unwrap(), ScheduledRun::Disabled);
        assert_eq!(h.scheduler.full_sync_all("corp").await.unwrap(), PassReport::default());
        assert!(h.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_full_sync_counts_failures() {
        let h = harness(true);
        h.directory.put(DirectoryEntity::department("corp", "1").with_attribute("name", "A"));
        h.directory.put(DirectoryEntity::department("corp", "2").with_attribute("name", "B"));
        h.store.fail_next(StoreOperation::Create, crate::record_store::RecordStoreError::provider(10002, "bad"), 1);

        let report = h.scheduler.full_sync("corp", EntityKind::Department).await.unwrap();
        assert_eq!(report, KindReport { succeeded: 1, failed: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_between_upserts() {
        let store = Arc::new(InMemoryRecordStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let kv = Arc::new(InMemoryStore::new());
        let engine = Arc::new(UpsertEngine::new(store.clone(), directory.clone(), RetryPolicy::default()));
        let config = DirectorySyncConfig { tenant_id: "corp".into(), ..Default::default() };
        let scheduler = SyncScheduler::new(engine, kv.clone(), kv, &config);
        for id in ["1", "2", "3"] {
            directory.put(DirectoryEntity::department("corp", id).with_attribute("name", id));
        }

        let start = tokio::time::Instant::now();
        scheduler.full_sync("corp", EntityKind::Department).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spans_kinds_within_a_pass() {
        let store = Arc::new(InMemoryRecordStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let kv = Arc::new(InMemoryStore::new());
        let engine = Arc::new(UpsertEngine::new(store.clone(), directory.clone(), RetryPolicy::default()));
        let config = DirectorySyncConfig { tenant_id: "corp".into(), ..Default::default() };
        let scheduler = SyncScheduler::new(engine, kv.clone(), kv, &config);
        let since = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        directory.put(DirectoryEntity::department("corp", "1").with_attribute("name", "Sales"));
        directory.put(DirectoryEntity::staff("corp", "alice").with_attribute("name", "Alice"));

        let start = tokio::time::Instant::now();
        let (_, report) = scheduler.incremental_pass(&SyncCursor::new("corp", since)).await.unwrap();
        assert_eq!(report.departments.succeeded + report.staff.succeeded, 2);
        assert!(start.elapsed() >= Duration::from_millis(100));

        let start = tokio::time::Instant::now();
        scheduler.full_sync_all("corp").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let h = harness(true);
        let (tx, rx) = watch::channel(false);
        let scheduler = Arc::new(h.scheduler);
        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(rx).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        runner.await.unwrap();
        // First tick fires immediately
        assert!(h.kv.load("corp").await.unwrap().is_some());
    }
}
