// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Directory change events into background upserts.

use std::convert::Infallible;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::upsert::UpsertEngine;
use crate::config::DirectorySyncConfig;
use crate::directory::DirectoryEvent;
use crate::resilience::supervise::spawn_supervised;

/// Turns webhook events into fire-and-forget upserts.
///
/// The caller (a webhook handler) gets control back immediately; the upsert
/// runs under the retry policy behind the failure barrier.
pub struct EventDispatcher {
    engine: Arc<UpsertEngine>,
    enabled: bool,
}

impl EventDispatcher {
    pub fn new(engine: Arc<UpsertEngine>, config: &DirectorySyncConfig) -> Self {
        Self {
            engine,
            enabled: config.staff_sync_enabled,
        }
    }

    /// Spawn the upsert for `event`. Returns the task handle, or `None` when
    /// staff sync is switched off.
    pub fn dispatch(&self, event: DirectoryEvent) -> Option<JoinHandle<()>> {
        let entity = event.entity();
        if !self.enabled {
            debug!(kind = %entity.kind, external_id = %entity.external_id, "Staff sync disabled, ignoring event");
            return None;
        }

        info!(
            kind = %entity.kind,
            external_id = %entity.external_id,
            action = %event.action(),
            "Directory change received"
        );

        let engine = self.engine.clone();
        let task = match event {
            DirectoryEvent::StaffChanged { .. } => "staff_event",
            DirectoryEvent::DepartmentChanged { .. } => "department_event",
        };
        Some(spawn_supervised(task, async move {
            engine.upsert_with_retry(event.entity(), event.action()).await;
            Ok::<(), Infallible>(())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{ChangeAction, DirectoryEntity, InMemoryDirectory};
    use crate::record_store::{InMemoryRecordStore, StoreOperation, Worksheet};
    use crate::resilience::retry::RetryPolicy;
    use std::time::Duration;

    fn dispatcher(enabled: bool) -> (EventDispatcher, Arc<InMemoryRecordStore>) {
        let store = Arc::new(InMemoryRecordStore::new());
        let engine = Arc::new(UpsertEngine::new(
            store.clone(),
            Arc::new(InMemoryDirectory::new()),
            RetryPolicy::new(3, Duration::from_millis(1)),
        ));
        let config = DirectorySyncConfig { staff_sync_enabled: enabled, ..Default::default() };
        (EventDispatcher::new(engine, &config), store)
    }

    #[tokio::test]
    async fn test_department_event_is_applied() {
        let (dispatcher, store) = dispatcher(true);
        let handle = dispatcher
            .dispatch(DirectoryEvent::DepartmentChanged {
                entity: DirectoryEntity::department("corp", "1001").with_attribute("name", "Sales"),
                action: ChangeAction::Create,
            })
            .unwrap();
        handle.await.unwrap();
        assert_eq!(store.rows(Worksheet::Department).len(), 1);
    }

    #[tokio::test]
    async fn test_failing_event_does_not_surface() {
        let (dispatcher, store) = dispatcher(true);
        store.fail_next(StoreOperation::Filter, crate::record_store::RecordStoreError::transport("down"), 3);
        let handle = dispatcher
            .dispatch(DirectoryEvent::StaffChanged {
                entity: DirectoryEntity::staff("corp", "zhangsan").with_attribute("name", "Zhang San"),
                action: ChangeAction::Update,
            })
            .unwrap();
        assert!(handle.await.is_ok());
        assert!(store.rows(Worksheet::Staff).is_empty());
    }

    #[tokio::test]
    async fn test_disabled_dispatch_spawns_nothing() {
        let (dispatcher, store) = dispatcher(false);
        let handle = dispatcher.dispatch(DirectoryEvent::StaffChanged {
            entity: DirectoryEntity::staff("corp", "zhangsan"),
            action: ChangeAction::Delete,
        });
        assert!(handle.is_none());
        assert!(store.calls().is_empty());
    }
}
