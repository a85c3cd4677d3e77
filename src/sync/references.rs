// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Department reference resolution for staff rows.

use tracing::{debug, warn};

use super::mapping::mapping_for;
use super::upsert::UpsertEngine;
use crate::directory::{ChangeAction, EntityKind};
use crate::metrics;
use crate::record_store::RowId;

/// Resolves department external IDs to Department row IDs, creating missing
/// Department rows on the way.
pub struct ReferenceResolver<'a> {
    engine: &'a UpsertEngine,
}

impl UpsertEngine {
    #[must_use]
    pub fn references(&self) -> ReferenceResolver<'_> {
        ReferenceResolver { engine: self }
    }
}

impl ReferenceResolver<'_> {
    /// Row IDs for `department_ids`, in order. A department that cannot be
    /// resolved after one creation attempt is dropped with a warning; this
    /// never fails.
    pub async fn resolve(&self, tenant: &str, department_ids: &[String]) -> Vec<RowId> {
        let mut rows = Vec::with_capacity(department_ids.len());
        for external_id in department_ids {
            match self.resolve_one(tenant, external_id).await {
                Some(row_id) => rows.push(row_id),
                None => {
                    metrics::record_reference_repair("unresolved");
                    warn!(tenant, department = %external_id, "Dropping unresolved department link");
                }
            }
        }
        rows
    }

    async fn resolve_one(&self, tenant: &str, external_id: &str) -> Option<RowId> {
        let mapping = mapping_for(EntityKind::Department);

        match self.engine.lookup(mapping, external_id).await {
            Ok(Some(row)) => return Some(row.row_id),
            Ok(None) => {}
            Err(e) => {
                warn!(department = %external_id, error = %e, "Department lookup failed");
                return None;
            }
        }

        debug!(tenant, department = %external_id, "Department row missing, creating it");
        let department = match self.engine.directory().get(tenant, EntityKind::Department, external_id).await {
            Ok(Some(department)) => department,
            Ok(None) => {
                warn!(tenant, department = %external_id, "Department not found in directory");
                return None;
            }
            Err(e) => {
                warn!(tenant, department = %external_id, error = %e, "Directory read failed");
                return None;
            }
        };

        if let Err(e) = self.engine.upsert_department(&department, ChangeAction::Create).await {
            warn!(department = %external_id, error = %e, "Department creation failed");
            return None;
        }

        match self.engine.lookup(mapping, external_id).await {
            Ok(Some(row)) => {
                metrics::record_reference_repair("created");
                Some(row.row_id)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(department = %external_id, error = %e, "Department lookup failed after creation");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryEntity, InMemoryDirectory};
    use crate::record_store::{InMemoryRecordStore, RecordStoreError, StoreOperation, Worksheet};
    use crate::resilience::retry::RetryPolicy;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (UpsertEngine, Arc<InMemoryRecordStore>, Arc<InMemoryDirectory>) {
        let store = Arc::new(InMemoryRecordStore::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let engine = UpsertEngine::new(store.clone(), directory.clone(), RetryPolicy::default());
        (engine, store, directory)
    }

    #[tokio::test]
    async fn test_existing_department_resolves_without_writes() {
        let (engine, store, _) = setup();
        store.insert_row(
            Worksheet::Department,
            "row-1001",
            [("69660ddb84223902b9ec7a72".to_string(), json!("1001"))].into(),
        );

        let rows = engine.references().resolve("corp", &["1001".into()]).await;
        assert_eq!(rows, vec!["row-1001"]);
        assert!(store.calls_of(StoreOperation::Create).is_empty());
    }

    #[tokio::test]
    async fn test_missing_department_is_created_once() {
        let (engine, store, directory) = setup();
        directory.put(DirectoryEntity::department("corp", "2002").with_attribute("name", "Ops"));

        let rows = engine.references().resolve("corp", &["2002".into()]).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(store.calls_of(StoreOperation::Create).len(), 1);
        assert_eq!(store.rows(Worksheet::Department)[0].row_id, rows[0]);
    }

    #[tokio::test]
    async fn test_unknown_department_is_dropped() {
        let (engine, store, directory) = setup();
        directory.put(DirectoryEntity::department("corp", "1").with_attribute("name", "A"));

        let rows = engine.references().resolve("corp", &["1".into(), "404".into()]).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(store.rows(Worksheet::Department).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_is_dropped() {
        let (engine, store, directory) = setup();
        directory.put(DirectoryEntity::department("corp", "3").with_attribute("name", "C"));
        store.fail_next(StoreOperation::Create, RecordStoreError::provider(10002, "invalid"), 1);

        assert!(engine.references().resolve("corp", &["3".into()]).await.is_empty());
    }
}
