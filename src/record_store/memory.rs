// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory record store with a call log and failure injection.
//!
//! Behaves like the platform for the operations this crate uses: partial
//! updates merge fields, missing rows report provider code 10007, filters are
//! evaluated with [`Filter::matches`].

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::error::RecordStoreError;
use super::filter::Filter;
use super::traits::RecordStore;
use super::types::{FieldValues, Page, PlatformRow, RowId, RowPage, SchemaField, Worksheet};

/// Operations of [`RecordStore`], for the call log and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Create,
    Get,
    Filter,
    Update,
    Delete,
    Schema,
}

/// One call as seen by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub operation: StoreOperation,
    pub worksheet: Worksheet,
    pub row_id: Option<RowId>,
    pub fields: Option<FieldValues>,
}

pub struct InMemoryRecordStore {
    rows: DashMap<Worksheet, Vec<PlatformRow>>,
    schemas: DashMap<Worksheet, Vec<SchemaField>>,
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<StoreOperation, VecDeque<RecordStoreError>>>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            schemas: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a row with a known ID.
    pub fn insert_row(&self, worksheet: Worksheet, row_id: &str, fields: FieldValues) {
        let mut map: serde_json::Map<String, Value> = fields.into_iter().collect();
        map.insert("rowid".into(), Value::String(row_id.to_string()));
        self.rows.entry(worksheet).or_default().push(PlatformRow {
            row_id: row_id.to_string(),
            worksheet,
            fields: map,
        });
    }

    pub fn set_schema(&self, worksheet: Worksheet, fields: Vec<SchemaField>) {
        self.schemas.insert(worksheet, fields);
    }

    /// Snapshot of all rows of a worksheet, in creation order.
    #[must_use]
    pub fn rows(&self, worksheet: Worksheet) -> Vec<PlatformRow> {
        self.rows.get(&worksheet).map(|r| r.value().clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn row(&self, worksheet: Worksheet, row_id: &str) -> Option<PlatformRow> {
        self.rows
            .get(&worksheet)
            .and_then(|rows| rows.iter().find(|r| r.row_id == row_id).cloned())
    }

    /// Make the next `times` calls of `operation` fail with `error`.
    pub fn fail_next(&self, operation: StoreOperation, error: RecordStoreError, times: usize) {
        let mut failures = self.failures.lock();
        let queue = failures.entry(operation).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Calls of one operation, in order.
    #[must_use]
    pub fn calls_of(&self, operation: StoreOperation) -> Vec<RecordedCall> {
        self.calls.lock().iter().filter(|c| c.operation == operation).cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn enter(
        &self,
        operation: StoreOperation,
        worksheet: Worksheet,
        row_id: Option<&str>,
        fields: Option<&FieldValues>,
    ) -> Result<(), RecordStoreError> {
        self.calls.lock().push(RecordedCall {
            operation,
            worksheet,
            row_id: row_id.map(str::to_string),
            fields: fields.cloned(),
        });

        match self.failures.lock().get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn not_found(row_id: &str) -> RecordStoreError {
        RecordStoreError::provider(10007, format!("row {row_id} not found"))
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn protocol(&self) -> &'static str {
        "memory"
    }

    async fn create_row(&self, worksheet: Worksheet, fields: &FieldValues) -> Result<RowId, RecordStoreError> {
        self.enter(StoreOperation::Create, worksheet, None, Some(fields))?;
        let row_id = uuid::Uuid::new_v4().to_string();
        self.insert_row(worksheet, &row_id, fields.clone());
        Ok(row_id)
    }

    async fn get_row(&self, worksheet: Worksheet, row_id: &str) -> Result<Option<PlatformRow>, RecordStoreError> {
        self.enter(StoreOperation::Get, worksheet, Some(row_id), None)?;
        Ok(self.row(worksheet, row_id))
    }

    async fn filter_rows(&self, worksheet: Worksheet, filter: &Filter, page: Page) -> Result<RowPage, RecordStoreError> {
        self.enter(StoreOperation::Filter, worksheet, None, None)?;

        let matched: Vec<PlatformRow> = self
            .rows(worksheet)
            .into_iter()
            .filter(|row| filter.matches(&row.fields))
            .collect();

        let total = matched.len() as u64;
        let skip = (page.index as usize).saturating_sub(1) * page.size as usize;
        let rows = matched.into_iter().skip(skip).take(page.size as usize).collect();
        Ok(RowPage { rows, total })
    }

    async fn update_row(&self, worksheet: Worksheet, row_id: &str, fields: &FieldValues) -> Result<(), RecordStoreError> {
        self.enter(StoreOperation::Update, worksheet, Some(row_id), Some(fields))?;

        let mut rows = self.rows.entry(worksheet).or_default();
        let row = rows
            .iter_mut()
            .find(|r| r.row_id == row_id)
            .ok_or_else(|| Self::not_found(row_id))?;
        for (key, value) in fields {
            row.fields.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn delete_row(&self, worksheet: Worksheet, row_id: &str) -> Result<(), RecordStoreError> {
        self.enter(StoreOperation::Delete, worksheet, Some(row_id), None)?;

        let mut rows = self.rows.entry(worksheet).or_default();
        let before = rows.len();
        rows.retain(|r| r.row_id != row_id);
        if rows.len() == before {
            return Err(Self::not_found(row_id));
        }
        Ok(())
    }

    async fn worksheet_schema(&self, worksheet: Worksheet) -> Result<Vec<SchemaField>, RecordStoreError> {
        self.enter(StoreOperation::Schema, worksheet, None, None)?;
        Ok(self.schemas.get(&worksheet).map(|s| s.value().clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, &str)]) -> FieldValues {
        pairs.iter().map(|(k, v)| (k.to_string(), json!(v))).collect()
    }

    #[tokio::test]
    async fn test_create_then_find() {
        let store = InMemoryRecordStore::new();
        let id = store
            .create_row(Worksheet::Department, &fields(&[("dept_id", "1001"), ("name", "Sales")]))
            .await
            .unwrap();

        let found = store
            .find_one(Worksheet::Department, &Filter::eq("dept_id", "1001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.row_id, id);
        assert_eq!(found.text("name").as_deref(), Some("Sales"));
        assert!(store.find_one(Worksheet::Staff, &Filter::eq("dept_id", "1001")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = InMemoryRecordStore::new();
        store.insert_row(Worksheet::Staff, "s-1", fields(&[("a", "1"), ("b", "2")]));

        store.update_row(Worksheet::Staff, "s-1", &fields(&[("b", "3")])).await.unwrap();
        let row = store.row(Worksheet::Staff, "s-1").unwrap();
        assert_eq!(row.text("a").as_deref(), Some("1"));
        assert_eq!(row.text("b").as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_missing_row_reports_not_found_code() {
        let store = InMemoryRecordStore::new();
        let err = store.update_row(Worksheet::Staff, "nope", &fields(&[("a", "1")])).await.unwrap_err();
        assert!(matches!(err, RecordStoreError::Provider { code: 10007, .. }));
        let err = store.delete_row(Worksheet::Staff, "nope").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_pagination_and_total() {
        let store = InMemoryRecordStore::new();
        for i in 0..5 {
            store.insert_row(Worksheet::Customer, &format!("c-{i}"), fields(&[("kind", "x")]));
        }
        let page = store
            .filter_rows(Worksheet::Customer, &Filter::eq("kind", "x"), Page::new(2, 3))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].row_id, "c-4");
    }

    #[tokio::test]
    async fn test_page_index_zero_reads_first_page() {
        let store = InMemoryRecordStore::new();
        for i in 0..3 {
            store.insert_row(Worksheet::Customer, &format!("c-{i}"), fields(&[("kind", "x")]));
        }
        let page = store
            .filter_rows(Worksheet::Customer, &Filter::eq("kind", "x"), Page { size: 2, index: 0 })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        let ids: Vec<_> = page.rows.iter().map(|r| r.row_id.as_str()).collect();
        assert_eq!(ids, ["c-0", "c-1"]);
    }

    #[tokio::test]
    async fn test_failure_injection_and_call_log() {
        let store = InMemoryRecordStore::new();
        store.fail_next(StoreOperation::Filter, RecordStoreError::timeout("slow"), 1);

        let first = store.filter_rows(Worksheet::Staff, &Filter::eq("a", "1"), Page::first()).await;
        assert!(first.unwrap_err().is_retryable());
        let second = store.filter_rows(Worksheet::Staff, &Filter::eq("a", "1"), Page::first()).await;
        assert!(second.is_ok());

        assert_eq!(store.calls_of(StoreOperation::Filter).len(), 2);
        assert!(store.calls_of(StoreOperation::Create).is_empty());
    }
}
