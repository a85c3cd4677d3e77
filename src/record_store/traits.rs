// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;

use super::error::RecordStoreError;
use super::filter::Filter;
use super::types::{FieldValues, Page, PlatformRow, RowId, RowPage, SchemaField, Worksheet};

/// Row-level access to the external record store.
///
/// One call is one network round trip. Implementations never retry.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Implementation label for logs and metrics (`v2`, `v3`, `memory`).
    fn protocol(&self) -> &'static str;

    async fn create_row(&self, worksheet: Worksheet, fields: &FieldValues) -> Result<RowId, RecordStoreError>;

    /// `Ok(None)` when the platform reports the row as absent.
    async fn get_row(&self, worksheet: Worksheet, row_id: &str) -> Result<Option<PlatformRow>, RecordStoreError>;

    async fn filter_rows(&self, worksheet: Worksheet, filter: &Filter, page: Page) -> Result<RowPage, RecordStoreError>;

    async fn update_row(&self, worksheet: Worksheet, row_id: &str, fields: &FieldValues) -> Result<(), RecordStoreError>;

    async fn delete_row(&self, worksheet: Worksheet, row_id: &str) -> Result<(), RecordStoreError>;

    async fn worksheet_schema(&self, worksheet: Worksheet) -> Result<Vec<SchemaField>, RecordStoreError>;

    /// First row matching `filter`, if any.
    async fn find_one(&self, worksheet: Worksheet, filter: &Filter) -> Result<Option<PlatformRow>, RecordStoreError> {
        let page = self.filter_rows(worksheet, filter, Page::first()).await?;
        Ok(page.rows.into_iter().next())
    }
}
