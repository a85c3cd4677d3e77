// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Identity resolution and upsert of Directory entities.
//!
//! The platform has no unique constraint on the external-ID field, so every
//! write is preceded by a lookup on it:
//!
//! ```text
//! upsert(entity, action)
//!   ├─ Create/Update ─► build fields ─► lookup ─┬─ found ─► update_row
//!   │                                           └─ none  ─► create_row
//!   └─ Delete ─► lookup ─┬─ none ─► Skipped
//!                        ├─ Department ─► delete_row        (hard delete)
//!                        └─ Staff      ─► update_row status (departed)
//! ```
//!
//! Staff writes resolve department links first (see [`super::references`]).

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use super::mapping::{self, mapping_for, WorksheetMapping};
use crate::directory::{ChangeAction, DirectoryEntity, DirectoryError, DirectoryStore, EntityKind};
use crate::metrics;
use crate::record_store::{FieldValues, Filter, PlatformRow, RecordStore, RecordStoreError, RowId};
use crate::resilience::retry::{retry, RetryPolicy, Retryable};
use crate::storage::StorageError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("record store: {0}")]
    RecordStore(#[from] RecordStoreError),
    #[error("directory: {0}")]
    Directory(#[from] DirectoryError),
    #[error("kv store: {0}")]
    Storage(String),
    #[error("no platform fields to write for {kind} '{external_id}'")]
    EmptyFieldSet { kind: EntityKind, external_id: String },
    #[error("{kind} entity has no external ID")]
    MissingExternalId { kind: EntityKind },
}

impl Retryable for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            SyncError::RecordStore(e) => e.is_retryable(),
            SyncError::Directory(e) => Retryable::is_retryable(e),
            SyncError::Storage(_) => true,
            SyncError::EmptyFieldSet { .. } | SyncError::MissingExternalId { .. } => false,
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        SyncError::Storage(e.to_string())
    }
}

/// What an upsert did to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(RowId),
    Updated(RowId),
    /// Staff row status flipped to "departed"
    Departed(RowId),
    /// Department row removed
    Deleted(RowId),
    /// Delete of an entity with no row
    Skipped,
}

impl UpsertOutcome {
    #[must_use]
    pub fn row_id(&self) -> Option<&str> {
        match self {
            Self::Created(id) | Self::Updated(id) | Self::Departed(id) | Self::Deleted(id) => Some(id),
            Self::Skipped => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated(_) => "updated",
            Self::Departed(_) => "departed",
            Self::Deleted(_) => "deleted",
            Self::Skipped => "skipped",
        }
    }
}

/// Writes Directory entities into their worksheets.
pub struct UpsertEngine {
    store: Arc<dyn RecordStore>,
    directory: Arc<dyn DirectoryStore>,
    retry_policy: RetryPolicy,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn RecordStore>, directory: Arc<dyn DirectoryStore>, retry_policy: RetryPolicy) -> Self {
        Self { store, directory, retry_policy }
    }

    pub(crate) fn directory(&self) -> &dyn DirectoryStore {
        self.directory.as_ref()
    }

    /// Apply `action` for `entity` to its worksheet.
    #[instrument(skip(self, entity), fields(kind = %entity.kind, external_id = %entity.external_id))]
    pub async fn upsert(&self, entity: &DirectoryEntity, action: ChangeAction) -> Result<UpsertOutcome, SyncError> {
        let result = match entity.kind {
            EntityKind::Department => self.upsert_department(entity, action).await,
            EntityKind::Staff => self.upsert_staff(entity, action).await,
        };
        match &result {
            Ok(outcome) => metrics::record_upsert(entity.kind.as_str(), outcome.as_str()),
            Err(_) => metrics::record_upsert(entity.kind.as_str(), "error"),
        }
        result
    }

    /// [`Self::upsert`] under the retry policy. Failures end here: they are
    /// logged with full context and `None` is returned.
    pub async fn upsert_with_retry(&self, entity: &DirectoryEntity, action: ChangeAction) -> Option<UpsertOutcome> {
        let mut attempts = 0u32;
        let result = retry("upsert", &self.retry_policy, || {
            attempts += 1;
            if attempts > 1 {
                metrics::record_retry(entity.kind.as_str());
            }
            self.upsert(entity, action)
        })
        .await;

        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                metrics::record_retry_exhausted(entity.kind.as_str());
                error!(
                    kind = %entity.kind,
                    external_id = %entity.external_id,
                    action = %action,
                    attempts,
                    error = %e,
                    "Sync failed, giving up"
                );
                None
            }
        }
    }

    /// Department path. Never touches references, so the reference resolver
    /// can call it while a staff upsert is in flight.
    pub(crate) async fn upsert_department(&self, entity: &DirectoryEntity, action: ChangeAction) -> Result<UpsertOutcome, SyncError> {
        let mapping = mapping_for(EntityKind::Department);
        match action {
            ChangeAction::Create | ChangeAction::Update => {
                let fields = Self::prepare_fields(mapping, entity)?;
                let existing = self.lookup(mapping, &entity.external_id).await?;
                self.write(mapping, entity, existing, &fields).await
            }
            ChangeAction::Delete => {
                let Some(row) = self.lookup_for_delete(mapping, entity).await? else {
                    return Ok(UpsertOutcome::Skipped);
                };
                self.store.delete_row(mapping.worksheet, &row.row_id).await?;
                info!(external_id = %entity.external_id, row_id = %row.row_id, "Department row deleted");
                Ok(UpsertOutcome::Deleted(row.row_id))
            }
        }
    }

    async fn upsert_staff(&self, entity: &DirectoryEntity, action: ChangeAction) -> Result<UpsertOutcome, SyncError> {
        let mapping = mapping_for(EntityKind::Staff);
        match action {
            ChangeAction::Create | ChangeAction::Update => {
                let mut fields = Self::prepare_fields(mapping, entity)?;
                let existing = self.lookup(mapping, &entity.external_id).await?;

                let department_rows = self
                    .references()
                    .resolve(&entity.tenant_id, &entity.department_ids)
                    .await;
                if !department_rows.is_empty() {
                    fields.insert(
                        mapping::STAFF_DEPARTMENTS_FIELD.to_string(),
                        mapping::relation_value(&department_rows),
                    );
                }

                self.write(mapping, entity, existing, &fields).await
            }
            ChangeAction::Delete => {
                let Some(row) = self.lookup_for_delete(mapping, entity).await? else {
                    return Ok(UpsertOutcome::Skipped);
                };
                let mut fields = FieldValues::new();
                fields.insert(
                    mapping::STAFF_STATUS_FIELD.to_string(),
                    mapping::dropdown_value(mapping::DEPARTED_STATUS_KEY),
                );
                self.store.update_row(mapping.worksheet, &row.row_id, &fields).await?;
                info!(external_id = %entity.external_id, row_id = %row.row_id, "Staff row marked departed");
                Ok(UpsertOutcome::Departed(row.row_id))
            }
        }
    }

    fn prepare_fields(mapping: &WorksheetMapping, entity: &DirectoryEntity) -> Result<FieldValues, SyncError> {
        let fields = mapping.build_fields(entity);
        if fields.is_empty() {
            return Err(SyncError::EmptyFieldSet {
                kind: entity.kind,
                external_id: entity.external_id.clone(),
            });
        }
        if entity.external_id.is_empty() {
            return Err(SyncError::MissingExternalId { kind: entity.kind });
        }
        Ok(fields)
    }

    async fn write(
        &self,
        mapping: &WorksheetMapping,
        entity: &DirectoryEntity,
        existing: Option<PlatformRow>,
        fields: &FieldValues,
    ) -> Result<UpsertOutcome, SyncError> {
        match existing {
            Some(row) => {
                self.store.update_row(mapping.worksheet, &row.row_id, fields).await?;
                info!(kind = %entity.kind, external_id = %entity.external_id, row_id = %row.row_id, "Row updated");
                Ok(UpsertOutcome::Updated(row.row_id))
            }
            None => {
                let row_id = self.store.create_row(mapping.worksheet, fields).await?;
                info!(kind = %entity.kind, external_id = %entity.external_id, row_id = %row_id, "Row created");
                Ok(UpsertOutcome::Created(row_id))
            }
        }
    }

    async fn lookup_for_delete(&self, mapping: &WorksheetMapping, entity: &DirectoryEntity) -> Result<Option<PlatformRow>, SyncError> {
        if entity.external_id.is_empty() {
            return Err(SyncError::MissingExternalId { kind: entity.kind });
        }
        let row = self.lookup(mapping, &entity.external_id).await?;
        if row.is_none() {
            debug!(kind = %entity.kind, external_id = %entity.external_id, "No row to delete");
        }
        Ok(row)
    }

    /// Row whose external-ID field equals `external_id`. Lookup failures
    /// propagate; they are never read as "not found".
    pub(crate) async fn lookup(&self, mapping: &WorksheetMapping, external_id: &str) -> Result<Option<PlatformRow>, SyncError> {
        let filter = Filter::eq(mapping.external_id_field, external_id);
        Ok(self.store.find_one(mapping.worksheet, &filter).await?)
    }
}
