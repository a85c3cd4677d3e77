// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt value at '{key}': {value}")]
    Corrupt { key: String, value: String },
}

impl From<redis::RedisError> for StorageError {
    fn from(e: redis::RedisError) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// Key of a tenant's sync watermark.
#[must_use]
pub fn cursor_key(tenant: &str) -> String {
    format!("directory_sync:last_time:{tenant}")
}

/// Key of a scheduler task's mutual-exclusion lock.
#[must_use]
pub fn lock_key(task: &str) -> String {
    format!("directory_sync:lock:{task}")
}

/// Persisted per-tenant watermark. Stored as Unix seconds.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// `None` when no pass has ever completed for the tenant.
    async fn load(&self, tenant: &str) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// Persist the watermark. A value older than the stored one is ignored;
    /// returns whether the stored value changed.
    async fn advance(&self, tenant: &str, at: DateTime<Utc>) -> Result<bool, StorageError>;
}

/// Proof of lock ownership, required to release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub name: String,
    pub token: String,
}

/// Lease-based mutual exclusion across processes.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Take the lock if free. The lease expires on its own if never released.
    async fn try_acquire(&self, name: &str, lease: Duration) -> Result<Option<LockToken>, StorageError>;

    /// Release only if still held by `token`. Returns whether it was released.
    async fn release(&self, token: &LockToken) -> Result<bool, StorageError>;
}
