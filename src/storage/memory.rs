// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::traits::{CursorStore, LockStore, LockToken, StorageError};

/// Process-local cursor and lock store, for tests and single-instance runs.
pub struct InMemoryStore {
    cursors: DashMap<String, DateTime<Utc>>,
    locks: DashMap<String, (String, Instant)>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cursors: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Whether the named lock is currently held
    #[must_use]
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .get(name)
            .is_some_and(|entry| entry.value().1 > Instant::now())
    }

    /// Clear all cursors and locks
    pub fn clear(&self) {
        self.cursors.clear();
        self.locks.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CursorStore for InMemoryStore {
    async fn load(&self, tenant: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self.cursors.get(tenant).map(|r| *r.value()))
    }

    async fn advance(&self, tenant: &str, at: DateTime<Utc>) -> Result<bool, StorageError> {
        // Second precision, same as the Redis representation
        let at = DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at);
        match self.cursors.entry(tenant.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(at);
                Ok(true)
            }
            Entry::Occupied(mut slot) if *slot.get() < at => {
                slot.insert(at);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }
}

#[async_trait]
impl LockStore for InMemoryStore {
    async fn try_acquire(&self, name: &str, lease: Duration) -> Result<Option<LockToken>, StorageError> {
        let now = Instant::now();
        let token = uuid::Uuid::new_v4().to_string();

        let mut entry = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| (String::new(), now));
        if entry.value().1 > now {
            return Ok(None);
        }
        *entry.value_mut() = (token.clone(), now + lease);
        Ok(Some(LockToken { name: name.to_string(), token }))
    }

    async fn release(&self, token: &LockToken) -> Result<bool, StorageError> {
        Ok(self
            .locks
            .remove_if(&token.name, |_, (held, _)| *held == token.token)
            .is_some())
    }
}
