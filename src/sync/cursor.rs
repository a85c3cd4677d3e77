// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The incremental-sync watermark as an explicit value.
//!
//! A pass receives a [`SyncCursor`], returns the advanced one, and the
//! scheduler persists it at the pass boundary. Nothing reads the watermark
//! from ambient state.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{error, info};

use crate::storage::{CursorStore, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCursor {
    pub tenant_id: String,
    pub last_synced_at: DateTime<Utc>,
}

impl SyncCursor {
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, last_synced_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            last_synced_at,
        }
    }

    /// Cursor for a tenant that has never completed a pass: one window back.
    #[must_use]
    pub fn initial(tenant_id: impl Into<String>, window: Duration) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::minutes(10));
        Self::new(tenant_id, Utc::now() - window)
    }

    /// This cursor moved to `at`. Never moves backwards.
    #[must_use]
    pub fn advanced_to(&self, at: DateTime<Utc>) -> Self {
        Self::new(self.tenant_id.clone(), self.last_synced_at.max(at))
    }

    /// Seconds between the watermark and `now`.
    #[must_use]
    pub fn lag_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_synced_at).num_seconds().max(0)
    }

    /// Load the persisted cursor. A missing or unreadable value falls back to
    /// [`Self::initial`]: a wider window only costs redundant upserts.
    pub async fn load(store: &dyn CursorStore, tenant_id: &str, window: Duration) -> Self {
        match store.load(tenant_id).await {
            Ok(Some(at)) => Self::new(tenant_id, at),
            Ok(None) => {
                info!(tenant = tenant_id, "No sync cursor yet, starting one window back");
                Self::initial(tenant_id, window)
            }
            Err(e) => {
                error!(tenant = tenant_id, error = %e, "Failed to load sync cursor, starting one window back");
                Self::initial(tenant_id, window)
            }
        }
    }

    /// Persist this cursor. Returns whether the stored watermark moved.
    pub async fn persist(&self, store: &dyn CursorStore) -> Result<bool, StorageError> {
        store.advance(&self.tenant_id, self.last_synced_at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use chrono::TimeZone;

    #[test]
    fn test_advanced_to_is_monotonic() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t1 = Utc.timestamp_opt(1_700_000_600, 0).unwrap();
        let cursor = SyncCursor::new("corp", t1);
        assert_eq!(cursor.advanced_to(t0).last_synced_at, t1);
        assert_eq!(SyncCursor::new("corp", t0).advanced_to(t1).last_synced_at, t1);
    }

    #[test]
    fn test_initial_is_one_window_back() {
        let cursor = SyncCursor::initial("corp", Duration::from_secs(600));
        let lag = cursor.lag_secs(Utc::now());
        assert!((599..=601).contains(&lag));
    }

    #[tokio::test]
    async fn test_load_and_persist() {
        let store = InMemoryStore::new();
        let fresh = SyncCursor::load(&store, "corp", Duration::from_secs(600)).await;
        assert!(fresh.lag_secs(Utc::now()) >= 599);

        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert!(SyncCursor::new("corp", at).persist(&store).await.unwrap());
        assert_eq!(SyncCursor::load(&store, "corp", Duration::from_secs(600)).await.last_synced_at, at);
    }
}
