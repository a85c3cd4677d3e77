// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis backend for the sync cursor and the scheduler lock.
//!
//! Key layout:
//! ```text
//! directory_sync:last_time:{tenant}   -> "1767084657"   (Unix seconds)
//! directory_sync:lock:{task}          -> "<uuid>"       (PX lease)
//! ```
//!
//! Cursor advance and lock release are Lua scripts so that the
//! compare and the write happen in one round trip.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::{cmd, Client, Script};
use std::time::Duration;
use tracing::debug;

use super::traits::{cursor_key, lock_key, CursorStore, LockStore, LockToken, StorageError};
use crate::resilience::retry::{retry, RetryPolicy, Retryable};

/// SET only when the new watermark is newer.
const ADVANCE_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current and tonumber(current) and tonumber(current) >= tonumber(ARGV[1]) then
  return 0
end
redis.call('SET', KEYS[1], ARGV[1])
return 1
";

/// DEL only when the lock still holds our token.
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

impl Retryable for redis::RedisError {
    fn is_retryable(&self) -> bool {
        self.is_io_error() || self.is_connection_refusal() || self.is_timeout() || self.is_connection_dropped()
    }
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Fast-fail on bad config instead of hanging at startup
        let policy = RetryPolicy::new(5, Duration::from_millis(200));
        let connection = retry("redis_connect", &policy, || async {
            ConnectionManager::new(client.clone()).await
        })
        .await?;

        Ok(Self { connection })
    }

    /// Get a clone of the connection manager
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl CursorStore for RedisStore {
    async fn load(&self, tenant: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let key = cursor_key(tenant);
        let mut conn = self.connection.clone();
        let raw: Option<String> = cmd("GET").arg(&key).query_async(&mut conn).await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let secs: i64 = raw
            .trim()
            .parse()
            .map_err(|_| StorageError::Corrupt { key: key.clone(), value: raw.clone() })?;
        Utc.timestamp_opt(secs, 0)
            .single()
            .map(Some)
            .ok_or(StorageError::Corrupt { key, value: raw })
    }

    async fn advance(&self, tenant: &str, at: DateTime<Utc>) -> Result<bool, StorageError> {
        let key = cursor_key(tenant);
        let mut conn = self.connection.clone();
        let changed: i32 = Script::new(ADVANCE_SCRIPT)
            .key(&key)
            .arg(at.timestamp())
            .invoke_async(&mut conn)
            .await?;

        debug!(tenant, at = %at, changed = changed == 1, "Cursor advance");
        Ok(changed == 1)
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn try_acquire(&self, name: &str, lease: Duration) -> Result<Option<LockToken>, StorageError> {
        let key = lock_key(name);
        let token = uuid::Uuid::new_v4().to_string();
        let mut conn = self.connection.clone();

        let reply: Option<String> = cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| LockToken { name: name.to_string(), token }))
    }

    async fn release(&self, token: &LockToken) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();
        let removed: i32 = Script::new(RELEASE_SCRIPT)
            .key(lock_key(&token.name))
            .arg(&token.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }
}
