// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Directory database reader over the sqlx `Any` driver.
//!
//! Reads the host application's mirror of the Directory:
//! ```sql
//! CREATE TABLE department (
//!   ext_corp_id VARCHAR(64), ext_id VARCHAR(64), name VARCHAR(255),
//!   updated_at BIGINT            -- Unix millis
//! );
//! CREATE TABLE staff (
//!   ext_corp_id VARCHAR(64), ext_id VARCHAR(64), name VARCHAR(255),
//!   avatar_url TEXT, gender INT, mobile VARCHAR(32), email VARCHAR(255),
//!   external_position VARCHAR(255), status INT,
//!   dept_ids TEXT,               -- JSON array of department external IDs
//!   updated_at BIGINT            -- Unix millis
//! );
//! ```
//!
//! `updated_at` is kept in milliseconds so that a change landing in the same
//! second as a pass start is still strictly newer than the cursor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::debug;

use super::{DirectoryEntity, DirectoryError, DirectoryStore, EntityKind};
use crate::metrics;
use crate::resilience::retry::{retry, RetryPolicy, Retryable};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const DEPARTMENT_COLUMNS: &str = "ext_corp_id, ext_id, name, updated_at";
const STAFF_COLUMNS: &str =
    "ext_corp_id, ext_id, name, avatar_url, gender, mobile, email, external_position, status, dept_ids, updated_at";

impl Retryable for DirectoryError {
    fn is_retryable(&self) -> bool {
        matches!(self, DirectoryError::Database(_) | DirectoryError::Transport(_))
    }
}

pub struct SqlDirectory {
    pool: AnyPool,
}

impl SqlDirectory {
    /// Connect with a short startup retry (fails fast if config is wrong).
    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self, DirectoryError> {
        install_drivers();

        let policy = RetryPolicy::new(5, Duration::from_millis(200));
        let pool = retry("directory_connect", &policy, || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(DirectoryError::from)
        })
        .await?;

        Ok(Self { pool })
    }

    pub fn with_pool(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// Create the mirror tables if absent. Used for local and test databases;
    /// production schemas are owned by the host application.
    pub async fn ensure_schema(&self) -> Result<(), DirectoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS department (
                ext_corp_id VARCHAR(64) NOT NULL,
                ext_id VARCHAR(64) NOT NULL,
                name VARCHAR(255) NOT NULL DEFAULT '',
                updated_at BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (ext_corp_id, ext_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS staff (
                ext_corp_id VARCHAR(64) NOT NULL,
                ext_id VARCHAR(64) NOT NULL,
                name VARCHAR(255) NOT NULL DEFAULT '',
                avatar_url TEXT,
                gender INT NOT NULL DEFAULT 0,
                mobile VARCHAR(32),
                email VARCHAR(255),
                external_position VARCHAR(255),
                status INT NOT NULL DEFAULT 1,
                dept_ids TEXT,
                updated_at BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (ext_corp_id, ext_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn select(kind: EntityKind, filter: &str) -> String {
        match kind {
            EntityKind::Department => format!("SELECT {DEPARTMENT_COLUMNS} FROM department WHERE {filter} ORDER BY ext_id"),
            EntityKind::Staff => format!("SELECT {STAFF_COLUMNS} FROM staff WHERE {filter} ORDER BY ext_id"),
        }
    }

    fn text(row: &AnyRow, column: &str) -> Option<String> {
        // MySQL text columns come back as bytes through the Any driver
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(column)
                    .ok()
                    .flatten()
                    .and_then(|b| String::from_utf8(b).ok())
            })
            .filter(|s| !s.is_empty())
    }

    fn int(row: &AnyRow, column: &str) -> Option<i64> {
        row.try_get::<Option<i64>, _>(column)
            .ok()
            .flatten()
            .or_else(|| row.try_get::<Option<i32>, _>(column).ok().flatten().map(i64::from))
    }

    fn parse_dept_ids(raw: &str) -> Vec<String> {
        match serde_json::from_str::<Vec<Value>>(raw) {
            Ok(ids) => ids
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            // Tolerate comma-separated legacy values
            Err(_) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    fn entity_from_row(kind: EntityKind, row: &AnyRow) -> Result<DirectoryEntity, DirectoryError> {
        let tenant = Self::text(row, "ext_corp_id").unwrap_or_default();
        let external_id = Self::text(row, "ext_id")
            .ok_or_else(|| DirectoryError::Decode(format!("{kind} row without ext_id")))?;
        let updated_ms = Self::int(row, "updated_at").unwrap_or(0);
        let updated_at = DateTime::from_timestamp_millis(updated_ms)
            .ok_or_else(|| DirectoryError::Decode(format!("bad updated_at {updated_ms}")))?;

        let mut entity = DirectoryEntity::new(kind, tenant, external_id).with_updated_at(updated_at);
        if let Some(name) = Self::text(row, "name") {
            entity.attributes.insert("name".into(), Value::String(name));
        }

        if kind == EntityKind::Staff {
            for (column, key) in [
                ("avatar_url", "avatar"),
                ("mobile", "mobile"),
                ("email", "email"),
                ("external_position", "position"),
            ] {
                if let Some(value) = Self::text(row, column) {
                    entity.attributes.insert(key.into(), Value::String(value));
                }
            }
            for (column, key) in [("gender", "gender"), ("status", "status")] {
                if let Some(value) = Self::int(row, column) {
                    entity.attributes.insert(key.into(), Value::from(value));
                }
            }
            if let Some(raw) = Self::text(row, "dept_ids") {
                entity.department_ids = Self::parse_dept_ids(&raw);
            }
        }

        Ok(entity)
    }

    async fn fetch(&self, kind: EntityKind, sql: &str, binds: &[Bind<'_>], operation: &str) -> Result<Vec<DirectoryEntity>, DirectoryError> {
        let mut query = sqlx::query(sql);
        for bind in binds {
            query = match bind {
                Bind::Text(s) => query.bind(*s),
                Bind::Int(n) => query.bind(*n),
            };
        }

        let rows = match query.fetch_all(&self.pool).await {
            Ok(rows) => {
                metrics::record_directory_call("sql", operation, "success");
                rows
            }
            Err(e) => {
                metrics::record_directory_call("sql", operation, "error");
                return Err(e.into());
            }
        };

        rows.iter().map(|row| Self::entity_from_row(kind, row)).collect()
    }
}

enum Bind<'a> {
    Text(&'a str),
    Int(i64),
}

#[async_trait]
impl DirectoryStore for SqlDirectory {
    async fn get(&self, tenant: &str, kind: EntityKind, external_id: &str) -> Result<Option<DirectoryEntity>, DirectoryError> {
        let sql = Self::select(kind, "ext_corp_id = ? AND ext_id = ?");
        let mut found = self
            .fetch(kind, &sql, &[Bind::Text(tenant), Bind::Text(external_id)], "get")
            .await?;
        Ok(found.pop())
    }

    async fn list(&self, tenant: &str, kind: EntityKind) -> Result<Vec<DirectoryEntity>, DirectoryError> {
        let sql = Self::select(kind, "ext_corp_id = ?");
        let entities = self.fetch(kind, &sql, &[Bind::Text(tenant)], "list").await?;
        debug!(tenant, %kind, count = entities.len(), "Listed directory entities");
        Ok(entities)
    }

    async fn list_changed_since(
        &self,
        tenant: &str,
        kind: EntityKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<DirectoryEntity>, DirectoryError> {
        let sql = Self::select(kind, "ext_corp_id = ? AND updated_at > ?");
        let entities = self
            .fetch(kind, &sql, &[Bind::Text(tenant), Bind::Int(since.timestamp_millis())], "list_changed")
            .await?;
        debug!(tenant, %kind, since = %since, count = entities.len(), "Listed changed directory entities");
        Ok(entities)
    }
}
