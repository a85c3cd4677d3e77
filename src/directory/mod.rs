// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read-side access to the Directory (the contacts system that owns staff and
//! departments) and to its contact-way API.
//!
//! Entities are keyed by their Directory-issued external ID. Attributes are
//! keyed by purpose (`name`, `mobile`, `gender`, ...) and mapped to platform
//! fields by [`crate::sync::mapping`].

pub mod memory;
pub mod sql;
pub mod wecom;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub use memory::{InMemoryContactApi, InMemoryDirectory};
pub use sql::SqlDirectory;
pub use wecom::WeComContactApi;

/// Kind of Directory-owned entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Staff,
    Department,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Department => "department",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A staff member or department as the Directory knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntity {
    pub kind: EntityKind,
    pub tenant_id: String,
    pub external_id: String,
    /// Purpose key → value
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// External IDs of the departments a staff member belongs to
    #[serde(default)]
    pub department_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl DirectoryEntity {
    #[must_use]
    pub fn new(kind: EntityKind, tenant_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            kind,
            tenant_id: tenant_id.into(),
            external_id: external_id.into(),
            attributes: BTreeMap::new(),
            department_ids: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn department(tenant_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self::new(EntityKind::Department, tenant_id, external_id)
    }

    #[must_use]
    pub fn staff(tenant_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self::new(EntityKind::Staff, tenant_id, external_id)
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_departments<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.department_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// A change notification from the Directory.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryEvent {
    StaffChanged { entity: DirectoryEntity, action: ChangeAction },
    DepartmentChanged { entity: DirectoryEntity, action: ChangeAction },
}

impl DirectoryEvent {
    #[must_use]
    pub fn entity(&self) -> &DirectoryEntity {
        match self {
            Self::StaffChanged { entity, .. } | Self::DepartmentChanged { entity, .. } => entity,
        }
    }

    #[must_use]
    pub fn action(&self) -> ChangeAction {
        match self {
            Self::StaffChanged { action, .. } | Self::DepartmentChanged { action, .. } => *action,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("directory database error: {0}")]
    Database(String),
    #[error("directory API error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("directory transport error: {0}")]
    Transport(String),
    #[error("malformed directory data: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for DirectoryError {
    fn from(e: sqlx::Error) -> Self {
        DirectoryError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            DirectoryError::Decode(e.to_string())
        } else {
            DirectoryError::Transport(e.to_string())
        }
    }
}

/// Read access to the Directory's database.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn get(&self, tenant: &str, kind: EntityKind, external_id: &str) -> Result<Option<DirectoryEntity>, DirectoryError>;

    async fn list(&self, tenant: &str, kind: EntityKind) -> Result<Vec<DirectoryEntity>, DirectoryError>;

    /// Entities with `updated_at` strictly after `since`.
    async fn list_changed_since(
        &self,
        tenant: &str,
        kind: EntityKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<DirectoryEntity>, DirectoryError>;
}

/// Request for a single-staff "contact me" QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactWayRequest {
    pub staff_id: String,
    /// Echoed back in the contact-added callback; at most 30 characters
    pub state: String,
    pub skip_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactWay {
    pub config_id: String,
    pub qr_code: String,
}

/// Profile of an external (customer) contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalContact {
    pub external_user_id: String,
    pub name: String,
    pub avatar: String,
    /// 0 unknown, 1 male, 2 female
    pub gender: u8,
    pub union_id: String,
    /// Present only when the contact has a non-empty external profile
    pub external_profile: Option<Value>,
}

/// The Directory's contact-way and external-contact API.
#[async_trait]
pub trait ContactApi: Send + Sync {
    async fn add_contact_way(&self, request: &ContactWayRequest) -> Result<ContactWay, DirectoryError>;

    async fn get_external_contact(&self, external_user_id: &str) -> Result<ExternalContact, DirectoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_builders() {
        let staff = DirectoryEntity::staff("corp", "zhangsan")
            .with_attribute("name", "Zhang San")
            .with_attribute("gender", 1)
            .with_departments(["1001", "1002"]);

        assert_eq!(staff.kind, EntityKind::Staff);
        assert_eq!(staff.attribute("name"), Some(&json!("Zhang San")));
        assert_eq!(staff.attribute("gender"), Some(&json!(1)));
        assert_eq!(staff.department_ids, vec!["1001", "1002"]);
    }

    #[test]
    fn test_event_accessors() {
        let event = DirectoryEvent::DepartmentChanged {
            entity: DirectoryEntity::department("corp", "1001"),
            action: ChangeAction::Delete,
        };
        assert_eq!(event.entity().external_id, "1001");
        assert_eq!(event.action(), ChangeAction::Delete);
        assert_eq!(event.action().to_string(), "delete");
    }
}
