// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{
    ContactApi, ContactWay, ContactWayRequest, DirectoryEntity, DirectoryError, DirectoryStore, EntityKind,
    ExternalContact,
};

type EntityKey = (String, EntityKind, String);

/// Directory held in memory, for tests and local runs.
pub struct InMemoryDirectory {
    entities: DashMap<EntityKey, DirectoryEntity>,
    failure: Mutex<Option<DirectoryError>>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            failure: Mutex::new(None),
        }
    }

    /// Insert or replace an entity.
    pub fn put(&self, entity: DirectoryEntity) {
        let key = (entity.tenant_id.clone(), entity.kind, entity.external_id.clone());
        self.entities.insert(key, entity);
    }

    pub fn remove(&self, tenant: &str, kind: EntityKind, external_id: &str) {
        self.entities.remove(&(tenant.to_string(), kind, external_id.to_string()));
    }

    /// Make the next read fail with `error`.
    pub fn fail_next(&self, error: DirectoryError) {
        *self.failure.lock() = Some(error);
    }

    fn check_failure(&self) -> Result<(), DirectoryError> {
        match self.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn collect<F>(&self, tenant: &str, kind: EntityKind, keep: F) -> Vec<DirectoryEntity>
    where
        F: Fn(&DirectoryEntity) -> bool,
    {
        let mut found: Vec<DirectoryEntity> = self
            .entities
            .iter()
            .filter(|e| e.key().0 == tenant && e.key().1 == kind && keep(e.value()))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        found
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn get(&self, tenant: &str, kind: EntityKind, external_id: &str) -> Result<Option<DirectoryEntity>, DirectoryError> {
        self.check_failure()?;
        Ok(self
            .entities
            .get(&(tenant.to_string(), kind, external_id.to_string()))
            .map(|e| e.value().clone()))
    }

    async fn list(&self, tenant: &str, kind: EntityKind) -> Result<Vec<DirectoryEntity>, DirectoryError> {
        self.check_failure()?;
        Ok(self.collect(tenant, kind, |_| true))
    }

    async fn list_changed_since(
        &self,
        tenant: &str,
        kind: EntityKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<DirectoryEntity>, DirectoryError> {
        self.check_failure()?;
        Ok(self.collect(tenant, kind, |e| e.updated_at > since))
    }
}

/// Contact API fake: serves seeded external contacts and records QR requests.
pub struct InMemoryContactApi {
    contacts: DashMap<String, ExternalContact>,
    requests: Mutex<Vec<ContactWayRequest>>,
    failure: Mutex<Option<DirectoryError>>,
}

impl InMemoryContactApi {
    #[must_use]
    pub fn new() -> Self {
        Self {
            contacts: DashMap::new(),
            requests: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn put_contact(&self, contact: ExternalContact) {
        self.contacts.insert(contact.external_user_id.clone(), contact);
    }

    /// Contact-way requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ContactWayRequest> {
        self.requests.lock().clone()
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: DirectoryError) {
        *self.failure.lock() = Some(error);
    }

    fn check_failure(&self) -> Result<(), DirectoryError> {
        match self.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryContactApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContactApi for InMemoryContactApi {
    async fn add_contact_way(&self, request: &ContactWayRequest) -> Result<ContactWay, DirectoryError> {
        self.check_failure()?;
        let mut requests = self.requests.lock();
        requests.push(request.clone());
        let config_id = format!("cfg-{}", requests.len());
        Ok(ContactWay {
            qr_code: format!("https://qr.example.com/{config_id}"),
            config_id,
        })
    }

    async fn get_external_contact(&self, external_user_id: &str) -> Result<ExternalContact, DirectoryError> {
        self.check_failure()?;
        self.contacts
            .get(external_user_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| DirectoryError::Api {
                code: 84061,
                message: format!("external contact {external_user_id} not found"),
            })
    }
}
