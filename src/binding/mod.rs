// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Customer ↔ external contact binding.
//!
//! A customer row is bound when its `wecomExternalUserid` field is set.
//! Bindings are made three ways:
//!
//! - [`BindingService::bind`]: an agent links a contact to an unbound row
//! - [`BindingService::change_binding`]: the link moves to another row
//! - [`BindingService::handle_contact_added`]: a customer scans a QR code
//!   issued by [`BindingService::contact_way_qr`], and the Directory reports
//!   the new contact with the correlation token in its `state`

pub mod customer;
pub mod token;

pub use customer::{CustomerFieldConfig, CustomerService};

use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::directory::{ContactApi, ContactWay, ContactWayRequest, DirectoryError};
use crate::metrics;
use crate::record_store::{RecordStore, RecordStoreError, Worksheet};
use crate::resilience::supervise::spawn_supervised;
use customer::{cleared_fields, fields, profile_fields};

/// Failure of a binding operation, shaped for the caller's HTTP layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The record store or Directory rejected the call.
    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl BindError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Provider { .. } => "provider",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<RecordStoreError> for BindError {
    fn from(e: RecordStoreError) -> Self {
        match e {
            RecordStoreError::Provider { code, message } => BindError::Provider { code, message },
            RecordStoreError::Status { status, message } => BindError::Provider { code: i64::from(status), message },
            other => BindError::Internal(other.to_string()),
        }
    }
}

impl From<DirectoryError> for BindError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::Api { code, message } => BindError::Provider { code, message },
            other => BindError::Internal(other.to_string()),
        }
    }
}

/// The Directory's "external contact added" callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactAddedEvent {
    pub staff_id: String,
    pub external_user_id: String,
    /// `state` of the contact way the customer scanned; empty when the contact
    /// was added some other way
    pub state: String,
}

/// What [`BindingService::accept_contact_added`] did with an event.
#[derive(Debug)]
pub enum ContactAdded {
    /// State did not carry our prefix; the event belongs to someone else.
    NotOurs,
    /// Our prefix, but no usable correlation id. Nothing to do.
    Dropped,
    /// Profile write running in the background.
    Spawned(JoinHandle<()>),
}

#[derive(Clone)]
pub struct BindingService {
    store: Arc<dyn RecordStore>,
    contacts: Arc<dyn ContactApi>,
}

impl BindingService {
    pub fn new(store: Arc<dyn RecordStore>, contacts: Arc<dyn ContactApi>) -> Self {
        Self { store, contacts }
    }

    /// Provision a single-staff QR code whose callback will carry
    /// `correlation_id` back to us.
    #[instrument(skip(self))]
    pub async fn contact_way_qr(&self, staff_id: &str, correlation_id: &str) -> Result<ContactWay, BindError> {
        if staff_id.is_empty() {
            return Err(BindError::BadRequest("staff_id is required".into()));
        }

        let state = token::encode(correlation_id);
        if state.len() > token::MAX_STATE_LEN {
            return Err(BindError::BadRequest(format!(
                "state is {} characters, limit is {}",
                state.len(),
                token::MAX_STATE_LEN
            )));
        }

        let request = ContactWayRequest {
            staff_id: staff_id.to_string(),
            state,
            skip_verify: true,
        };
        let result = self.contacts.add_contact_way(&request).await.map_err(BindError::from);
        record("contact_way", &result);
        let way = result?;
        info!(staff_id, config_id = %way.config_id, "QR contact way issued");
        Ok(way)
    }

    /// Bind an unbound customer row to an external contact.
    #[instrument(skip(self))]
    pub async fn bind(&self, row_id: &str, external_user_id: &str, staff_id: &str) -> Result<(), BindError> {
        let result = self.bind_inner(row_id, external_user_id, staff_id).await;
        record("bind", &result);
        result
    }

    async fn bind_inner(&self, row_id: &str, external_user_id: &str, staff_id: &str) -> Result<(), BindError> {
        require(row_id, external_user_id)?;
        self.ensure_unbound(row_id).await?;
        self.write_profile(row_id, external_user_id, staff_id).await?;
        info!(row_id, external_user_id, "Customer bound");
        Ok(())
    }

    /// Move a binding from `old_row_id` to `new_row_id`. When both ids are
    /// equal the row is simply refreshed.
    ///
    /// The old row's binding fields are cleared first, then the new row is
    /// written. The two writes are not atomic: if fetching the contact or
    /// writing the new row fails, the error is returned and the contact is
    /// left bound to neither row. Callers retry the change to recover.
    #[instrument(skip(self))]
    pub async fn change_binding(
        &self,
        old_row_id: &str,
        new_row_id: &str,
        external_user_id: &str,
        staff_id: &str,
    ) -> Result<(), BindError> {
        let result = self
            .change_binding_inner(old_row_id, new_row_id, external_user_id, staff_id)
            .await;
        record("change_binding", &result);
        result
    }

    async fn change_binding_inner(
        &self,
        old_row_id: &str,
        new_row_id: &str,
        external_user_id: &str,
        staff_id: &str,
    ) -> Result<(), BindError> {
        if old_row_id.is_empty() {
            return Err(BindError::BadRequest("old_row_id is required".into()));
        }
        require(new_row_id, external_user_id)?;

        if old_row_id != new_row_id {
            self.ensure_unbound(new_row_id).await?;
            self.store
                .update_row(Worksheet::Customer, old_row_id, &cleared_fields())
                .await?;
            info!(row_id = old_row_id, "Previous binding cleared");
        }

        self.write_profile(new_row_id, external_user_id, staff_id).await?;
        info!(old_row_id, new_row_id, external_user_id, "Binding changed");
        Ok(())
    }

    /// Handle the contact-added callback. Returns whether the event was ours
    /// to handle; the profile write itself happens in the background and
    /// never surfaces to the caller.
    pub fn handle_contact_added(&self, event: &ContactAddedEvent) -> bool {
        !matches!(self.accept_contact_added(event), ContactAdded::NotOurs)
    }

    /// Like [`handle_contact_added`](Self::handle_contact_added), but hands
    /// back the background task.
    pub fn accept_contact_added(&self, event: &ContactAddedEvent) -> ContactAdded {
        if !token::is_correlation_state(&event.state) {
            return ContactAdded::NotOurs;
        }

        let row_id = token::decode(&event.state);
        if row_id.is_empty() || event.external_user_id.is_empty() {
            warn!(state = %event.state, external_user_id = %event.external_user_id, "Contact-added callback without usable correlation id");
            metrics::record_binding("contact_added", "dropped");
            return ContactAdded::Dropped;
        }

        info!(row_id = %row_id, external_user_id = %event.external_user_id, "Contact added from issued QR code");
        let service = self.clone();
        let external_user_id = event.external_user_id.clone();
        let staff_id = event.staff_id.clone();
        ContactAdded::Spawned(spawn_supervised("contact_added", async move {
            let result = service.write_profile(&row_id, &external_user_id, &staff_id).await;
            record("contact_added", &result);
            result
        }))
    }

    async fn ensure_unbound(&self, row_id: &str) -> Result<(), BindError> {
        let row = self
            .store
            .get_row(Worksheet::Customer, row_id)
            .await?
            .ok_or_else(|| BindError::NotFound(format!("customer {row_id}")))?;
        if row.has_value(fields::EXTERNAL_USER_ID) {
            return Err(BindError::Conflict(format!("customer {row_id} is already bound")));
        }
        Ok(())
    }

    /// Fetch the contact's profile and write it onto the row.
    async fn write_profile(&self, row_id: &str, external_user_id: &str, staff_id: &str) -> Result<(), BindError> {
        let contact = self.contacts.get_external_contact(external_user_id).await?;
        let mut values = profile_fields(&contact, Some(staff_id));
        // The profile may come back without its own id
        values
            .entry(fields::EXTERNAL_USER_ID.to_string())
            .or_insert_with(|| serde_json::Value::String(external_user_id.to_string()));
        self.store.update_row(Worksheet::Customer, row_id, &values).await?;
        Ok(())
    }
}

fn require(row_id: &str, external_user_id: &str) -> Result<(), BindError> {
    if row_id.is_empty() {
        return Err(BindError::BadRequest("row_id is required".into()));
    }
    if external_user_id.is_empty() {
        return Err(BindError::BadRequest("external_user_id is required".into()));
    }
    Ok(())
}

fn record<T>(operation: &str, result: &Result<T, BindError>) {
    match result {
        Ok(_) => metrics::record_binding(operation, "success"),
        Err(e) => metrics::record_binding(operation, e.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{ExternalContact, InMemoryContactApi};
    use crate::record_store::{FieldValues, InMemoryRecordStore, StoreOperation};
    use serde_json::json;

    fn service() -> (BindingService, Arc<InMemoryRecordStore>, Arc<InMemoryContactApi>) {
        let store = Arc::new(InMemoryRecordStore::new());
        let contacts = Arc::new(InMemoryContactApi::new());
        contacts.put_contact(ExternalContact {
            external_user_id: "wm-1".into(),
            name: "Li Si".into(),
            avatar: "https://img.example.com/a.png".into(),
            gender: 1,
            union_id: "union-1".into(),
            external_profile: Some(json!({"external_attr": [{"name": "vip"}]})),
        });
        (BindingService::new(store.clone(), contacts.clone()), store, contacts)
    }

    fn bound_to(external_user_id: &str) -> FieldValues {
        [(fields::EXTERNAL_USER_ID.to_string(), json!(external_user_id))].into_iter().collect()
    }

    #[tokio::test]
    async fn test_bind_writes_profile() {
        let (svc, store, _) = service();
        store.insert_row(Worksheet::Customer, "c-1", FieldValues::new());

        svc.bind("c-1", "wm-1", "zhangsan").await.unwrap();

        let row = store.row(Worksheet::Customer, "c-1").unwrap();
        assert_eq!(row.text(fields::EXTERNAL_USER_ID).as_deref(), Some("wm-1"));
        assert_eq!(row.text(fields::WECHAT_NAME).as_deref(), Some("Li Si"));
        assert_eq!(row.text(fields::WECHAT_GENDER).as_deref(), Some("1"));
        assert_eq!(row.text(fields::STAFF_ID).as_deref(), Some("zhangsan"));
        assert!(row.has_value(fields::EXTERNAL_PROFILE));
    }

    #[tokio::test]
    async fn test_bind_rejects_bound_row() {
        let (svc, store, _) = service();
        store.insert_row(Worksheet::Customer, "c-1", bound_to("wm-9"));

        let err = svc.bind("c-1", "wm-1", "zhangsan").await.unwrap_err();
        assert!(matches!(err, BindError::Conflict(_)));
        assert!(store.calls_of(StoreOperation::Update).is_empty());
    }

    #[tokio::test]
    async fn test_bind_missing_row_and_arguments() {
        let (svc, _, _) = service();
        assert!(matches!(svc.bind("nope", "wm-1", "s").await, Err(BindError::NotFound(_))));
        assert!(matches!(svc.bind("", "wm-1", "s").await, Err(BindError::BadRequest(_))));
        assert!(matches!(svc.bind("c-1", "", "s").await, Err(BindError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_unknown_contact_is_provider_error() {
        let (svc, store, _) = service();
        store.insert_row(Worksheet::Customer, "c-1", FieldValues::new());
        let err = svc.bind("c-1", "wm-404", "s").await.unwrap_err();
        assert!(matches!(err, BindError::Provider { code: 84061, .. }));
    }

    #[tokio::test]
    async fn test_change_binding_clears_old_row() {
        let (svc, store, _) = service();
        store.insert_row(Worksheet::Customer, "c-old", bound_to("wm-1"));
        store.insert_row(Worksheet::Customer, "c-new", FieldValues::new());

        svc.change_binding("c-old", "c-new", "wm-1", "zhangsan").await.unwrap();

        let old = store.row(Worksheet::Customer, "c-old").unwrap();
        assert!(!old.has_value(fields::EXTERNAL_USER_ID));
        let new = store.row(Worksheet::Customer, "c-new").unwrap();
        assert_eq!(new.text(fields::EXTERNAL_USER_ID).as_deref(), Some("wm-1"));
    }

    #[tokio::test]
    async fn test_change_binding_failed_write_leaves_contact_unbound() {
        let (svc, store, contacts) = service();
        store.insert_row(Worksheet::Customer, "c-old", bound_to("wm-1"));
        store.insert_row(Worksheet::Customer, "c-new", FieldValues::new());
        contacts.fail_next(DirectoryError::Transport("down".into()));

        let err = svc.change_binding("c-old", "c-new", "wm-1", "s").await.unwrap_err();
        assert!(matches!(err, BindError::Internal(_)));
        assert!(!store.row(Worksheet::Customer, "c-old").unwrap().has_value(fields::EXTERNAL_USER_ID));
        assert!(!store.row(Worksheet::Customer, "c-new").unwrap().has_value(fields::EXTERNAL_USER_ID));

        svc.change_binding("c-old", "c-new", "wm-1", "s").await.unwrap();
        let new = store.row(Worksheet::Customer, "c-new").unwrap();
        assert_eq!(new.text(fields::EXTERNAL_USER_ID).as_deref(), Some("wm-1"));
    }

    #[tokio::test]
    async fn test_change_binding_to_bound_row_conflicts() {
        let (svc, store, _) = service();
        store.insert_row(Worksheet::Customer, "c-old", bound_to("wm-1"));
        store.insert_row(Worksheet::Customer, "c-new", bound_to("wm-2"));

        let err = svc.change_binding("c-old", "c-new", "wm-1", "s").await.unwrap_err();
        assert!(matches!(err, BindError::Conflict(_)));
        let old = store.row(Worksheet::Customer, "c-old").unwrap();
        assert!(old.has_value(fields::EXTERNAL_USER_ID));
    }

    #[tokio::test]
    async fn test_change_binding_same_row_refreshes() {
        let (svc, store, _) = service();
        store.insert_row(Worksheet::Customer, "c-1", bound_to("wm-1"));

        svc.change_binding("c-1", "c-1", "wm-1", "s").await.unwrap();

        let updates = store.calls_of(StoreOperation::Update);
        assert_eq!(updates.len(), 1);
        let row = store.row(Worksheet::Customer, "c-1").unwrap();
        assert_eq!(row.text(fields::WECHAT_NAME).as_deref(), Some("Li Si"));
    }

    #[tokio::test]
    async fn test_contact_way_qr_carries_token() {
        let (svc, _, contacts) = service();
        let way = svc
            .contact_way_qr("zhangsan", "abcdef12-3456-7890-abcd-ef1234567890")
            .await
            .unwrap();
        assert_eq!(way.config_id, "cfg-1");

        let requests = contacts.requests();
        assert_eq!(requests[0].state, "mdy:q83vEjRWeJCrze8SNFZ4kA");
        assert!(requests[0].skip_verify);
    }

    #[tokio::test]
    async fn test_contact_way_qr_validation() {
        let (svc, _, contacts) = service();
        assert!(matches!(svc.contact_way_qr("", "row-1").await, Err(BindError::BadRequest(_))));

        let long = "x".repeat(27);
        assert!(matches!(svc.contact_way_qr("s", &long).await, Err(BindError::BadRequest(_))));
        assert!(contacts.requests().is_empty());
    }

    #[tokio::test]
    async fn test_contact_added_writes_correlated_row() {
        let (svc, store, _) = service();
        store.insert_row(Worksheet::Customer, "abcdef12-3456-7890-abcd-ef1234567890", FieldValues::new());

        let event = ContactAddedEvent {
            staff_id: "zhangsan".into(),
            external_user_id: "wm-1".into(),
            state: "mdy:q83vEjRWeJCrze8SNFZ4kA".into(),
        };
        let ContactAdded::Spawned(handle) = svc.accept_contact_added(&event) else {
            panic!("expected a background write");
        };
        handle.await.unwrap();

        let row = store.row(Worksheet::Customer, "abcdef12-3456-7890-abcd-ef1234567890").unwrap();
        assert_eq!(row.text(fields::EXTERNAL_USER_ID).as_deref(), Some("wm-1"));
        assert_eq!(row.text(fields::STAFF_ID).as_deref(), Some("zhangsan"));
    }

    #[tokio::test]
    async fn test_contact_added_foreign_and_empty_state() {
        let (svc, store, _) = service();
        let mut event = ContactAddedEvent {
            staff_id: "zhangsan".into(),
            external_user_id: "wm-1".into(),
            state: "channel-7".into(),
        };
        assert!(!svc.handle_contact_added(&event));

        event.state = "mdy:".into();
        assert!(svc.handle_contact_added(&event));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_contact_added_failure_stays_in_background() {
        let (svc, store, contacts) = service();
        contacts.fail_next(DirectoryError::Transport("down".into()));

        let event = ContactAddedEvent {
            staff_id: "zhangsan".into(),
            external_user_id: "wm-1".into(),
            state: "mdy:row-1".into(),
        };
        let ContactAdded::Spawned(handle) = svc.accept_contact_added(&event) else {
            panic!("expected a background write");
        };
        assert!(handle.await.is_ok());
        assert!(store.calls_of(StoreOperation::Update).is_empty());
    }
}
