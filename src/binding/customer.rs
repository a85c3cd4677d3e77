// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Customer worksheet access for the chat sidebar: match, search, read,
//! edit, and field configuration.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::BindError;
use crate::metrics;
use crate::record_store::{
    FieldValues, Filter, Page, PlatformRow, RecordStore, RowPage, SchemaOption, Worksheet,
};

/// Customer fields written by binding, by alias.
pub mod fields {
    pub const STAFF_ID: &str = "wecomStaffID";
    pub const WECHAT_NAME: &str = "wechatName";
    pub const WECHAT_GENDER: &str = "wechatGender";
    pub const EXTERNAL_USER_ID: &str = "wecomExternalUserid";
    pub const WECHAT_AVATAR: &str = "wechatAvatar";
    pub const WECHAT_UNION_ID: &str = "wechatUnionId";
    pub const EXTERNAL_PROFILE: &str = "wecomExternalProfile";

    /// Every field a binding writes, and a rebind clears.
    pub const BINDING: [&str; 7] = [
        STAFF_ID,
        WECHAT_NAME,
        WECHAT_GENDER,
        EXTERNAL_USER_ID,
        WECHAT_AVATAR,
        WECHAT_UNION_ID,
        EXTERNAL_PROFILE,
    ];

    /// Phone number, searched by keyword.
    pub const PHONE: &str = "692f976f7001b729cd1c01c1";
    /// Customer number, searched by keyword.
    pub const CUSTOMER_NO: &str = "693660e95326c71216b1b87a";
}

/// Binding fields by field ID, plus the embedded QR code. Never shown in the
/// sidebar.
const HIDDEN_FIELD_IDS: [&str; 8] = [
    "696610f93d7d0e60bca91d26",
    "6966103cc62174e0bab32b9c",
    "6966103cc62174e0bab32b9d",
    "6966103cc62174e0bab32b9e",
    "6966103cc62174e0bab32b9f",
    "6966103cc62174e0bab32ba0",
    "6966103cc62174e0bab32ba1",
    "696613717a7a413b01fc2036",
];

/// A sidebar field: (id, label, type, editable).
type DisplayField = (&'static str, &'static str, &'static str, bool);

const DISPLAY_FIELDS: [DisplayField; 20] = [
    ("693660e95326c71216b1b87a", "Customer No.", "AutoNumber", false),
    ("692f976f7001b729cd1c01c1", "Phone", "Text", false),
    ("693660e95326c71216b1b87b", "Track group", "Text", true),
    ("693660e95326c71216b1b87c", "After-sales group", "Text", true),
    ("692f976f7001b729cd1c01bf", "Lead account", "Text", true),
    ("692f976f7001b729cd1c01be", "Douyin name", "Text", true),
    ("694a39afa87445aaca8c3ec3", "Douyin ID", "Text", true),
    ("692f976f7001b729cd1c01c0", "Host", "Dropdown", true),
    ("692feedb2328de1fe0c8f600", "Date", "Date", true),
    ("692f976f7001b729cd1c01c5", "Order No.", "Text", false),
    ("694e20662a4f51165dfa2264", "Shipping address", "Text", true),
    ("694b6d090d5691f00accd141", "Intent", "Dropdown", true),
    ("694b70a80d5691f00acce09f", "Progress", "Dropdown", true),
    ("692f976f7001b729cd1c01c2", "Needs", "MultipleSelect", true),
    ("694bc08a0d5691f00ace2e61", "Renovation stage", "Dropdown", true),
    ("694bc08a0d5691f00ace2e62", "Layout", "Dropdown", true),
    ("695a258487071723ff4e1dd1", "Total received", "Rollup", false),
    ("695a258487071723ff4e1dd2", "Total refunded", "Rollup", false),
    ("692f976f7001b729cd1c01c3", "Designer", "Collaborator", false),
    ("694b6c7a0d5691f00acccf70", "Track", "Collaborator", false),
];

/// Whether the sidebar may edit `field_id`.
#[must_use]
pub fn is_editable(field_id: &str) -> bool {
    DISPLAY_FIELDS.iter().any(|(id, _, _, editable)| *id == field_id && *editable)
}

fn is_hidden(field_id: &str) -> bool {
    HIDDEN_FIELD_IDS.contains(&field_id) || fields::BINDING.contains(&field_id)
}

/// Remove binding fields before a row leaves the service.
fn strip_hidden(mut row: PlatformRow) -> PlatformRow {
    row.fields.retain(|key, _| !is_hidden(key));
    row
}

/// One field of the sidebar form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerFieldConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub editable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SchemaOption>,
}

#[derive(Clone)]
pub struct CustomerService {
    store: Arc<dyn RecordStore>,
}

impl CustomerService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// The customer bound to an external contact, if any.
    pub async fn match_by_external_user(&self, external_user_id: &str) -> Result<Option<PlatformRow>, BindError> {
        if external_user_id.is_empty() {
            return Err(BindError::BadRequest("external_user_id is required".into()));
        }
        let filter = Filter::eq(fields::EXTERNAL_USER_ID, external_user_id);
        let row = self.store.find_one(Worksheet::Customer, &filter).await?;
        Ok(row.map(strip_hidden))
    }

    /// Customers whose phone number or customer number contains `keyword`.
    pub async fn search(&self, keyword: &str, page: Page) -> Result<RowPage, BindError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(BindError::BadRequest("search keyword is required".into()));
        }
        let filter = Filter::contains(fields::PHONE, keyword).or(Filter::contains(fields::CUSTOMER_NO, keyword));
        let mut found = self.store.filter_rows(Worksheet::Customer, &filter, page).await?;
        found.rows = found.rows.into_iter().map(strip_hidden).collect();
        Ok(found)
    }

    pub async fn get(&self, row_id: &str) -> Result<PlatformRow, BindError> {
        if row_id.is_empty() {
            return Err(BindError::BadRequest("row_id is required".into()));
        }
        self.store
            .get_row(Worksheet::Customer, row_id)
            .await?
            .map(strip_hidden)
            .ok_or_else(|| BindError::NotFound(format!("customer {row_id}")))
    }

    /// Write the editable subset of `updates`. Non-editable fields are dropped
    /// with a warning; returns how many fields were written.
    pub async fn update_fields(&self, row_id: &str, updates: &FieldValues) -> Result<usize, BindError> {
        if row_id.is_empty() {
            return Err(BindError::BadRequest("row_id is required".into()));
        }

        let mut editable = FieldValues::new();
        for (field_id, value) in updates {
            if is_editable(field_id) {
                editable.insert(field_id.clone(), value.clone());
            } else {
                warn!(row_id, field_id = %field_id, "Ignoring update of non-editable field");
            }
        }
        if editable.is_empty() {
            return Err(BindError::BadRequest("no editable fields to update".into()));
        }

        self.store.update_row(Worksheet::Customer, row_id, &editable).await?;
        metrics::record_binding("update_fields", "success");
        info!(row_id, count = editable.len(), "Customer fields updated");
        Ok(editable.len())
    }

    /// Sidebar form: the worksheet schema minus binding fields, marked
    /// editable per the sidebar configuration.
    pub async fn field_configs(&self) -> Result<Vec<CustomerFieldConfig>, BindError> {
        let schema = self.store.worksheet_schema(Worksheet::Customer).await?;
        let mut seen = HashSet::new();

        let configs = schema
            .into_iter()
            .filter(|f| !is_hidden(&f.id) && !f.alias.as_deref().is_some_and(is_hidden))
            .filter(|f| seen.insert(f.id.clone()))
            .map(|f| CustomerFieldConfig {
                editable: is_editable(&f.id),
                id: f.id,
                name: f.name,
                field_type: f.field_type,
                options: f.options,
            })
            .collect();
        Ok(configs)
    }
}

/// Customer field values from an external contact profile. Empty values are
/// left out.
pub(crate) fn profile_fields(contact: &crate::directory::ExternalContact, staff_id: Option<&str>) -> FieldValues {
    let mut out = FieldValues::new();
    let mut put = |key: &str, value: &str| {
        if !value.is_empty() {
            out.insert(key.to_string(), Value::String(value.to_string()));
        }
    };

    put(fields::EXTERNAL_USER_ID, &contact.external_user_id);
    put(fields::WECHAT_NAME, &contact.name);
    put(fields::WECHAT_GENDER, gender_code(contact.gender));
    put(fields::WECHAT_AVATAR, &contact.avatar);
    put(fields::WECHAT_UNION_ID, &contact.union_id);
    if let Some(profile) = &contact.external_profile {
        put(fields::EXTERNAL_PROFILE, &profile.to_string());
    }
    if let Some(staff_id) = staff_id {
        put(fields::STAFF_ID, staff_id);
    }
    out
}

/// Empty values for every binding field.
pub(crate) fn cleared_fields() -> FieldValues {
    fields::BINDING
        .iter()
        .map(|key| (key.to_string(), Value::String(String::new())))
        .collect()
}

fn gender_code(gender: u8) -> &'static str {
    match gender {
        1 => "1",
        2 => "2",
        _ => "0",
    }
}
