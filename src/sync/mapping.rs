// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Static field mappings from Directory attributes to worksheet fields.
//!
//! Each worksheet has a title field holding the Directory external ID and a
//! fixed table of purpose key → platform field. Values are encoded per field
//! kind:
//!
//! | Kind       | Directory value        | Platform value                  |
//! |------------|------------------------|---------------------------------|
//! | Text       | string / number        | string                          |
//! | Dropdown   | integer code           | `["<option key>"]`              |
//! | Attachment | URL                    | `[{"name": "...", "url": "..."}]` |
//! | Relation   | row IDs                | `["<row id>", ...]`             |

use serde_json::{json, Value};
use tracing::warn;

use crate::directory::{DirectoryEntity, EntityKind};
use crate::record_store::{FieldValues, RowId, Worksheet};

/// Gender code → option key.
const GENDER_OPTIONS: &[(i64, &str)] = &[
    (1, "27a67e42-741f-43a1-ac68-fa1a752f7373"),
    (2, "2bbc0fe0-7cce-4764-9e62-806625a36283"),
];

/// Option key of the "departed" staff status.
pub const DEPARTED_STATUS_KEY: &str = "7115d2e2-7d18-4881-b394-9181c395d691";

/// Staff status code → option key. Disabled and left-the-corp share "departed".
const STATUS_OPTIONS: &[(i64, &str)] = &[
    (1, "03084068-0aa5-4c4a-9c6b-37a0d960a877"),
    (2, DEPARTED_STATUS_KEY),
    (4, "8acd41cf-2233-4f07-9af4-5f45e4d1cb8e"),
    (5, DEPARTED_STATUS_KEY),
];

/// Staff field linking to Department rows.
pub const STAFF_DEPARTMENTS_FIELD: &str = "wecom_dep_id";

/// Staff status field, flipped to "departed" on removal.
pub const STAFF_STATUS_FIELD: &str = "staff_status";

const DEFAULT_ATTACHMENT_NAME: &str = "avatar.jpg";

/// How a value is encoded for its platform field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// Integer code mapped through a fixed option table
    Dropdown(&'static [(i64, &'static str)]),
    Attachment,
    Relation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub purpose: &'static str,
    pub field_id: &'static str,
    pub kind: FieldKind,
}

/// Mapping of one entity kind onto its worksheet.
#[derive(Debug)]
pub struct WorksheetMapping {
    pub worksheet: Worksheet,
    /// Title field holding the Directory external ID
    pub external_id_field: &'static str,
    pub fields: &'static [FieldMapping],
}

static DEPARTMENT_MAPPING: WorksheetMapping = WorksheetMapping {
    worksheet: Worksheet::Department,
    external_id_field: "69660ddb84223902b9ec7a72",
    fields: &[FieldMapping {
        purpose: "name",
        field_id: "69660ddb84223902b9ec7a73",
        kind: FieldKind::Text,
    }],
};

static STAFF_MAPPING: WorksheetMapping = WorksheetMapping {
    worksheet: Worksheet::Staff,
    external_id_field: "wecom_staff_id",
    fields: &[
        FieldMapping { purpose: "name", field_id: "wecom_username", kind: FieldKind::Text },
        FieldMapping { purpose: "avatar", field_id: "wecom_avatar", kind: FieldKind::Attachment },
        FieldMapping { purpose: "gender", field_id: "gender", kind: FieldKind::Dropdown(GENDER_OPTIONS) },
        FieldMapping { purpose: "mobile", field_id: "phone", kind: FieldKind::Text },
        FieldMapping { purpose: "email", field_id: "email", kind: FieldKind::Text },
        FieldMapping { purpose: "position", field_id: "position", kind: FieldKind::Text },
        FieldMapping { purpose: "status", field_id: STAFF_STATUS_FIELD, kind: FieldKind::Dropdown(STATUS_OPTIONS) },
    ],
};

/// Mapping for an entity kind.
#[must_use]
pub fn mapping_for(kind: EntityKind) -> &'static WorksheetMapping {
    match kind {
        EntityKind::Department => &DEPARTMENT_MAPPING,
        EntityKind::Staff => &STAFF_MAPPING,
    }
}

impl WorksheetMapping {
    #[must_use]
    pub fn field(&self, purpose: &str) -> Option<&'static FieldMapping> {
        self.fields.iter().find(|f| f.purpose == purpose)
    }

    /// Platform field set for `entity`: the external ID plus every mapped
    /// attribute with a usable value. Unmapped attributes are skipped.
    #[must_use]
    pub fn build_fields(&self, entity: &DirectoryEntity) -> FieldValues {
        let mut fields = FieldValues::new();
        if !entity.external_id.is_empty() {
            fields.insert(self.external_id_field.to_string(), Value::String(entity.external_id.clone()));
        }

        for (purpose, value) in &entity.attributes {
            let Some(mapping) = self.field(purpose) else {
                warn!(
                    worksheet = %self.worksheet,
                    external_id = %entity.external_id,
                    attribute = %purpose,
                    "No field mapping for attribute, skipping"
                );
                continue;
            };
            if let Some(encoded) = encode_value(mapping.kind, value) {
                fields.insert(mapping.field_id.to_string(), encoded);
            }
        }
        fields
    }
}

/// Encode a Directory value for a field of `kind`. `None` means the value
/// is empty or has no platform counterpart and the field is left out.
#[must_use]
pub fn encode_value(kind: FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::Text => match value {
            Value::String(s) if !s.is_empty() => Some(Value::String(s.clone())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        FieldKind::Dropdown(options) => {
            let code = match value {
                Value::Number(n) => n.as_i64()?,
                Value::String(s) => s.trim().parse().ok()?,
                _ => return None,
            };
            options
                .iter()
                .find(|(c, _)| *c == code)
                .map(|(_, key)| dropdown_value(key))
        }
        FieldKind::Attachment => match value {
            Value::String(url) if !url.is_empty() => Some(attachment_value(url)),
            _ => None,
        },
        FieldKind::Relation => match value {
            Value::Array(ids) if !ids.is_empty() => Some(Value::Array(ids.clone())),
            _ => None,
        },
    }
}

#[must_use]
pub fn dropdown_value(option_key: &str) -> Value {
    json!([option_key])
}

#[must_use]
pub fn relation_value(row_ids: &[RowId]) -> Value {
    json!(row_ids)
}

#[must_use]
pub fn attachment_value(url: &str) -> Value {
    json!([{ "name": attachment_file_name(url), "url": url }])
}

/// File name for an attachment URL: the last path segment without its query
/// string, or `avatar.jpg` when that segment has no extension.
#[must_use]
pub fn attachment_file_name(url: &str) -> String {
    let last = url.rsplit('/').next().unwrap_or_default();
    let last = match last.find('?') {
        Some(idx) if idx > 0 => &last[..idx],
        _ => last,
    };
    if !last.is_empty() && last.contains('.') {
        last.to_string()
    } else {
        DEFAULT_ATTACHMENT_NAME.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_department_fields() {
        let dept = DirectoryEntity::department("corp", "1001").with_attribute("name", "Sales");
        let fields = mapping_for(EntityKind::Department).build_fields(&dept);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["69660ddb84223902b9ec7a72"], json!("1001"));
        assert_eq!(fields["69660ddb84223902b9ec7a73"], json!("Sales"));
    }

    #[test]
    fn test_staff_fields_skip_empty_and_unknown() {
        let staff = DirectoryEntity::staff("corp", "zhangsan")
            .with_attribute("name", "Zhang San")
            .with_attribute("mobile", "")
            .with_attribute("gender", 0)
            .with_attribute("status", 1)
            .with_attribute("nickname", "zs");
        let fields = mapping_for(EntityKind::Staff).build_fields(&staff);

        assert_eq!(fields["wecom_staff_id"], json!("zhangsan"));
        assert_eq!(fields["wecom_username"], json!("Zhang San"));
        assert_eq!(fields["staff_status"], json!(["03084068-0aa5-4c4a-9c6b-37a0d960a877"]));
        assert!(!fields.contains_key("phone"));
        assert!(!fields.contains_key("gender"));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn test_status_codes_two_and_five_are_departed() {
        let kind = FieldKind::Dropdown(STATUS_OPTIONS);
        assert_eq!(encode_value(kind, &json!(2)), Some(json!([DEPARTED_STATUS_KEY])));
        assert_eq!(encode_value(kind, &json!(5)), Some(json!([DEPARTED_STATUS_KEY])));
        assert_eq!(encode_value(kind, &json!(3)), None);
    }

    #[test]
    fn test_gender_from_string_code() {
        let kind = FieldKind::Dropdown(GENDER_OPTIONS);
        assert_eq!(encode_value(kind, &json!("2")), Some(json!(["2bbc0fe0-7cce-4764-9e62-806625a36283"])));
    }

    #[test]
    fn test_attachment_file_name() {
        assert_eq!(attachment_file_name("https://cdn.example.com/a/b/photo.png?x=1"), "photo.png");
        assert_eq!(attachment_file_name("https://wework.qpic.cn/wwhead/abc/0"), "avatar.jpg");
        assert_eq!(attachment_file_name("https://cdn.example.com/"), "avatar.jpg");
        assert_eq!(attachment_file_name("https://cdn.example.com/?a.b"), "?a.b");
    }

    #[test]
    fn test_attachment_value_shape() {
        let value = attachment_value("https://cdn.example.com/me.jpg");
        assert_eq!(value, json!([{"name": "me.jpg", "url": "https://cdn.example.com/me.jpg"}]));
    }

    #[test]
    fn test_text_renders_numbers() {
        assert_eq!(encode_value(FieldKind::Text, &json!(42)), Some(json!("42")));
        assert_eq!(encode_value(FieldKind::Text, &Value::Null), None);
    }
}
