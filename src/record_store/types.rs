// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared types for the record store client.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque platform-assigned row identifier.
pub type RowId = String;

/// Field values keyed by platform field ID (or alias).
pub type FieldValues = BTreeMap<String, Value>;

/// The fixed set of worksheets this crate writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Worksheet {
    Staff,
    Department,
    Customer,
}

impl Worksheet {
    /// Worksheet alias. Aliases are unique within the platform app and are
    /// accepted anywhere a worksheet ID is, so they stay stable across
    /// environments.
    #[must_use]
    pub fn alias(&self) -> &'static str {
        match self {
            Self::Staff => "starstaffinfo",
            Self::Department => "stardeptinfo",
            Self::Customer => "starclientinfo",
        }
    }
}

impl std::fmt::Display for Worksheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Staff => write!(f, "staff"),
            Self::Department => write!(f, "department"),
            Self::Customer => write!(f, "customer"),
        }
    }
}

/// One record in a worksheet, as returned by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformRow {
    pub row_id: RowId,
    pub worksheet: Worksheet,
    pub fields: serde_json::Map<String, Value>,
}

impl PlatformRow {
    /// Read a field as a string. Non-string scalars are rendered, arrays and
    /// objects are returned as their JSON text.
    #[must_use]
    pub fn text(&self, field_id: &str) -> Option<String> {
        match self.fields.get(field_id)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Whether the field holds a non-empty value.
    #[must_use]
    pub fn has_value(&self, field_id: &str) -> bool {
        self.text(field_id).is_some_and(|s| !s.is_empty() && s != "[]")
    }

    /// Build a row from a raw JSON object, picking up the row ID from
    /// whichever key the protocol generation uses.
    pub(crate) fn from_raw(worksheet: Worksheet, raw: serde_json::Map<String, Value>) -> Option<Self> {
        let row_id = ["rowid", "rowId", "id"]
            .iter()
            .find_map(|k| raw.get(*k).and_then(|v| v.as_str()))
            .map(str::to_string)?;
        Some(Self { row_id, worksheet, fields: raw })
    }
}

/// Page request. `index` is 1-based, as the platform expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub size: u32,
    pub index: u32,
}

impl Page {
    #[must_use]
    pub fn new(size: u32, index: u32) -> Self {
        Self { size: size.max(1), index: index.max(1) }
    }

    /// A single-row page, used for lookups by unique key.
    #[must_use]
    pub fn first() -> Self {
        Self::new(1, 1)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(10, 1)
    }
}

/// A page of filtered rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowPage {
    pub rows: Vec<PlatformRow>,
    pub total: u64,
}

/// One field of a worksheet schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SchemaOption>,
}

/// Option of a dropdown or multi-select field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaOption {
    pub key: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_worksheet_alias() {
        assert_eq!(Worksheet::Staff.alias(), "starstaffinfo");
        assert_eq!(Worksheet::Department.alias(), "stardeptinfo");
        assert_eq!(Worksheet::Customer.alias(), "starclientinfo");
    }

    #[test]
    fn test_row_from_raw_picks_any_id_key() {
        let raw = json!({"rowid": "r-1", "name": "Sales"});
        let row = PlatformRow::from_raw(Worksheet::Department, raw.as_object().unwrap().clone()).unwrap();
        assert_eq!(row.row_id, "r-1");

        let raw = json!({"id": "r-2"});
        let row = PlatformRow::from_raw(Worksheet::Staff, raw.as_object().unwrap().clone()).unwrap();
        assert_eq!(row.row_id, "r-2");

        let raw = json!({"name": "no id"});
        assert!(PlatformRow::from_raw(Worksheet::Staff, raw.as_object().unwrap().clone()).is_none());
    }

    #[test]
    fn test_row_text_and_has_value() {
        let raw = json!({"rowid": "r", "a": "x", "b": "", "c": 3, "d": [], "e": null});
        let row = PlatformRow::from_raw(Worksheet::Customer, raw.as_object().unwrap().clone()).unwrap();
        assert_eq!(row.text("a").as_deref(), Some("x"));
        assert_eq!(row.text("c").as_deref(), Some("3"));
        assert!(row.has_value("a"));
        assert!(!row.has_value("b"));
        assert!(!row.has_value("d"));
        assert!(!row.has_value("e"));
        assert!(!row.has_value("missing"));
    }

    #[test]
    fn test_page_clamps_to_one() {
        let page = Page::new(0, 0);
        assert_eq!(page, Page { size: 1, index: 1 });
    }
}
