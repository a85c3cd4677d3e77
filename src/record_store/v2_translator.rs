// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! V2 Filter Translator
//!
//! Translates the filter AST into the flat condition list accepted by
//! `/v2/open/worksheet/getFilterRows`.
//!
//! # Wire Format
//!
//! ```text
//! {controlId, dataType, spliceType, filterType, value}       -- Equals / Contains
//! {controlId, dataType, spliceType, filterType, minValue, maxValue}  -- Range
//! {controlId, dataType, spliceType, filterType, values}      -- In
//! {isGroup: true, spliceType, groupFilters: [...]}          -- Nested group
//! ```
//!
//! `spliceType` joins a condition to the one before it: 1 = AND, 2 = OR.

use serde_json::{json, Map, Value};

use super::filter::{FieldFilter, FieldOperator, Filter, FilterNode, FilterValue};

const SPLICE_AND: u8 = 1;
const SPLICE_OR: u8 = 2;

/// Text control
const DATA_TYPE_TEXT: u8 = 2;

const FILTER_EQUALS: u8 = 1;
const FILTER_IN: u8 = 2;
const FILTER_BETWEEN: u8 = 11;
const FILTER_CONTAINS: u8 = 13;

/// V2 filter translator
pub struct V2Translator;

impl V2Translator {
    /// Translate the filter AST into the `filters` array.
    pub fn translate(filter: &Filter) -> Vec<Value> {
        match &filter.root {
            FilterNode::And(nodes) => Self::translate_list(nodes, SPLICE_AND),
            FilterNode::Or(nodes) => Self::translate_list(nodes, SPLICE_OR),
            node @ FilterNode::Field(_) => Self::translate_list(std::slice::from_ref(node), SPLICE_AND),
        }
    }

    fn translate_list(nodes: &[FilterNode], splice: u8) -> Vec<Value> {
        nodes.iter().map(|n| Self::translate_node(n, splice)).collect()
    }

    fn translate_node(node: &FilterNode, splice: u8) -> Value {
        match node {
            FilterNode::Field(field) => Self::translate_field(field, splice),
            FilterNode::And(nodes) => json!({
                "isGroup": true,
                "spliceType": splice,
                "groupFilters": Self::translate_list(nodes, SPLICE_AND),
            }),
            FilterNode::Or(nodes) => json!({
                "isGroup": true,
                "spliceType": splice,
                "groupFilters": Self::translate_list(nodes, SPLICE_OR),
            }),
        }
    }

    fn translate_field(field: &FieldFilter, splice: u8) -> Value {
        let mut condition = Map::new();
        condition.insert("controlId".into(), json!(field.field));
        condition.insert("dataType".into(), json!(DATA_TYPE_TEXT));
        condition.insert("spliceType".into(), json!(splice));

        match (&field.operator, &field.value) {
            (FieldOperator::Equals, FilterValue::Text(text)) => {
                condition.insert("filterType".into(), json!(FILTER_EQUALS));
                condition.insert("value".into(), json!(text));
            }
            (FieldOperator::Contains, FilterValue::Text(text)) => {
                condition.insert("filterType".into(), json!(FILTER_CONTAINS));
                condition.insert("value".into(), json!(text));
            }
            (FieldOperator::Range, FilterValue::Range { min, max }) => {
                condition.insert("filterType".into(), json!(FILTER_BETWEEN));
                if let Some(min) = min {
                    condition.insert("minValue".into(), json!(min));
                }
                if let Some(max) = max {
                    condition.insert("maxValue".into(), json!(max));
                }
            }
            (FieldOperator::In, FilterValue::Values(values)) => {
                condition.insert("filterType".into(), json!(FILTER_IN));
                condition.insert("values".into(), json!(values));
            }
            (_, value) => {
                // Operator/operand mismatch: fall back to equality on the text form
                condition.insert("filterType".into(), json!(FILTER_EQUALS));
                condition.insert("value".into(), json!(Self::fallback_text(value)));
            }
        }

        Value::Object(condition)
    }

    fn fallback_text(value: &FilterValue) -> String {
        match value {
            FilterValue::Text(text) => text.clone(),
            FilterValue::Values(values) => values.first().cloned().unwrap_or_default(),
            FilterValue::Range { min, .. } => min.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::FilterBuilder;

    #[test]
    fn test_single_equals() {
        let filters = V2Translator::translate(&Filter::eq("wecom_staff_id", "zhangsan"));
        assert_eq!(
            filters,
            vec![json!({
                "controlId": "wecom_staff_id",
                "dataType": 2,
                "spliceType": 1,
                "filterType": 1,
                "value": "zhangsan"
            })]
        );
    }

    #[test]
    fn test_or_of_contains() {
        let filter = FilterBuilder::new()
            .contains("692f976f7001b729cd1c01c1", "138")
            .contains("693660e95326c71216b1b87a", "138")
            .build_or();
        let filters = V2Translator::translate(&filter);
        assert_eq!(filters.len(), 2);
        for condition in &filters {
            assert_eq!(condition["spliceType"], 2);
            assert_eq!(condition["filterType"], 13);
            assert_eq!(condition["value"], "138");
        }
    }

    #[test]
    fn test_range_with_open_bound() {
        let filters = V2Translator::translate(&Filter::range("ctime", Some("2024-01-01"), None));
        assert_eq!(filters[0]["filterType"], 11);
        assert_eq!(filters[0]["minValue"], "2024-01-01");
        assert!(filters[0].get("maxValue").is_none());
    }

    #[test]
    fn test_in_values() {
        let filters = V2Translator::translate(&Filter::any_of("dept", vec!["1".into(), "2".into()]));
        assert_eq!(filters[0]["filterType"], 2);
        assert_eq!(filters[0]["values"], json!(["1", "2"]));
    }

    #[test]
    fn test_nested_group() {
        let filter = Filter::eq("status", "active")
            .and(Filter::eq("a", "1").or(Filter::eq("b", "2")));
        let filters = V2Translator::translate(&filter);
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[1]["isGroup"], true);
        assert_eq!(filters[1]["spliceType"], 1);
        let group = filters[1]["groupFilters"].as_array().unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group[1]["spliceType"], 2);
    }
}
