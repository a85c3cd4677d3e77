// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! V3 Filter Translator
//!
//! Translates the filter AST into the recursive filter tree accepted by
//! `/v3/app/worksheets/{id}/rows/list`.
//!
//! ```text
//! {type: "group", logic: "AND" | "OR", children: [...]}
//! {type: "condition", field, operator: "eq" | "contains" | "between" | "in", value: [...]}
//! ```
//!
//! The root is always a group.

use serde_json::{json, Value};

use super::filter::{FieldFilter, FieldOperator, Filter, FilterNode, FilterValue};

/// V3 filter translator
pub struct V3Translator;

impl V3Translator {
    /// Translate the filter AST into a group node.
    pub fn translate(filter: &Filter) -> Value {
        match &filter.root {
            node @ FilterNode::Field(_) => Self::group("AND", std::slice::from_ref(node)),
            node => Self::translate_node(node),
        }
    }

    fn translate_node(node: &FilterNode) -> Value {
        match node {
            FilterNode::Field(field) => Self::translate_field(field),
            FilterNode::And(nodes) => Self::group("AND", nodes),
            FilterNode::Or(nodes) => Self::group("OR", nodes),
        }
    }

    fn group(logic: &str, nodes: &[FilterNode]) -> Value {
        let children: Vec<Value> = nodes.iter().map(Self::translate_node).collect();
        json!({
            "type": "group",
            "logic": logic,
            "children": children,
        })
    }

    fn translate_field(field: &FieldFilter) -> Value {
        let (operator, value) = match (&field.operator, &field.value) {
            (FieldOperator::Equals, FilterValue::Text(text)) => ("eq", json!([text])),
            (FieldOperator::Contains, FilterValue::Text(text)) => ("contains", json!([text])),
            (FieldOperator::Range, FilterValue::Range { min, max }) => {
                // Open bounds are sent as empty strings
                let min = min.clone().unwrap_or_default();
                let max = max.clone().unwrap_or_default();
                ("between", json!([min, max]))
            }
            (FieldOperator::In, FilterValue::Values(values)) => ("in", json!(values)),
            (_, FilterValue::Text(text)) => ("eq", json!([text])),
            (_, FilterValue::Values(values)) => ("in", json!(values)),
            (_, FilterValue::Range { min, max }) => (
                "between",
                json!([min.clone().unwrap_or_default(), max.clone().unwrap_or_default()]),
            ),
        };

        json!({
            "type": "condition",
            "field": field.field,
            "operator": operator,
            "value": value,
        })
    }
}
