// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filter AST for filtered row reads.
//!
//! Callers build a canonical filter once; each protocol generation owns a
//! translator that turns it into its wire format.
//!
//! # Example
//!
//! ```rust
//! use directory_sync::record_store::{Filter, FilterBuilder};
//!
//! // Lookup by external ID
//! let filter = Filter::eq("wecom_staff_id", "zhangsan");
//!
//! // Phone OR customer number contains a keyword
//! let filter = FilterBuilder::new()
//!     .contains("phone", "138")
//!     .contains("customer_no", "138")
//!     .build_or();
//!
//! // Boolean combinations
//! let filter = Filter::eq("status", "active")
//!     .and(Filter::range("created", Some("2024-01-01"), None));
//! ```

use serde::{Deserialize, Serialize};

/// Filter AST
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub root: FilterNode,
}

impl Filter {
    pub fn new(root: FilterNode) -> Self {
        Self { root }
    }

    fn field(field: impl Into<String>, operator: FieldOperator, value: FilterValue) -> Self {
        Self::new(FilterNode::Field(FieldFilter {
            field: field.into(),
            operator,
            value,
        }))
    }

    /// Field equals value
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::field(field, FieldOperator::Equals, FilterValue::Text(value.into()))
    }

    /// Field contains text
    pub fn contains(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self::field(field, FieldOperator::Contains, FilterValue::Text(text.into()))
    }

    /// Field within `[min, max]`; either bound may be open
    pub fn range(field: impl Into<String>, min: Option<&str>, max: Option<&str>) -> Self {
        Self::field(
            field,
            FieldOperator::Range,
            FilterValue::Range {
                min: min.map(str::to_string),
                max: max.map(str::to_string),
            },
        )
    }

    /// Field equals any of the values
    pub fn any_of(field: impl Into<String>, values: Vec<String>) -> Self {
        Self::field(field, FieldOperator::In, FilterValue::Values(values))
    }

    /// Combine with AND
    pub fn and(self, other: Filter) -> Self {
        Self::new(FilterNode::And(vec![self.root, other.root]))
    }

    /// Combine with OR
    pub fn or(self, other: Filter) -> Self {
        Self::new(FilterNode::Or(vec![self.root, other.root]))
    }

    /// Evaluate against a row's fields. Used by the in-memory store.
    pub fn matches(&self, fields: &serde_json::Map<String, serde_json::Value>) -> bool {
        self.root.matches(fields)
    }
}

/// Filter AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterNode {
    Field(FieldFilter),
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
}

impl FilterNode {
    fn matches(&self, fields: &serde_json::Map<String, serde_json::Value>) -> bool {
        match self {
            Self::Field(f) => f.matches(fields),
            Self::And(nodes) => nodes.iter().all(|n| n.matches(fields)),
            Self::Or(nodes) => nodes.iter().any(|n| n.matches(fields)),
        }
    }
}

/// Single-field condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Platform field ID or alias
    pub field: String,
    pub operator: FieldOperator,
    pub value: FilterValue,
}

impl FieldFilter {
    fn matches(&self, fields: &serde_json::Map<String, serde_json::Value>) -> bool {
        let actual = match fields.get(&self.field) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        match (&self.operator, &self.value) {
            (FieldOperator::Equals, FilterValue::Text(v)) => actual == *v,
            (FieldOperator::Contains, FilterValue::Text(v)) => actual.contains(v.as_str()),
            (FieldOperator::Range, FilterValue::Range { min, max }) => {
                min.as_ref().map_or(true, |m| actual.as_str() >= m.as_str())
                    && max.as_ref().map_or(true, |m| actual.as_str() <= m.as_str())
            }
            (FieldOperator::In, FilterValue::Values(vs)) => vs.iter().any(|v| *v == actual),
            _ => false,
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldOperator {
    Equals,
    Contains,
    Range,
    In,
}

/// Filter operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    Text(String),
    Range { min: Option<String>, max: Option<String> },
    Values(Vec<String>),
}

/// Builder for multi-condition filters
#[derive(Default)]
pub struct FilterBuilder {
    nodes: Vec<FilterNode>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.nodes.push(Filter::eq(field, value).root);
        self
    }

    pub fn contains(mut self, field: impl Into<String>, text: impl Into<String>) -> Self {
        self.nodes.push(Filter::contains(field, text).root);
        self
    }

    pub fn range(mut self, field: impl Into<String>, min: Option<&str>, max: Option<&str>) -> Self {
        self.nodes.push(Filter::range(field, min, max).root);
        self
    }

    pub fn any_of(mut self, field: impl Into<String>, values: Vec<String>) -> Self {
        self.nodes.push(Filter::any_of(field, values).root);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.nodes.push(filter.root);
        self
    }

    /// Build with AND semantics
    pub fn build_and(self) -> Filter {
        Filter::new(FilterNode::And(self.nodes))
    }

    /// Build with OR semantics
    pub fn build_or(self) -> Filter {
        Filter::new(FilterNode::Or(self.nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_eq_builds_field_node() {
        let filter = Filter::eq("dept_id", "1001");
        match filter.root {
            FilterNode::Field(f) => {
                assert_eq!(f.field, "dept_id");
                assert_eq!(f.operator, FieldOperator::Equals);
                assert_eq!(f.value, FilterValue::Text("1001".into()));
            }
            _ => panic!("expected field node"),
        }
    }

    #[test]
    fn test_builder_and_or() {
        let filter = FilterBuilder::new().eq("a", "1").contains("b", "x").build_and();
        assert!(matches!(filter.root, FilterNode::And(ref n) if n.len() == 2));

        let filter = FilterBuilder::new().eq("a", "1").eq("a", "2").build_or();
        assert!(matches!(filter.root, FilterNode::Or(ref n) if n.len() == 2));
    }

    #[test]
    fn test_matches_equals_and_contains() {
        let row = fields(json!({"name": "Sales Dept", "id": "1001", "n": 7}));
        assert!(Filter::eq("id", "1001").matches(&row));
        assert!(!Filter::eq("id", "1002").matches(&row));
        assert!(Filter::contains("name", "Sales").matches(&row));
        assert!(Filter::eq("n", "7").matches(&row));
        assert!(!Filter::eq("missing", "x").matches(&row));
    }

    #[test]
    fn test_matches_range_and_in() {
        let row = fields(json!({"date": "2024-05-01", "status": "b"}));
        assert!(Filter::range("date", Some("2024-01-01"), Some("2024-12-31")).matches(&row));
        assert!(!Filter::range("date", Some("2024-06-01"), None).matches(&row));
        assert!(Filter::any_of("status", vec!["a".into(), "b".into()]).matches(&row));
        assert!(!Filter::any_of("status", vec!["c".into()]).matches(&row));
    }

    #[test]
    fn test_matches_boolean_groups() {
        let row = fields(json!({"a": "1", "b": "2"}));
        assert!(Filter::eq("a", "1").and(Filter::eq("b", "2")).matches(&row));
        assert!(!Filter::eq("a", "1").and(Filter::eq("b", "3")).matches(&row));
        assert!(Filter::eq("a", "9").or(Filter::eq("b", "2")).matches(&row));
    }
}
