// SPDX-License-Identifier: PMPL-1.0-or-later
//! Row representation and equality filters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RepositoryError;

/// A stored row: a JSON object with at least `id`, `created_at` and
/// `updated_at`.
pub type Row = Map<String, Value>;

pub const ID_COLUMN: &str = "id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Equality filter with an optional row limit.
///
/// The limit applies after tenant filtering, so it never counts rows the
/// actor cannot see.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowQuery {
    #[serde(default)]
    pub equals: Row,
    pub limit: Option<usize>,
}

impl RowQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::all().eq(ID_COLUMN, Value::String(id.to_string()))
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.equals.insert(field.to_string(), value.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.equals
            .iter()
            .all(|(field, expected)| row.get(field) == Some(expected))
    }
}

pub(crate) fn row_id(row: &Row) -> Result<&str, RepositoryError> {
    row.get(ID_COLUMN)
        .and_then(Value::as_str)
        .ok_or_else(|| RepositoryError::InvalidRow("stored row has no id".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_matches() {
        let r = row(json!({"id": "c1", "name": "Ada", "tenant_id": "acme"}));
        assert!(RowQuery::all().matches(&r));
        assert!(RowQuery::by_id("c1").matches(&r));
        assert!(RowQuery::all().eq("tenant_id", "acme").eq("name", "Ada").matches(&r));
        assert!(!RowQuery::all().eq("name", "Grace").matches(&r));
        assert!(!RowQuery::all().eq("missing", Value::Null).matches(&r));
    }

    #[test]
    fn test_query_deserializes_without_equals() {
        let q: RowQuery = serde_json::from_value(json!({"limit": 5})).unwrap();
        assert!(q.equals.is_empty());
        assert_eq!(q.limit, Some(5));
    }
}
