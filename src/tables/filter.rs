//! Row selection for update, delete and select.

use serde_json::Value;

use crate::catalog::TableSchema;
use crate::storage::ColumnMap;

/// A conjunction of column equalities. The empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// match every row
    pub fn all() -> Self {
        Self::default()
    }

    /// match rows whose `column` equals `value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(column, value)
    }

    /// add another equality
    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Test a stored row. Condition values are normalized with the column's
    /// type first, so `eq("active", "t")` matches a stored `true`.
    pub fn matches(&self, schema: &TableSchema, row: &ColumnMap) -> bool {
        self.conditions.iter().all(|(column, expected)| {
            let expected = match schema.get_column(column) {
                Some(col) => col.data_type.normalize(expected.clone()),
                None => return false,
            };
            row.get(column).unwrap_or(&Value::Null) == &expected
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DataType, SchemaBuilder};
    use serde_json::json;

    fn schema() -> TableSchema {
        SchemaBuilder::new("users")
            .primary_key("id", DataType::Integer)
            .add_column("name", DataType::Text)
            .add_column("is_admin", DataType::Boolean)
            .build()
            .unwrap()
    }

    fn row() -> ColumnMap {
        ColumnMap::from([
            ("id".to_string(), json!(10)),
            ("name".to_string(), json!("Gomez")),
            ("is_admin".to_string(), json!(false)),
        ])
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::all().matches(&schema(), &row()));
    }

    #[test]
    fn test_conjunction() {
        assert!(Filter::eq("name", "Gomez").and("id", 10).matches(&schema(), &row()));
        assert!(!Filter::eq("name", "Gomez").and("id", 11).matches(&schema(), &row()));
    }

    #[test]
    fn test_condition_values_are_normalized() {
        assert!(Filter::eq("is_admin", "f").matches(&schema(), &row()));
        assert!(Filter::eq("id", "10").matches(&schema(), &row()));
    }

    #[test]
    fn test_unknown_column_never_matches() {
        assert!(!Filter::eq("email", "x").matches(&schema(), &row()));
    }
}
