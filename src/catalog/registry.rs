//! Registry of tables under version control.

use std::collections::BTreeMap;

use super::schema::{SchemaError, TableSchema};
use crate::storage::TableName;

/// The set of tracked tables and their schemas.
#[derive(Debug, Clone, Default)]
pub struct TrackedTables {
    tables: BTreeMap<TableName, TableSchema>,
}

impl TrackedTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table.
    ///
    /// Returns `false` when the identical schema was already tracked. A
    /// different schema under the same name is rejected.
    pub fn track(&mut self, schema: TableSchema) -> Result<bool, SchemaError> {
        schema.validate()?;

        if let Some(existing) = self.tables.get(&schema.name) {
            if existing == &schema {
                return Ok(false);
            }
            return Err(SchemaError::TableExists(schema.name.to_string()));
        }

        self.tables.insert(schema.name.clone(), schema);
        Ok(true)
    }

    pub fn get(&self, name: &TableName) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &TableName) -> bool {
        self.tables.contains_key(name)
    }

    /// schemas in table-name order
    pub fn iter(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &TableName> {
        self.tables.keys()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
