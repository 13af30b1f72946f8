//! Table schema definitions and row preparation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ColumnDef, Constraint, DataType};
use crate::storage::{ColumnMap, InvalidNameError, TableName};

/// Table schema definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: TableName,
    /// Column definitions.
    pub columns: Vec<ColumnDef>,
    /// Primary key column name. Merges detect conflicts on this column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// Table description/comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TableSchema {
    /// Create a new table schema.
    pub fn new(name: TableName, columns: Vec<ColumnDef>) -> Self {
        Self {
            name,
            columns,
            primary_key: None,
            description: None,
        }
    }

    /// Get a column definition by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns whose values must be unique: the primary key first, then
    /// every column with a unique constraint.
    pub fn unique_columns(&self) -> Vec<&str> {
        let pk = self.primary_key.as_deref();
        pk.into_iter()
            .chain(
                self.columns
                    .iter()
                    .filter(|c| c.is_unique() && Some(c.name.as_str()) != pk)
                    .map(|c| c.name.as_str()),
            )
            .collect()
    }

    /// Primary key value of a prepared row.
    pub fn primary_key_of<'a>(&self, row: &'a ColumnMap) -> Option<&'a Value> {
        let pk = self.primary_key.as_deref()?;
        row.get(pk).filter(|v| !v.is_null())
    }

    /// an integer primary key is filled in automatically when omitted
    pub fn has_serial_key(&self) -> bool {
        self.primary_key
            .as_deref()
            .and_then(|pk| self.get_column(pk))
            .is_some_and(|col| col.data_type == DataType::Integer)
    }

    /// Validate the schema itself (e.g., primary key exists).
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for col in &self.columns {
            if !seen.insert(&col.name) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
        }

        if let Some(pk) = &self.primary_key {
            if !self.columns.iter().any(|c| &c.name == pk) {
                return Err(SchemaError::InvalidPrimaryKey(pk.clone()));
            }
        }

        Ok(())
    }

    /// Turn caller-supplied values into a complete, normalized row.
    ///
    /// Omitted columns get their default, the serial key gets `next_serial`,
    /// anything else omitted becomes `null`. Every value is normalized for
    /// its column type and then validated.
    pub fn prepare(&self, mut values: ColumnMap, next_serial: i64) -> Result<ColumnMap, SchemaError> {
        self.reject_unknown(&values)?;

        let serial = if self.has_serial_key() {
            self.primary_key.as_deref()
        } else {
            None
        };

        let mut row = ColumnMap::new();
        for col in &self.columns {
            let value = match values.remove(&col.name) {
                Some(v) => v,
                None if serial == Some(col.name.as_str()) => Value::from(next_serial),
                None => col.default_value().cloned().unwrap_or(Value::Null),
            };
            row.insert(col.name.clone(), self.normalized(col, value)?);
        }
        Ok(row)
    }

    /// Apply `changes` on top of an existing prepared row.
    pub fn prepare_update(&self, current: &ColumnMap, changes: &ColumnMap) -> Result<ColumnMap, SchemaError> {
        self.reject_unknown(changes)?;

        let mut row = current.clone();
        for (name, value) in changes {
            // reject_unknown guarantees the column exists
            if let Some(col) = self.get_column(name) {
                row.insert(name.clone(), self.normalized(col, value.clone())?);
            }
        }
        Ok(row)
    }

    fn normalized(&self, col: &ColumnDef, value: Value) -> Result<Value, SchemaError> {
        let value = col.data_type.normalize(value);
        col.validate(&value).map_err(SchemaError::InvalidRow)?;
        Ok(value)
    }

    fn reject_unknown(&self, values: &ColumnMap) -> Result<(), SchemaError> {
        match values.keys().find(|name| self.get_column(name).is_none()) {
            Some(name) => Err(SchemaError::UnknownColumn {
                table: self.name.to_string(),
                column: name.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Schema-related errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("invalid primary key reference: {0}")]
    InvalidPrimaryKey(String),

    #[error("table {table} has no column {column}")]
    UnknownColumn { table: String, column: String },

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("table already tracked with a different schema: {0}")]
    TableExists(String),

    #[error("invalid table name: {0}")]
    InvalidName(#[from] InvalidNameError),
}

/// Builder for creating table schemas.
pub struct SchemaBuilder {
    name: String,
    columns: Vec<ColumnDef>,
    primary_key: Option<String>,
    description: Option<String>,
}

impl SchemaBuilder {
    /// Start building a new schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            description: None,
        }
    }

    /// Add a column.
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a simple column with just name and type.
    pub fn add_column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(ColumnDef::new(name, data_type));
        self
    }

    /// Add a non-nullable column.
    pub fn add_required_column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns
            .push(ColumnDef::new(name, data_type).with_constraint(Constraint::NotNull));
        self
    }

    /// Add the primary key column.
    pub fn primary_key(mut self, column_name: impl Into<String>, data_type: DataType) -> Self {
        let column_name = column_name.into();
        self.columns.push(
            ColumnDef::new(column_name.clone(), data_type).with_constraint(Constraint::PrimaryKey),
        );
        self.primary_key = Some(column_name);
        self
    }

    /// Mark an already added column as the primary key.
    pub fn key(mut self, column_name: impl Into<String>) -> Self {
        self.primary_key = Some(column_name.into());
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Build the schema.
    pub fn build(self) -> Result<TableSchema, SchemaError> {
        let mut schema = TableSchema::new(TableName::new(self.name)?, self.columns);
        schema.primary_key = self.primary_key;
        schema.description = self.description;
        schema.validate()?;
        Ok(schema)
    }
}
