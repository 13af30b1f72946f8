//! Data types and constraints for schema definitions.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Column data types understood by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Text/string data.
    Text,
    /// 64-bit integers.
    Integer,
    /// Floating point numbers.
    Float,
    /// Boolean values.
    Boolean,
    /// JSON objects or arrays.
    Json,
    /// Timestamps (stored as RFC 3339 strings in UTC).
    Timestamp,
    /// UUIDs (stored as lowercase strings).
    Uuid,
}

impl DataType {
    /// Check if a JSON value matches this data type.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (DataType::Text, Value::String(_)) => true,
            (DataType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (DataType::Float, Value::Number(_)) => true,
            (DataType::Boolean, Value::Bool(_)) => true,
            (DataType::Json, Value::Object(_) | Value::Array(_)) => true,
            (DataType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s).is_ok(),
            (DataType::Uuid, Value::String(s)) => {
                // 8-4-4-4-12
                s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4
            }
            _ => false,
        }
    }

    /// Bring a value into the single representation this type hashes as.
    ///
    /// Surface forms that mean the same thing (`"t"`, `"true"`, `1` for a
    /// boolean; `"42"` for an integer; `42` for a float) collapse to one JSON
    /// value. Values that cannot be interpreted are returned unchanged and
    /// left for [`DataType::matches`] to reject.
    pub fn normalize(&self, value: Value) -> Value {
        match (self, value) {
            (DataType::Boolean, Value::String(s)) => match parse_bool(&s) {
                Some(b) => Value::Bool(b),
                None => Value::String(s),
            },
            (DataType::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(0) => Value::Bool(false),
                Some(1) => Value::Bool(true),
                _ => Value::Number(n),
            },
            (DataType::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Value::from(i),
                Err(_) => Value::String(s),
            },
            (DataType::Integer, Value::Number(n)) => match n.as_f64() {
                Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Value::from(f as i64)
                }
                _ => Value::Number(n),
            },
            (DataType::Float, Value::Number(n)) => match n.as_f64().and_then(Number::from_f64) {
                Some(f) => Value::Number(f),
                None => Value::Number(n),
            },
            (DataType::Float, Value::String(s)) => {
                match s.trim().parse::<f64>().ok().and_then(Number::from_f64) {
                    Some(f) => Value::Number(f),
                    None => Value::String(s),
                }
            }
            (DataType::Timestamp, Value::String(s)) => match DateTime::parse_from_rfc3339(&s) {
                Ok(ts) => Value::String(
                    ts.with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                ),
                Err(_) => Value::String(s),
            },
            (DataType::Uuid, Value::String(s)) => Value::String(s.to_ascii_lowercase()),
            (_, other) => other,
        }
    }

    /// Get the SQL name for this type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            DataType::Text => "TEXT",
            DataType::Integer => "INTEGER",
            DataType::Float => "REAL",
            DataType::Boolean => "BOOLEAN",
            DataType::Json => "JSON",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Uuid => "UUID",
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "y" | "yes" | "on" => Some(true),
        "f" | "false" | "0" | "n" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

/// Column constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    /// Column cannot be null.
    NotNull,
    /// Column values must be unique across all rows.
    Unique,
    /// Column is the primary key (implies NotNull + Unique).
    PrimaryKey,
    /// Default value for the column.
    Default(Value),
}

impl Constraint {
    pub fn is_not_null(&self) -> bool {
        matches!(self, Constraint::NotNull | Constraint::PrimaryKey)
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, Constraint::Unique | Constraint::PrimaryKey)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::NotNull => write!(f, "NOT NULL"),
            Constraint::Unique => write!(f, "UNIQUE"),
            Constraint::PrimaryKey => write!(f, "PRIMARY KEY"),
            Constraint::Default(v) => write!(f, "DEFAULT {}", v),
        }
    }
}

/// Full column definition including name, type, and constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Data type.
    pub data_type: DataType,
    /// Constraints on this column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
}

impl ColumnDef {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
        }
    }

    /// Add a constraint to this column.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn is_nullable(&self) -> bool {
        !self.constraints.iter().any(|c| c.is_not_null())
    }

    pub fn is_unique(&self) -> bool {
        self.constraints.iter().any(|c| c.is_unique())
    }

    /// Get the default value, if any.
    pub fn default_value(&self) -> Option<&Value> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Default(v) => Some(v),
            _ => None,
        })
    }

    /// Validate an already-normalized value against this column definition.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            if !self.is_nullable() {
                return Err(format!("column '{}' cannot be null", self.name));
            }
            return Ok(());
        }

        if !self.data_type.matches(value) {
            return Err(format!(
                "column '{}' expects type {}, got {}",
                self.name, self.data_type, value
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        for constraint in &self.constraints {
            write!(f, " {}", constraint)?;
        }
        Ok(())
    }
}
