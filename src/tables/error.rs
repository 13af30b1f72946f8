//! Table store error types

use serde_json::Value;
use thiserror::Error;

use super::NamespaceId;
use crate::catalog::SchemaError;
use crate::error::VcError;
use crate::storage::TableName;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("namespace not found: {0}")]
    UnknownNamespace(NamespaceId),

    #[error("namespace already exists: {0}")]
    NamespaceExists(NamespaceId),

    #[error("table {table} not found in namespace {namespace}")]
    UnknownTable { namespace: NamespaceId, table: TableName },

    #[error("table already exists: {0}")]
    TableExists(TableName),

    #[error("duplicate value for {table}.{column}: {key}")]
    DuplicateKey {
        table: TableName,
        column: String,
        key: Value,
    },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// a write listener refused the write
    #[error("write hook failed: {0}")]
    Hook(Box<VcError>),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::UnknownNamespace(_) | StoreError::UnknownTable { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        self.is_key_conflict()
            || matches!(
                self,
                StoreError::TableExists(_) | StoreError::NamespaceExists(_)
            )
    }

    /// a row clashed with another on a unique column
    pub fn is_key_conflict(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
