//! Storage layer error types
//!
//! Errors raised while hashing rows or talking to the git object database.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{Digest, InvalidNameError};

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// no row with this digest exists in the row store
    #[error("row not found: {0}")]
    NotFound(Digest),

    /// a digest maps to two different payloads
    #[error("hash collision on {hash}: {detail}")]
    HashCollision { hash: Digest, detail: String },

    /// a stored blob could not be decoded back into a row
    #[error("corrupted row {hash}: {reason}")]
    CorruptedData { hash: Digest, reason: String },

    /// invalid table name inside a stored row
    #[error("invalid table name: {0}")]
    InvalidTableName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// no row store exists at the path
    #[error("row store not initialized: {0}")]
    NotInitialized(PathBuf),
}

impl StorageError {
    /// check if this error indicates the row doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// a collision or corrupted blob means the store can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::HashCollision { .. } | StorageError::CorruptedData { .. }
        )
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
