//! Engine error types.

use thiserror::Error;

use crate::catalog::SchemaError;
use crate::db::ConfigError;
use crate::history::CommitId;
use crate::refs::BranchName;
use crate::storage::{Digest, InvalidNameError, StorageError, TableName};
use crate::tables::{NamespaceId, StoreError};
use crate::vc::MergeConflict;

/// Result type for engine operations.
pub type VcResult<T> = Result<T, VcError>;

/// Errors surfaced by the version-control engine.
#[derive(Debug, Error)]
pub enum VcError {
    #[error("branch already exists: {0}")]
    DuplicateBranch(BranchName),

    #[error("unknown branch: {0}")]
    UnknownBranch(String),

    #[error("the default branch cannot be deleted: {0}")]
    CannotDeleteDefault(BranchName),

    /// A row change was aimed at a commit that is already closed.
    #[error("commit {0} is closed and cannot take row changes")]
    CommitClosed(CommitId),

    #[error("commit {0} is already closed")]
    AlreadyClosed(CommitId),

    #[error("commit {0} is still open")]
    CommitOpen(CommitId),

    #[error("unknown commit: {0}")]
    UnknownCommit(CommitId),

    #[error("row not found in the row store: {0}")]
    NotFound(Digest),

    /// Two payloads share a digest. The row store can no longer be trusted.
    #[error("hash collision on {hash}: {detail}")]
    HashCollision { hash: Digest, detail: String },

    /// The merge would leave two rows sharing a key or unique value.
    #[error("merge conflict on {}", conflicts_display(.conflicts))]
    MergeConflict { conflicts: Vec<MergeConflict> },

    /// A tracked table would hold two identical rows.
    #[error("table {table} already holds row {row}")]
    DuplicateRow { table: TableName, row: Digest },

    #[error("branch {0} has uncommitted changes")]
    UncommittedChanges(BranchName),

    #[error("table is not tracked: {0}")]
    UntrackedTable(TableName),

    #[error("namespace {0} belongs to a branch")]
    NamespaceInUse(NamespaceId),

    #[error("commits {0} and {1} share no ancestor")]
    NoCommonAncestor(CommitId, CommitId),

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("table store error: {0}")]
    Store(StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn conflicts_display(conflicts: &[MergeConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl VcError {
    /// the engine must stop; retrying cannot help
    pub fn is_fatal(&self) -> bool {
        matches!(self, VcError::HashCollision { .. })
    }

    /// a merge conflict or a key clash in the table store
    pub fn is_conflict(&self) -> bool {
        match self {
            VcError::MergeConflict { .. } => true,
            VcError::Store(e) => e.is_key_conflict(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VcError::UnknownBranch(_) | VcError::UnknownCommit(_) | VcError::NotFound(_)
        ) || matches!(self, VcError::Store(e) if e.is_not_found())
    }

    /// conflicts carried by a merge failure, empty otherwise
    pub fn conflicts(&self) -> &[MergeConflict] {
        match self {
            VcError::MergeConflict { conflicts } => conflicts,
            _ => &[],
        }
    }
}

impl From<StorageError> for VcError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(hash) => VcError::NotFound(hash),
            StorageError::HashCollision { hash, detail } => VcError::HashCollision { hash, detail },
            other => VcError::Storage(other),
        }
    }
}

impl From<StoreError> for VcError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Hook(inner) => *inner,
            other => VcError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_are_lifted() {
        let hash = Digest::from_hex("8ab686eafeb1f44702738c8b0f24f2567c36da6d").unwrap();

        let err: VcError = StorageError::NotFound(hash).into();
        assert!(matches!(err, VcError::NotFound(_)));
        assert!(err.is_not_found());

        let err: VcError = StorageError::HashCollision {
            hash,
            detail: "differs".to_string(),
        }
        .into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_only_key_clashes_are_conflicts() {
        let table = TableName::new("users").unwrap();
        let clash: VcError = StoreError::DuplicateKey {
            table: table.clone(),
            column: "id".to_string(),
            key: serde_json::json!(1),
        }
        .into();
        assert!(clash.is_conflict());
        assert!(VcError::MergeConflict { conflicts: Vec::new() }.is_conflict());

        let branch = BranchName::new("primary").unwrap();
        assert!(!VcError::DuplicateBranch(branch.clone()).is_conflict());
        assert!(!VcError::UncommittedChanges(branch).is_conflict());
        assert!(!VcError::from(StoreError::TableExists(table)).is_conflict());
    }

    #[test]
    fn test_hook_errors_are_unwrapped() {
        let table = TableName::new("users").unwrap();
        let err: VcError = StoreError::Hook(Box::new(VcError::UntrackedTable(table))).into();
        assert!(matches!(err, VcError::UntrackedTable(_)));
    }
}
