//! Content-addressed row store.
//!
//! Wraps a bare git object database. Every row payload is a blob whose id is
//! the row's digest, so the store is append-only by construction: there is no
//! update and no delete, and writing the same row twice is a no-op.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::Mutex;
use tracing::debug;

use crate::storage::blob::{self, RowEntry};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::hash;
use crate::storage::types::{ColumnMap, Digest, TableName};

/// Result of a [`RowStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// the entry was written
    Inserted,
    /// an identical entry was already stored
    AlreadyPresent,
}

/// Thread-safe handle to the row store.
///
/// Clone this to share across threads - it uses Arc internally.
/// `git2::Repository` is not `Sync`, so access is serialized through a mutex.
#[derive(Clone)]
pub struct RowStore {
    inner: Arc<RowStoreInner>,
}

struct RowStoreInner {
    repo: Mutex<Repository>,
    path: PathBuf,
}

impl RowStore {
    /// Open an existing row store.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open_bare(path)
            .map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        Ok(Self::wrap(repo, path))
    }

    /// Initialize a new, empty row store.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let repo = Repository::init_bare(path)?;
        debug!(path = %path.display(), "initialized row store");
        Ok(Self::wrap(repo, path))
    }

    /// Open or initialize a row store.
    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join("HEAD").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    fn wrap(repo: Repository, path: &Path) -> Self {
        Self {
            inner: Arc::new(RowStoreInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
            }),
        }
    }

    /// location of the object database
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    // ==================== Writes ====================

    /// Store a row under `hash`.
    ///
    /// The payload is re-hashed before writing; a mismatch, or an existing
    /// entry with different bytes, is a [`StorageError::HashCollision`].
    pub fn put(&self, hash: Digest, table: &TableName, columns: &ColumnMap) -> StorageResult<PutOutcome> {
        let bytes = blob::encode_row(table, columns)?;
        let computed = hash::hash_bytes(&bytes)?;
        if computed != hash {
            return Err(StorageError::HashCollision {
                hash,
                detail: format!("payload hashes to {}", computed),
            });
        }

        self.with_repo(|repo| {
            if let Some(existing) = blob::read_blob(repo, hash)? {
                if existing != bytes {
                    return Err(StorageError::HashCollision {
                        hash,
                        detail: "stored payload differs from the new one".to_string(),
                    });
                }
                return Ok(PutOutcome::AlreadyPresent);
            }

            let written = blob::write_blob(repo, &bytes)?;
            if written != hash {
                return Err(StorageError::HashCollision {
                    hash,
                    detail: format!("object database assigned {}", written),
                });
            }
            Ok(PutOutcome::Inserted)
        })
    }

    // ==================== Reads ====================

    /// Fetch a row by digest.
    pub fn get(&self, hash: Digest) -> StorageResult<RowEntry> {
        let bytes = self
            .with_repo(|repo| blob::read_blob(repo, hash))?
            .ok_or(StorageError::NotFound(hash))?;
        blob::decode_row(&bytes, hash)
    }

    /// check whether a digest is stored
    pub fn contains(&self, hash: Digest) -> StorageResult<bool> {
        self.with_repo(|repo| Ok(repo.odb()?.exists(hash.raw())))
    }

    /// number of stored entries
    pub fn len(&self) -> StorageResult<usize> {
        self.with_repo(|repo| {
            let mut count = 0usize;
            repo.odb()?.foreach(|_| {
                count += 1;
                true
            })?;
            Ok(count)
        })
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl std::fmt::Debug for RowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStore").field("path", &self.inner.path).finish()
    }
}
