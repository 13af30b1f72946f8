//! content-addressed storage layer
//!
//! Rows are hashed into digests and kept, write-once, in a bare git object
//! database. The upper layers (commit graph, interceptor, checkout) use this
//! API and never touch git2 directly.
//!
//! # Architecture
//!
//! ```text
//!      ┌──────────────┐        ┌──────────────┐
//!      │     hash     │───────▶│     blob     │
//!      │  (digests)   │        │  (encoding)  │
//!      └──────────────┘        └──────────────┘
//!              │                       │
//!              └───────────┬───────────┘
//!                          ▼
//!                   ┌──────────────┐
//!                   │     rows     │
//!                   │  (RowStore)  │
//!                   └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tablegit::storage::{hash_row, RowStore, TableName};
//!
//! let store = RowStore::open_or_init("./rows")?;
//! let table = TableName::new("users")?;
//! let digest = hash_row(&table, &columns)?;
//! store.put(digest, &table, &columns)?;
//! let entry = store.get(digest)?;
//! ```

mod blob;
mod error;
mod hash;
mod rows;
mod types;

pub use blob::RowEntry;
pub use error::{StorageError, StorageResult};
pub use hash::{hash_bytes, hash_row, hash_set, tree_digest};
pub use rows::{PutOutcome, RowStore};
pub use types::{ColumnMap, Digest, InvalidNameError, TableName};
