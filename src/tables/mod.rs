//! Table storage collaborator.
//!
//! The versioning core does not own row storage. It needs a store that keeps
//! tables in isolated namespaces (one per branch), lets it register a write
//! hook per table, and gives it exclusive raw access to a namespace while it
//! rebuilds tables during checkout. [`TableStore`] is that contract;
//! [`MemoryTableStore`] is the in-process implementation the engine uses by
//! default.

mod error;
mod filter;
mod memory;

use std::fmt;

use ulid::Ulid;

pub use error::{StoreError, StoreResult};
pub use filter::Filter;
pub use memory::MemoryTableStore;

use crate::catalog::TableSchema;
use crate::error::VcError;
use crate::storage::{ColumnMap, Digest, TableName};

/// Identifier of an isolated set of tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceId(Ulid);

impl NamespaceId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns_{}", self.0.to_string().to_lowercase())
    }
}

/// A row as the table store keeps it.
///
/// The stamp is the row's content digest while the row is versioned. It sits
/// beside the user columns, never among them.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub stamp: Option<Digest>,
    pub columns: ColumnMap,
}

impl StoredRow {
    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.columns.get(column)
    }
}

/// What a write is about to do, as seen by a [`WriteListener`].
#[derive(Debug, Clone, Copy)]
pub enum RowChange<'a> {
    Insert {
        columns: &'a ColumnMap,
    },
    Update {
        previous: Option<Digest>,
        /// another row in the table carries the previous stamp
        previous_shared: bool,
        columns: &'a ColumnMap,
    },
    Delete {
        previous: Option<Digest>,
        /// another row in the table carries the same stamp
        shared: bool,
    },
}

/// Hook invoked inside the unit of work of every write to a table.
///
/// Returns the stamp the row carries afterwards. An error aborts the write.
pub trait WriteListener: Send + Sync {
    fn on_write(
        &self,
        namespace: NamespaceId,
        table: &TableName,
        change: RowChange<'_>,
    ) -> Result<Option<Digest>, VcError>;
}

/// Raw, un-hooked access to one namespace, held under its lock.
pub trait NamespaceTx {
    fn namespace(&self) -> NamespaceId;

    fn has_table(&self, table: &TableName) -> bool;

    fn create_table(&mut self, schema: &TableSchema) -> StoreResult<()>;

    fn rows(&self, table: &TableName) -> StoreResult<Vec<StoredRow>>;

    fn clear(&mut self, table: &TableName) -> StoreResult<()>;

    /// insert a row carrying `stamp`; uniqueness is still enforced
    fn put_stamped(&mut self, table: &TableName, stamp: Digest, columns: ColumnMap) -> StoreResult<()>;

    /// remove every row carrying `stamp`, returning how many went
    fn remove_stamped(&mut self, table: &TableName, stamp: Digest) -> StoreResult<usize>;
}

/// Storage for namespaced tables.
pub trait TableStore: Send + Sync {
    fn create_namespace(&self, namespace: NamespaceId) -> StoreResult<()>;

    fn drop_namespace(&self, namespace: NamespaceId) -> StoreResult<()>;

    fn has_namespace(&self, namespace: NamespaceId) -> bool;

    fn create_table(&self, namespace: NamespaceId, schema: TableSchema) -> StoreResult<()>;

    /// Route every future write to `table`, in any namespace, through `listener`.
    fn register_listener(&self, table: &TableName, listener: std::sync::Arc<dyn WriteListener>);

    fn insert(&self, namespace: NamespaceId, table: &TableName, values: ColumnMap) -> StoreResult<StoredRow>;

    fn update(
        &self,
        namespace: NamespaceId,
        table: &TableName,
        filter: &Filter,
        changes: &ColumnMap,
    ) -> StoreResult<usize>;

    fn delete(&self, namespace: NamespaceId, table: &TableName, filter: &Filter) -> StoreResult<usize>;

    fn select(&self, namespace: NamespaceId, table: &TableName, filter: &Filter) -> StoreResult<Vec<StoredRow>>;

    /// Run `f` with exclusive access to one namespace.
    ///
    /// Writes through the store's other methods on this namespace wait until
    /// `f` returns. If `f` fails the namespace is left as it was.
    fn atomically<R, E, F>(&self, namespace: NamespaceId, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn NamespaceTx) -> Result<R, E>,
        E: From<StoreError>;
}
