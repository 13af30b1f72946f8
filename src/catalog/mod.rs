//! Catalog module for schema management.
//!
//! Schemas decide how caller-supplied values are normalized before they are
//! hashed, and which column acts as the primary key during merges. The
//! registry records which tables are under version control.

mod registry;
mod schema;
mod types;

pub use registry::TrackedTables;
pub use schema::{SchemaBuilder, SchemaError, TableSchema};
pub use types::{ColumnDef, Constraint, DataType};
