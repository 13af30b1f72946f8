//! Materialization of commit snapshots into namespaces.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::diff::{diff_snapshots, DiffAction};
use crate::catalog::TrackedTables;
use crate::error::VcResult;
use crate::history::Snapshot;
use crate::storage::{Digest, RowEntry, RowStore, StorageError, TableName};
use crate::tables::NamespaceTx;

/// How a namespace is brought to a new snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutMode {
    /// clear every tracked table and reload it
    #[default]
    Full,
    /// apply only the diff between the current and the target snapshot
    Incremental,
}

/// Counters reported by a materialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeStats {
    pub tables: usize,
    pub rows_written: usize,
    pub rows_removed: usize,
}

/// Rebuild every tracked table in `tx` from `snapshots`.
///
/// Each row is loaded from the row store and stamped with its digest.
/// Running it twice leaves the namespace unchanged.
pub fn materialize(
    tx: &mut dyn NamespaceTx,
    rows: &RowStore,
    snapshots: &Snapshot,
    tables: &TrackedTables,
) -> VcResult<MaterializeStats> {
    let mut stats = MaterializeStats::default();

    for schema in tables.iter() {
        let table = &schema.name;
        if tx.has_table(table) {
            stats.rows_removed += tx.rows(table)?.len();
            tx.clear(table)?;
        } else {
            tx.create_table(schema)?;
        }

        for hash in snapshots.get(table).into_iter().flatten() {
            let entry = load(rows, *hash, table)?;
            tx.put_stamped(table, *hash, entry.columns)?;
            stats.rows_written += 1;
        }
        stats.tables += 1;
    }

    debug!(
        namespace = %tx.namespace(),
        tables = stats.tables,
        rows = stats.rows_written,
        "materialized snapshot"
    );
    Ok(stats)
}

/// Move `tx` from `from` to `to` by applying only their diff.
///
/// The namespace must currently hold exactly `from`.
pub fn patch(
    tx: &mut dyn NamespaceTx,
    rows: &RowStore,
    from: &Snapshot,
    to: &Snapshot,
    tables: &TrackedTables,
) -> VcResult<MaterializeStats> {
    let mut stats = MaterializeStats {
        tables: tables.len(),
        ..MaterializeStats::default()
    };

    for schema in tables.iter() {
        if !tx.has_table(&schema.name) {
            tx.create_table(schema)?;
        }
    }

    let changes = diff_snapshots(from, to);

    // deletes first so a replaced row frees its key before the new one lands
    for change in changes.iter().filter(|c| c.action == DiffAction::Delete) {
        if tables.contains(&change.table) {
            stats.rows_removed += tx.remove_stamped(&change.table, change.row_hash)?;
        }
    }
    for change in changes.iter().filter(|c| c.action == DiffAction::Insert) {
        if tables.contains(&change.table) {
            let entry = load(rows, change.row_hash, &change.table)?;
            tx.put_stamped(&change.table, change.row_hash, entry.columns)?;
            stats.rows_written += 1;
        }
    }

    debug!(
        namespace = %tx.namespace(),
        changes = changes.len(),
        "patched snapshot"
    );
    Ok(stats)
}

fn load(rows: &RowStore, hash: Digest, table: &TableName) -> VcResult<RowEntry> {
    let entry = rows.get(hash)?;
    if &entry.table != table {
        return Err(StorageError::CorruptedData {
            hash,
            reason: format!("row belongs to {} but is listed under {}", entry.table, table),
        }
        .into());
    }
    Ok(entry)
}
