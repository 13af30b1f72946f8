//! Snapshot diffs.
//!
//! A diff is pure set arithmetic over row digests. There is no notion of an
//! updated row: an update shows up as the old digest deleted and the new one
//! inserted.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::error::VcResult;
use crate::history::Snapshot;
use crate::storage::{ColumnMap, Digest, RowStore, TableName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiffAction {
    Delete,
    Insert,
}

impl DiffAction {
    pub fn inverse(self) -> Self {
        match self {
            DiffAction::Delete => DiffAction::Insert,
            DiffAction::Insert => DiffAction::Delete,
        }
    }
}

impl fmt::Display for DiffAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffAction::Delete => write!(f, "delete"),
            DiffAction::Insert => write!(f, "insert"),
        }
    }
}

/// One row entering or leaving a table.
///
/// Field order gives the canonical sort: table, then deletes before
/// inserts, then digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiffEntry {
    pub table: TableName,
    pub action: DiffAction,
    pub row_hash: Digest,
}

impl DiffEntry {
    /// the same change seen from the other side
    pub fn inverted(&self) -> Self {
        Self {
            table: self.table.clone(),
            action: self.action.inverse(),
            row_hash: self.row_hash,
        }
    }
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.action {
            DiffAction::Delete => '-',
            DiffAction::Insert => '+',
        };
        write!(f, "{} {} {}", sign, self.table, self.row_hash.short())
    }
}

/// A diff entry joined with the row it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntry {
    pub entry: DiffEntry,
    pub columns: ColumnMap,
}

/// What it takes to turn `from` into `to`, in canonical order.
pub fn diff_snapshots(from: &Snapshot, to: &Snapshot) -> Vec<DiffEntry> {
    let empty = BTreeSet::new();
    let tables: BTreeSet<&TableName> = from.keys().chain(to.keys()).collect();

    let mut entries = Vec::new();
    for table in tables {
        let old = from.get(table).unwrap_or(&empty);
        let new = to.get(table).unwrap_or(&empty);

        entries.extend(old.difference(new).map(|hash| DiffEntry {
            table: table.clone(),
            action: DiffAction::Delete,
            row_hash: *hash,
        }));
        entries.extend(new.difference(old).map(|hash| DiffEntry {
            table: table.clone(),
            action: DiffAction::Insert,
            row_hash: *hash,
        }));
    }
    entries
}

/// Fetch the payload of every entry from the row store.
pub fn resolve(rows: &RowStore, entries: &[DiffEntry]) -> VcResult<Vec<ResolvedEntry>> {
    entries
        .iter()
        .map(|entry| {
            let row = rows.get(entry.row_hash)?;
            Ok(ResolvedEntry {
                entry: entry.clone(),
                columns: row.columns,
            })
        })
        .collect()
}

/// tables touched by a diff
pub fn touched_tables(entries: &[DiffEntry]) -> HashSet<&TableName> {
    entries.iter().map(|e| &e.table).collect()
}
