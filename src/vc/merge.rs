//! Merge planning.
//!
//! Merges work on snapshots: the source's changes since the merge base are
//! replayed onto the target. Two different rows sharing a value in the
//! primary key or any unique column after the replay is a conflict; nothing
//! is resolved automatically.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::Value;
use tracing::debug;

use super::diff::{diff_snapshots, DiffAction, DiffEntry};
use crate::catalog::TrackedTables;
use crate::error::{VcError, VcResult};
use crate::history::{Commit, CommitGraph, CommitId, Snapshot};
use crate::storage::{Digest, RowStore, TableName};

/// Two rows competing for one value of a unique column.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConflict {
    pub table: TableName,
    /// the primary key or a unique column
    pub column: String,
    pub key: Value,
    /// row already on the target branch
    pub ours: Digest,
    /// row the source branch brings in
    pub theirs: Digest,
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}={} (ours {}, theirs {})",
            self.table,
            self.column,
            self.key,
            self.ours.short(),
            self.theirs.short()
        )
    }
}

/// What a merge did.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// the source had nothing the target lacks
    UpToDate { head: CommitId },
    /// the target took the source's snapshot as is
    FastForward { commit: Commit },
    /// both sides had changes; they were combined
    Merged { commit: Commit },
}

impl MergeOutcome {
    /// the merge commit, if one was made
    pub fn commit(&self) -> Option<&Commit> {
        match self {
            MergeOutcome::UpToDate { .. } => None,
            MergeOutcome::FastForward { commit } | MergeOutcome::Merged { commit } => Some(commit),
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        matches!(self, MergeOutcome::UpToDate { .. })
    }
}

#[derive(Debug)]
pub(crate) enum MergePlan {
    UpToDate,
    FastForward { snapshots: Snapshot },
    ThreeWay { base: CommitId, snapshots: Snapshot },
}

/// Decide how `theirs` merges into `ours` and compute the resulting snapshot.
pub(crate) fn plan(
    graph: &CommitGraph,
    rows: &RowStore,
    tables: &TrackedTables,
    ours: CommitId,
    theirs: CommitId,
) -> VcResult<MergePlan> {
    if graph.is_ancestor(theirs, ours) {
        return Ok(MergePlan::UpToDate);
    }
    if graph.is_ancestor(ours, theirs) {
        return Ok(MergePlan::FastForward {
            snapshots: graph.get(theirs)?.snapshots.clone(),
        });
    }

    let base = graph
        .merge_base(ours, theirs)
        .ok_or(VcError::NoCommonAncestor(ours, theirs))?;
    let base_snapshots = &graph.get(base)?.snapshots;
    let our_changes = diff_snapshots(base_snapshots, &graph.get(ours)?.snapshots);
    let their_changes = diff_snapshots(base_snapshots, &graph.get(theirs)?.snapshots);
    debug!(
        base = %base,
        ours = our_changes.len(),
        theirs = their_changes.len(),
        "three-way merge"
    );

    let mut merged = graph.get(ours)?.snapshots.clone();
    for change in &their_changes {
        match change.action {
            DiffAction::Delete => {
                if let Some(set) = merged.get_mut(&change.table) {
                    set.remove(&change.row_hash);
                }
            }
            DiffAction::Insert => {
                merged
                    .entry(change.table.clone())
                    .or_default()
                    .insert(change.row_hash);
            }
        }
    }
    merged.retain(|_, set| !set.is_empty());

    let conflicts = find_conflicts(rows, tables, &merged, &their_changes)?;
    if !conflicts.is_empty() {
        return Err(VcError::MergeConflict { conflicts });
    }

    Ok(MergePlan::ThreeWay {
        base,
        snapshots: merged,
    })
}

/// Rows the source inserted that share a primary key or unique value with
/// another row of the merged snapshot.
fn find_conflicts(
    rows: &RowStore,
    tables: &TrackedTables,
    merged: &Snapshot,
    their_changes: &[DiffEntry],
) -> VcResult<Vec<MergeConflict>> {
    let mut incoming: BTreeMap<&TableName, BTreeSet<Digest>> = BTreeMap::new();
    for change in their_changes.iter().filter(|c| c.action == DiffAction::Insert) {
        incoming.entry(&change.table).or_default().insert(change.row_hash);
    }

    let mut conflicts = Vec::new();
    for (table, inserted) in incoming {
        let Some(schema) = tables.get(table) else {
            continue;
        };
        let columns = schema.unique_columns();
        if columns.is_empty() {
            continue;
        }
        let Some(current) = merged.get(table) else {
            continue;
        };

        let mut loaded = Vec::with_capacity(current.len());
        for hash in current {
            loaded.push((*hash, rows.get(*hash)?.columns));
        }

        for column in columns {
            // canonical JSON text of the value -> (value, holders)
            let mut by_key: BTreeMap<String, (Value, Vec<Digest>)> = BTreeMap::new();
            for (hash, row) in &loaded {
                if let Some(key) = row.get(column).filter(|v| !v.is_null()) {
                    by_key
                        .entry(key.to_string())
                        .or_insert_with(|| (key.clone(), Vec::new()))
                        .1
                        .push(*hash);
                }
            }

            for (key, holders) in by_key.into_values() {
                if holders.len() < 2 {
                    continue;
                }
                let (theirs, ours): (Vec<Digest>, Vec<Digest>) =
                    holders.into_iter().partition(|h| inserted.contains(h));
                for t in &theirs {
                    for o in &ours {
                        conflicts.push(MergeConflict {
                            table: table.clone(),
                            column: column.to_string(),
                            key: key.clone(),
                            ours: *o,
                            theirs: *t,
                        });
                    }
                }
            }
        }
    }
    Ok(conflicts)
}
