//! Versioning state shared by the engine and its write interceptors.

use parking_lot::Mutex;
use tracing::debug;

use crate::catalog::TrackedTables;
use crate::error::VcResult;
use crate::history::{CommitGraph, CommitId};
use crate::refs::BranchDirectory;
use crate::storage::{Digest, RowStore, TableName};

/// Everything that changes when a commit is opened, closed or moved.
///
/// Kept behind one mutex so that closing a commit and advancing a branch
/// head can never be observed half done.
#[derive(Debug)]
pub(crate) struct VcState {
    pub(crate) graph: CommitGraph,
    pub(crate) branches: BranchDirectory,
    pub(crate) tracked: TrackedTables,
}

impl VcState {
    /// The branch's open head, opening a child of a closed head first.
    pub(crate) fn ensure_open(&mut self, branch: &str) -> VcResult<CommitId> {
        let head = self.branches.get(branch)?.head;
        if self.graph.get(head)?.is_open() {
            return Ok(head);
        }

        let child = self.graph.open_child(head)?;
        self.branches.set_head(branch, child)?;
        debug!(branch, parent = %head, commit = %child, "advanced head to new open commit");
        Ok(child)
    }

    /// whether the branch head's snapshot of `table` already has `row`
    pub(crate) fn holds(&self, branch: &str, table: &TableName, row: Digest) -> VcResult<bool> {
        let head = self.branches.get(branch)?.head;
        Ok(self
            .graph
            .get(head)?
            .snapshots
            .get(table)
            .is_some_and(|rows| rows.contains(&row)))
    }
}

/// Lock order: table store namespace, then `state`, then the row store.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<VcState>,
    pub(crate) rows: RowStore,
}
