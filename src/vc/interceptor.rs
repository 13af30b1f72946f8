//! Write interceptor.
//!
//! Registered with the table store for every tracked table. Each write is
//! hashed, stored in the row store and folded into the branch's open commit
//! before the table store applies it. A snapshot is a set, so a write that
//! would leave two identical rows in a tracked table is refused.

use std::sync::Arc;

use tracing::debug;

use super::state::Shared;
use crate::error::{VcError, VcResult};
use crate::history::SnapshotChange;
use crate::storage::{hash_row, Digest, TableName};
use crate::tables::{NamespaceId, RowChange, WriteListener};

pub(crate) struct WriteInterceptor {
    shared: Arc<Shared>,
}

impl WriteInterceptor {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl WriteListener for WriteInterceptor {
    fn on_write(
        &self,
        namespace: NamespaceId,
        table: &TableName,
        change: RowChange<'_>,
    ) -> VcResult<Option<Digest>> {
        let mut state = self.shared.state.lock();
        if !state.tracked.contains(table) {
            return Ok(None);
        }
        // scratch namespaces from `Engine::materialize` are not versioned
        let Some(branch) = state.branches.by_namespace(namespace).map(|b| b.name.clone()) else {
            return Ok(None);
        };
        let branch = branch.as_str();

        match change {
            RowChange::Insert { columns } => {
                let hash = hash_row(table, columns)?;
                if state.holds(branch, table, hash)? {
                    return Err(VcError::DuplicateRow { table: table.clone(), row: hash });
                }
                self.shared.rows.put(hash, table, columns)?;

                let head = state.ensure_open(branch)?;
                state.graph.record(head, table, SnapshotChange::Add(hash))?;
                debug!(branch, %table, row = %hash.short(), "recorded insert");
                Ok(Some(hash))
            }
            RowChange::Update {
                previous,
                previous_shared,
                columns,
            } => {
                let hash = hash_row(table, columns)?;
                if previous == Some(hash) {
                    return Ok(previous);
                }
                if state.holds(branch, table, hash)? {
                    return Err(VcError::DuplicateRow { table: table.clone(), row: hash });
                }
                self.shared.rows.put(hash, table, columns)?;

                let head = state.ensure_open(branch)?;
                if let Some(old) = previous.filter(|_| !previous_shared) {
                    state.graph.record(head, table, SnapshotChange::Remove(old))?;
                }
                state.graph.record(head, table, SnapshotChange::Add(hash))?;
                debug!(branch, %table, row = %hash.short(), "recorded update");
                Ok(Some(hash))
            }
            RowChange::Delete { previous, shared } => {
                if let Some(old) = previous.filter(|_| !shared) {
                    let head = state.ensure_open(branch)?;
                    state.graph.record(head, table, SnapshotChange::Remove(old))?;
                    debug!(branch, %table, row = %old.short(), "recorded delete");
                }
                Ok(None)
            }
        }
    }
}
