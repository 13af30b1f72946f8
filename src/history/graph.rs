//! The commit DAG.
//!
//! Commits live in an arena keyed by [`CommitId`]; parent links are ids, so
//! the graph has no ownership cycles and lookups are O(1).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::commit::{Commit, CommitId, CommitRequest, CommitState, Snapshot};
use crate::error::{VcError, VcResult};
use crate::refs::UserRef;
use crate::storage::{Digest, TableName};

/// One edit to an open commit's snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotChange {
    Add(Digest),
    Remove(Digest),
}

#[derive(Debug)]
pub struct CommitGraph {
    commits: HashMap<CommitId, Commit>,
    root: CommitId,
}

impl CommitGraph {
    /// A graph holding only the closed, empty root commit.
    pub fn new(author: UserRef, at: DateTime<Utc>) -> VcResult<Self> {
        let root = Commit::root(author, at)?;
        let id = root.id;
        Ok(Self {
            commits: HashMap::from([(id, root)]),
            root: id,
        })
    }

    pub fn root(&self) -> CommitId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn get(&self, id: CommitId) -> VcResult<&Commit> {
        self.commits.get(&id).ok_or(VcError::UnknownCommit(id))
    }

    fn get_open_mut(&mut self, id: CommitId) -> VcResult<&mut Commit> {
        let commit = self.commits.get_mut(&id).ok_or(VcError::UnknownCommit(id))?;
        if commit.is_closed() {
            return Err(VcError::CommitClosed(id));
        }
        Ok(commit)
    }

    pub fn parents(&self, id: CommitId) -> VcResult<Vec<&Commit>> {
        self.get(id)?.parents.iter().map(|p| self.get(*p)).collect()
    }

    // ==================== Lifecycle ====================

    /// Open a new commit on top of a closed one, inheriting its snapshots.
    pub fn open_child(&mut self, parent: CommitId) -> VcResult<CommitId> {
        let base = self.get(parent)?;
        if base.is_open() {
            return Err(VcError::CommitOpen(parent));
        }
        let child = Commit::open(vec![parent], base.snapshots.clone());
        let id = child.id;
        self.commits.insert(id, child);
        debug!(commit = %id, parent = %parent, "opened commit");
        Ok(id)
    }

    /// A new open commit with the same parents and snapshots as `source`.
    ///
    /// Used when a branch is created from another branch's open head; a
    /// closed source simply gets a fresh child.
    pub fn fork_open(&mut self, source: CommitId) -> VcResult<CommitId> {
        let base = self.get(source)?;
        if base.is_closed() {
            return self.open_child(source);
        }
        let fork = Commit::open(base.parents.clone(), base.snapshots.clone());
        let id = fork.id;
        self.commits.insert(id, fork);
        Ok(id)
    }

    pub fn record(&mut self, id: CommitId, table: &TableName, change: SnapshotChange) -> VcResult<()> {
        let commit = self.get_open_mut(id)?;
        match change {
            SnapshotChange::Add(hash) => {
                commit.snapshots.entry(table.clone()).or_default().insert(hash);
            }
            SnapshotChange::Remove(hash) => {
                if let Some(rows) = commit.snapshots.get_mut(table) {
                    rows.remove(&hash);
                    if rows.is_empty() {
                        commit.snapshots.remove(table);
                    }
                }
            }
        }
        Ok(())
    }

    /// Overwrite an open commit's snapshots wholesale.
    pub fn replace_snapshots(&mut self, id: CommitId, mut snapshots: Snapshot) -> VcResult<()> {
        snapshots.retain(|_, rows| !rows.is_empty());
        self.get_open_mut(id)?.snapshots = snapshots;
        Ok(())
    }

    pub fn add_parent(&mut self, id: CommitId, parent: CommitId) -> VcResult<()> {
        self.get(parent)?;
        let commit = self.get_open_mut(id)?;
        if !commit.parents.contains(&parent) {
            commit.parents.push(parent);
        }
        Ok(())
    }

    /// Close an open commit. It is immutable afterwards.
    pub fn close(&mut self, id: CommitId, author: &UserRef, request: &CommitRequest) -> VcResult<&Commit> {
        let commit = self.get(id)?;
        if commit.is_closed() {
            return Err(VcError::AlreadyClosed(id));
        }

        let parent_hashes = commit
            .parents
            .iter()
            .map(|p| self.get(*p)?.hash.ok_or(VcError::CommitOpen(*p)))
            .collect::<VcResult<Vec<Digest>>>()?;

        let mut closed = commit.clone();
        closed.author = Some(author.clone());
        closed.summary = request.summary.clone();
        closed.description = request.description.clone();
        closed.committed_at = Some(request.timestamp.unwrap_or_else(Utc::now));
        closed.state = CommitState::Closed;
        closed.hash = Some(closed.content_hash(&parent_hashes)?);

        self.commits.insert(id, closed);
        self.get(id)
    }

    /// Drop an open commit that nothing will ever reference.
    pub fn discard_open(&mut self, id: CommitId) -> VcResult<()> {
        self.get_open_mut(id)?;
        self.commits.remove(&id);
        Ok(())
    }

    // ==================== Queries ====================

    /// whether an open commit differs from its first parent
    pub fn has_changes(&self, id: CommitId) -> VcResult<bool> {
        let commit = self.get(id)?;
        if commit.is_closed() {
            return Ok(false);
        }
        match commit.first_parent() {
            Some(parent) => Ok(self.get(parent)?.snapshots != commit.snapshots),
            None => Ok(!commit.snapshots.is_empty()),
        }
    }

    /// last closed commit at or below `id`
    pub fn tip(&self, id: CommitId) -> VcResult<CommitId> {
        let commit = self.get(id)?;
        if commit.is_closed() {
            return Ok(id);
        }
        commit.first_parent().ok_or(VcError::CommitOpen(id))
    }

    /// every commit reachable from `start`, including itself
    pub fn ancestors(&self, start: CommitId) -> HashSet<CommitId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(commit) = self.commits.get(&id) {
                queue.extend(commit.parents.iter().copied());
            }
        }
        seen
    }

    /// inclusive: a commit is its own ancestor
    pub fn is_ancestor(&self, ancestor: CommitId, descendant: CommitId) -> bool {
        self.ancestors(descendant).contains(&ancestor)
    }

    /// Nearest common ancestor, walking parent links from both sides.
    pub fn merge_base(&self, a: CommitId, b: CommitId) -> Option<CommitId> {
        let from_a = self.ancestors(a);

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([b]);
        while let Some(id) = queue.pop_front() {
            if from_a.contains(&id) {
                return Some(id);
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(commit) = self.commits.get(&id) {
                queue.extend(commit.parents.iter().copied());
            }
        }
        None
    }

    /// Walk history from `start`, newest first, visiting each commit once.
    pub fn history(&self, start: CommitId) -> History<'_> {
        let mut history = History {
            graph: self,
            heap: BinaryHeap::new(),
            seen: HashSet::new(),
        };
        history.push(start);
        history
    }
}

/// Iterator over commit history.
pub struct History<'g> {
    graph: &'g CommitGraph,
    heap: BinaryHeap<(DateTime<Utc>, Reverse<usize>, CommitId)>,
    seen: HashSet<CommitId>,
}

impl History<'_> {
    fn push(&mut self, id: CommitId) {
        if !self.seen.insert(id) {
            return;
        }
        if let Some(commit) = self.graph.commits.get(&id) {
            let at = commit.committed_at.unwrap_or(commit.created_at);
            // later pushes lose ties, so a commit sorts before its parents
            self.heap.push((at, Reverse(self.seen.len()), id));
        }
    }
}

impl<'g> Iterator for History<'g> {
    type Item = &'g Commit;

    fn next(&mut self) -> Option<Self::Item> {
        let (_, _, id) = self.heap.pop()?;
        let commit = self.graph.commits.get(&id)?;
        for parent in &commit.parents {
            self.push(*parent);
        }
        Some(commit)
    }
}
