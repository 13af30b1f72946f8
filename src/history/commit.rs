//! Commits and commit requests.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use ulid::Ulid;

use crate::refs::UserRef;
use crate::storage::{hash_bytes, tree_digest, Digest, StorageResult, TableName};

/// Per-table set of row digests. Tables without rows have no entry.
pub type Snapshot = BTreeMap<TableName, BTreeSet<Digest>>;

/// Stable identity of a commit, assigned when it is opened.
///
/// The content hash only exists once the commit is closed, so the graph is
/// keyed by this id instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitId(Ulid);

impl CommitId {
    pub(crate) fn generate() -> Self {
        Self(Ulid::new())
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.to_string()[..10].to_lowercase()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    /// accepts row changes
    Open,
    /// immutable
    Closed,
}

/// A commit: a set of row digests per tracked table, plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub id: CommitId,
    /// content hash, set when the commit is closed
    pub hash: Option<Digest>,
    /// empty for the root, two entries for a merge
    pub parents: Vec<CommitId>,
    pub author: Option<UserRef>,
    pub summary: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub state: CommitState,
    pub snapshots: Snapshot,
}

impl Commit {
    pub(crate) fn root(author: UserRef, at: DateTime<Utc>) -> StorageResult<Self> {
        let mut root = Self {
            id: CommitId::generate(),
            hash: None,
            parents: Vec::new(),
            author: Some(author),
            summary: "Root commit".to_string(),
            description: String::new(),
            created_at: at,
            committed_at: Some(at),
            state: CommitState::Closed,
            snapshots: Snapshot::new(),
        };
        root.hash = Some(root.content_hash(&[])?);
        Ok(root)
    }

    pub(crate) fn open(parents: Vec<CommitId>, snapshots: Snapshot) -> Self {
        Self {
            id: CommitId::generate(),
            hash: None,
            parents,
            author: None,
            summary: String::new(),
            description: String::new(),
            created_at: Utc::now(),
            committed_at: None,
            state: CommitState::Open,
            snapshots,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == CommitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state == CommitState::Closed
    }

    /// check if this is a merge commit (has multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn first_parent(&self) -> Option<CommitId> {
        self.parents.first().copied()
    }

    /// digests of one table's rows, empty if the table has none
    pub fn rows(&self, table: &TableName) -> impl Iterator<Item = &Digest> {
        self.snapshots.get(table).into_iter().flatten()
    }

    pub fn row_count(&self) -> usize {
        self.snapshots.values().map(BTreeSet::len).sum()
    }

    /// Hash over the tree digest, parent hashes, author, time and message.
    pub(crate) fn content_hash(&self, parent_hashes: &[Digest]) -> StorageResult<Digest> {
        let mut text = format!("tree {}\n", tree_digest(&self.snapshots)?);
        for parent in parent_hashes {
            text.push_str(&format!("parent {}\n", parent));
        }
        if let Some(author) = &self.author {
            text.push_str(&format!("author {}\n", author));
        }
        if let Some(at) = self.committed_at {
            text.push_str(&format!("date {}\n", at.to_rfc3339_opts(SecondsFormat::Micros, true)));
        }
        text.push('\n');
        text.push_str(&self.summary);
        if !self.description.is_empty() {
            text.push_str("\n\n");
            text.push_str(&self.description);
        }
        hash_bytes(text.as_bytes())
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hash {
            Some(hash) => write!(f, "{} {}", hash.short(), self.summary),
            None => write!(f, "{} (open)", self.id.short()),
        }
    }
}

/// Message and timestamp for closing a commit.
///
/// ```ignore
/// let request = CommitRequest::new("Fix the product names")
///     .description("Capitalized cable names")
///     .at(timestamp);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    pub(crate) summary: String,
    pub(crate) description: String,
    pub(crate) timestamp: Option<DateTime<Utc>>,
}

impl CommitRequest {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// commit time; defaults to now
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// summary used for merge commits
    pub fn merge(source: &str, target: &str) -> Self {
        Self::new(format!("Merge branch '{}' into '{}'", source, target))
    }
}
