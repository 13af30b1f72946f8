//! Commit history.
//!
//! A commit records, for every tracked table, the set of row digests the
//! table held. Commits start open, absorb row changes, and are closed exactly
//! once; the root commit is born closed and empty.

mod commit;
mod graph;

pub use commit::{Commit, CommitId, CommitRequest, CommitState, Snapshot};
pub use graph::{CommitGraph, History, SnapshotChange};
