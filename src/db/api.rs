//! Engine API - the high-level interface for tablegit.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::config::EngineConfig;
use crate::catalog::{TableSchema, TrackedTables};
use crate::error::{VcError, VcResult};
use crate::history::{Commit, CommitGraph, CommitId, CommitRequest, Snapshot, SnapshotChange};
use crate::refs::{Branch, BranchDirectory, BranchInfo, BranchName, Session, UserRef};
use crate::storage::{hash_row, ColumnMap, Digest, RowStore, StorageError, TableName};
use crate::tables::{Filter, MemoryTableStore, NamespaceId, NamespaceTx, StoreError, StoredRow, TableStore};
use crate::vc::{
    diff_snapshots, materialize, patch, plan_merge, resolve, CheckoutMode, DiffEntry, MaterializeStats,
    MergeOutcome, MergePlan, ResolvedEntry, Shared, VcState, WriteInterceptor,
};

/// The version-control engine.
///
/// Owns the row store, the commit graph and the branch directory, and drives
/// a [`TableStore`] that holds one namespace per branch.
pub struct Engine<S: TableStore = MemoryTableStore> {
    config: EngineConfig,
    shared: Arc<Shared>,
    store: Arc<S>,
    _scratch: Option<TempDir>,
}

impl Engine<MemoryTableStore> {
    /// Open an engine over in-process tables.
    pub fn open(config: EngineConfig) -> VcResult<Self> {
        Self::with_store(config, MemoryTableStore::new())
    }

    /// Default configuration with the row store in a temporary directory.
    pub fn in_memory() -> VcResult<Self> {
        Self::open(EngineConfig::default())
    }
}

impl<S: TableStore> Engine<S> {
    pub fn with_store(config: EngineConfig, store: S) -> VcResult<Self> {
        config.validate()?;

        let (rows, scratch) = match &config.path {
            Some(path) if config.create_if_missing => (RowStore::open_or_init(path)?, None),
            Some(path) if path.exists() => (RowStore::open(path)?, None),
            Some(path) => return Err(StorageError::NotInitialized(path.clone()).into()),
            None => {
                let dir = TempDir::new()?;
                (RowStore::init(dir.path().join("rows"))?, Some(dir))
            }
        };

        let graph = CommitGraph::new(UserRef::new(config.system_user.clone()), Utc::now())?;
        let default_name = BranchName::new(config.default_branch.clone())?;
        let namespace = NamespaceId::generate();
        store.create_namespace(namespace)?;
        let branches = BranchDirectory::new(Branch::new(default_name, graph.root(), namespace));

        info!(
            rows = %rows.path().display(),
            default_branch = %config.default_branch,
            root = %graph.root(),
            "opened engine"
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(VcState {
                graph,
                branches,
                tracked: TrackedTables::new(),
            }),
            rows,
        });

        Ok(Self {
            config,
            shared,
            store: Arc::new(store),
            _scratch: scratch,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Row store directory.
    pub fn path(&self) -> &Path {
        self.shared.rows.path()
    }

    /// The underlying table store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The root commit every branch descends from.
    pub fn root(&self) -> CommitId {
        self.shared.state.lock().graph.root()
    }

    // ==================== Sessions ====================

    /// Start a session pinned to the default branch.
    pub fn open_session(&self, user: impl Into<UserRef>) -> Session {
        let session = Session::new(user.into());
        self.shared.state.lock().branches.attach(&session);
        session
    }

    pub fn close_session(&self, session: &Session) {
        self.shared.state.lock().branches.detach(session);
    }

    fn namespace_of(&self, session: &Session) -> NamespaceId {
        self.shared.state.lock().branches.current(session).namespace
    }

    // ==================== Tables ====================

    /// Put a table under version control.
    ///
    /// The table is created in every branch namespace that lacks it. Rows a
    /// namespace already holds are hashed, stamped and recorded in that
    /// branch's open commit. Returns `false` if the table was already tracked.
    ///
    /// A namespace holding two identical rows of the table is refused with
    /// `DuplicateRow`, and nothing is tracked.
    pub fn track(&self, schema: TableSchema) -> VcResult<bool> {
        let all: Vec<NamespaceId> = self.shared.state.lock().branches.iter().map(|b| b.namespace).collect();
        for namespace in all {
            let existing = match self.store.select(namespace, &schema.name, &Filter::all()) {
                Ok(rows) => rows,
                Err(StoreError::UnknownTable { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            hash_distinct(&schema.name, &existing)?;
        }

        let namespaces: Vec<(BranchName, NamespaceId)> = {
            let mut state = self.shared.state.lock();
            if !state.tracked.track(schema.clone())? {
                return Ok(false);
            }
            state
                .branches
                .iter()
                .map(|b| (b.name.clone(), b.namespace))
                .collect()
        };

        let name = schema.name.clone();
        self.store
            .register_listener(&name, Arc::new(WriteInterceptor::new(self.shared.clone())));

        for (branch, namespace) in namespaces {
            let adopted = self
                .store
                .atomically(namespace, |tx| self.adopt(tx, branch.as_str(), &schema))?;
            if adopted > 0 {
                info!(%branch, table = %name, rows = adopted, "adopted existing rows");
            }
        }
        info!(table = %name, "tracking table");
        Ok(true)
    }

    fn adopt(&self, tx: &mut dyn NamespaceTx, branch: &str, schema: &TableSchema) -> VcResult<usize> {
        let name = &schema.name;
        if !tx.has_table(name) {
            tx.create_table(schema)?;
            return Ok(0);
        }

        let existing = tx.rows(name)?;
        if existing.is_empty() {
            return Ok(0);
        }

        let hashes = hash_distinct(name, &existing)?;
        let mut state = self.shared.state.lock();
        let head = state.ensure_open(branch)?;
        tx.clear(name)?;
        for (row, hash) in existing.iter().zip(hashes) {
            self.shared.rows.put(hash, name, &row.columns)?;
            state.graph.record(head, name, SnapshotChange::Add(hash))?;
            tx.put_stamped(name, hash, row.columns.clone())?;
        }
        Ok(existing.len())
    }

    /// names of the tracked tables
    pub fn tracked_tables(&self) -> Vec<TableName> {
        self.shared.state.lock().tracked.names().cloned().collect()
    }

    /// Create a table in the session's branch only.
    pub fn create_table(&self, session: &Session, schema: TableSchema) -> VcResult<()> {
        Ok(self.store.create_table(self.namespace_of(session), schema)?)
    }

    pub fn insert(&self, session: &Session, table: &str, values: ColumnMap) -> VcResult<StoredRow> {
        let table = TableName::new(table)?;
        Ok(self.store.insert(self.namespace_of(session), &table, values)?)
    }

    pub fn update(&self, session: &Session, table: &str, filter: &Filter, changes: &ColumnMap) -> VcResult<usize> {
        let table = TableName::new(table)?;
        Ok(self.store.update(self.namespace_of(session), &table, filter, changes)?)
    }

    pub fn delete(&self, session: &Session, table: &str, filter: &Filter) -> VcResult<usize> {
        let table = TableName::new(table)?;
        Ok(self.store.delete(self.namespace_of(session), &table, filter)?)
    }

    pub fn select(&self, session: &Session, table: &str, filter: &Filter) -> VcResult<Vec<StoredRow>> {
        let table = TableName::new(table)?;
        Ok(self.store.select(self.namespace_of(session), &table, filter)?)
    }

    // ==================== Branches ====================

    /// Create a branch whose namespace holds `from`'s snapshot.
    ///
    /// A closed `from` becomes the branch head. An open one (another branch's
    /// work in progress) is copied into a fresh open commit.
    pub fn create_branch(&self, name: &str, from: CommitId) -> VcResult<Branch> {
        let name = BranchName::new(name)?;
        let namespace = NamespaceId::generate();
        self.store.create_namespace(namespace)?;

        let result = self.store.atomically(namespace, |tx| {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            if state.branches.contains(name.as_str()) {
                return Err(VcError::DuplicateBranch(name.clone()));
            }

            let source = state.graph.get(from)?;
            let is_open = source.is_open();
            let snapshots = source.snapshots.clone();
            materialize(tx, &self.shared.rows, &snapshots, &state.tracked)?;

            let head = if is_open { state.graph.fork_open(from)? } else { from };
            let branch = Branch::new(name.clone(), head, namespace);
            state.branches.create(branch.clone())?;
            Ok(branch)
        });

        if result.is_err() {
            if let Err(e) = self.store.drop_namespace(namespace) {
                warn!(%namespace, error = %e, "failed to drop namespace of aborted branch");
            }
        }
        result
    }

    /// Branch off the session's current head, uncommitted changes included.
    pub fn branch(&self, session: &Session, name: &str) -> VcResult<Branch> {
        let head = self.shared.state.lock().branches.current(session).head;
        self.create_branch(name, head)
    }

    pub fn rename_branch(&self, old: &str, new: &str) -> VcResult<()> {
        let new = BranchName::new(new)?;
        self.shared.state.lock().branches.rename(old, new)
    }

    /// Delete a branch and its namespace. Sessions on it move to the default branch.
    pub fn delete_branch(&self, name: &str) -> VcResult<()> {
        let branch = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let (branch, moved) = state.branches.delete(name)?;
            if state.graph.get(branch.head)?.is_open() {
                state.graph.discard_open(branch.head)?;
            }
            if !moved.is_empty() {
                info!(branch = %branch.name, sessions = moved.len(), "moved sessions to default branch");
            }
            branch
        };
        self.store.drop_namespace(branch.namespace)?;
        Ok(())
    }

    pub fn switch_branch(&self, session: &Session, name: &str) -> VcResult<Branch> {
        let mut state = self.shared.state.lock();
        state.branches.switch(session, name)?;
        Ok(state.branches.current(session).clone())
    }

    pub fn current_branch(&self, session: &Session) -> Branch {
        self.shared.state.lock().branches.current(session).clone()
    }

    pub fn branches(&self, session: &Session) -> Vec<BranchInfo> {
        self.shared.state.lock().branches.list(session)
    }

    // ==================== Commits ====================

    /// Close the open commit of the session's branch and open its successor.
    ///
    /// Committing with nothing changed still produces a commit.
    pub fn commit(&self, session: &Session, request: CommitRequest) -> VcResult<Commit> {
        let namespace = self.namespace_of(session);
        self.store.atomically(namespace, |_| {
            let mut state = self.shared.state.lock();
            let branch = branch_at(&state, namespace)?;

            let head = state.ensure_open(branch.as_str())?;
            let commit = state.graph.close(head, session.user(), &request)?.clone();
            let next = state.graph.open_child(head)?;
            state.branches.set_head(branch.as_str(), next)?;

            info!(%branch, commit = %commit, author = %session.user(), "committed");
            Ok(commit)
        })
    }

    pub fn get_commit(&self, id: CommitId) -> VcResult<Commit> {
        Ok(self.shared.state.lock().graph.get(id)?.clone())
    }

    pub fn parents(&self, id: CommitId) -> VcResult<Vec<Commit>> {
        let state = self.shared.state.lock();
        Ok(state.graph.parents(id)?.into_iter().cloned().collect())
    }

    /// head commit of the session's branch, usually open
    pub fn head(&self, session: &Session) -> VcResult<Commit> {
        let state = self.shared.state.lock();
        let head = state.branches.current(session).head;
        Ok(state.graph.get(head)?.clone())
    }

    /// Closed commits reachable from the session's head, newest first.
    pub fn log(&self, session: &Session, limit: Option<usize>) -> VcResult<Vec<Commit>> {
        let state = self.shared.state.lock();
        let head = state.branches.current(session).head;
        Ok(state
            .graph
            .history(head)
            .filter(|c| c.is_closed())
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    // ==================== Checkout ====================

    /// Reset the session's branch to a closed commit and rebuild its tables.
    pub fn checkout(&self, session: &Session, commit: CommitId) -> VcResult<Commit> {
        let namespace = self.namespace_of(session);
        self.store.atomically(namespace, |tx| {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let branch = branch_at(state, namespace)?;
            let head = state.branches.get(branch.as_str())?.head;

            let target = state.graph.get(commit)?.clone();
            if target.is_open() {
                return Err(VcError::CommitOpen(commit));
            }
            if state.graph.has_changes(head)? {
                return Err(VcError::UncommittedChanges(branch));
            }

            let current = state.graph.get(head)?.snapshots.clone();
            let stats = self.sync(tx, &current, &target.snapshots, &state.tracked)?;

            if state.graph.get(head)?.is_open() {
                state.graph.discard_open(head)?;
            }
            state.branches.set_head(branch.as_str(), commit)?;

            info!(
                %branch,
                commit = %target,
                written = stats.rows_written,
                removed = stats.rows_removed,
                "checked out"
            );
            Ok(target)
        })
    }

    /// Bring a namespace holding `from` to `to` the configured way.
    fn sync(
        &self,
        tx: &mut dyn NamespaceTx,
        from: &Snapshot,
        to: &Snapshot,
        tables: &TrackedTables,
    ) -> VcResult<MaterializeStats> {
        match self.config.checkout {
            CheckoutMode::Full => materialize(tx, &self.shared.rows, to, tables),
            CheckoutMode::Incremental => patch(tx, &self.shared.rows, from, to, tables),
        }
    }

    /// Materialize a commit into a new namespace that belongs to no branch.
    ///
    /// Writes there are not versioned. Drop it with [`Engine::drop_namespace`].
    pub fn materialize(&self, commit: CommitId) -> VcResult<NamespaceId> {
        let namespace = NamespaceId::generate();
        self.store.create_namespace(namespace)?;

        let result = self.materialize_into(commit, namespace);
        if let Err(e) = &result {
            warn!(%namespace, %commit, error = %e, "materialization failed");
            if let Err(e) = self.store.drop_namespace(namespace) {
                warn!(%namespace, error = %e, "failed to drop scratch namespace");
            }
        }
        result.map(|_| namespace)
    }

    /// Rebuild an existing scratch namespace from a commit.
    pub fn materialize_into(&self, commit: CommitId, namespace: NamespaceId) -> VcResult<MaterializeStats> {
        self.store.atomically(namespace, |tx| {
            let state = self.shared.state.lock();
            if state.branches.by_namespace(namespace).is_some() {
                return Err(VcError::NamespaceInUse(namespace));
            }
            let snapshots = &state.graph.get(commit)?.snapshots;
            materialize(tx, &self.shared.rows, snapshots, &state.tracked)
        })
    }

    /// Drop a scratch namespace. Branch namespaces go with their branch.
    pub fn drop_namespace(&self, namespace: NamespaceId) -> VcResult<()> {
        if self.shared.state.lock().branches.by_namespace(namespace).is_some() {
            return Err(VcError::NamespaceInUse(namespace));
        }
        Ok(self.store.drop_namespace(namespace)?)
    }

    // ==================== Diff ====================

    /// What it takes to turn commit `a` into commit `b`.
    pub fn diff(&self, a: CommitId, b: CommitId) -> VcResult<Vec<DiffEntry>> {
        let state = self.shared.state.lock();
        Ok(diff_snapshots(
            &state.graph.get(a)?.snapshots,
            &state.graph.get(b)?.snapshots,
        ))
    }

    /// Changes in the session's open commit since the last closed one.
    pub fn diff_uncommitted(&self, session: &Session) -> VcResult<Vec<DiffEntry>> {
        let state = self.shared.state.lock();
        let head = state.branches.current(session).head;
        let tip = state.graph.tip(head)?;
        Ok(diff_snapshots(
            &state.graph.get(tip)?.snapshots,
            &state.graph.get(head)?.snapshots,
        ))
    }

    /// What it takes to turn the session's branch into `branch`, heads included.
    pub fn diff_against(&self, session: &Session, branch: &str) -> VcResult<Vec<DiffEntry>> {
        let state = self.shared.state.lock();
        let ours = state.branches.current(session).head;
        let theirs = state.branches.get(branch)?.head;
        Ok(diff_snapshots(
            &state.graph.get(ours)?.snapshots,
            &state.graph.get(theirs)?.snapshots,
        ))
    }

    /// Attach row contents to diff entries.
    pub fn resolve_diff(&self, entries: &[DiffEntry]) -> VcResult<Vec<ResolvedEntry>> {
        resolve(&self.shared.rows, entries)
    }

    // ==================== Merge ====================

    /// Merge `source`'s last closed commit into `target`.
    ///
    /// `target` must have no uncommitted changes. On conflict nothing is
    /// applied and every conflicting key is reported.
    pub fn merge(&self, session: &Session, target: &str, source: &str) -> VcResult<MergeOutcome> {
        let namespace = self.shared.state.lock().branches.get(target)?.namespace;

        self.store.atomically(namespace, |tx| {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let target = state.branches.get(target)?.clone();
            let source = state.branches.get(source)?.clone();

            if state.graph.has_changes(target.head)? {
                return Err(VcError::UncommittedChanges(target.name));
            }
            let ours = state.graph.tip(target.head)?;
            let theirs = state.graph.tip(source.head)?;

            let (snapshots, fast_forward) =
                match plan_merge(&state.graph, &self.shared.rows, &state.tracked, ours, theirs)? {
                    MergePlan::UpToDate => {
                        info!(target = %target.name, source = %source.name, "already up to date");
                        return Ok(MergeOutcome::UpToDate { head: ours });
                    }
                    MergePlan::FastForward { snapshots } => (snapshots, true),
                    MergePlan::ThreeWay { base, snapshots } => {
                        debug!(%base, "three-way merge from base");
                        (snapshots, false)
                    }
                };

            let current = state.graph.get(target.head)?.snapshots.clone();
            self.sync(tx, &current, &snapshots, &state.tracked)?;

            let merge = if state.graph.get(target.head)?.is_open() {
                target.head
            } else {
                state.graph.open_child(ours)?
            };
            state.graph.add_parent(merge, theirs)?;
            state.graph.replace_snapshots(merge, snapshots)?;
            let request = CommitRequest::merge(source.name.as_str(), target.name.as_str());
            let commit = state.graph.close(merge, session.user(), &request)?.clone();
            let next = state.graph.open_child(merge)?;
            state.branches.set_head(target.name.as_str(), next)?;

            info!(
                target = %target.name,
                source = %source.name,
                commit = %commit,
                fast_forward,
                "merged"
            );
            Ok(if fast_forward {
                MergeOutcome::FastForward { commit }
            } else {
                MergeOutcome::Merged { commit }
            })
        })
    }

    // ==================== Stats ====================

    pub fn stats(&self) -> VcResult<EngineStats> {
        let (branches, commits, tracked_tables) = {
            let state = self.shared.state.lock();
            (state.branches.len(), state.graph.len(), state.tracked.len())
        };
        Ok(EngineStats {
            branches,
            commits,
            rows: self.shared.rows.len()?,
            tracked_tables,
        })
    }
}

/// the branch that owns `namespace`
fn branch_at(state: &VcState, namespace: NamespaceId) -> VcResult<BranchName> {
    state
        .branches
        .by_namespace(namespace)
        .map(|b| b.name.clone())
        .ok_or(VcError::Store(StoreError::UnknownNamespace(namespace)))
}

/// Engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub branches: usize,
    /// open commits included
    pub commits: usize,
    /// distinct rows in the row store
    pub rows: usize,
    pub tracked_tables: usize,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} branches, {} commits, {} rows, {} tracked tables",
            self.branches, self.commits, self.rows, self.tracked_tables
        )
    }
}

/// Row digests in order, refusing two identical rows.
fn hash_distinct(table: &TableName, rows: &[StoredRow]) -> VcResult<Vec<Digest>> {
    let mut seen = BTreeSet::new();
    let mut hashes = Vec::with_capacity(rows.len());
    for row in rows {
        let hash = hash_row(table, &row.columns)?;
        if !seen.insert(hash) {
            return Err(VcError::DuplicateRow {
                table: table.clone(),
                row: hash,
            });
        }
        hashes.push(hash);
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, Constraint, DataType, SchemaBuilder};
    use crate::vc::DiffAction;
    use serde_json::{json, Value};

    fn people() -> TableSchema {
        SchemaBuilder::new("people")
            .add_required_column("name", DataType::Text)
            .build()
            .unwrap()
    }

    fn products() -> TableSchema {
        SchemaBuilder::new("products")
            .primary_key("id", DataType::Integer)
            .add_required_column("name", DataType::Text)
            .add_column("colour", DataType::Text)
            .build()
            .unwrap()
    }

    fn row(value: Value) -> ColumnMap {
        value.as_object().unwrap().clone().into_iter().collect()
    }

    fn setup() -> (Engine, Session) {
        let engine = Engine::in_memory().unwrap();
        engine.track(people()).unwrap();
        let session = engine.open_session("yumin@example.com");
        (engine, session)
    }

    fn names<S: TableStore>(engine: &Engine<S>, session: &Session) -> Vec<String> {
        let mut names: Vec<String> = engine
            .select(session, "people", &Filter::all())
            .unwrap()
            .iter()
            .map(|r| r.get("name").and_then(Value::as_str).unwrap().to_string())
            .collect();
        names.sort();
        names
    }

    fn add_person<S: TableStore>(engine: &Engine<S>, session: &Session, name: &str) {
        engine.insert(session, "people", row(json!({ "name": name }))).unwrap();
    }

    /// Yumin and Gomez committed on the default branch
    fn seeded() -> (Engine, Session, Commit) {
        let (engine, session) = setup();
        add_person(&engine, &session, "Yumin");
        add_person(&engine, &session, "Gomez");
        let c1 = engine.commit(&session, CommitRequest::new("Add people")).unwrap();
        (engine, session, c1)
    }

    #[test]
    fn test_commit_diff_and_checkout_scenario() {
        let (engine, session, c1) = seeded();
        let root = engine.root();

        let diff = engine.diff(root, c1.id).unwrap();
        assert_eq!(diff.len(), 2);
        assert!(diff.iter().all(|e| e.action == DiffAction::Insert));

        let deleted = engine
            .delete(&session, "people", &Filter::eq("name", "Gomez"))
            .unwrap();
        assert_eq!(deleted, 1);
        let c2 = engine.commit(&session, CommitRequest::new("Remove Gomez")).unwrap();

        let diff = engine.diff(c1.id, c2.id).unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].action, DiffAction::Delete);

        engine.checkout(&session, c1.id).unwrap();
        assert_eq!(names(&engine, &session), vec!["Gomez", "Yumin"]);
        engine.checkout(&session, root).unwrap();
        assert!(names(&engine, &session).is_empty());
    }

    #[test]
    fn test_commit_advances_head_to_open_child() {
        let (engine, session, c1) = seeded();

        assert!(c1.is_closed());
        assert_eq!(c1.author, Some(UserRef::from("yumin@example.com")));
        let head = engine.head(&session).unwrap();
        assert!(head.is_open());
        assert_eq!(head.parents, vec![c1.id]);

        // an empty commit is still a commit
        let c2 = engine.commit(&session, CommitRequest::new("Nothing")).unwrap();
        assert_eq!(c2.parents, vec![c1.id]);
        assert!(engine.diff(c1.id, c2.id).unwrap().is_empty());
        assert_ne!(c1.hash, c2.hash);
    }

    #[test]
    fn test_branch_isolation() {
        let (engine, yumin, c1) = seeded();
        let gomez = engine.open_session("gomez@example.com");
        let viewer = engine.open_session("viewer@example.com");

        engine.create_branch("a", c1.id).unwrap();
        engine.create_branch("b", c1.id).unwrap();
        engine.switch_branch(&yumin, "a").unwrap();
        engine.switch_branch(&gomez, "b").unwrap();

        add_person(&engine, &yumin, "X");
        add_person(&engine, &gomez, "Y");

        assert_eq!(names(&engine, &yumin), vec!["Gomez", "X", "Yumin"]);
        assert_eq!(names(&engine, &gomez), vec!["Gomez", "Y", "Yumin"]);
        assert_eq!(names(&engine, &viewer), vec!["Gomez", "Yumin"]);

        let against = engine.diff_against(&yumin, "b").unwrap();
        let actions: Vec<DiffAction> = against.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![DiffAction::Delete, DiffAction::Insert]);
        let resolved = engine.resolve_diff(&against).unwrap();
        assert_eq!(resolved[0].columns["name"], json!("X"));
        assert_eq!(resolved[1].columns["name"], json!("Y"));
    }

    #[test]
    fn test_parallel_writers_on_different_branches() {
        let (engine, yumin, c1) = seeded();
        let gomez = engine.open_session("gomez@example.com");
        engine.create_branch("a", c1.id).unwrap();
        engine.create_branch("b", c1.id).unwrap();
        engine.switch_branch(&yumin, "a").unwrap();
        engine.switch_branch(&gomez, "b").unwrap();

        std::thread::scope(|scope| {
            for (session, prefix) in [(&yumin, "a"), (&gomez, "b")] {
                let engine = &engine;
                scope.spawn(move || {
                    for i in 0..20 {
                        add_person(engine, session, &format!("{}-{}", prefix, i));
                    }
                });
            }
        });

        assert_eq!(names(&engine, &yumin).len(), 22);
        assert_eq!(names(&engine, &gomez).len(), 22);
        assert_eq!(engine.diff_uncommitted(&yumin).unwrap().len(), 20);
        assert_eq!(engine.diff_uncommitted(&gomez).unwrap().len(), 20);
    }

    #[test]
    fn test_reverting_an_update_adds_no_rows() {
        let (engine, session) = setup();
        add_person(&engine, &session, "Yumin");
        let c1 = engine.commit(&session, CommitRequest::new("Add Yumin")).unwrap();

        let rename = |from: &str, to: &str| {
            engine
                .update(&session, "people", &Filter::eq("name", from), &row(json!({ "name": to })))
                .unwrap();
        };

        rename("Yumin", "Yumi");
        engine.commit(&session, CommitRequest::new("Rename")).unwrap();
        let rows_before = engine.stats().unwrap().rows;

        rename("Yumi", "Yumin");
        let c3 = engine.commit(&session, CommitRequest::new("Revert")).unwrap();
        assert_eq!(engine.stats().unwrap().rows, rows_before);
        assert!(engine.diff(c1.id, c3.id).unwrap().is_empty());

        // writing identical content changes nothing
        rename("Yumin", "Yumin");
        assert!(engine.diff_uncommitted(&session).unwrap().is_empty());
    }

    #[test]
    fn test_checkout_round_trip() {
        let (engine, session, c1) = seeded();
        let snapshot_of = |engine: &Engine| {
            let mut rows = engine.select(&session, "people", &Filter::all()).unwrap();
            rows.sort_by_key(|r| r.stamp);
            rows
        };
        let at_c1 = snapshot_of(&engine);

        add_person(&engine, &session, "Lee");
        let c2 = engine.commit(&session, CommitRequest::new("Add Lee")).unwrap();

        engine.checkout(&session, c1.id).unwrap();
        engine.checkout(&session, c2.id).unwrap();
        assert_eq!(names(&engine, &session), vec!["Gomez", "Lee", "Yumin"]);
        engine.checkout(&session, c1.id).unwrap();
        assert_eq!(snapshot_of(&engine), at_c1);
        assert_eq!(engine.head(&session).unwrap().id, c1.id);
    }

    #[test]
    fn test_incremental_checkout_matches_full() {
        let engine = Engine::open(EngineConfig::default().checkout(CheckoutMode::Incremental)).unwrap();
        engine.track(people()).unwrap();
        let session = engine.open_session("yumin@example.com");

        add_person(&engine, &session, "Yumin");
        add_person(&engine, &session, "Gomez");
        let c1 = engine.commit(&session, CommitRequest::new("Add people")).unwrap();
        engine
            .delete(&session, "people", &Filter::eq("name", "Gomez"))
            .unwrap();
        add_person(&engine, &session, "Lee");
        engine.commit(&session, CommitRequest::new("Swap")).unwrap();

        engine.checkout(&session, c1.id).unwrap();
        assert_eq!(names(&engine, &session), vec!["Gomez", "Yumin"]);
        engine.checkout(&session, engine.root()).unwrap();
        assert!(names(&engine, &session).is_empty());
    }

    #[test]
    fn test_checkout_refusals() {
        let (engine, session, c1) = seeded();
        add_person(&engine, &session, "Lee");

        let head = engine.head(&session).unwrap();
        assert!(matches!(
            engine.checkout(&session, head.id),
            Err(VcError::CommitOpen(_))
        ));
        assert!(matches!(
            engine.checkout(&session, c1.id),
            Err(VcError::UncommittedChanges(_))
        ));
        // refused checkouts leave the tables alone
        assert_eq!(names(&engine, &session), vec!["Gomez", "Lee", "Yumin"]);
    }

    #[test]
    fn test_default_branch_protection() {
        let (engine, session, c1) = seeded();
        let namespaces = engine.store().namespace_count();

        assert!(matches!(
            engine.delete_branch("primary"),
            Err(VcError::CannotDeleteDefault(_))
        ));

        engine.create_branch("scratch work", c1.id).unwrap();
        engine.switch_branch(&session, "scratch work").unwrap();
        engine.delete_branch("scratch work").unwrap();

        assert_eq!(engine.current_branch(&session).name, "primary");
        assert_eq!(engine.store().namespace_count(), namespaces);
        assert!(matches!(
            engine.switch_branch(&session, "scratch work"),
            Err(VcError::UnknownBranch(_))
        ));
    }

    #[test]
    fn test_branch_directory_operations() {
        let (engine, session, c1) = seeded();

        engine.create_branch("review", c1.id).unwrap();
        assert!(matches!(
            engine.create_branch("review", c1.id),
            Err(VcError::DuplicateBranch(_))
        ));

        engine.switch_branch(&session, "review").unwrap();
        engine.rename_branch("review", "Electrical Review").unwrap();
        assert_eq!(engine.current_branch(&session).name, "Electrical Review");

        let listed = engine.branches(&session);
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|b| b.is_current && b.name == "Electrical Review"));
        assert!(listed.iter().any(|b| b.is_default && b.name == "primary"));
    }

    #[test]
    fn test_branch_carries_uncommitted_work() {
        let (engine, session, _) = seeded();
        add_person(&engine, &session, "Lee");

        let branch = engine.branch(&session, "wip").unwrap();
        let other = engine.open_session("lee@example.com");
        engine.switch_branch(&other, "wip").unwrap();

        assert_eq!(names(&engine, &other), vec!["Gomez", "Lee", "Yumin"]);
        assert_ne!(branch.head, engine.head(&session).unwrap().id);
        assert_eq!(engine.diff_uncommitted(&other).unwrap().len(), 1);
    }

    #[test]
    fn test_log_is_newest_first() {
        let (engine, session, c1) = seeded();
        add_person(&engine, &session, "Lee");
        let c2 = engine.commit(&session, CommitRequest::new("Add Lee")).unwrap();

        let log: Vec<CommitId> = engine.log(&session, None).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(log, vec![c2.id, c1.id, engine.root()]);
        assert_eq!(engine.log(&session, Some(1)).unwrap().len(), 1);

        let parents = engine.parents(c2.id).unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].id, c1.id);
        assert_eq!(engine.get_commit(c2.id).unwrap(), c2);
    }

    #[test]
    fn test_track_adopts_existing_rows() {
        let engine = Engine::in_memory().unwrap();
        let session = engine.open_session("yumin@example.com");
        engine.create_table(&session, people()).unwrap();
        add_person(&engine, &session, "Yumin");
        add_person(&engine, &session, "Gomez");
        assert!(engine.diff_uncommitted(&session).unwrap().is_empty());

        assert!(engine.track(people()).unwrap());
        assert!(!engine.track(people()).unwrap());

        let rows = engine.select(&session, "people", &Filter::all()).unwrap();
        assert!(rows.iter().all(|r| r.stamp.is_some()));
        assert_eq!(engine.diff_uncommitted(&session).unwrap().len(), 2);
        assert_eq!(engine.tracked_tables(), vec![TableName::new("people").unwrap()]);
    }

    #[test]
    fn test_identical_rows_are_refused() {
        let (engine, session, _) = seeded();

        let err = engine
            .insert(&session, "people", row(json!({ "name": "Yumin" })))
            .unwrap_err();
        assert!(matches!(err, VcError::DuplicateRow { .. }));
        let err = engine
            .update(&session, "people", &Filter::eq("name", "Gomez"), &row(json!({ "name": "Yumin" })))
            .unwrap_err();
        assert!(matches!(err, VcError::DuplicateRow { .. }));

        assert_eq!(names(&engine, &session), vec!["Gomez", "Yumin"]);
        assert!(engine.diff_uncommitted(&session).unwrap().is_empty());
    }

    /// rows at c1, then rows after checking out c1, c2 and c1 again
    fn round_trip(mode: CheckoutMode) -> (Vec<String>, Vec<String>) {
        let engine = Engine::open(EngineConfig::default().checkout(mode)).unwrap();
        engine.track(people()).unwrap();
        let session = engine.open_session("yumin@example.com");

        add_person(&engine, &session, "Yumin");
        assert!(engine
            .insert(&session, "people", row(json!({ "name": "Yumin" })))
            .is_err());
        add_person(&engine, &session, "Gomez");
        let c1 = engine.commit(&session, CommitRequest::new("Add people")).unwrap();
        let before = names(&engine, &session);

        add_person(&engine, &session, "Lee");
        let c2 = engine.commit(&session, CommitRequest::new("Add Lee")).unwrap();
        engine.checkout(&session, c1.id).unwrap();
        engine.checkout(&session, c2.id).unwrap();
        engine.checkout(&session, c1.id).unwrap();
        (before, names(&engine, &session))
    }

    #[test]
    fn test_checkout_modes_agree_after_round_trip() {
        let (full_before, full_after) = round_trip(CheckoutMode::Full);
        let (incremental_before, incremental_after) = round_trip(CheckoutMode::Incremental);

        assert_eq!(full_before, vec!["Gomez", "Yumin"]);
        assert_eq!(full_after, full_before);
        assert_eq!(incremental_after, incremental_before);
        assert_eq!(full_after, incremental_after);
    }

    #[test]
    fn test_track_refuses_identical_rows() {
        let engine = Engine::in_memory().unwrap();
        let session = engine.open_session("yumin@example.com");
        engine.create_table(&session, people()).unwrap();
        add_person(&engine, &session, "Yumin");
        add_person(&engine, &session, "Yumin");

        assert!(matches!(engine.track(people()), Err(VcError::DuplicateRow { .. })));
        assert!(engine.tracked_tables().is_empty());
        let rows = engine.select(&session, "people", &Filter::all()).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.stamp.is_none()));
    }

    #[test]
    fn test_untracked_tables_are_not_versioned() {
        let (engine, session) = setup();
        engine.create_table(&session, products()).unwrap();
        engine
            .insert(&session, "products", row(json!({ "name": "Sandals" })))
            .unwrap();

        assert!(engine.diff_uncommitted(&session).unwrap().is_empty());
        let rows = engine.select(&session, "products", &Filter::all()).unwrap();
        assert_eq!(rows[0].stamp, None);
    }

    #[test]
    fn test_scratch_materialization() {
        let (engine, session, c1) = seeded();
        let people = TableName::new("people").unwrap();

        let ns = engine.materialize(c1.id).unwrap();
        assert_eq!(engine.store().select(ns, &people, &Filter::all()).unwrap().len(), 2);

        // writes to a scratch namespace stay out of history
        engine
            .store()
            .insert(ns, &people, row(json!({ "name": "Lee" })))
            .unwrap();
        assert!(engine.diff_uncommitted(&session).unwrap().is_empty());

        let stats = engine.materialize_into(c1.id, ns).unwrap();
        assert_eq!(stats.rows_removed, 3);
        assert_eq!(stats.rows_written, 2);

        let own = engine.current_branch(&session).namespace;
        assert!(matches!(engine.drop_namespace(own), Err(VcError::NamespaceInUse(_))));
        assert!(matches!(
            engine.materialize_into(c1.id, own),
            Err(VcError::NamespaceInUse(_))
        ));
        engine.drop_namespace(ns).unwrap();
        assert!(!engine.store().has_namespace(ns));
    }

    // ==================== Merges ====================

    /// products committed on `primary`, plus a `feature` branch from it
    fn catalogue() -> (Engine, Session, Session) {
        let engine = Engine::in_memory().unwrap();
        engine.track(products()).unwrap();
        let yumin = engine.open_session("yumin@example.com");
        for (id, name, colour) in [(1, "Sandals", "brown"), (5, "power cord", "black"), (10, "Hat", "red")] {
            engine
                .insert(&yumin, "products", row(json!({ "id": id, "name": name, "colour": colour })))
                .unwrap();
        }
        engine.commit(&yumin, CommitRequest::new("Initial catalogue")).unwrap();

        engine.branch(&yumin, "feature").unwrap();
        let gomez = engine.open_session("gomez@example.com");
        engine.switch_branch(&gomez, "feature").unwrap();
        (engine, yumin, gomez)
    }

    fn set(engine: &Engine, session: &Session, id: i64, changes: Value) {
        let updated = engine
            .update(session, "products", &Filter::eq("id", id), &row(changes))
            .unwrap();
        assert_eq!(updated, 1);
    }

    fn product(engine: &Engine, session: &Session, id: i64) -> ColumnMap {
        engine
            .select(session, "products", &Filter::eq("id", id))
            .unwrap()
            .remove(0)
            .columns
    }

    #[test]
    fn test_fast_forward_merge() {
        let (engine, yumin, gomez) = catalogue();
        let tip = engine.log(&yumin, Some(1)).unwrap().remove(0);

        set(&engine, &gomez, 1, json!({ "colour": "tan" }));
        let feature = engine.commit(&gomez, CommitRequest::new("Tan sandals")).unwrap();

        let outcome = engine.merge(&yumin, "primary", "feature").unwrap();
        assert!(matches!(outcome, MergeOutcome::FastForward { .. }));
        let commit = outcome.commit().unwrap();
        assert_eq!(commit.parents, vec![tip.id, feature.id]);
        assert_eq!(commit.summary, "Merge branch 'feature' into 'primary'");
        assert_eq!(product(&engine, &yumin, 1)["colour"], json!("tan"));

        let again = engine.merge(&yumin, "primary", "feature").unwrap();
        assert!(again.is_up_to_date());
    }

    #[test]
    fn test_three_way_merge() {
        let (engine, yumin, gomez) = catalogue();

        set(&engine, &yumin, 1, json!({ "colour": "tan" }));
        engine.commit(&yumin, CommitRequest::new("Tan sandals")).unwrap();
        set(&engine, &gomez, 5, json!({ "name": "Power Cord" }));
        engine.commit(&gomez, CommitRequest::new("Capitalize")).unwrap();
        // uncommitted work on the source stays behind
        set(&engine, &gomez, 10, json!({ "colour": "green" }));

        let outcome = engine.merge(&yumin, "primary", "feature").unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { .. }));
        assert!(outcome.commit().unwrap().is_merge());

        assert_eq!(product(&engine, &yumin, 1)["colour"], json!("tan"));
        assert_eq!(product(&engine, &yumin, 5)["name"], json!("Power Cord"));
        assert_eq!(product(&engine, &yumin, 10)["colour"], json!("red"));
        assert!(engine.head(&yumin).unwrap().is_open());
    }

    #[test]
    fn test_conflicting_merge_changes_nothing() {
        let (engine, yumin, gomez) = catalogue();

        set(&engine, &yumin, 10, json!({ "colour": "blue" }));
        engine.commit(&yumin, CommitRequest::new("Blue hat")).unwrap();
        set(&engine, &gomez, 10, json!({ "colour": "black" }));
        engine.commit(&gomez, CommitRequest::new("Black hat")).unwrap();
        let head = engine.head(&yumin).unwrap();

        let err = engine.merge(&yumin, "primary", "feature").unwrap_err();
        assert!(err.is_conflict());
        let conflicts = err.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].table, TableName::new("products").unwrap());
        assert_eq!(conflicts[0].column, "id");
        assert_eq!(conflicts[0].key, json!(10));

        assert_eq!(product(&engine, &yumin, 10)["colour"], json!("blue"));
        assert_eq!(engine.head(&yumin).unwrap(), head);
    }

    #[test]
    fn test_unique_column_clash_is_a_merge_conflict() {
        let engine = Engine::in_memory().unwrap();
        engine
            .track(
                SchemaBuilder::new("users")
                    .primary_key("id", DataType::Integer)
                    .column(ColumnDef::new("email", DataType::Text).with_constraint(Constraint::Unique))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let yumin = engine.open_session("yumin@example.com");
        let add_user = |session: &Session, id: i64, email: &str| {
            engine
                .insert(session, "users", row(json!({ "id": id, "email": email })))
                .unwrap();
        };
        add_user(&yumin, 1, "yumin@example.com");
        engine.commit(&yumin, CommitRequest::new("First user")).unwrap();
        engine.branch(&yumin, "feature").unwrap();
        let gomez = engine.open_session("gomez@example.com");
        engine.switch_branch(&gomez, "feature").unwrap();

        add_user(&yumin, 2, "shared@example.com");
        engine.commit(&yumin, CommitRequest::new("Second user")).unwrap();
        add_user(&gomez, 3, "shared@example.com");
        engine.commit(&gomez, CommitRequest::new("Third user")).unwrap();
        let head = engine.head(&yumin).unwrap();

        let err = engine.merge(&yumin, "primary", "feature").unwrap_err();
        assert!(err.is_conflict());
        let conflicts = err.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].column, "email");
        assert_eq!(conflicts[0].key, json!("shared@example.com"));
        assert_eq!(engine.head(&yumin).unwrap(), head);
        let emails = engine.select(&yumin, "users", &Filter::all()).unwrap();
        assert_eq!(emails.len(), 2);
    }

    #[test]
    fn test_merge_refuses_dirty_target() {
        let (engine, yumin, gomez) = catalogue();
        set(&engine, &gomez, 1, json!({ "colour": "tan" }));
        engine.commit(&gomez, CommitRequest::new("Tan sandals")).unwrap();
        set(&engine, &yumin, 5, json!({ "colour": "white" }));

        assert!(matches!(
            engine.merge(&yumin, "primary", "feature"),
            Err(VcError::UncommittedChanges(_))
        ));
    }

    #[test]
    fn test_persistent_row_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows");

        {
            let engine = Engine::open(EngineConfig::new(&path)).unwrap();
            engine.track(people()).unwrap();
            let session = engine.open_session("yumin@example.com");
            add_person(&engine, &session, "Yumin");
        }

        let engine = Engine::open(EngineConfig::new(&path).create_if_missing(false)).unwrap();
        assert_eq!(engine.stats().unwrap().rows, 1);
        assert!(Engine::open(EngineConfig::new(dir.path().join("missing")).create_if_missing(false)).is_err());
    }

    #[test]
    fn test_stats() {
        let (engine, _, c1) = seeded();
        engine.create_branch("a", c1.id).unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.branches, 2);
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.tracked_tables, 1);
        // root, c1, and the open head of primary
        assert_eq!(stats.commits, 3);
        assert_eq!(stats.to_string(), "2 branches, 3 commits, 2 rows, 1 tracked tables");
    }
}
