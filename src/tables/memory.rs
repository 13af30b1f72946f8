//! In-memory table store.
//!
//! Each namespace sits behind its own mutex, so writers on different
//! branches never wait for each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::{
    Filter, NamespaceId, NamespaceTx, RowChange, StoreError, StoreResult, StoredRow, TableStore,
    WriteListener,
};
use crate::catalog::TableSchema;
use crate::storage::{ColumnMap, Digest, TableName};

#[derive(Clone)]
struct Table {
    schema: TableSchema,
    rows: Vec<StoredRow>,
}

impl Table {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// max existing key + 1
    fn next_serial(&self) -> i64 {
        let Some(pk) = self.schema.primary_key.as_deref() else {
            return 1;
        };
        self.rows
            .iter()
            .filter_map(|r| r.columns.get(pk).and_then(Value::as_i64))
            .max()
            .map_or(1, |max| max + 1)
    }

    fn matching(&self, filter: &Filter) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| filter.matches(&self.schema, &r.columns))
            .map(|(i, _)| i)
            .collect()
    }

    /// Enforce unique columns (including the primary key) for `row`,
    /// ignoring the rows at `skip`.
    fn check_unique(&self, rows: &[StoredRow], row: &ColumnMap, skip: &[usize]) -> StoreResult<()> {
        for column in self.schema.unique_columns() {
            let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let taken = rows
                .iter()
                .enumerate()
                .any(|(i, r)| !skip.contains(&i) && r.columns.get(column) == Some(value));
            if taken {
                return Err(StoreError::DuplicateKey {
                    table: self.schema.name.clone(),
                    column: column.to_string(),
                    key: value.clone(),
                });
            }
        }
        Ok(())
    }

    fn shares_stamp(&self, stamp: Option<Digest>, index: usize) -> bool {
        stamp.is_some()
            && self
                .rows
                .iter()
                .enumerate()
                .any(|(i, r)| i != index && r.stamp == stamp)
    }
}

struct Namespace {
    id: NamespaceId,
    tables: BTreeMap<TableName, Table>,
}

impl Namespace {
    fn table(&self, name: &TableName) -> StoreResult<&Table> {
        self.tables.get(name).ok_or_else(|| StoreError::UnknownTable {
            namespace: self.id,
            table: name.clone(),
        })
    }

    fn table_mut(&mut self, name: &TableName) -> StoreResult<&mut Table> {
        let id = self.id;
        self.tables.get_mut(name).ok_or_else(|| StoreError::UnknownTable {
            namespace: id,
            table: name.clone(),
        })
    }
}

impl NamespaceTx for Namespace {
    fn namespace(&self) -> NamespaceId {
        self.id
    }

    fn has_table(&self, table: &TableName) -> bool {
        self.tables.contains_key(table)
    }

    fn create_table(&mut self, schema: &TableSchema) -> StoreResult<()> {
        if self.tables.contains_key(&schema.name) {
            return Err(StoreError::TableExists(schema.name.clone()));
        }
        schema.validate()?;
        self.tables.insert(schema.name.clone(), Table::new(schema.clone()));
        Ok(())
    }

    fn rows(&self, table: &TableName) -> StoreResult<Vec<StoredRow>> {
        Ok(self.table(table)?.rows.clone())
    }

    fn clear(&mut self, table: &TableName) -> StoreResult<()> {
        self.table_mut(table)?.rows.clear();
        Ok(())
    }

    fn put_stamped(&mut self, table: &TableName, stamp: Digest, columns: ColumnMap) -> StoreResult<()> {
        let t = self.table_mut(table)?;
        t.check_unique(&t.rows, &columns, &[])?;
        t.rows.push(StoredRow {
            stamp: Some(stamp),
            columns,
        });
        Ok(())
    }

    fn remove_stamped(&mut self, table: &TableName, stamp: Digest) -> StoreResult<usize> {
        let t = self.table_mut(table)?;
        let before = t.rows.len();
        t.rows.retain(|r| r.stamp != Some(stamp));
        Ok(before - t.rows.len())
    }
}

/// Table store keeping every namespace in process memory.
#[derive(Default)]
pub struct MemoryTableStore {
    namespaces: RwLock<HashMap<NamespaceId, Arc<Mutex<Namespace>>>>,
    listeners: RwLock<HashMap<TableName, Vec<Arc<dyn WriteListener>>>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace(&self, id: NamespaceId) -> StoreResult<Arc<Mutex<Namespace>>> {
        self.namespaces
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::UnknownNamespace(id))
    }

    fn listeners_for(&self, table: &TableName) -> Vec<Arc<dyn WriteListener>> {
        self.listeners.read().get(table).cloned().unwrap_or_default()
    }

    /// number of namespaces currently held
    pub fn namespace_count(&self) -> usize {
        self.namespaces.read().len()
    }
}

/// Run the listeners for one write. With no listener the row keeps `unhooked`.
fn notify(
    listeners: &[Arc<dyn WriteListener>],
    namespace: NamespaceId,
    table: &TableName,
    change: RowChange<'_>,
    unhooked: Option<Digest>,
) -> StoreResult<Option<Digest>> {
    let mut stamp = unhooked;
    for listener in listeners {
        stamp = listener
            .on_write(namespace, table, change)
            .map_err(|e| StoreError::Hook(Box::new(e)))?;
    }
    Ok(stamp)
}

impl TableStore for MemoryTableStore {
    fn create_namespace(&self, namespace: NamespaceId) -> StoreResult<()> {
        let mut namespaces = self.namespaces.write();
        if namespaces.contains_key(&namespace) {
            return Err(StoreError::NamespaceExists(namespace));
        }
        namespaces.insert(
            namespace,
            Arc::new(Mutex::new(Namespace {
                id: namespace,
                tables: BTreeMap::new(),
            })),
        );
        Ok(())
    }

    fn drop_namespace(&self, namespace: NamespaceId) -> StoreResult<()> {
        self.namespaces
            .write()
            .remove(&namespace)
            .map(|_| ())
            .ok_or(StoreError::UnknownNamespace(namespace))
    }

    fn has_namespace(&self, namespace: NamespaceId) -> bool {
        self.namespaces.read().contains_key(&namespace)
    }

    fn create_table(&self, namespace: NamespaceId, schema: TableSchema) -> StoreResult<()> {
        let ns = self.namespace(namespace)?;
        let mut guard = ns.lock();
        guard.create_table(&schema)
    }

    fn register_listener(&self, table: &TableName, listener: Arc<dyn WriteListener>) {
        self.listeners
            .write()
            .entry(table.clone())
            .or_default()
            .push(listener);
    }

    fn insert(&self, namespace: NamespaceId, table: &TableName, values: ColumnMap) -> StoreResult<StoredRow> {
        let listeners = self.listeners_for(table);
        let ns = self.namespace(namespace)?;
        let mut guard = ns.lock();
        let t = guard.table_mut(table)?;

        let columns = t.schema.prepare(values, t.next_serial())?;
        t.check_unique(&t.rows, &columns, &[])?;

        let stamp = notify(
            &listeners,
            namespace,
            table,
            RowChange::Insert { columns: &columns },
            None,
        )?;

        let row = StoredRow { stamp, columns };
        t.rows.push(row.clone());
        Ok(row)
    }

    fn update(
        &self,
        namespace: NamespaceId,
        table: &TableName,
        filter: &Filter,
        changes: &ColumnMap,
    ) -> StoreResult<usize> {
        let listeners = self.listeners_for(table);
        let ns = self.namespace(namespace)?;
        let mut guard = ns.lock();
        let t = guard.table_mut(table)?;

        let targets = t.matching(filter);

        // validate every row before anything is hooked or written
        let mut staged = t.rows.clone();
        for &i in &targets {
            staged[i].columns = t.schema.prepare_update(&t.rows[i].columns, changes)?;
        }
        for &i in &targets {
            t.check_unique(&staged, &staged[i].columns, &[i])?;
        }

        for &i in &targets {
            let previous = t.rows[i].stamp;
            let previous_shared = t.shares_stamp(previous, i);
            let columns = std::mem::take(&mut staged[i].columns);
            let stamp = notify(
                &listeners,
                namespace,
                table,
                RowChange::Update {
                    previous,
                    previous_shared,
                    columns: &columns,
                },
                previous,
            )?;
            t.rows[i] = StoredRow { stamp, columns };
        }
        Ok(targets.len())
    }

    fn delete(&self, namespace: NamespaceId, table: &TableName, filter: &Filter) -> StoreResult<usize> {
        let listeners = self.listeners_for(table);
        let ns = self.namespace(namespace)?;
        let mut guard = ns.lock();
        let t = guard.table_mut(table)?;

        let targets = t.matching(filter);
        for &i in targets.iter().rev() {
            let previous = t.rows[i].stamp;
            let shared = t.shares_stamp(previous, i);
            notify(
                &listeners,
                namespace,
                table,
                RowChange::Delete { previous, shared },
                None,
            )?;
            t.rows.remove(i);
        }
        Ok(targets.len())
    }

    fn select(&self, namespace: NamespaceId, table: &TableName, filter: &Filter) -> StoreResult<Vec<StoredRow>> {
        let ns = self.namespace(namespace)?;
        let guard = ns.lock();
        let t = guard.table(table)?;
        Ok(t.matching(filter).into_iter().map(|i| t.rows[i].clone()).collect())
    }

    fn atomically<R, E, F>(&self, namespace: NamespaceId, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn NamespaceTx) -> Result<R, E>,
        E: From<StoreError>,
    {
        let ns = self.namespace(namespace)?;
        let mut guard = ns.lock();
        let backup = guard.tables.clone();

        let result = f(&mut *guard);
        if result.is_err() {
            guard.tables = backup;
        }
        result
    }
}
