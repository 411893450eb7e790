//! Store container managing table schemas and the committed snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};

use super::error::StoreError;
use super::filter::Filter;
use super::table::{Row, TableData, TableSchema};
use super::transaction::Transaction;

/// Immutable committed state of every table.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub(crate) tables: HashMap<String, Arc<TableData>>,
}

/// Read access shared by committed snapshots and open transactions.
pub trait StoreRead {
    /// Returns the schema of a table.
    fn schema(&self, table: &str) -> Result<Arc<TableSchema>, StoreError>;

    /// Returns the rows of a table as this reader sees them.
    fn rows(&self, table: &str) -> Result<&[Row], StoreError>;

    /// Returns clones of all rows matching the filter, in insertion order.
    fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        Ok(self
            .rows(table)?
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    /// Returns the first row matching the filter.
    fn select_one(&self, table: &str, filter: &Filter) -> Result<Option<Row>, StoreError> {
        Ok(self
            .rows(table)?
            .iter()
            .find(|row| filter.matches(row))
            .cloned())
    }

    /// Counts rows matching the filter.
    fn count(&self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self
            .rows(table)?
            .iter()
            .filter(|row| filter.matches(row))
            .count())
    }
}

/// Relational store holding all tables.
///
/// Readers load the committed snapshot without locking. Writers are
/// serialized: a transaction holds the writer lock from `begin` until commit
/// or abort, and publishes all of its tables with one snapshot swap.
#[derive(Debug)]
pub struct Store {
    /// Table name to schema
    schemas: RwLock<HashMap<String, Arc<TableSchema>>>,
    /// Committed table data
    state: ArcSwap<Snapshot>,
    /// Serializes writers
    writer: Mutex<()>,
}

impl Store {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
            state: ArcSwap::from_pointee(Snapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// Creates a new table.
    ///
    /// Foreign keys must reference tables that already exist, and their
    /// referenced columns must exist there.
    pub fn create_table(&self, schema: TableSchema) -> Result<(), StoreError> {
        schema.validate()?;
        let _guard = self.writer.lock();
        let mut schemas = self.schemas.write();
        if schemas.contains_key(&schema.name) {
            return Err(StoreError::TableAlreadyExists(schema.name));
        }
        for fk in &schema.foreign_keys {
            let target = if fk.references_table == schema.name {
                &schema
            } else {
                schemas
                    .get(&fk.references_table)
                    .map(|s| s.as_ref())
                    .ok_or_else(|| StoreError::TableNotFound {
                        table: fk.references_table.clone(),
                    })?
            };
            for column in &fk.references_columns {
                if !target.has_column(column) {
                    return Err(StoreError::ColumnNotFound {
                        table: target.name.clone(),
                        column: column.clone(),
                    });
                }
            }
        }

        let mut snapshot = Snapshot::clone(&self.state.load());
        snapshot
            .tables
            .insert(schema.name.clone(), Arc::new(TableData::new()));
        tracing::debug!(table = %schema.name, columns = schema.columns.len(), "created table");
        schemas.insert(schema.name.clone(), Arc::new(schema));
        self.state.store(Arc::new(snapshot));
        Ok(())
    }

    /// Returns the schema of a table.
    pub fn table_schema(&self, name: &str) -> Result<Arc<TableSchema>, StoreError> {
        self.schemas
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound {
                table: name.to_string(),
            })
    }

    /// Returns true if the table exists.
    pub fn has_table(&self, name: &str) -> bool {
        self.schemas.read().contains_key(name)
    }

    /// Returns all table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of tables.
    pub fn table_count(&self) -> usize {
        self.schemas.read().len()
    }

    /// Returns every foreign key that references `table`, with the owning table.
    pub(crate) fn referencing(&self, table: &str) -> Vec<(Arc<TableSchema>, usize)> {
        let schemas = self.schemas.read();
        let mut found = Vec::new();
        for schema in schemas.values() {
            for (idx, fk) in schema.foreign_keys.iter().enumerate() {
                if fk.references_table == table {
                    found.push((schema.clone(), idx));
                }
            }
        }
        found.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        found
    }

    /// Opens a read view over the current committed snapshot.
    pub fn read(&self) -> ReadView<'_> {
        ReadView {
            store: self,
            snapshot: self.state.load_full(),
        }
    }

    /// Begins a write transaction, waiting for any open writer to finish.
    pub fn begin(&self) -> Transaction<'_> {
        let guard = self.writer.lock();
        Transaction::new(self, guard, self.state.load_full())
    }

    /// Publishes a new committed snapshot.
    pub(crate) fn publish(&self, snapshot: Snapshot) {
        self.state.store(Arc::new(snapshot));
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Consistent read-only view of the committed state.
#[derive(Debug)]
pub struct ReadView<'a> {
    store: &'a Store,
    snapshot: Arc<Snapshot>,
}

impl StoreRead for ReadView<'_> {
    fn schema(&self, table: &str) -> Result<Arc<TableSchema>, StoreError> {
        self.store.table_schema(table)
    }

    fn rows(&self, table: &str) -> Result<&[Row], StoreError> {
        self.snapshot
            .tables
            .get(table)
            .map(|data| data.rows.as_slice())
            .ok_or_else(|| StoreError::TableNotFound {
                table: table.to_string(),
            })
    }
}
