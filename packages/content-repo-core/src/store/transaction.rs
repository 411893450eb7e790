//! Write transactions with staged tables and atomic commit.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::MutexGuard;
use serde_json::Value;

use super::column::{Column, Generated};
use super::database::{Snapshot, Store, StoreRead};
use super::error::StoreError;
use super::filter::{values_equal, Filter};
use super::table::{ForeignKey, ReferentialAction, Row, TableData, TableSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    Aborted,
}

/// Write transaction holding staged copies of every table it touched.
///
/// Changes are invisible to readers until `commit`, which publishes all
/// staged tables in one snapshot swap. Dropping an uncommitted transaction
/// aborts it.
pub struct Transaction<'a> {
    store: &'a Store,
    _writer: MutexGuard<'a, ()>,
    base: Arc<Snapshot>,
    staged: HashMap<String, TableData>,
    state: TxState,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(store: &'a Store, writer: MutexGuard<'a, ()>, base: Arc<Snapshot>) -> Self {
        Self {
            store,
            _writer: writer,
            base,
            staged: HashMap::new(),
            state: TxState::Active,
        }
    }

    fn ensure_active(&self) -> Result<(), StoreError> {
        if self.state == TxState::Active {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed)
        }
    }

    fn staged_mut(&mut self, table: &str) -> Result<&mut TableData, StoreError> {
        if !self.staged.contains_key(table) {
            let base = self
                .base
                .tables
                .get(table)
                .ok_or_else(|| StoreError::TableNotFound {
                    table: table.to_string(),
                })?;
            self.staged.insert(table.to_string(), TableData::clone(base));
        }
        self.staged
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound {
                table: table.to_string(),
            })
    }

    fn next_serial(&self, table: &str) -> i64 {
        match self.staged.get(table) {
            Some(data) => data.next_serial,
            None => self
                .base
                .tables
                .get(table)
                .map(|d| d.next_serial)
                .unwrap_or(1),
        }
    }

    /// Inserts a row, filling generated values and defaults.
    ///
    /// # Returns
    /// The complete stored row.
    pub fn insert(&mut self, table: &str, row: Row) -> Result<Row, StoreError> {
        self.ensure_active()?;
        let schema = self.store.table_schema(table)?;
        reject_unknown_columns(&schema, &row)?;

        let mut next_serial = self.next_serial(table);
        let mut complete = Row::new();
        for column in &schema.columns {
            let mut value = row
                .get(&column.name)
                .cloned()
                .or_else(|| column.default.clone())
                .unwrap_or(Value::Null);
            match column.generated {
                Some(Generated::AutoIncrement) => {
                    if value.is_null() {
                        value = Value::from(next_serial);
                        next_serial += 1;
                    } else if let Some(explicit) = value.as_i64() {
                        next_serial = next_serial.max(explicit + 1);
                    }
                }
                Some(Generated::Uuid) if value.is_null() => {
                    value = Value::String(uuid::Uuid::new_v4().to_string());
                }
                _ => {}
            }
            check_value(&schema, column, &value)?;
            complete.insert(column.name.clone(), value);
        }

        self.check_unique(&schema, &complete, None)?;
        self.check_foreign_keys(&schema, &complete)?;

        let data = self.staged_mut(table)?;
        data.next_serial = next_serial;
        data.rows.push(complete.clone());
        Ok(complete)
    }

    /// Applies `patch` to every row matching `filter`.
    ///
    /// # Returns
    /// The updated rows in table order.
    pub fn update_where(
        &mut self,
        table: &str,
        filter: &Filter,
        patch: &Row,
    ) -> Result<Vec<Row>, StoreError> {
        self.ensure_active()?;
        let schema = self.store.table_schema(table)?;
        reject_unknown_columns(&schema, patch)?;
        for (name, value) in patch {
            if let Some(column) = schema.get_column(name) {
                check_value(&schema, column, value)?;
            }
        }

        let positions: Vec<usize> = self
            .rows(table)?
            .iter()
            .enumerate()
            .filter(|(_, row)| filter.matches(row))
            .map(|(idx, _)| idx)
            .collect();

        let mut updated = Vec::with_capacity(positions.len());
        for position in positions {
            let old = self.rows(table)?[position].clone();
            let mut new = old.clone();
            for (name, value) in patch {
                new.insert(name.clone(), value.clone());
            }
            if new != old {
                self.check_unique(&schema, &new, Some(position))?;
                self.check_foreign_keys(&schema, &new)?;
                self.staged_mut(table)?.rows[position] = new.clone();
                self.apply_update_actions(&schema, &old, &new)?;
            }
            updated.push(new);
        }
        Ok(updated)
    }

    /// Deletes every row matching `filter`, applying referential actions.
    ///
    /// # Returns
    /// The removed rows.
    pub fn delete_where(&mut self, table: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        self.ensure_active()?;
        let data = self.staged_mut(table)?;
        let mut removed = Vec::new();
        data.rows.retain(|row| {
            if filter.matches(row) {
                removed.push(row.clone());
                false
            } else {
                true
            }
        });

        for row in &removed {
            self.apply_delete_actions(table, row)?;
        }
        Ok(removed)
    }

    /// Commits all staged changes atomically.
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.ensure_active()?;
        let mut snapshot = Snapshot::clone(&self.base);
        let mut touched: Vec<String> = Vec::with_capacity(self.staged.len());
        for (name, data) in self.staged.drain() {
            touched.push(name.clone());
            snapshot.tables.insert(name, Arc::new(data));
        }
        self.store.publish(snapshot);
        self.state = TxState::Committed;
        touched.sort();
        tracing::debug!(tables = ?touched, "transaction committed");
        Ok(())
    }

    /// Aborts the transaction, discarding all staged changes.
    pub fn abort(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if self.state == TxState::Active {
            self.state = TxState::Aborted;
            self.staged.clear();
            tracing::trace!("transaction aborted");
        }
    }

    /// Returns whether any table has staged changes.
    pub fn has_staged_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    fn check_unique(
        &self,
        schema: &TableSchema,
        row: &Row,
        skip: Option<usize>,
    ) -> Result<(), StoreError> {
        let mut constraints: Vec<(String, Vec<&str>)> = Vec::new();
        if let Some(pk) = schema.primary_key() {
            constraints.push((format!("{}_pkey", schema.name), vec![pk.name.as_str()]));
        }
        for index in schema.indexes.iter().filter(|i| i.unique) {
            constraints.push((
                index.name.clone(),
                index.columns.iter().map(|c| c.as_str()).collect(),
            ));
        }

        let rows = self.rows(&schema.name)?;
        for (constraint, columns) in constraints {
            let key: Vec<&Value> = columns
                .iter()
                .map(|c| row.get(*c).unwrap_or(&Value::Null))
                .collect();
            if key.iter().any(|v| v.is_null()) {
                continue;
            }
            let duplicate = rows.iter().enumerate().any(|(idx, existing)| {
                Some(idx) != skip
                    && columns.iter().zip(&key).all(|(c, v)| {
                        values_equal(existing.get(*c).unwrap_or(&Value::Null), v)
                    })
            });
            if duplicate {
                return Err(StoreError::UniqueViolation {
                    table: schema.name.clone(),
                    constraint,
                });
            }
        }
        Ok(())
    }

    fn check_foreign_keys(&self, schema: &TableSchema, row: &Row) -> Result<(), StoreError> {
        for fk in &schema.foreign_keys {
            let key: Vec<&Value> = fk
                .columns
                .iter()
                .map(|c| row.get(c).unwrap_or(&Value::Null))
                .collect();
            if key.iter().any(|v| v.is_null()) {
                continue;
            }
            let filter = key_filter(&fk.references_columns, &key);
            let self_match = fk.references_table == schema.name && filter.matches(row);
            if !self_match && self.count(&fk.references_table, &filter)? == 0 {
                return Err(fk_violation(&schema.name, fk));
            }
        }
        Ok(())
    }

    fn apply_delete_actions(&mut self, table: &str, row: &Row) -> Result<(), StoreError> {
        for (referencing, idx) in self.store.referencing(table) {
            let fk = &referencing.foreign_keys[idx];
            let key: Vec<&Value> = fk
                .references_columns
                .iter()
                .map(|c| row.get(c).unwrap_or(&Value::Null))
                .collect();
            if key.iter().any(|v| v.is_null()) {
                continue;
            }
            let filter = key_filter(&fk.columns, &key);
            if self.count(&referencing.name, &filter)? == 0 {
                continue;
            }
            match fk.on_delete {
                ReferentialAction::Cascade => {
                    self.delete_where(&referencing.name, &filter)?;
                }
                ReferentialAction::SetNull => {
                    let patch: Row = fk
                        .columns
                        .iter()
                        .map(|c| (c.clone(), Value::Null))
                        .collect();
                    self.update_where(&referencing.name, &filter, &patch)?;
                }
                ReferentialAction::NoAction | ReferentialAction::Restrict => {
                    return Err(fk_violation(&referencing.name, fk));
                }
            }
        }
        Ok(())
    }

    fn apply_update_actions(
        &mut self,
        schema: &TableSchema,
        old: &Row,
        new: &Row,
    ) -> Result<(), StoreError> {
        for (referencing, idx) in self.store.referencing(&schema.name) {
            let fk = &referencing.foreign_keys[idx];
            let changed = fk.references_columns.iter().any(|c| {
                !values_equal(
                    old.get(c).unwrap_or(&Value::Null),
                    new.get(c).unwrap_or(&Value::Null),
                )
            });
            if !changed {
                continue;
            }
            let old_key: Vec<&Value> = fk
                .references_columns
                .iter()
                .map(|c| old.get(c).unwrap_or(&Value::Null))
                .collect();
            if old_key.iter().any(|v| v.is_null()) {
                continue;
            }
            let filter = key_filter(&fk.columns, &old_key);
            if self.count(&referencing.name, &filter)? == 0 {
                continue;
            }
            let patch: Row = match fk.on_update {
                ReferentialAction::Cascade => fk
                    .columns
                    .iter()
                    .zip(&fk.references_columns)
                    .map(|(c, r)| (c.clone(), new.get(r).cloned().unwrap_or(Value::Null)))
                    .collect(),
                ReferentialAction::SetNull => fk
                    .columns
                    .iter()
                    .map(|c| (c.clone(), Value::Null))
                    .collect(),
                ReferentialAction::NoAction | ReferentialAction::Restrict => {
                    return Err(fk_violation(&referencing.name, fk));
                }
            };
            self.update_where(&referencing.name, &filter, &patch)?;
        }
        Ok(())
    }
}

impl StoreRead for Transaction<'_> {
    fn schema(&self, table: &str) -> Result<Arc<TableSchema>, StoreError> {
        self.store.table_schema(table)
    }

    fn rows(&self, table: &str) -> Result<&[Row], StoreError> {
        if let Some(data) = self.staged.get(table) {
            return Ok(data.rows.as_slice());
        }
        self.base
            .tables
            .get(table)
            .map(|data| data.rows.as_slice())
            .ok_or_else(|| StoreError::TableNotFound {
                table: table.to_string(),
            })
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("staged", &self.staged.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn reject_unknown_columns(schema: &TableSchema, row: &Row) -> Result<(), StoreError> {
    for key in row.keys() {
        if !schema.has_column(key) {
            return Err(StoreError::ColumnNotFound {
                table: schema.name.clone(),
                column: key.clone(),
            });
        }
    }
    Ok(())
}

fn check_value(schema: &TableSchema, column: &Column, value: &Value) -> Result<(), StoreError> {
    if value.is_null() {
        if column.nullable {
            return Ok(());
        }
        return Err(StoreError::NotNullViolation {
            table: schema.name.clone(),
            column: column.name.clone(),
        });
    }
    if !column.column_type.accepts(value) {
        return Err(StoreError::TypeMismatch {
            table: schema.name.clone(),
            column: column.name.clone(),
            expected: column.column_type.as_str().to_string(),
            got: value.to_string(),
        });
    }
    Ok(())
}

fn key_filter(columns: &[String], key: &[&Value]) -> Filter {
    Filter::and(
        columns
            .iter()
            .zip(key)
            .map(|(c, v)| Filter::Eq(c.clone(), (*v).clone()))
            .collect(),
    )
}

fn fk_violation(table: &str, fk: &ForeignKey) -> StoreError {
    StoreError::ForeignKeyViolation {
        table: table.to_string(),
        columns: fk.columns.join(", "),
        references: fk.references_table.clone(),
    }
}
