//! Table schema and row storage.
//!
//! Each table has:
//! - Fixed column set in declaration order
//! - Optional unique/plain indexes
//! - Foreign keys to other tables with referential actions
//! - A sequence for auto-increment columns

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::column::{Column, Generated};
use super::error::StoreError;

/// One stored row, keyed by column name.
pub type Row = Map<String, Value>;

/// Action taken on referencing rows when a referenced row changes or goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
}

/// Index over one or more columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name
    pub name: String,
    /// Indexed columns in order
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness
    pub unique: bool,
}

/// Foreign key from this table to another table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    /// Referencing columns in this table
    pub columns: Vec<String>,
    /// Referenced table
    pub references_table: String,
    /// Referenced columns, positionally matching `columns`
    pub references_columns: Vec<String>,
    /// Action on delete of the referenced row
    pub on_delete: ReferentialAction,
    /// Action on update of the referenced key
    pub on_update: ReferentialAction,
}

/// Table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Column definitions in declaration order
    pub columns: Vec<Column>,
    /// Indexes, unique or not
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
    /// Foreign keys to other tables
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "foreignKeys")]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// Creates an empty schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Appends a column.
    pub fn push_column(&mut self, column: Column) {
        self.columns.push(column);
    }

    /// Appends an index named after the table and columns.
    pub fn push_index(&mut self, columns: &[&str], unique: bool) {
        let name = format!(
            "{}_{}_{}",
            self.name,
            columns.join("_"),
            if unique { "unique" } else { "idx" }
        );
        self.indexes.push(Index {
            name,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        });
    }

    /// Appends a foreign key.
    pub fn push_foreign_key(&mut self, foreign_key: ForeignKey) {
        self.foreign_keys.push(foreign_key);
    }

    /// Returns the column definition for the given name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns true if the table has the named column.
    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    /// Returns the primary key column.
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Returns column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Validates the definition: unique column names, at most one primary key,
    /// and indexes/foreign keys that only mention existing columns.
    pub fn validate(&self) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(StoreError::ColumnAlreadyExists {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
            if column.generated == Some(Generated::AutoIncrement)
                && !column.column_type.is_integer()
            {
                return Err(StoreError::InvalidSchema {
                    table: self.name.clone(),
                    message: format!(
                        "auto-increment column '{}' must be an integer type",
                        column.name
                    ),
                });
            }
        }

        if self.columns.iter().filter(|c| c.primary_key).count() > 1 {
            return Err(StoreError::InvalidSchema {
                table: self.name.clone(),
                message: "more than one primary key column".to_string(),
            });
        }

        let index_columns = self.indexes.iter().flat_map(|i| i.columns.iter());
        let fk_columns = self.foreign_keys.iter().flat_map(|f| f.columns.iter());
        for column in index_columns.chain(fk_columns) {
            if !self.has_column(column) {
                return Err(StoreError::ColumnNotFound {
                    table: self.name.clone(),
                    column: column.clone(),
                });
            }
        }

        for fk in &self.foreign_keys {
            if fk.columns.len() != fk.references_columns.len() {
                return Err(StoreError::InvalidSchema {
                    table: self.name.clone(),
                    message: format!(
                        "foreign key to '{}' has mismatched column counts",
                        fk.references_table
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Committed or staged rows of one table.
#[derive(Debug, Clone, Default)]
pub struct TableData {
    /// Rows in insertion order
    pub rows: Vec<Row>,
    /// Next auto-increment value
    pub next_serial: i64,
}

impl TableData {
    /// Creates empty table data with the sequence starting at 1.
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            next_serial: 1,
        }
    }
}
