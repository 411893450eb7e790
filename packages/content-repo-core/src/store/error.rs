//! Store error types.

use thiserror::Error;

/// Errors raised by the relational store.
///
/// Constraint violations are reported exactly as the store detects them; the
/// engine layers above pass them through without retrying.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Table not found
    #[error("Table '{table}' not found")]
    TableNotFound { table: String },

    /// Table already exists
    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),

    /// Column not found in table
    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    /// Column declared twice in one table
    #[error("Column '{column}' already exists in table '{table}'")]
    ColumnAlreadyExists { table: String, column: String },

    /// Value does not fit the column type
    #[error("Type mismatch for '{table}.{column}': expected {expected}, got {got}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        got: String,
    },

    /// NOT NULL constraint violated
    #[error("Null value in column '{column}' of table '{table}' violates not-null constraint")]
    NotNullViolation { table: String, column: String },

    /// Unique constraint violated
    #[error("Duplicate key in table '{table}' violates unique constraint '{constraint}'")]
    UniqueViolation { table: String, constraint: String },

    /// Foreign key constraint violated
    #[error("Foreign key violation on '{table}' ({columns}) referencing '{references}'")]
    ForeignKeyViolation {
        table: String,
        columns: String,
        references: String,
    },

    /// Invalid table definition
    #[error("Invalid schema for table '{table}': {message}")]
    InvalidSchema { table: String, message: String },

    /// Transaction used after commit or abort
    #[error("Transaction is no longer active")]
    TransactionClosed,
}
