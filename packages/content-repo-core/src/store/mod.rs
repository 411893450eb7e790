//! Relational store: table schemas, snapshot reads and staged transactions.

mod column;
mod database;
mod error;
mod filter;
mod table;
mod transaction;

pub use column::{Column, ColumnType, Generated};
pub use database::{ReadView, Store, StoreRead};
pub use error::StoreError;
pub use filter::{compare_values, sort_rows, values_equal, Direction, Filter};
pub use table::{ForeignKey, Index, ReferentialAction, Row, TableData, TableSchema};
pub use transaction::Transaction;
