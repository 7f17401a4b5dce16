//! Relational target stores.
//!
//! The engine talks to its target through [`TargetStore`]. Two implementations
//! ship with the crate:
//!
//! - [`MemoryStore`]: in-process tables with primary-key and foreign-key
//!   enforcement, used by tests and dry runs
//! - `Database`: Diesel + r2d2 against PostgreSQL, MySQL or SQLite
//!   (features `postgres`, `mysql`, `sqlite`)

pub mod dialect;
pub mod memory;

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
pub mod database;

pub use dialect::Dialect;
pub use memory::MemoryStore;

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
pub use database::Database;

use crate::error::StoreError;
use crate::schema::{TableDef, TableName};
use crate::value::{CellValue, Row};
use std::collections::BTreeSet;

/// Operations the engine needs from a relational target.
///
/// All methods take `&self` so a store can be shared between sibling table
/// loads; implementations synchronize internally.
pub trait TargetStore: Send + Sync {
    /// Create the table (with its keys) unless it already exists
    fn create_table_if_absent(&self, def: &TableDef) -> Result<(), StoreError>;

    /// Distinct values of one column
    fn read_column(&self, table: TableName, column: &str) -> Result<BTreeSet<CellValue>, StoreError>;

    /// Every row of a table, typed per the table definition
    fn read_rows(&self, table: TableName) -> Result<Vec<Row>, StoreError>;

    /// Insert rows as one unit: either all rows are written or none are.
    /// Returns the number of rows written.
    fn insert_rows(&self, table: TableName, rows: &[Row]) -> Result<usize, StoreError>;

    /// Remove every row of a table
    fn delete_all(&self, table: TableName) -> Result<usize, StoreError>;

    fn count_rows(&self, table: TableName) -> Result<usize, StoreError>;

    /// Stop enforcing foreign keys until [`TargetStore::restore_foreign_keys`]
    fn suspend_foreign_keys(&self) -> Result<(), StoreError>;

    fn restore_foreign_keys(&self) -> Result<(), StoreError>;
}

impl<S: TargetStore + ?Sized> TargetStore for &S {
    fn create_table_if_absent(&self, def: &TableDef) -> Result<(), StoreError> {
        (**self).create_table_if_absent(def)
    }

    fn read_column(&self, table: TableName, column: &str) -> Result<BTreeSet<CellValue>, StoreError> {
        (**self).read_column(table, column)
    }

    fn read_rows(&self, table: TableName) -> Result<Vec<Row>, StoreError> {
        (**self).read_rows(table)
    }

    fn insert_rows(&self, table: TableName, rows: &[Row]) -> Result<usize, StoreError> {
        (**self).insert_rows(table, rows)
    }

    fn delete_all(&self, table: TableName) -> Result<usize, StoreError> {
        (**self).delete_all(table)
    }

    fn count_rows(&self, table: TableName) -> Result<usize, StoreError> {
        (**self).count_rows(table)
    }

    fn suspend_foreign_keys(&self) -> Result<(), StoreError> {
        (**self).suspend_foreign_keys()
    }

    fn restore_foreign_keys(&self) -> Result<(), StoreError> {
        (**self).restore_foreign_keys()
    }
}
