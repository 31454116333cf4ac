//! Relational store interface consumed by ingestion and merge.
//!
//! Everything above this module talks to a [`TabularStore`]; the only
//! implementation shipped is [`SqliteStore`]. Identifiers are always quoted
//! with [`quote_ident`] and values always travel as bound parameters.

pub mod copy;
pub mod sqlite;

use thiserror::Error;
use tracing::warn;

use crate::schema::{Column, Value};

pub use copy::{combine_stores, copy_table};
pub use sqlite::SqliteStore;

/// Store adapter errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Engine or I/O failure.
    #[error("store db error: {0}")]
    Db(String),
    /// A uniqueness or other constraint rejected the statement.
    #[error("store constraint violation: {0}")]
    Constraint(String),
    /// The named table does not exist.
    #[error("store table missing: {0}")]
    MissingTable(String),
    /// The request itself is malformed (e.g. row width mismatch).
    #[error("store invalid request: {0}")]
    Invalid(String),
}

/// Physical layout of an existing table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    /// Every column in declaration order, identity included.
    pub columns: Vec<Column>,
    /// The integer primary key assigned by the store, if any.
    pub identity: Option<String>,
}

impl TableLayout {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Generic relational store.
///
/// Methods take `&self`; transactional grouping is the caller's job through
/// [`Transaction`] (or `begin`/`commit`/`rollback` directly).
pub trait TabularStore {
    fn table_exists(&self, table: &str) -> Result<bool, StoreError>;

    /// Layout of `table`, or `None` if it does not exist.
    fn table_layout(&self, table: &str) -> Result<Option<TableLayout>, StoreError>;

    /// User tables, sorted by name.
    fn list_tables(&self) -> Result<Vec<String>, StoreError>;

    /// Create `table` with `columns`, plus an auto-incrementing integer
    /// primary key named `identity` when given.
    fn create_table(
        &self,
        table: &str,
        columns: &[Column],
        identity: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Add one column. Returns `false` when it already existed.
    fn add_column(&self, table: &str, column: &Column) -> Result<bool, StoreError>;

    /// Drop `table` if present. Returns whether it existed.
    fn drop_table(&self, table: &str) -> Result<bool, StoreError>;

    /// Append `rows`, each matched positionally against `columns`.
    fn bulk_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<usize, StoreError>;

    /// Run a statement that returns no rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, StoreError>;

    /// Run a query whose first row's first column is an integer.
    fn query_i64(&self, sql: &str, params: &[Value]) -> Result<i64, StoreError>;

    /// Streaming cursor: run `sql` and hand its rows to `f` in windows of at
    /// most `window` rows. Only one window is held in memory at a time.
    /// Returns the total number of rows delivered.
    fn for_each_window<E, F>(
        &self,
        sql: &str,
        params: &[Value],
        window: usize,
        f: F,
    ) -> Result<u64, E>
    where
        E: From<StoreError>,
        F: FnMut(&[String], Vec<Vec<Value>>) -> Result<(), E>;

    fn create_unique_index(
        &self,
        table: &str,
        index: &str,
        columns: &[String],
    ) -> Result<(), StoreError>;

    fn begin(&self) -> Result<(), StoreError>;
    fn commit(&self) -> Result<(), StoreError>;
    fn rollback(&self) -> Result<(), StoreError>;

    fn row_count(&self, table: &str) -> Result<u64, StoreError> {
        let n = self.query_i64(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)), &[])?;
        u64::try_from(n).map_err(|_| StoreError::Invalid(format!("negative row count {}", n)))
    }
}

/// Scoped transaction: rolled back on drop unless committed.
pub struct Transaction<'a, S: TabularStore> {
    store: &'a S,
    finished: bool,
}

impl<'a, S: TabularStore> Transaction<'a, S> {
    pub fn begin(store: &'a S) -> Result<Self, StoreError> {
        store.begin()?;
        Ok(Self {
            store,
            finished: false,
        })
    }

    pub fn commit(mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.store.commit()
    }
}

impl<S: TabularStore> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.store.rollback() {
                warn!("rollback on drop failed: {}", e);
            }
        }
    }
}

/// Quote an identifier for SQL, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
