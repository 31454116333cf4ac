use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, ToSql};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{quote_ident, StoreError, TableLayout, TabularStore};
use crate::schema::{Column, SqlType, Value};

const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// [`TabularStore`] backed by a single SQLite connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database on disk at `path`, creating the file if it doesn't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(db_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db_err)?;
        debug!(path = %path.display(), "opened sqlite store");
        Ok(Self { conn })
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self { conn })
    }
}

impl TabularStore for SqliteStore {
    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
                params![table],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    fn table_layout(&self, table: &str) -> Result<Option<TableLayout>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![table], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                ))
            })
            .map_err(db_err)?;

        let mut columns = Vec::new();
        let mut pk_columns = Vec::new();
        for row in rows {
            let (name, decl, pk) = row.map_err(db_err)?;
            let ty = SqlType::from_declared(&decl);
            if pk > 0 {
                pk_columns.push((name.clone(), ty));
            }
            columns.push(Column::new(name, ty));
        }
        if columns.is_empty() {
            return Ok(None);
        }

        let identity = match pk_columns.as_slice() {
            [(name, SqlType::Integer)] => Some(name.clone()),
            _ => None,
        };
        Ok(Some(TableLayout { columns, identity }))
    }

    fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(db_err)?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(names)
    }

    fn create_table(
        &self,
        table: &str,
        columns: &[Column],
        identity: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut defs = Vec::with_capacity(columns.len() + 1);
        if let Some(id) = identity {
            defs.push(format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident(id)));
        }
        for col in columns {
            if identity.is_some_and(|id| id.eq_ignore_ascii_case(&col.name)) {
                continue;
            }
            defs.push(format!("{} {}", quote_ident(&col.name), col.ty.as_sql()));
        }
        if defs.is_empty() {
            return Err(StoreError::Invalid(format!(
                "cannot create `{}` without columns",
                table
            )));
        }
        let sql = format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "));
        self.conn.execute(&sql, []).map_err(db_err)?;
        Ok(())
    }

    fn add_column(&self, table: &str, column: &Column) -> Result<bool, StoreError> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table),
            quote_ident(&column.name),
            column.ty.as_sql()
        );
        match self.conn.execute(&sql, []) {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().contains("duplicate column name") => Ok(false),
            Err(e) => Err(db_err(e)),
        }
    }

    fn drop_table(&self, table: &str) -> Result<bool, StoreError> {
        let existed = self.table_exists(table)?;
        if existed {
            self.conn
                .execute(&format!("DROP TABLE {}", quote_ident(table)), [])
                .map_err(db_err)?;
        }
        Ok(existed)
    }

    fn bulk_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            names.join(", "),
            placeholders.join(", ")
        );

        let mut stmt = self.conn.prepare_cached(&sql).map_err(db_err)?;
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(StoreError::Invalid(format!(
                    "row {} has {} values for {} columns",
                    i,
                    row.len(),
                    columns.len()
                )));
            }
            stmt.execute(params_from_iter(row.iter())).map_err(db_err)?;
        }
        Ok(rows.len())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, StoreError> {
        self.conn
            .execute(sql, params_from_iter(params.iter()))
            .map_err(db_err)
    }

    fn query_i64(&self, sql: &str, params: &[Value]) -> Result<i64, StoreError> {
        self.conn
            .query_row(sql, params_from_iter(params.iter()), |r| r.get::<_, i64>(0))
            .map_err(db_err)
    }

    fn for_each_window<E, F>(
        &self,
        sql: &str,
        params: &[Value],
        window: usize,
        mut f: F,
    ) -> Result<u64, E>
    where
        E: From<StoreError>,
        F: FnMut(&[String], Vec<Vec<Value>>) -> Result<(), E>,
    {
        let window = window.max(1);
        let mut stmt = self.conn.prepare(sql).map_err(db_err)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = names.len();

        let mut rows = stmt.query(params_from_iter(params.iter())).map_err(db_err)?;
        let mut buf: Vec<Vec<Value>> = Vec::with_capacity(window);
        let mut total = 0u64;
        while let Some(row) = rows.next().map_err(db_err)? {
            let mut out = Vec::with_capacity(width);
            for i in 0..width {
                out.push(from_value_ref(row.get_ref(i).map_err(db_err)?));
            }
            buf.push(out);
            total += 1;
            if buf.len() == window {
                f(&names, std::mem::replace(&mut buf, Vec::with_capacity(window)))?;
            }
        }
        if !buf.is_empty() {
            f(&names, buf)?;
        }
        Ok(total)
    }

    fn create_unique_index(
        &self,
        table: &str,
        index: &str,
        columns: &[String],
    ) -> Result<(), StoreError> {
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "CREATE UNIQUE INDEX {} ON {} ({})",
            quote_ident(index),
            quote_ident(table),
            cols.join(", ")
        );
        self.conn.execute(&sql, []).map_err(db_err)?;
        Ok(())
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN").map_err(db_err)
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT").map_err(db_err)
    }

    fn rollback(&self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK").map_err(db_err)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn from_value_ref(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(b) | ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
    }
}

fn db_err(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Constraint(err.to_string())
        }
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.starts_with("no such table") => {
            StoreError::MissingTable(msg.clone())
        }
        _ => StoreError::Db(err.to_string()),
    }
}
