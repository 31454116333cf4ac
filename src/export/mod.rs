//! Streaming Parquet export of a store table.
//!
//! The table is read through the store cursor one window at a time and each
//! window becomes one Arrow `RecordBatch`, so memory stays bounded by the
//! window size no matter how large the table is.

use arrow::{
    array::{ArrayRef, Float64Builder, Int64Builder, StringBuilder},
    datatypes::Schema as ArrowSchema,
    record_batch::RecordBatch,
};
use parquet::{
    arrow::ArrowWriter,
    basic::Compression,
    file::properties::WriterProperties,
};
use std::{fs, path::Path, sync::Arc};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::merge::read_back;
use crate::schema::{build_arrow_schema, Column, SqlType, Value};
use crate::store::{quote_ident, StoreError, TabularStore};

/// Write `table` to a Parquet file at `path` (SNAPPY), `window_rows` rows
/// per record batch. The file appears atomically once complete.
#[instrument(level = "info", skip(store, path), fields(path = %path.as_ref().display()))]
pub fn export_parquet<S: TabularStore, P: AsRef<Path>>(
    store: &S,
    table: &str,
    path: P,
    window_rows: usize,
) -> Result<u64> {
    let path = path.as_ref();
    let layout = store
        .table_layout(table)?
        .ok_or_else(|| StoreError::MissingTable(table.to_string()))?;
    let columns = export_columns(store, table, &layout.columns)?;
    let schema = build_arrow_schema(&columns);

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    let tmp = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

    let written = read_back(store, table, window_rows, |_, rows| {
        let batch = window_to_batch(&schema, &columns, rows)?;
        writer.write(&batch)?;
        debug!(rows = batch.num_rows(), "wrote record batch");
        Ok(())
    });
    let written = match written {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };
    writer.close()?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;

    info!(table = %table, rows = written, "exported parquet");
    Ok(written)
}

/// Declared column types widened to what the stored values actually hold.
/// SQLite keeps a REAL in an INTEGER column (and TEXT in either) when a
/// later period's values don't fit the type chosen at first sight.
fn export_columns<S: TabularStore>(store: &S, table: &str, declared: &[Column]) -> Result<Vec<Column>> {
    let mut out = Vec::with_capacity(declared.len());
    for col in declared {
        let ty = match col.ty {
            SqlType::Text => SqlType::Text,
            declared_ty => {
                let count = |types: &str| {
                    store.query_i64(
                        &format!(
                            "SELECT COUNT(*) FROM {} WHERE typeof({}) IN ({})",
                            quote_ident(table),
                            quote_ident(&col.name),
                            types
                        ),
                        &[],
                    )
                };
                if count("'text', 'blob'")? > 0 {
                    SqlType::Text
                } else if declared_ty == SqlType::Integer && count("'real'")? > 0 {
                    SqlType::Real
                } else {
                    declared_ty
                }
            }
        };
        if ty != col.ty {
            debug!(column = %col.name, from = ?col.ty, to = ?ty, "widened export type");
        }
        out.push(Column::new(col.name.clone(), ty));
    }
    Ok(out)
}

fn window_to_batch(
    schema: &Arc<ArrowSchema>,
    columns: &[Column],
    rows: Vec<Vec<Value>>,
) -> Result<RecordBatch> {
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let cells = rows.iter().map(|r| r.get(i));
        let array: ArrayRef = match col.ty {
            SqlType::Integer => {
                let mut b = Int64Builder::with_capacity(rows.len());
                for v in cells {
                    b.append_option(match v {
                        Some(Value::Integer(n)) => Some(*n),
                        _ => None,
                    });
                }
                Arc::new(b.finish())
            }
            SqlType::Real => {
                let mut b = Float64Builder::with_capacity(rows.len());
                for v in cells {
                    b.append_option(match v {
                        Some(Value::Integer(n)) => Some(*n as f64),
                        Some(Value::Real(f)) => Some(*f),
                        _ => None,
                    });
                }
                Arc::new(b.finish())
            }
            SqlType::Text => {
                let mut b = StringBuilder::new();
                for v in cells {
                    match v {
                        None | Some(Value::Null) => b.append_null(),
                        Some(other) => b.append_value(other.to_string()),
                    }
                }
                Arc::new(b.finish())
            }
        };
        arrays.push(array);
    }
    RecordBatch::try_new(schema.clone(), arrays).map_err(Error::from)
}
