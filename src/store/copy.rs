//! Window-by-window table copies between stores.

use tracing::{info, instrument};

use super::{quote_ident, StoreError, TabularStore, Transaction};
use crate::schema::Column;

/// Copy `table` from `src` into `dst`, replacing any table of the same name
/// in `dst`. Rows move in windows of `window_rows`; the target side is one
/// transaction. Returns the number of rows copied.
#[instrument(level = "info", skip(src, dst), fields(table = %table))]
pub fn copy_table<S, D>(src: &S, dst: &D, table: &str, window_rows: usize) -> Result<u64, StoreError>
where
    S: TabularStore,
    D: TabularStore,
{
    let layout = src
        .table_layout(table)?
        .ok_or_else(|| StoreError::MissingTable(table.to_string()))?;

    let tx = Transaction::begin(dst)?;
    dst.drop_table(table)?;
    let identity = layout.identity.as_deref();
    let data_columns: Vec<Column> = layout
        .columns
        .iter()
        .filter(|c| identity.map_or(true, |id| id != c.name))
        .cloned()
        .collect();
    dst.create_table(table, &data_columns, identity)?;

    let names: Vec<String> = layout.columns.iter().map(|c| c.name.clone()).collect();
    let select = format!(
        "SELECT {} FROM {}",
        names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", "),
        quote_ident(table)
    );
    let copied = src.for_each_window::<StoreError, _>(&select, &[], window_rows, |_, rows| {
        dst.bulk_insert(table, &names, &rows)?;
        Ok(())
    })?;
    tx.commit()?;

    info!(rows = copied, "copied table");
    Ok(copied)
}

/// Copy every user table of every source into `target`. A table present in
/// several sources ends up with the content of the last one, matching the
/// drop-and-recreate semantics of [`copy_table`].
pub fn combine_stores<S, D>(sources: &[S], target: &D, window_rows: usize) -> Result<u64, StoreError>
where
    S: TabularStore,
    D: TabularStore,
{
    let mut total = 0;
    for src in sources {
        for table in src.list_tables()? {
            total += copy_table(src, target, &table, window_rows)?;
        }
    }
    Ok(total)
}
