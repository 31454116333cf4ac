use tracing::{info, instrument, warn};

use super::plan::{JoinPlan, MergeWarning};
use super::sql::{render_create_as, render_select};
use crate::error::{Error, Result};
use crate::schema::Value;
use crate::store::{quote_ident, StoreError, TableLayout, TabularStore, Transaction};

/// Outcome of a successful merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub output_table: String,
    pub row_count: u64,
    /// Output columns under the unique index.
    pub key_columns: Vec<String>,
    pub warnings: Vec<MergeWarning>,
}

/// Materialize `plan` into `output_table`.
///
/// Runs as one transaction: any prior table of that name is dropped, the
/// join is created store-side with `CREATE TABLE .. AS SELECT`, and a unique
/// index is put on the anchor key. Duplicate anchor keys in the result fail
/// the merge with [`Error::DuplicateKey`] and leave the store as it was.
#[instrument(level = "info", skip(plan, store), fields(anchor = %plan.anchor.table))]
pub fn execute<S: TabularStore>(plan: &JoinPlan, store: &S, output_table: &str) -> Result<MergeReport> {
    if output_table.trim().is_empty() {
        return Err(Error::InvalidPlan("empty output table name".into()));
    }
    if plan.tables().any(|t| t.table.eq_ignore_ascii_case(output_table)) {
        return Err(Error::InvalidPlan(format!(
            "output `{}` is also an input table",
            output_table
        )));
    }

    let layouts = input_layouts(plan, store)?;
    let query = render_select(plan, &layouts)?;
    let key_columns = plan.key_columns();

    let tx = Transaction::begin(store)?;
    if store.drop_table(output_table)? {
        info!(table = %output_table, "dropped previous merge output");
    }
    store.execute(&render_create_as(output_table, &query), &query.params)?;
    let row_count = store.row_count(output_table)?;

    if let Some((duplicate_keys, example)) = find_duplicates(store, output_table, &key_columns)? {
        return Err(Error::DuplicateKey {
            table: output_table.to_string(),
            duplicate_keys,
            example,
        });
    }
    let index = format!("idx_{}_pk", output_table);
    store
        .create_unique_index(output_table, &index, &key_columns)
        .map_err(|e| match e {
            StoreError::Constraint(msg) => Error::DuplicateKey {
                table: output_table.to_string(),
                duplicate_keys: 0,
                example: Some(msg),
            },
            other => other.into(),
        })?;
    tx.commit()?;

    let mut warnings = plan.warnings.clone();
    if row_count == 0 {
        let w = MergeWarning::EmptyResult {
            table: output_table.to_string(),
        };
        warn!("{}", w);
        warnings.push(w);
    }
    info!(table = %output_table, rows = row_count, "merge complete");
    Ok(MergeReport {
        output_table: output_table.to_string(),
        row_count,
        key_columns,
        warnings,
    })
}

/// Stream `table` back in windows of at most `window` rows.
pub fn read_back<S, F>(store: &S, table: &str, window: usize, f: F) -> Result<u64>
where
    S: TabularStore,
    F: FnMut(&[String], Vec<Vec<Value>>) -> Result<()>,
{
    if !store.table_exists(table)? {
        return Err(StoreError::MissingTable(table.to_string()).into());
    }
    let sql = format!("SELECT * FROM {} ORDER BY _rowid_", quote_ident(table));
    store.for_each_window(&sql, &[], window, f)
}

/// Every plan table must exist and carry its role columns.
fn input_layouts<S: TabularStore>(plan: &JoinPlan, store: &S) -> Result<Vec<TableLayout>> {
    let mut layouts = Vec::new();
    for t in plan.tables() {
        let layout = store
            .table_layout(&t.table)?
            .ok_or_else(|| Error::InvalidPlan(format!("table `{}` does not exist", t.table)))?;
        layouts.push(layout);
    }

    let mut required: Vec<(usize, &str)> = plan
        .anchor_roles
        .population_column
        .iter()
        .map(|c| (0, c.as_str()))
        .collect();
    for (i, join) in plan.joins.iter().enumerate() {
        for (a, b) in &join.on {
            required.push((0, a.column.as_str()));
            required.push((i + 1, b.column.as_str()));
        }
    }
    for (i, col) in required {
        let layout = &layouts[i];
        if !layout.column_names().any(|c| c.eq_ignore_ascii_case(col)) {
            let table = plan.tables().nth(i).map(|t| t.table.as_str()).unwrap_or_default();
            return Err(Error::InvalidPlan(format!(
                "table `{}` has no column `{}`",
                table, col
            )));
        }
    }
    Ok(layouts)
}

/// Count anchor keys that occur more than once and fetch one of them for
/// the error message. NULL key parts group together, since the unique index
/// would let them through.
fn find_duplicates<S: TabularStore>(
    store: &S,
    table: &str,
    key_columns: &[String],
) -> Result<Option<(u64, Option<String>)>> {
    let cols: Vec<String> = key_columns.iter().map(|c| quote_ident(c)).collect();
    let grouped = format!(
        "SELECT {cols} FROM {table} GROUP BY {cols} HAVING COUNT(*) > 1",
        cols = cols.join(", "),
        table = quote_ident(table),
    );

    let count = store.query_i64(&format!("SELECT COUNT(*) FROM ({})", grouped), &[])?;
    if count <= 0 {
        return Ok(None);
    }

    let mut example = None;
    store.for_each_window::<Error, _>(&format!("{} LIMIT 1", grouped), &[], 1, |_, rows| {
        if let Some(row) = rows.first() {
            let parts: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            example = Some(format!("({})", parts.join(", ")));
        }
        Ok(())
    })?;
    Ok(Some((count as u64, example)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::plan::{plan, RoleMapping};
    use crate::schema::{Column, SqlType};
    use crate::store::SqliteStore;
    use anyhow::Result;

    fn mapping(table: &str, pop: Option<&str>) -> RoleMapping {
        RoleMapping {
            table: table.into(),
            id_column: "HH_ID".into(),
            month_column: "month".into(),
            year_column: "year".into(),
            population_column: pop.map(Into::into),
        }
    }

    fn keyed_table(store: &SqliteStore, name: &str, extra: &str, rows: &[(i64, &str)]) -> Result<()> {
        let cols = vec![
            Column::new("HH_ID", SqlType::Integer),
            Column::new("month", SqlType::Text),
            Column::new("year", SqlType::Text),
            Column::new(extra, SqlType::Text),
        ];
        store.create_table(name, &cols, Some("id"))?;
        let names: Vec<String> = cols.iter().map(|c| c.name.clone()).collect();
        let values: Vec<Vec<Value>> = rows
            .iter()
            .map(|(hh, v)| vec![Value::Integer(*hh), "Jan".into(), "2020".into(), (*v).into()])
            .collect();
        store.bulk_insert(name, &names, &values)?;
        Ok(())
    }

    #[test]
    fn three_way_join_keeps_only_matching_population() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        keyed_table(&store, "a", "STATE", &[(1, "X"), (2, "Y")])?;
        keyed_table(&store, "b", "B_VAL", &[(1, "b1")])?;
        keyed_table(&store, "c", "C_VAL", &[(1, "c1"), (2, "c2")])?;

        let p = plan(
            &[mapping("a", Some("STATE")), mapping("b", None), mapping("c", None)],
            &["X".to_string()],
        )?;
        let report = execute(&p, &store, "merged")?;
        assert_eq!(report.row_count, 1);
        assert!(report.warnings.is_empty());
        assert_eq!(report.key_columns, vec!["a_HH_ID", "a_month", "a_year"]);

        let layout = store.table_layout("merged")?.expect("output exists");
        let names: Vec<&str> = layout.column_names().collect();
        assert!(names.contains(&"b_B_VAL"));
        assert!(names.contains(&"c_id"));
        assert_eq!(
            store.query_i64("SELECT COUNT(*) FROM merged WHERE c_C_VAL = 'c1'", &[])?,
            1
        );
        Ok(())
    }

    #[test]
    fn duplicate_anchor_keys_fail_and_leave_nothing_behind() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        keyed_table(&store, "a", "STATE", &[(1, "X"), (1, "X")])?;
        keyed_table(&store, "b", "B_VAL", &[(1, "b1")])?;

        let p = plan(&[mapping("a", Some("STATE")), mapping("b", None)], &["X".to_string()])?;
        let err = execute(&p, &store, "merged").unwrap_err();
        match err {
            Error::DuplicateKey {
                duplicate_keys,
                example,
                ..
            } => {
                assert_eq!(duplicate_keys, 1);
                assert_eq!(example.as_deref(), Some("(1, Jan, 2020)"));
            }
            other => panic!("expected DuplicateKey, got {other}"),
        }
        assert!(!store.table_exists("merged")?);
        Ok(())
    }

    #[test]
    fn failed_merge_keeps_the_previous_output() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        keyed_table(&store, "a", "STATE", &[(1, "X")])?;
        let p = plan(&[mapping("a", Some("STATE"))], &["X".to_string()])?;
        assert_eq!(execute(&p, &store, "merged")?.row_count, 1);

        store.bulk_insert(
            "a",
            &["HH_ID".into(), "month".into(), "year".into(), "STATE".into()],
            &[vec![Value::Integer(1), "Jan".into(), "2020".into(), "X".into()]],
        )?;
        assert!(execute(&p, &store, "merged").is_err());
        assert_eq!(store.row_count("merged")?, 1);
        Ok(())
    }

    #[test]
    fn empty_population_set_is_a_zero_row_success() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        keyed_table(&store, "a", "STATE", &[(1, "X")])?;
        let p = plan(&[mapping("a", Some("STATE"))], &[])?;
        let report = execute(&p, &store, "merged")?;
        assert_eq!(report.row_count, 0);
        assert_eq!(
            report.warnings,
            vec![
                MergeWarning::EmptyPopulationFilter,
                MergeWarning::EmptyResult {
                    table: "merged".into()
                }
            ]
        );
        assert!(store.table_exists("merged")?);
        Ok(())
    }

    #[test]
    fn missing_role_column_is_an_invalid_plan() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        keyed_table(&store, "a", "REGION", &[(1, "X")])?;
        let p = plan(&[mapping("a", Some("STATE"))], &["X".to_string()])?;
        assert!(matches!(
            execute(&p, &store, "merged"),
            Err(Error::InvalidPlan(_))
        ));
        assert!(matches!(
            execute(&p, &store, "a"),
            Err(Error::InvalidPlan(_))
        ));
        Ok(())
    }

    #[test]
    fn read_back_streams_in_windows() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let rows: Vec<(i64, &str)> = (1..=5).map(|i| (i, "X")).collect();
        keyed_table(&store, "a", "STATE", &rows)?;
        let mut sizes = Vec::new();
        let total = read_back(&store, "a", 2, |_, w| {
            sizes.push(w.len());
            Ok(())
        })?;
        assert_eq!(total, 5);
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(read_back(&store, "missing", 2, |_, _| Ok(())).is_err());
        Ok(())
    }

    #[test]
    fn read_back_keeps_insert_order_when_a_column_is_named_rowid() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let cols = vec![Column::new("rowid", SqlType::Text), Column::new("n", SqlType::Integer)];
        store.create_table("odd", &cols, None)?;
        let names: Vec<String> = cols.iter().map(|c| c.name.clone()).collect();
        let rows: Vec<Vec<Value>> = ["c", "a", "b"]
            .iter()
            .enumerate()
            .map(|(i, v)| vec![(*v).into(), Value::Integer(i as i64)])
            .collect();
        store.bulk_insert("odd", &names, &rows)?;

        let mut seen = Vec::new();
        let total = read_back(&store, "odd", 2, |_, w| {
            seen.extend(w.into_iter().map(|r| r[1].clone()));
            Ok(())
        })?;
        assert_eq!(total, 3);
        assert_eq!(seen, vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)]);
        Ok(())
    }

    #[test]
    fn null_anchor_keys_count_as_duplicates() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let cols = vec![
            Column::new("HH_ID", SqlType::Integer),
            Column::new("month", SqlType::Text),
            Column::new("year", SqlType::Text),
            Column::new("STATE", SqlType::Text),
        ];
        store.create_table("a", &cols, Some("id"))?;
        let names: Vec<String> = cols.iter().map(|c| c.name.clone()).collect();
        let row = vec![Value::Null, "Jan".into(), "2020".into(), "X".into()];
        store.bulk_insert("a", &names, &[row.clone(), row])?;

        let p = plan(&[mapping("a", Some("STATE"))], &["X".to_string()])?;
        match execute(&p, &store, "merged").unwrap_err() {
            Error::DuplicateKey { example, .. } => {
                assert_eq!(example.as_deref(), Some("(NULL, Jan, 2020)"));
            }
            other => panic!("expected DuplicateKey, got {other}"),
        }
        assert!(!store.table_exists("merged")?);
        Ok(())
    }
}
