// src/ingest/mod.rs
pub mod batch;
pub mod discover;
pub mod period;

use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

use crate::config::DatasetKind;
use crate::error::{Error, Result};
use crate::schema::{reconcile, Column, SchemaRegistry, SqlType, Value};
use crate::store::{StoreError, TabularStore, Transaction};

pub use batch::CsvBatch;
pub use discover::{canonicalize_file_names, discover};
pub use period::Period;

/// Outcome of one ingested batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub table: String,
    pub period: Period,
    pub rows: u64,
    /// The table did not exist before this batch.
    pub created: bool,
    pub added_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedBatch {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedBatch {
    pub path: PathBuf,
    pub table: String,
    pub error: String,
}

/// What a multi-period run did, batch by batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub ingested: Vec<IngestReport>,
    pub skipped: Vec<SkippedBatch>,
    pub failed: Vec<FailedBatch>,
}

impl RunSummary {
    pub fn rows(&self) -> u64 {
        self.ingested.iter().map(|r| r.rows).sum()
    }
}

/// Which batch columns go to the table, in insert order: everything except
/// the identity column and the period tag columns, then the two tags.
struct InsertLayout {
    keep: Vec<usize>,
    columns: Vec<Column>,
}

impl InsertLayout {
    fn new(kind: &DatasetKind, batch_columns: &[Column]) -> Self {
        let reserved = [
            kind.identity_column.as_str(),
            kind.month_column.as_str(),
            kind.year_column.as_str(),
        ];
        let mut keep = Vec::with_capacity(batch_columns.len());
        let mut columns = Vec::with_capacity(batch_columns.len() + 2);
        for (i, col) in batch_columns.iter().enumerate() {
            if reserved.iter().any(|r| r.eq_ignore_ascii_case(&col.name)) {
                continue;
            }
            keep.push(i);
            columns.push(col.clone());
        }
        columns.push(Column::new(kind.month_column.clone(), SqlType::Text));
        columns.push(Column::new(kind.year_column.clone(), SqlType::Text));
        Self { keep, columns }
    }

    fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn project(&self, rows: Vec<Vec<Value>>, period: &Period) -> Vec<Vec<Value>> {
        let month = Value::Text(period.month_tag().to_string());
        let year = Value::Text(period.year_tag());
        rows.into_iter()
            .map(|mut row| {
                let mut out = Vec::with_capacity(self.columns.len());
                for &i in &self.keep {
                    out.push(std::mem::replace(&mut row[i], Value::Null));
                }
                out.push(month.clone());
                out.push(year.clone());
                out
            })
            .collect()
    }
}

/// Appends one period's batch to its dataset table, growing the table's
/// schema as needed.
pub struct PeriodIngestor<'a, S: TabularStore> {
    store: &'a S,
    registry: &'a SchemaRegistry,
    chunk_rows: usize,
}

impl<'a, S: TabularStore> PeriodIngestor<'a, S> {
    pub fn new(store: &'a S, registry: &'a SchemaRegistry, chunk_rows: usize) -> Self {
        Self {
            store,
            registry,
            chunk_rows: chunk_rows.max(1),
        }
    }

    /// Ingest the batch at `path` for dataset `kind`.
    ///
    /// The period comes from the parent directory name; if it does not parse
    /// the store is left untouched and `Error::PeriodFormat` is returned.
    /// Schema changes and row inserts are committed as two separate units: a
    /// failure while inserting leaves the (possibly new or grown) table in
    /// place with none of this batch's rows.
    #[instrument(level = "info", skip(self, kind, path), fields(table = %kind.table, path = %path.display()))]
    pub fn ingest(&self, kind: &DatasetKind, path: &Path) -> Result<IngestReport> {
        let period = Period::from_source_path(path)?;
        let batch = CsvBatch::open(path)?;
        let layout = InsertLayout::new(kind, batch.columns());

        let (created, added_columns) = self.apply_schema(kind, &layout.columns, &period)?;
        let rows = self.insert_rows(kind, &batch, &layout, &period)?;

        info!(period = %period, rows, created, added = added_columns.len(), "ingested batch");
        Ok(IngestReport {
            table: kind.table.clone(),
            period,
            rows,
            created,
            added_columns,
        })
    }

    fn apply_schema(
        &self,
        kind: &DatasetKind,
        columns: &[Column],
        period: &Period,
    ) -> Result<(bool, Vec<String>)> {
        let table = kind.table.as_str();
        let label = period.label();
        let conflict = |e: StoreError| Error::SchemaConflict {
            table: table.to_string(),
            message: e.to_string(),
        };

        let tx = Transaction::begin(self.store)?;
        match self.registry.lookup(self.store, table)? {
            None => {
                self.store
                    .create_table(table, columns, Some(&kind.identity_column))
                    .map_err(conflict)?;
                tx.commit()?;

                let mut full = Vec::with_capacity(columns.len() + 1);
                full.push(Column::new(kind.identity_column.clone(), SqlType::Integer));
                full.extend_from_slice(columns);
                self.registry.record_created(table, full, Some(&label))?;
                info!(table = %table, columns = columns.len(), "created table");
                Ok((true, columns.iter().map(|c| c.name.clone()).collect()))
            }
            Some(schema) => {
                let added = reconcile(schema.column_names(), columns);
                for col in &added {
                    if !self.store.add_column(table, col).map_err(conflict)? {
                        warn!(table = %table, column = %col.name, "column already present in store");
                    }
                }
                tx.commit()?;

                if !added.is_empty() {
                    self.registry.record_added(table, &added, Some(&label))?;
                    info!(
                        table = %table,
                        "added new columns: {}",
                        added.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
                    );
                }
                Ok((false, added.into_iter().map(|c| c.name).collect()))
            }
        }
    }

    fn insert_rows(
        &self,
        kind: &DatasetKind,
        batch: &CsvBatch,
        layout: &InsertLayout,
        period: &Period,
    ) -> Result<u64> {
        let names = layout.names();
        let tx = Transaction::begin(self.store)?;
        let mut rows = 0u64;
        for chunk in batch.chunks(self.chunk_rows)? {
            let projected = layout.project(chunk?, period);
            rows += self.store.bulk_insert(&kind.table, &names, &projected)? as u64;
        }
        tx.commit()?;
        Ok(rows)
    }
}

/// Ingest every discovered batch of every kind under `root`.
///
/// Failures are batch-scoped: an unparseable period is recorded as skipped,
/// any other error as failed, and the run moves on to the next batch.
pub fn ingest_all<S: TabularStore>(
    ingestor: &PeriodIngestor<'_, S>,
    kinds: &[DatasetKind],
    root: &Path,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    for kind in kinds {
        for path in discover(root, kind)? {
            match ingestor.ingest(kind, &path) {
                Ok(report) => summary.ingested.push(report),
                Err(e) if e.is_skip() => {
                    warn!(path = %path.display(), "skipping directory with invalid name format: {}", e);
                    summary.skipped.push(SkippedBatch {
                        path,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    error!(path = %path.display(), table = %kind.table, "batch failed: {}", e);
                    summary.failed.push(FailedBatch {
                        path,
                        table: kind.table.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }
    info!(
        ingested = summary.ingested.len(),
        skipped = summary.skipped.len(),
        failed = summary.failed.len(),
        rows = summary.rows(),
        "ingestion run finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use anyhow::Result;
    use std::fs;
    use tempfile::{tempdir, TempDir};
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    fn init_test_logging() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,panelmerge::ingest=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    fn income() -> DatasetKind {
        DatasetKind::new("household_income", "DIR_MONTH", "DIR_YEAR")
    }

    fn write_period(root: &TempDir, dir: &str, file: &str, content: &str) -> Result<PathBuf> {
        let d = root.path().join(dir);
        fs::create_dir_all(&d)?;
        let path = d.join(file);
        fs::write(&path, content)?;
        Ok(path)
    }

    fn column_names<S: TabularStore>(store: &S, table: &str) -> Result<Vec<String>> {
        Ok(store
            .table_layout(table)?
            .map(|l| l.columns.into_iter().map(|c| c.name).collect())
            .unwrap_or_default())
    }

    #[test]
    fn two_periods_union_columns_and_sum_rows() -> Result<()> {
        init_test_logging();
        let root = tempdir()?;
        let jan = write_period(&root, "Jan 2020", "household_income.csv", "HH_ID,INCOME\n1,10\n2,20\n")?;
        let feb = write_period(
            &root,
            "Feb 2020",
            "household_income.csv",
            "HH_ID,INCOME,BONUS\n1,11,1.5\n2,21,0\n3,31,2\n",
        )?;

        let store = SqliteStore::open_in_memory()?;
        let registry = SchemaRegistry::new();
        let ingestor = PeriodIngestor::new(&store, &registry, 2);

        let r1 = ingestor.ingest(&income(), &jan)?;
        assert!(r1.created);
        assert_eq!(r1.rows, 2);
        let r2 = ingestor.ingest(&income(), &feb)?;
        assert!(!r2.created);
        assert_eq!(r2.added_columns, vec!["BONUS".to_string()]);

        assert_eq!(
            column_names(&store, "household_income")?,
            vec!["id", "HH_ID", "INCOME", "DIR_MONTH", "DIR_YEAR", "BONUS"]
        );
        assert_eq!(store.row_count("household_income")?, 5);
        assert_eq!(
            store.query_i64(
                "SELECT COUNT(*) FROM household_income WHERE DIR_MONTH = 'Feb' AND DIR_YEAR = '2020'",
                &[]
            )?,
            3
        );
        assert_eq!(registry.lookup(&store, "household_income")?.map(|s| s.version), Some(2));
        Ok(())
    }

    #[test]
    fn same_header_twice_adds_no_columns_but_duplicates_rows() -> Result<()> {
        let root = tempdir()?;
        let jan = write_period(&root, "Jan 2020", "household_income.csv", "HH_ID,INCOME\n1,10\n")?;
        let store = SqliteStore::open_in_memory()?;
        let registry = SchemaRegistry::new();
        let ingestor = PeriodIngestor::new(&store, &registry, 100);

        ingestor.ingest(&income(), &jan)?;
        let again = ingestor.ingest(&income(), &jan)?;
        assert!(again.added_columns.is_empty());
        assert_eq!(store.row_count("household_income")?, 2);
        Ok(())
    }

    #[test]
    fn batch_identity_is_discarded_and_store_identity_is_contiguous() -> Result<()> {
        let root = tempdir()?;
        let jan = write_period(&root, "Jan 2020", "household_income.csv", "id,HH_ID\n900,1\n17,2\n")?;
        let feb = write_period(&root, "Feb 2020", "household_income.csv", "id,HH_ID\n5,3\n")?;
        let store = SqliteStore::open_in_memory()?;
        let registry = SchemaRegistry::new();
        let ingestor = PeriodIngestor::new(&store, &registry, 1);

        ingestor.ingest(&income(), &jan)?;
        ingestor.ingest(&income(), &feb)?;
        assert_eq!(store.query_i64("SELECT MIN(id) FROM household_income", &[])?, 1);
        assert_eq!(store.query_i64("SELECT MAX(id) FROM household_income", &[])?, 3);
        assert_eq!(store.row_count("household_income")?, 3);
        Ok(())
    }

    #[test]
    fn tag_columns_in_the_file_are_replaced_by_the_directory_period() -> Result<()> {
        let root = tempdir()?;
        let people = DatasetKind::new("people_of_india", "month", "year");
        let path = write_period(
            &root,
            "Mar 2021",
            "people_of_india.csv",
            "HH_ID,month,year\n1,Dec,1999\n",
        )?;
        let store = SqliteStore::open_in_memory()?;
        let registry = SchemaRegistry::new();
        PeriodIngestor::new(&store, &registry, 10).ingest(&people, &path)?;

        assert_eq!(
            store.query_i64(
                "SELECT COUNT(*) FROM people_of_india WHERE month = 'Mar' AND year = '2021'",
                &[]
            )?,
            1
        );
        let layout = store.table_layout("people_of_india")?.expect("created");
        let year = layout.columns.iter().find(|c| c.name == "year").expect("year column");
        assert_eq!(year.ty, SqlType::Text);
        Ok(())
    }

    #[test]
    fn bad_period_leaves_store_untouched() -> Result<()> {
        let root = tempdir()?;
        let path = write_period(&root, "backup", "household_income.csv", "HH_ID\n1\n")?;
        let store = SqliteStore::open_in_memory()?;
        let registry = SchemaRegistry::new();
        let err = PeriodIngestor::new(&store, &registry, 10)
            .ingest(&income(), &path)
            .unwrap_err();
        assert!(err.is_skip());
        assert!(!store.table_exists("household_income")?);
        Ok(())
    }

    #[test]
    fn insert_failure_rolls_back_rows_but_keeps_schema() -> Result<()> {
        let root = tempdir()?;
        let jan = write_period(&root, "Jan 2020", "household_income.csv", "HH_ID\n1\n")?;
        let store = SqliteStore::open_in_memory()?;
        let registry = SchemaRegistry::new();
        let ingestor = PeriodIngestor::new(&store, &registry, 1);
        ingestor.ingest(&income(), &jan)?;

        // a trigger that rejects the second row of the next batch
        store.execute(
            "CREATE TRIGGER reject_99 BEFORE INSERT ON household_income \
             WHEN NEW.HH_ID = 99 BEGIN SELECT RAISE(ABORT, 'rejected'); END",
            &[],
        )?;
        let feb = write_period(&root, "Feb 2020", "household_income.csv", "HH_ID,NEW_COL\n5,a\n99,b\n")?;
        assert!(ingestor.ingest(&income(), &feb).is_err());

        assert_eq!(store.row_count("household_income")?, 1);
        assert!(column_names(&store, "household_income")?.contains(&"NEW_COL".to_string()));
        Ok(())
    }

    /// A header wider than SQLite's column limit makes the ALTER fail midway.
    fn too_wide_batch(id: i64) -> String {
        let extra: Vec<String> = (0..2100).map(|i| format!("C{}", i)).collect();
        format!("HH_ID,{}\n{}{}\n", extra.join(","), id, ",0".repeat(extra.len()))
    }

    #[test]
    fn schema_conflict_aborts_the_batch_and_rolls_back_the_schema() -> Result<()> {
        let root = tempdir()?;
        let jan = write_period(&root, "Jan 2020", "household_income.csv", "HH_ID\n1\n")?;
        let feb = write_period(&root, "Feb 2020", "household_income.csv", &too_wide_batch(2))?;
        let store = SqliteStore::open_in_memory()?;
        let registry = SchemaRegistry::new();
        let ingestor = PeriodIngestor::new(&store, &registry, 10);
        ingestor.ingest(&income(), &jan)?;
        let before = column_names(&store, "household_income")?;

        let err = ingestor.ingest(&income(), &feb).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { ref table, .. } if table == "household_income"));

        assert_eq!(store.row_count("household_income")?, 1);
        assert_eq!(column_names(&store, "household_income")?, before);
        let schema = registry.lookup(&store, "household_income")?.expect("created in January");
        assert_eq!(schema.version, 1);
        assert_eq!(schema.columns.len(), before.len());
        Ok(())
    }

    #[test]
    fn run_continues_past_a_schema_conflict() -> Result<()> {
        init_test_logging();
        let root = tempdir()?;
        write_period(&root, "Jan 2020", "household_income.csv", "HH_ID\n1\n")?;
        write_period(&root, "Feb 2020", "household_income.csv", &too_wide_batch(2))?;
        write_period(&root, "Mar 2020", "household_income.csv", "HH_ID\n3\n")?;

        let store = SqliteStore::open_in_memory()?;
        let registry = SchemaRegistry::new();
        let ingestor = PeriodIngestor::new(&store, &registry, 10);
        let summary = ingest_all(&ingestor, &[income()], root.path())?;

        assert_eq!(summary.ingested.len(), 2);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].path.ends_with("Feb 2020/household_income.csv"));
        assert_eq!(summary.failed[0].table, "household_income");
        assert_eq!(store.row_count("household_income")?, 2);
        assert_eq!(
            column_names(&store, "household_income")?,
            vec!["id", "HH_ID", "DIR_MONTH", "DIR_YEAR"]
        );
        let schema = registry.lookup(&store, "household_income")?.expect("created in January");
        assert_eq!(schema.version, 1);
        Ok(())
    }

    #[test]
    fn repeated_headers_land_as_distinct_columns() -> Result<()> {
        let root = tempdir()?;
        let jan = write_period(&root, "Jan 2020", "household_income.csv", "HH_ID,A,A,A.1\n1,2,3,4\n")?;
        let store = SqliteStore::open_in_memory()?;
        let registry = SchemaRegistry::new();
        PeriodIngestor::new(&store, &registry, 10).ingest(&income(), &jan)?;

        let names = column_names(&store, "household_income")?;
        for col in ["A", "A.1", "A.1.1"] {
            assert!(names.contains(&col.to_string()), "missing {col} in {names:?}");
        }
        assert_eq!(store.row_count("household_income")?, 1);
        Ok(())
    }

    #[test]
    fn run_summary_counts_ingested_and_skipped() -> Result<()> {
        init_test_logging();
        let root = tempdir()?;
        write_period(&root, "Jan 2020", "household_income.csv", "HH_ID\n1\n2\n")?;
        write_period(&root, "Feb 2020", "household_income.csv", "HH_ID\n3\n")?;
        write_period(&root, "misc", "household_income.csv", "HH_ID\n4\n")?;

        let store = SqliteStore::open_in_memory()?;
        let registry = SchemaRegistry::new();
        let ingestor = PeriodIngestor::new(&store, &registry, 10);
        let summary = ingest_all(&ingestor, &[income()], root.path())?;

        assert_eq!(summary.ingested.len(), 2);
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.rows(), 3);
        assert_eq!(summary.ingested[0].period.label(), "Jan 2020");
        Ok(())
    }
}
