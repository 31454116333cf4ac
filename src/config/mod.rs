//! Pipeline configuration: which datasets to ingest, how their period tags
//! are named, and how the merge lines them up.
//!
//! Loaded from YAML, or taken from [`PipelineConfig::default`], which
//! describes the four household survey datasets.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use crate::error::Error;
use crate::merge::RoleMapping;

pub const DEFAULT_CHUNK_ROWS: usize = 50_000;

/// One dataset kind: where its files live and which columns carry its
/// period tag. Tag column names differ per kind and double as the join-key
/// column names at merge time, so they are configured, never unified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetKind {
    pub kind: String,
    pub table: String,
    pub file_name: String,
    pub month_column: String,
    pub year_column: String,
    #[serde(default = "default_identity_column")]
    pub identity_column: String,
}

impl DatasetKind {
    pub fn new(
        kind: &str,
        month_column: &str,
        year_column: &str,
    ) -> Self {
        Self {
            kind: kind.to_string(),
            table: kind.to_string(),
            file_name: format!("{}.csv", kind),
            month_column: month_column.to_string(),
            year_column: year_column.to_string(),
            identity_column: default_identity_column(),
        }
    }

    /// Role mapping for this dataset's table, joined on `id_column`.
    pub fn role_mapping(&self, id_column: &str, population_column: Option<&str>) -> RoleMapping {
        RoleMapping {
            table: self.table.clone(),
            id_column: id_column.to_string(),
            month_column: self.month_column.clone(),
            year_column: self.year_column.clone(),
            population_column: population_column.map(str::to_string),
        }
    }
}

fn default_identity_column() -> String {
    "id".to_string()
}

fn default_chunk_rows() -> usize {
    DEFAULT_CHUNK_ROWS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeConfig {
    pub output_table: String,
    pub population_values: Vec<String>,
    /// First entry is the anchor.
    pub tables: Vec<RoleMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    pub database: PathBuf,
    pub raw_root: PathBuf,
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,
    #[serde(default)]
    pub schema_snapshot_dir: Option<PathBuf>,
    pub datasets: Vec<DatasetKind>,
    pub merge: MergeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let people = DatasetKind::new("people_of_india", "month", "year");
        let income = DatasetKind::new("household_income", "DIR_MONTH", "DIR_YEAR");
        let consumption = DatasetKind::new("consumption_pyramids", "DIR_MONTH", "DIR_YEAR");
        let aspirations = DatasetKind::new("aspirational_india", "month", "year");

        let tables = vec![
            people.role_mapping("HH_ID", Some("STATE")),
            income.role_mapping("HH_ID", Some("STATE")),
            consumption.role_mapping("HH_ID", Some("STATE")),
            aspirations.role_mapping("HH_ID", Some("STATE")),
        ];

        Self {
            database: PathBuf::from("panel.db"),
            raw_root: PathBuf::from("raw months"),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            schema_snapshot_dir: None,
            datasets: vec![people, income, consumption, aspirations],
            merge: MergeConfig {
                output_table: "filtered_states".to_string(),
                population_values: [
                    "Uttar Pradesh",
                    "Madhya Pradesh",
                    "Chhattisgarh",
                    "Jharkhand",
                    "Bihar",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                tables,
            },
        }
    }
}

impl PipelineConfig {
    /// Read and validate a YAML config.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
        let cfg: PipelineConfig =
            serde_yaml::from_str(&text).with_context(|| format!("parsing config {:?}", path))?;
        cfg.validate()
            .with_context(|| format!("validating config {:?}", path))?;
        Ok(cfg)
    }

    pub fn dataset(&self, kind: &str) -> Option<&DatasetKind> {
        self.datasets.iter().find(|d| d.kind == kind)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let bad = |msg: String| Err(Error::Config(msg));

        if self.chunk_rows == 0 {
            return bad("chunk_rows must be > 0".into());
        }
        if self.datasets.is_empty() {
            return bad("no datasets configured".into());
        }

        let mut kinds = HashSet::new();
        let mut tables = HashSet::new();
        for d in &self.datasets {
            if !kinds.insert(d.kind.as_str()) {
                return bad(format!("dataset `{}` configured twice", d.kind));
            }
            if !tables.insert(d.table.to_ascii_lowercase()) {
                return bad(format!("table `{}` used by two datasets", d.table));
            }
            if d.month_column.eq_ignore_ascii_case(&d.year_column) {
                return bad(format!("`{}`: month and year columns must differ", d.kind));
            }
            for (what, col) in [
                ("month", &d.month_column),
                ("year", &d.year_column),
                ("identity", &d.identity_column),
            ] {
                if col.trim().is_empty() {
                    return bad(format!("`{}`: empty {} column name", d.kind, what));
                }
            }
        }

        let merge = &self.merge;
        if merge.tables.is_empty() {
            return bad("merge has no tables".into());
        }
        if merge.output_table.trim().is_empty() {
            return bad("merge output_table is empty".into());
        }
        if tables.contains(&merge.output_table.to_ascii_lowercase()) {
            return bad(format!(
                "merge output `{}` would overwrite a dataset table",
                merge.output_table
            ));
        }
        if let Some(t) = merge
            .tables
            .iter()
            .find(|t| !tables.contains(&t.table.to_ascii_lowercase()))
        {
            return bad(format!("merge table `{}` is not a configured dataset", t.table));
        }
        if merge.tables[0].population_column.is_none() {
            return bad(format!(
                "anchor table `{}` needs a population_column",
                merge.tables[0].table
            ));
        }
        Ok(())
    }
}
