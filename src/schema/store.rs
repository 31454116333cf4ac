use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};
use tracing::{debug, warn};

use super::write::{read_snapshot, write_snapshot};
use super::Column;
use crate::error::{Error, Result};
use crate::store::TabularStore;

/// One reconciliation step that grew a table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaChange {
    pub version: u32,
    /// Label of the period whose batch introduced the columns.
    pub period: Option<String>,
    pub added: Vec<Column>,
}

/// Versioned schema of one dataset table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSchema {
    pub table: String,
    pub version: u32,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub history: Vec<SchemaChange>,
}

impl TableSchema {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    fn same_columns(&self, other: &[Column]) -> bool {
        self.columns.len() == other.len()
            && self
                .columns
                .iter()
                .zip(other)
                .all(|(a, b)| a.name.eq_ignore_ascii_case(&b.name))
    }
}

/// Cache of table → schema, each table locked independently.
///
/// A table's schema is read from the store once and from then on kept in
/// step by the ingestor, so column types are never re-derived from physical
/// storage metadata per batch.
#[derive(Default)]
pub struct SchemaRegistry {
    map: RwLock<HashMap<String, Arc<RwLock<TableSchema>>>>,
    snapshot_dir: Option<PathBuf>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also persist every schema change as `<table>_columns.json` in `dir`.
    pub fn with_snapshot_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        Ok(Self {
            map: RwLock::new(HashMap::new()),
            snapshot_dir: Some(dir),
        })
    }

    /// Current schema of `table`, loading it from `store` on first use.
    /// `None` when the table does not exist yet.
    pub fn lookup<S: TabularStore>(&self, store: &S, table: &str) -> Result<Option<TableSchema>> {
        if let Some(entry) = self.entry(table)? {
            let schema = entry.read().map_err(|_| Error::Poisoned)?;
            return Ok(Some(schema.clone()));
        }

        let Some(layout) = store.table_layout(table)? else {
            return Ok(None);
        };

        let snapshot = match &self.snapshot_dir {
            Some(dir) => read_snapshot(dir, table)?,
            None => None,
        };
        let schema = match snapshot {
            Some(snap) if snap.same_columns(&layout.columns) => snap,
            Some(snap) => {
                warn!(
                    table = %table,
                    snapshot_version = snap.version,
                    "schema snapshot disagrees with store, using store layout"
                );
                TableSchema {
                    table: table.to_string(),
                    version: snap.version + 1,
                    columns: layout.columns,
                    history: snap.history,
                }
            }
            None => TableSchema {
                table: table.to_string(),
                version: 1,
                columns: layout.columns,
                history: Vec::new(),
            },
        };
        debug!(table = %table, version = schema.version, columns = schema.columns.len(), "loaded schema");
        self.insert(schema.clone())?;
        Ok(Some(schema))
    }

    /// Register a freshly created table.
    pub fn record_created(
        &self,
        table: &str,
        columns: Vec<Column>,
        period: Option<&str>,
    ) -> Result<TableSchema> {
        let schema = TableSchema {
            table: table.to_string(),
            version: 1,
            history: vec![SchemaChange {
                version: 1,
                period: period.map(str::to_string),
                added: columns.clone(),
            }],
            columns,
        };
        self.persist(&schema)?;
        self.insert(schema.clone())?;
        Ok(schema)
    }

    /// Append `added` to a known table, bumping its version. A no-op when
    /// `added` is empty.
    pub fn record_added(
        &self,
        table: &str,
        added: &[Column],
        period: Option<&str>,
    ) -> Result<TableSchema> {
        let entry = self
            .entry(table)?
            .ok_or_else(|| Error::SchemaConflict {
                table: table.to_string(),
                message: "table is not registered".into(),
            })?;
        let mut schema = entry.write().map_err(|_| Error::Poisoned)?;
        if added.is_empty() {
            return Ok(schema.clone());
        }
        schema.version += 1;
        let version = schema.version;
        schema.columns.extend_from_slice(added);
        schema.history.push(SchemaChange {
            version,
            period: period.map(str::to_string),
            added: added.to_vec(),
        });
        self.persist(&schema)?;
        Ok(schema.clone())
    }

    fn entry(&self, table: &str) -> Result<Option<Arc<RwLock<TableSchema>>>> {
        let map = self.map.read().map_err(|_| Error::Poisoned)?;
        Ok(map.get(&table.to_ascii_lowercase()).map(Arc::clone))
    }

    fn insert(&self, schema: TableSchema) -> Result<()> {
        let mut map = self.map.write().map_err(|_| Error::Poisoned)?;
        map.insert(
            schema.table.to_ascii_lowercase(),
            Arc::new(RwLock::new(schema)),
        );
        Ok(())
    }

    fn persist(&self, schema: &TableSchema) -> Result<()> {
        if let Some(dir) = &self.snapshot_dir {
            write_snapshot(dir, schema)?;
        }
        Ok(())
    }
}
