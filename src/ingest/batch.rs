//! CSV batch source.
//!
//! A batch is read in two streaming passes so that memory stays bounded by
//! one window of rows: the first pass only infers column types, the second
//! yields typed rows `chunk_rows` at a time.

use csv::{Reader, ReaderBuilder, StringRecord};
use std::{
    collections::{HashMap, HashSet},
    fs::File,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::schema::{parse_cell, Column, TypeTracker, Value};

/// Header plus row stream of one source file.
pub struct CsvBatch {
    path: PathBuf,
    columns: Vec<Column>,
    rows_seen: u64,
}

impl CsvBatch {
    /// Open `path` and infer its column types (first pass).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut rdr = open_reader(&path)?;
        let headers = disambiguate(rdr.headers().map_err(|e| Error::csv(&path, e))?);

        let mut tracker = TypeTracker::new(headers);
        let mut record = StringRecord::new();
        let mut rows_seen = 0u64;
        while rdr
            .read_record(&mut record)
            .map_err(|e| Error::csv(&path, e))?
        {
            tracker.observe(record.iter());
            rows_seen += 1;
        }
        let columns = tracker.finish();
        debug!(path = %path.display(), columns = columns.len(), rows = rows_seen, "inferred batch header");

        Ok(Self {
            path,
            columns,
            rows_seen,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Row count observed while inferring types.
    pub fn row_count(&self) -> u64 {
        self.rows_seen
    }

    /// Second pass: typed rows in windows of at most `chunk_rows`.
    ///
    /// Short rows are padded with NULL; cells past the header width are
    /// dropped with a warning.
    pub fn chunks(&self, chunk_rows: usize) -> Result<BatchChunks> {
        let rdr = open_reader(&self.path)?;
        Ok(BatchChunks {
            path: self.path.clone(),
            rdr,
            columns: self.columns.clone(),
            chunk_rows: chunk_rows.max(1),
            record: StringRecord::new(),
            warned_wide: false,
            done: false,
        })
    }
}

/// Iterator over typed row windows of a [`CsvBatch`].
pub struct BatchChunks {
    path: PathBuf,
    rdr: Reader<File>,
    columns: Vec<Column>,
    chunk_rows: usize,
    record: StringRecord,
    warned_wide: bool,
    done: bool,
}

impl BatchChunks {
    fn next_chunk(&mut self) -> Result<Option<Vec<Vec<Value>>>> {
        if self.done {
            return Ok(None);
        }
        let width = self.columns.len();
        let mut rows = Vec::with_capacity(self.chunk_rows);
        while rows.len() < self.chunk_rows {
            let more = self
                .rdr
                .read_record(&mut self.record)
                .map_err(|e| Error::csv(&self.path, e))?;
            if !more {
                self.done = true;
                break;
            }
            if self.record.len() > width && !self.warned_wide {
                warn!(
                    path = %self.path.display(),
                    "rows have more cells than headers ({} headers), extra cells dropped",
                    width
                );
                self.warned_wide = true;
            }
            let row = self
                .columns
                .iter()
                .enumerate()
                .map(|(i, col)| {
                    self.record
                        .get(i)
                        .map_or(Value::Null, |cell| parse_cell(cell, col.ty))
                })
                .collect();
            rows.push(row);
        }
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows))
        }
    }
}

impl Iterator for BatchChunks {
    type Item = Result<Vec<Vec<Value>>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_chunk() {
            Ok(Some(rows)) => Some(Ok(rows)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn open_reader(path: &Path) -> Result<Reader<File>> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::csv(path, e))
}

/// Trim header names and suffix repeats as `name.1`, `name.2`, ...
/// A suffix is skipped when it would collide with a header seen so far,
/// so every resulting name is unique ignoring ASCII case.
fn disambiguate(headers: &StringRecord) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(headers.len());
    for (idx, raw) in headers.iter().enumerate() {
        let mut base = raw.trim().to_string();
        if base.is_empty() {
            base = format!("Unnamed: {}", idx);
        }
        let mut name = base.clone();
        if seen.contains(&name.to_ascii_lowercase()) {
            let n = next_suffix.entry(base.to_ascii_lowercase()).or_insert(1);
            loop {
                name = format!("{}.{}", base, n);
                *n += 1;
                if !seen.contains(&name.to_ascii_lowercase()) {
                    break;
                }
            }
        }
        seen.insert(name.to_ascii_lowercase());
        out.push(name);
    }
    out
}
