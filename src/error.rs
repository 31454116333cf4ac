use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Library errors.
///
/// Ingestion failures are scoped to one batch; the multi-period driver logs
/// them and moves on. Merge failures abort the whole merge transaction.
#[derive(Debug, Error)]
pub enum Error {
    /// The batch's parent directory is not a `<Mon> <YYYY>` period.
    #[error("`{0}` is not a `<Mon> <YYYY>` period")]
    PeriodFormat(String),

    /// The store refused a schema change for a dataset table.
    #[error("schema conflict on `{table}`: {message}")]
    SchemaConflict { table: String, message: String },

    /// The merge output has more than one row for some anchor join key.
    #[error(
        "duplicate join keys in `{table}`: {duplicate_keys} key(s) occur more than once{}",
        example_suffix(.example)
    )]
    DuplicateKey {
        table: String,
        duplicate_keys: u64,
        example: Option<String>,
    },

    /// The join plan cannot be built or rendered.
    #[error("invalid join plan: {0}")]
    InvalidPlan(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("export failed: {0}")]
    Export(String),

    #[error("schema registry lock poisoned")]
    Poisoned,
}

impl Error {
    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Error::Csv {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Batch-scoped errors skip one period; everything else is fatal to
    /// whatever operation raised it.
    pub fn is_skip(&self) -> bool {
        matches!(self, Error::PeriodFormat(_))
    }
}

fn example_suffix(example: &Option<String>) -> String {
    example
        .as_ref()
        .map(|e| format!(" (e.g. {})", e))
        .unwrap_or_default()
}

impl From<arrow::error::ArrowError> for Error {
    fn from(e: arrow::error::ArrowError) -> Self {
        Error::Export(e.to_string())
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Error::Export(e.to_string())
    }
}
