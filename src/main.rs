use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use panelmerge::{
    config::{DatasetKind, PipelineConfig},
    export::export_parquet,
    ingest::{canonicalize_file_names, ingest_all, PeriodIngestor},
    merge,
    schema::SchemaRegistry,
    store::{combine_stores, SqliteStore},
};

/// Monthly survey ingestion and household-panel merge.
#[derive(Parser, Debug)]
#[command(name = "panelmerge", version)]
struct Args {
    /// YAML pipeline config; the built-in survey layout when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest every `<Mon> <YYYY>/<dataset>.csv` under the raw root
    Ingest {
        /// Only these dataset kinds (repeatable)
        #[arg(long)]
        dataset: Vec<String>,
        /// Raw root directory, overriding the config
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Join the dataset tables into the filtered output table
    Merge,
    /// Stream a table to a Parquet file
    Export {
        /// Defaults to the merge output table
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Copy every table of the source databases into the database
    Combine {
        #[arg(long = "source", required = true)]
        sources: Vec<PathBuf>,
    },
    /// Show a dataset table's columns and schema history
    Schema {
        #[arg(long)]
        table: String,
    },
    /// Rename dated raw files to their canonical dataset file names
    Rename {
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(db) = &args.db {
        cfg.database = db.clone();
    }
    info!(database = %cfg.database.display(), "startup");

    match args.command {
        Command::Ingest { dataset, root } => {
            let kinds = select_kinds(&cfg, &dataset)?;
            let root = root.unwrap_or_else(|| cfg.raw_root.clone());
            let store = open_store(&cfg)?;
            let registry = registry(&cfg)?;
            let ingestor = PeriodIngestor::new(&store, &registry, cfg.chunk_rows);
            let summary = ingest_all(&ingestor, &kinds, &root)?;

            for r in &summary.ingested {
                println!(
                    "ingested {:<24} {}  rows={} new_columns={}",
                    r.table,
                    r.period,
                    r.rows,
                    r.added_columns.len()
                );
            }
            for s in &summary.skipped {
                println!("skipped  {}  ({})", s.path.display(), s.reason);
            }
            for f in &summary.failed {
                println!("FAILED   {}  {}: {}", f.path.display(), f.table, f.error);
            }
            println!(
                "{} ingested, {} skipped, {} failed, {} rows",
                summary.ingested.len(),
                summary.skipped.len(),
                summary.failed.len(),
                summary.rows()
            );
            if !summary.failed.is_empty() {
                bail!("{} batch(es) failed", summary.failed.len());
            }
        }
        Command::Merge => {
            let store = open_store(&cfg)?;
            let report = merge::run(&store, &cfg.merge)
                .with_context(|| format!("merging into `{}`", cfg.merge.output_table))?;
            for w in &report.warnings {
                warn!("{}", w);
            }
            println!("{}: {} rows", report.output_table, report.row_count);
        }
        Command::Export { table, out } => {
            let store = open_store(&cfg)?;
            let table = table.unwrap_or_else(|| cfg.merge.output_table.clone());
            let rows = export_parquet(&store, &table, &out, cfg.chunk_rows)
                .with_context(|| format!("exporting `{}` to {:?}", table, out))?;
            println!("{}: {} rows → {}", table, rows, out.display());
        }
        Command::Combine { sources } => {
            let target = open_store(&cfg)?;
            let stores = sources
                .iter()
                .map(|p| SqliteStore::open(p).with_context(|| format!("opening {:?}", p)))
                .collect::<Result<Vec<_>>>()?;
            let rows = combine_stores(&stores, &target, cfg.chunk_rows)?;
            println!(
                "combined {} database(s) into {}: {} rows",
                stores.len(),
                cfg.database.display(),
                rows
            );
        }
        Command::Schema { table } => {
            let store = open_store(&cfg)?;
            let registry = registry(&cfg)?;
            let Some(schema) = registry.lookup(&store, &table)? else {
                bail!("table `{}` does not exist", table);
            };
            println!("{} (version {})", schema.table, schema.version);
            for col in &schema.columns {
                println!("  {:<32} {}", col.name, col.ty.as_sql());
            }
            for change in &schema.history {
                let names: Vec<&str> = change.added.iter().map(|c| c.name.as_str()).collect();
                println!(
                    "  v{} {}: +{}",
                    change.version,
                    change.period.as_deref().unwrap_or("-"),
                    names.join(", ")
                );
            }
        }
        Command::Rename { root } => {
            let root = root.unwrap_or_else(|| cfg.raw_root.clone());
            let n = canonicalize_file_names(&root, &cfg.datasets)?;
            println!("renamed {} file(s)", n);
        }
    }
    Ok(())
}

fn open_store(cfg: &PipelineConfig) -> Result<SqliteStore> {
    SqliteStore::open(&cfg.database).with_context(|| format!("opening {:?}", cfg.database))
}

fn registry(cfg: &PipelineConfig) -> Result<SchemaRegistry> {
    Ok(match &cfg.schema_snapshot_dir {
        Some(dir) => SchemaRegistry::with_snapshot_dir(dir)?,
        None => SchemaRegistry::new(),
    })
}

fn select_kinds(cfg: &PipelineConfig, wanted: &[String]) -> Result<Vec<DatasetKind>> {
    if wanted.is_empty() {
        return Ok(cfg.datasets.clone());
    }
    wanted
        .iter()
        .map(|k| {
            cfg.dataset(k)
                .cloned()
                .with_context(|| format!("unknown dataset `{}`", k))
        })
        .collect()
}
