//! Composite-key merge of dataset tables.
//!
//! [`plan`] turns ordered role mappings plus the allowed population values
//! into a [`JoinPlan`]; [`execute`] materializes it as one table inside a
//! single transaction.

pub mod executor;
pub mod plan;
pub mod sql;

pub use executor::{execute, read_back, MergeReport};
pub use plan::{plan, ColumnRef, Filter, JoinPlan, JoinStep, MergeWarning, RoleMapping, TableRef};
pub use sql::{render_create_as, render_select, RenderedQuery};

use crate::config::MergeConfig;
use crate::error::Result;
use crate::store::TabularStore;

/// Plan and execute the merge described by `cfg`.
pub fn run<S: TabularStore>(store: &S, cfg: &MergeConfig) -> Result<MergeReport> {
    let p = plan(&cfg.tables, &cfg.population_values)?;
    execute(&p, store, &cfg.output_table)
}
