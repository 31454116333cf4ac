//! Declarative join plan: which tables, joined on which columns, filtered how.
//!
//! A plan holds names only. Nothing here touches a store; rendering to SQL
//! happens in [`super::sql`] and execution in [`super::executor`].

use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};
use tracing::warn;

use crate::error::{Error, Result};

/// Which physical columns of one table play the join roles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleMapping {
    pub table: String,
    pub id_column: String,
    pub month_column: String,
    pub year_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population_column: Option<String>,
}

impl RoleMapping {
    fn key_columns(&self) -> [&str; 3] {
        [
            self.id_column.as_str(),
            self.month_column.as_str(),
            self.year_column.as_str(),
        ]
    }
}

/// A table in the plan with its query alias (`t0` is the anchor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub table: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    fn new(table: &TableRef, column: &str) -> Self {
        Self {
            alias: table.alias.clone(),
            column: column.to_string(),
        }
    }
}

/// Inner join of one more table, every pair compared for equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStep {
    pub table: TableRef,
    pub on: Vec<(ColumnRef, ColumnRef)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `column IN (values)`; sorted and deduplicated.
    InSet { column: ColumnRef, values: Vec<String> },
}

impl Filter {
    pub fn matches_nothing(&self) -> bool {
        match self {
            Filter::InSet { values, .. } => values.is_empty(),
        }
    }
}

/// Noteworthy but non-fatal merge outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeWarning {
    /// No population values were allowed, so the filter matches nothing.
    EmptyPopulationFilter,
    /// The merge produced zero rows.
    EmptyResult { table: String },
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeWarning::EmptyPopulationFilter => {
                write!(f, "population filter allows no values; merge will be empty")
            }
            MergeWarning::EmptyResult { table } => write!(f, "merge into `{}` produced no rows", table),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    pub anchor: TableRef,
    pub anchor_roles: RoleMapping,
    pub joins: Vec<JoinStep>,
    pub filter: Filter,
    pub warnings: Vec<MergeWarning>,
}

impl JoinPlan {
    /// Anchor first, then joined tables in declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &TableRef> {
        std::iter::once(&self.anchor).chain(self.joins.iter().map(|j| &j.table))
    }

    /// Output name of `column` from `table`: `<table>_<column>`.
    pub fn output_name(table: &str, column: &str) -> String {
        format!("{}_{}", table, column)
    }

    /// Output columns holding the anchor's (id, month, year).
    pub fn key_columns(&self) -> Vec<String> {
        self.anchor_roles
            .key_columns()
            .iter()
            .map(|c| Self::output_name(&self.anchor.table, c))
            .collect()
    }
}

/// Build the plan. `configs[0]` is the anchor and must name a population
/// column; every other table joins it on (id, month, year).
pub fn plan(configs: &[RoleMapping], allowed: &[String]) -> Result<JoinPlan> {
    let Some((anchor_roles, others)) = configs.split_first() else {
        return Err(Error::InvalidPlan("no tables to merge".into()));
    };

    let mut seen = BTreeSet::new();
    for cfg in configs {
        if cfg.table.trim().is_empty() {
            return Err(Error::InvalidPlan("empty table name".into()));
        }
        if !seen.insert(cfg.table.to_ascii_lowercase()) {
            return Err(Error::InvalidPlan(format!("table `{}` listed twice", cfg.table)));
        }
        if cfg.key_columns().iter().any(|c| c.trim().is_empty()) {
            return Err(Error::InvalidPlan(format!(
                "`{}` has an empty id, month or year column",
                cfg.table
            )));
        }
    }

    let population = anchor_roles
        .population_column
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| {
            Error::InvalidPlan(format!(
                "anchor table `{}` has no population column",
                anchor_roles.table
            ))
        })?;

    let anchor = TableRef {
        table: anchor_roles.table.clone(),
        alias: "t0".to_string(),
    };
    let joins = others
        .iter()
        .enumerate()
        .map(|(i, cfg)| {
            let table = TableRef {
                table: cfg.table.clone(),
                alias: format!("t{}", i + 1),
            };
            let on = anchor_roles
                .key_columns()
                .iter()
                .zip(cfg.key_columns())
                .map(|(a, b)| (ColumnRef::new(&anchor, a), ColumnRef::new(&table, b)))
                .collect();
            JoinStep { table, on }
        })
        .collect();

    let values: Vec<String> = allowed
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let filter = Filter::InSet {
        column: ColumnRef::new(&anchor, population),
        values,
    };

    let mut warnings = Vec::new();
    if filter.matches_nothing() {
        warn!(anchor = %anchor.table, "{}", MergeWarning::EmptyPopulationFilter);
        warnings.push(MergeWarning::EmptyPopulationFilter);
    }

    Ok(JoinPlan {
        anchor,
        anchor_roles: anchor_roles.clone(),
        joins,
        filter,
        warnings,
    })
}
