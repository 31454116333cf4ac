use std::collections::HashSet;

use super::plan::{ColumnRef, Filter, JoinPlan};
use crate::error::{Error, Result};
use crate::schema::Value;
use crate::store::{quote_ident, TableLayout};

/// SELECT text with its bound parameters and output column names.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub output_columns: Vec<String>,
}

fn column_sql(c: &ColumnRef) -> String {
    format!("{}.{}", c.alias, quote_ident(&c.column))
}

/// Render `plan` as one SELECT. `layouts` are the physical layouts of
/// `plan.tables()`, in the same order; every column of every table is
/// selected under its `<table>_<column>` output name.
pub fn render_select(plan: &JoinPlan, layouts: &[TableLayout]) -> Result<RenderedQuery> {
    let tables: Vec<_> = plan.tables().collect();
    if tables.len() != layouts.len() {
        return Err(Error::InvalidPlan(format!(
            "{} layouts for {} tables",
            layouts.len(),
            tables.len()
        )));
    }

    let mut select = Vec::new();
    let mut output_columns = Vec::new();
    let mut taken = HashSet::new();
    for (t, layout) in tables.iter().zip(layouts) {
        for col in &layout.columns {
            let out = JoinPlan::output_name(&t.table, &col.name);
            if !taken.insert(out.to_ascii_lowercase()) {
                return Err(Error::InvalidPlan(format!(
                    "output column `{}` would appear twice",
                    out
                )));
            }
            select.push(format!(
                "{}.{} AS {}",
                t.alias,
                quote_ident(&col.name),
                quote_ident(&out)
            ));
            output_columns.push(out);
        }
    }

    let mut sql = format!(
        "SELECT {} FROM {} AS {}",
        select.join(", "),
        quote_ident(&plan.anchor.table),
        plan.anchor.alias
    );
    for join in &plan.joins {
        let on: Vec<String> = join
            .on
            .iter()
            .map(|(a, b)| format!("{} = {}", column_sql(a), column_sql(b)))
            .collect();
        sql.push_str(&format!(
            " JOIN {} AS {} ON {}",
            quote_ident(&join.table.table),
            join.table.alias,
            on.join(" AND ")
        ));
    }

    let mut params = Vec::new();
    match &plan.filter {
        Filter::InSet { values, .. } if values.is_empty() => sql.push_str(" WHERE 0 = 1"),
        Filter::InSet { column, values } => {
            let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
            sql.push_str(&format!(
                " WHERE {} IN ({})",
                column_sql(column),
                placeholders.join(", ")
            ));
            params.extend(values.iter().map(|v| Value::Text(v.clone())));
        }
    }

    Ok(RenderedQuery {
        sql,
        params,
        output_columns,
    })
}

/// `CREATE TABLE <output> AS <select>`.
pub fn render_create_as(output_table: &str, query: &RenderedQuery) -> String {
    format!("CREATE TABLE {} AS {}", quote_ident(output_table), query.sql)
}
