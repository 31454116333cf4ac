//! Schema reconciliation: decide which incoming columns a dataset table is
//! missing. Existing columns are never dropped or retyped.

use std::collections::HashSet;

use super::Column;

/// Columns of `incoming` not already present in `existing`, in incoming order.
///
/// Names compare ASCII case-insensitively because store identifiers do.
/// A name repeated within `incoming` is only returned once.
pub fn reconcile<'a, I>(existing: I, incoming: &[Column]) -> Vec<Column>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: HashSet<String> = existing
        .into_iter()
        .map(|n| n.to_ascii_lowercase())
        .collect();

    incoming
        .iter()
        .filter(|col| seen.insert(col.name.to_ascii_lowercase()))
        .cloned()
        .collect()
}
