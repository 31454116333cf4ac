use tracing::debug;

use super::{Column, SqlType, Value};

/// What the observed values of one column allow so far.
///
/// Only ever widens: `Empty → Integer → Real → Text`. Empty cells are not
/// observations and leave the state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Observed {
    #[default]
    Empty,
    Integer,
    Real,
    Text,
}

impl Observed {
    fn widen(self, sample: Observed) -> Observed {
        use Observed::*;
        match (self, sample) {
            (Text, _) | (_, Text) => Text,
            (Real, _) | (_, Real) => Real,
            (Integer, _) | (_, Integer) => Integer,
            (Empty, Empty) => Empty,
        }
    }

    /// Final type. Columns with no observed value fall back to text.
    pub fn resolve(self) -> SqlType {
        match self {
            Observed::Integer => SqlType::Integer,
            Observed::Real => SqlType::Real,
            Observed::Empty | Observed::Text => SqlType::Text,
        }
    }
}

/// Incremental per-column type inference over a stream of rows.
#[derive(Debug, Clone)]
pub struct TypeTracker {
    headers: Vec<String>,
    observed: Vec<Observed>,
}

impl TypeTracker {
    pub fn new(headers: Vec<String>) -> Self {
        let observed = vec![Observed::Empty; headers.len()];
        Self { headers, observed }
    }

    /// Feed one row. Cells beyond the header width are ignored.
    pub fn observe<'a, I>(&mut self, row: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for (i, cell) in row.into_iter().enumerate() {
            let Some(state) = self.observed.get_mut(i) else {
                break;
            };
            if *state == Observed::Text {
                continue;
            }
            *state = state.widen(classify(cell));
        }
    }

    pub fn finish(self) -> Vec<Column> {
        self.headers
            .into_iter()
            .zip(self.observed)
            .map(|(name, seen)| {
                if seen == Observed::Empty {
                    debug!("no samples for `{}`, defaulting to TEXT", name);
                }
                Column::new(name, seen.resolve())
            })
            .collect()
    }
}

fn classify(raw: &str) -> Observed {
    let v = raw.trim();
    if v.is_empty() {
        return Observed::Empty;
    }
    if v.parse::<i64>().is_ok() {
        return Observed::Integer;
    }
    match v.parse::<f64>() {
        Ok(f) if f.is_finite() => Observed::Real,
        _ => Observed::Text,
    }
}

/// Convert one raw cell into a value of the column's storage class.
/// Empty cells become NULL.
pub fn parse_cell(raw: &str, ty: SqlType) -> Value {
    let v = raw.trim();
    if v.is_empty() {
        return Value::Null;
    }
    match ty {
        SqlType::Integer => v
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::Text(raw.to_string())),
        SqlType::Real => v
            .parse::<f64>()
            .map(Value::Real)
            .unwrap_or_else(|_| Value::Text(raw.to_string())),
        SqlType::Text => Value::Text(raw.to_string()),
    }
}
