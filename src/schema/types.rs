// src/schema/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage class of a dataset column. Assigned once, never changed.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlType {
    Integer,
    Real,
    Text,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Text => "TEXT",
        }
    }

    /// Map a declared column type back onto a storage class, using SQLite's
    /// affinity rules (`INT` anywhere → integer, `REAL`/`FLOA`/`DOUB` → real).
    /// `CREATE TABLE .. AS` produces `INT`, `REAL`, `TEXT`, `NUM` or nothing.
    pub fn from_declared(decl: &str) -> SqlType {
        let upper = decl.to_ascii_uppercase();
        if upper.contains("INT") {
            SqlType::Integer
        } else if upper.contains("REAL")
            || upper.contains("FLOA")
            || upper.contains("DOUB")
            || upper == "NUM"
        {
            SqlType::Real
        } else {
            SqlType::Text
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A single named, typed column.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq, Hash)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// One cell value as read from a batch or from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_types_follow_sqlite_affinity() {
        assert_eq!(SqlType::from_declared("INTEGER"), SqlType::Integer);
        assert_eq!(SqlType::from_declared("INT"), SqlType::Integer);
        assert_eq!(SqlType::from_declared("REAL"), SqlType::Real);
        assert_eq!(SqlType::from_declared("NUM"), SqlType::Real);
        assert_eq!(SqlType::from_declared("TEXT"), SqlType::Text);
        assert_eq!(SqlType::from_declared(""), SqlType::Text);
    }

    #[test]
    fn column_serializes_with_uppercase_type() -> anyhow::Result<()> {
        let json = serde_json::to_string(&Column::new("HH_ID", SqlType::Integer))?;
        assert_eq!(json, r#"{"name":"HH_ID","ty":"INTEGER"}"#);
        Ok(())
    }
}
