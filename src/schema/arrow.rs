// src/schema/arrow.rs

use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema};
use std::sync::Arc;

use super::types::{Column, SqlType};

/// Map a storage class onto an Arrow DataType.
///
/// - INTEGER → Int64
/// - REAL    → Float64
/// - TEXT    → Utf8
pub fn map_to_arrow_type(ty: SqlType) -> DataType {
    match ty {
        SqlType::Integer => DataType::Int64,
        SqlType::Real => DataType::Float64,
        SqlType::Text => DataType::Utf8,
    }
}

/// Build an ArrowSchema (inside an Arc) from a slice of `Column`s.
pub fn build_arrow_schema(cols: &[Column]) -> Arc<ArrowSchema> {
    let fields: Vec<ArrowField> = cols
        .iter()
        .map(|col| ArrowField::new(&col.name, map_to_arrow_type(col.ty), /* nullable = */ true))
        .collect();

    Arc::new(ArrowSchema::new(fields))
}
