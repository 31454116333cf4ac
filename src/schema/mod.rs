pub mod arrow;
pub mod derive;
pub mod evolution;
pub mod store;
pub mod types;
pub mod write;

pub use arrow::{build_arrow_schema, map_to_arrow_type};
pub use derive::{parse_cell, TypeTracker};
pub use evolution::reconcile;
pub use store::{SchemaChange, SchemaRegistry, TableSchema};
pub use types::{Column, SqlType, Value};
pub use write::{read_snapshot, write_snapshot};
