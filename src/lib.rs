pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod merge;
pub mod schema;
pub mod store;

pub use error::{Error, Result};
