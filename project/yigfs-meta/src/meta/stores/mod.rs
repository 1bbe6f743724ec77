//! Metadata Store Implementations
//!
//! - `DatabaseMetaStore`: SQL databases (PostgreSQL, SQLite)
pub mod database_store;

pub use database_store::{DatabaseMetaStore, DatabaseTxn};
