//! Table creation and auto-migration for sqlgraph.
//!
//! This crate provides:
//! - `CREATE TABLE` generation from registered model definitions
//! - Comparison of a model against the live table (`PRAGMA table_info`)
//! - The schema synchronizer that creates, rebuilds or keeps each table
//!
//! # Example
//!
//! ```ignore
//! use sqlgraph_schema::SchemaSynchronizer;
//!
//! let stats = SchemaSynchronizer::new(&registry).sync_all(&cx, &conn).await;
//! ```

pub mod create;
pub mod introspect;
pub mod sync;

pub use create::{
    copy_back_sql, copy_table_sql, create_table_sql, drop_table_sql, migration_table_name,
};
pub use introspect::{TableState, compare, inspect};
pub use sync::{AutoMigrateStats, SchemaSynchronizer, TableAction};
