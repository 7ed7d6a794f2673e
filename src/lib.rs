//! pgmap library
//!
//! A typed data-access layer for PostgreSQL: declarative column mappings,
//! generated parameterized SQL, classified driver errors, serializable
//! transactions with bounded retry, and versioned migrations whose content
//! hashes are verified on every run.

pub mod config;
pub mod db;
pub mod ddl;
pub mod error;
pub mod mapping;
pub mod migrate;
pub mod models;
pub mod query;

pub use config::Config;
pub use db::{Database, Executor, IsolationLevel, PgGateway, RetryPolicy, Row, Transaction};
pub use error::{DbError, DbResult, ErrorKind};
pub use mapping::{ColumnMap, IndexPolicy};
pub use migrate::{Migration, MigrationState, Migrator};
pub use models::{Entity, Filter, Record, SqlValue};
pub use query::{Fetched, Query};
