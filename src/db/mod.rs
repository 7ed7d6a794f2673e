//! Database access layer.
//!
//! - `gateway`: connection traits implemented by drivers
//! - `postgres`: the sqlx-backed PostgreSQL gateway
//! - `database` / `transaction`: query execution, transactions and retries
//! - `classify`: driver error classification
//! - `types`: row representation and column decoding

pub mod classify;
pub mod database;
pub mod executor;
pub mod gateway;
pub mod observer;
pub mod postgres;
pub mod retry;
pub mod transaction;
pub mod types;

pub use classify::{ConstraintKind, ConstraintName, DriverError, classify, parse_constraint_name};
pub use database::Database;
pub use executor::Executor;
pub use gateway::{Connection, Gateway};
pub use observer::{MigrationEvent, NoopObserver, Observer, QueryEvent, TracingObserver, TransactionEvent};
pub use postgres::{PgGateway, PgSession};
pub use retry::{RetryPolicy, with_retry};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
pub use types::Row;
