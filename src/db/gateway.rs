//! Connection gateway abstraction.
//!
//! A [`Gateway`] hands out connections and takes them back; a [`Connection`]
//! runs one statement with positional parameters and returns decoded rows.
//! Implementations classify driver failures into [`DbError`](crate::error::DbError)
//! before returning, so nothing above this layer sees driver error types.
//!
//! [`PgGateway`](crate::db::postgres::PgGateway) is the production
//! implementation; tests plug in an in-memory one.

use crate::db::types::Row;
use crate::error::DbResult;
use crate::models::SqlValue;
use async_trait::async_trait;

/// A single database session.
///
/// Statements issued on the same connection share session state, which is
/// what makes a BEGIN/COMMIT bracket meaningful.
#[async_trait]
pub trait Connection: Send {
    /// Execute `sql`, binding `values[i]` to placeholder `$i+1`.
    ///
    /// With no values the statement goes over the simple protocol and may
    /// contain several `;`-separated statements.
    async fn execute(&mut self, sql: &str, values: &[SqlValue]) -> DbResult<Vec<Row>>;
}

/// Source of connections.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    type Conn: Connection + 'static;

    async fn connect(&self) -> DbResult<Self::Conn>;

    /// Return a connection obtained from [`connect`](Gateway::connect).
    async fn release(&self, conn: Self::Conn);
}
