//! Transaction handles.
//!
//! A [`Transaction`] owns one connection for the duration of a single attempt
//! and walks `Idle -> Begun -> Committed | RolledBack`. Attempts and retries
//! are driven by [`Database::transaction`](crate::db::Database::transaction).

use crate::db::executor::Executor;
use crate::db::gateway::Connection;
use crate::db::observer::{Observer, QueryEvent, TransactionEvent};
use crate::db::types::Row;
use crate::error::{DbError, DbResult};
use crate::query::Query;
use async_trait::async_trait;
use clap::ValueEnum;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// SQL transaction isolation level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    #[default]
    Serializable,
}

impl IsolationLevel {
    /// The level as written in SQL.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    pub fn begin_statement(&self) -> String {
        format!("BEGIN TRANSACTION ISOLATION LEVEL {}", self.as_sql())
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Lifecycle of one transaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Idle,
    Begun,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Begun)
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// Run a query on a connection and report it to the observer.
pub(crate) async fn observed<C: Connection>(
    conn: &mut C,
    observer: &dyn Observer,
    query: &Query,
) -> DbResult<Vec<Row>> {
    let start = Instant::now();
    let result = conn.execute(&query.sql, &query.values).await;
    observer.on_query(&QueryEvent {
        sql: &query.sql,
        params: query.values.len(),
        elapsed: start.elapsed(),
        outcome: result
            .as_ref()
            .map(Vec::len)
            .map_err(ToString::to_string),
    });
    result
}

/// An open transaction bound to one connection.
pub struct Transaction<C: Connection> {
    conn: C,
    state: TransactionState,
    attempt: u32,
    observer: Arc<dyn Observer>,
}

impl<C: Connection> Transaction<C> {
    pub(crate) fn new(conn: C, attempt: u32, observer: Arc<dyn Observer>) -> Self {
        Self {
            conn,
            state: TransactionState::Idle,
            attempt,
            observer,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Zero-based attempt number within the retry loop.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Run nested work inside this transaction.
    ///
    /// No new BEGIN is issued; the work shares the enclosing transaction and
    /// its failure fails the whole unit.
    pub async fn transaction<T, F>(&mut self, work: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<C>) -> BoxFuture<'t, DbResult<T>>,
    {
        work(self).await
    }

    /// BEGIN, run the work, then COMMIT or ROLLBACK.
    pub(crate) async fn run<T, F>(&mut self, isolation: IsolationLevel, work: &F) -> DbResult<T>
    where
        F: for<'t> Fn(&'t mut Transaction<C>) -> BoxFuture<'t, DbResult<T>>,
    {
        self.statement(&isolation.begin_statement()).await?;
        self.state = TransactionState::Begun;
        self.observer.on_transaction(&TransactionEvent::Begin {
            attempt: self.attempt,
            isolation,
        });

        let outcome = match work(self).await {
            Ok(value) => self.statement("COMMIT").await.map(|_| value),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(value) => {
                self.state = TransactionState::Committed;
                self.observer.on_transaction(&TransactionEvent::Commit {
                    attempt: self.attempt,
                });
                Ok(value)
            }
            Err(err) => {
                self.rollback(&err).await;
                Err(err)
            }
        }
    }

    async fn rollback(&mut self, cause: &DbError) {
        if let Err(rollback_err) = self.statement("ROLLBACK").await {
            warn!(attempt = self.attempt, error = %rollback_err, "ROLLBACK failed");
        }
        self.state = TransactionState::RolledBack;
        self.observer.on_transaction(&TransactionEvent::Rollback {
            attempt: self.attempt,
            error: cause.to_string(),
        });
    }

    async fn statement(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        observed(&mut self.conn, self.observer.as_ref(), &Query::raw(sql)).await
    }

    pub(crate) fn into_connection(self) -> C {
        self.conn
    }
}

impl<C: Connection> fmt::Debug for Transaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C: Connection> Executor for Transaction<C> {
    async fn execute(&mut self, query: &Query) -> DbResult<Vec<Row>> {
        if !self.state.is_active() {
            return Err(DbError::invalid_input(format!(
                "Transaction is not active (state: {:?})",
                self.state
            )));
        }
        observed(&mut self.conn, self.observer.as_ref(), query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_statement() {
        assert_eq!(
            IsolationLevel::default().begin_statement(),
            "BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        );
        assert_eq!(
            IsolationLevel::ReadCommitted.begin_statement(),
            "BEGIN TRANSACTION ISOLATION LEVEL READ COMMITTED"
        );
    }

    #[test]
    fn test_isolation_value_enum_names() {
        let level = IsolationLevel::from_str("repeatable-read", true).unwrap();
        assert_eq!(level, IsolationLevel::RepeatableRead);
        assert_eq!(level.to_string(), "REPEATABLE READ");
    }

    #[test]
    fn test_transaction_state_flags() {
        assert!(TransactionState::Begun.is_active());
        assert!(!TransactionState::Idle.is_active());
        assert!(TransactionState::Committed.is_ended());
        assert!(TransactionState::RolledBack.is_ended());
        assert!(!TransactionState::Begun.is_ended());
    }
}
