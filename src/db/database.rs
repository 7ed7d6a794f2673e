//! The entry point for running queries and transactions.

use crate::db::executor::Executor;
use crate::db::gateway::Gateway;
use crate::db::observer::{NoopObserver, Observer};
use crate::db::retry::{RetryPolicy, with_retry};
use crate::db::transaction::{IsolationLevel, Transaction, observed};
use crate::db::types::Row;
use crate::error::{DbError, DbResult};
use crate::query::Query;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Queries and transactions over a [`Gateway`].
///
/// Plain queries take a connection, run and give it back. Transactions keep
/// one connection per attempt and retry on serialization failures and
/// deadlocks according to the configured [`RetryPolicy`].
///
/// Cloning is cheap; clones share the gateway and observer.
pub struct Database<G: Gateway> {
    gateway: Arc<G>,
    retry: RetryPolicy,
    isolation: IsolationLevel,
    observer: Arc<dyn Observer>,
}

impl<G: Gateway> Database<G> {
    pub fn new(gateway: G) -> Self {
        Self::from_arc(Arc::new(gateway))
    }

    pub fn from_arc(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            retry: RetryPolicy::default(),
            isolation: IsolationLevel::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Isolation level used by [`transaction`](Self::transaction).
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn observer(&self) -> &Arc<dyn Observer> {
        &self.observer
    }

    /// Run one query on a fresh connection.
    pub async fn execute(&self, query: &Query) -> DbResult<Vec<Row>> {
        let mut conn = self.gateway.connect().await?;
        let result = observed(&mut conn, self.observer.as_ref(), query).await;
        self.gateway.release(conn).await;
        result
    }

    /// Run `work` in a transaction at the default isolation level.
    ///
    /// The closure may be invoked several times, once per attempt, so it must
    /// not rely on side effects outside the transaction.
    ///
    /// ```ignore
    /// let id: i64 = db
    ///     .transaction(|tx| {
    ///         async move { tx.scalar_value(&Query::raw("SELECT 1")).await }.boxed()
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        T: Send,
        F: for<'t> Fn(&'t mut Transaction<G::Conn>) -> BoxFuture<'t, DbResult<T>> + Send + Sync,
    {
        self.transaction_with(self.isolation, work).await
    }

    /// Run `work` in a transaction at an explicit isolation level.
    pub async fn transaction_with<T, F>(&self, isolation: IsolationLevel, work: F) -> DbResult<T>
    where
        T: Send,
        F: for<'t> Fn(&'t mut Transaction<G::Conn>) -> BoxFuture<'t, DbResult<T>> + Send + Sync,
    {
        let this = self;
        let work = &work;
        with_retry(self.retry, DbError::is_retryable, move |attempt| {
            this.attempt(attempt, isolation, work)
        })
        .await
    }

    async fn attempt<T, F>(&self, attempt: u32, isolation: IsolationLevel, work: &F) -> DbResult<T>
    where
        F: for<'t> Fn(&'t mut Transaction<G::Conn>) -> BoxFuture<'t, DbResult<T>>,
    {
        let conn = self.gateway.connect().await?;
        let mut tx = Transaction::new(conn, attempt, Arc::clone(&self.observer));
        let result = tx.run(isolation, work).await;
        self.gateway.release(tx.into_connection()).await;
        result
    }
}

impl<G: Gateway> Clone for Database<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            retry: self.retry,
            isolation: self.isolation,
            observer: Arc::clone(&self.observer),
        }
    }
}

impl<G: Gateway> fmt::Debug for Database<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("retry", &self.retry)
            .field("isolation", &self.isolation)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<G: Gateway> Executor for Database<G> {
    async fn execute(&mut self, query: &Query) -> DbResult<Vec<Row>> {
        Database::execute(&*self, query).await
    }
}
