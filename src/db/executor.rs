//! The query surface shared by [`Database`](crate::db::Database) and
//! [`Transaction`](crate::db::Transaction).
//!
//! Implementors only provide [`Executor::execute`]; the typed helpers are
//! layered on top and decode rows through serde.

use crate::db::types::Row;
use crate::error::DbResult;
use crate::query::{self, Fetched, Query};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

#[async_trait]
pub trait Executor: Send {
    /// Run a query and return every row.
    async fn execute(&mut self, query: &Query) -> DbResult<Vec<Row>>;

    /// Run a query and classify the result by row count.
    async fn fetch(&mut self, query: &Query) -> DbResult<Fetched<Row>> {
        Ok(query::fetch(self.execute(query).await?))
    }

    /// All rows decoded as `T`.
    async fn many<T: DeserializeOwned + Send>(&mut self, query: &Query) -> DbResult<Vec<T>> {
        self.execute(query)
            .await?
            .into_iter()
            .map(Row::into_decoded)
            .collect()
    }

    /// Exactly one row decoded as `T`.
    async fn one<T: DeserializeOwned + Send>(&mut self, query: &Query) -> DbResult<T> {
        query::single(self.execute(query).await?)?.into_decoded()
    }

    /// Zero or one row decoded as `T`.
    async fn one_or_none<T: DeserializeOwned + Send>(
        &mut self,
        query: &Query,
    ) -> DbResult<Option<T>> {
        query::single_or_none(self.execute(query).await?)?
            .map(Row::into_decoded)
            .transpose()
    }

    /// First column of exactly one row decoded as `T`.
    async fn scalar_value<T: DeserializeOwned + Send>(&mut self, query: &Query) -> DbResult<T> {
        let value = query::scalar(self.execute(query).await?)?;
        Ok(serde_json::from_value(value)?)
    }

    /// First column of zero or one row decoded as `T`.
    async fn scalar_or_none<T: DeserializeOwned + Send>(
        &mut self,
        query: &Query,
    ) -> DbResult<Option<T>> {
        match query::scalar_or_none(self.execute(query).await?)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// First column of exactly one row, undecoded.
    async fn scalar(&mut self, query: &Query) -> DbResult<JsonValue> {
        query::scalar(self.execute(query).await?)
    }
}
