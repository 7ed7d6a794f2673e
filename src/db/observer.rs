//! Hooks for query, transaction and migration events.
//!
//! Components take an `Arc<dyn Observer>` instead of logging directly, so
//! embedding applications can route events wherever they like. The binary
//! installs [`TracingObserver`].

use crate::db::transaction::IsolationLevel;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A statement that went through the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEvent<'a> {
    pub sql: &'a str,
    pub params: usize,
    pub elapsed: Duration,
    /// Rows returned, or the error message on failure
    pub outcome: Result<usize, String>,
}

/// Transaction lifecycle transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionEvent {
    Begin {
        attempt: u32,
        isolation: IsolationLevel,
    },
    Commit {
        attempt: u32,
    },
    Rollback {
        attempt: u32,
        error: String,
    },
}

/// Migration engine progress.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationEvent {
    LedgerCreated { table: String },
    Applied { version: u32, hash: String },
    AlreadyApplied { version: u32 },
}

pub trait Observer: Send + Sync {
    fn on_query(&self, _event: &QueryEvent<'_>) {}
    fn on_transaction(&self, _event: &TransactionEvent) {}
    fn on_migration(&self, _event: &MigrationEvent) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_query(&self, event: &QueryEvent<'_>) {
        let elapsed_ms = event.elapsed.as_millis() as u64;
        match &event.outcome {
            Ok(rows) => debug!(
                sql = %event.sql,
                params = event.params,
                rows,
                elapsed_ms,
                "Query executed"
            ),
            Err(error) => debug!(
                sql = %event.sql,
                params = event.params,
                elapsed_ms,
                error = %error,
                "Query failed"
            ),
        }
    }

    fn on_transaction(&self, event: &TransactionEvent) {
        match event {
            TransactionEvent::Begin { attempt, isolation } => {
                debug!(attempt, isolation = %isolation, "Transaction started")
            }
            TransactionEvent::Commit { attempt } => debug!(attempt, "Transaction committed"),
            TransactionEvent::Rollback { attempt, error } => {
                warn!(attempt, error = %error, "Transaction rolled back")
            }
        }
    }

    fn on_migration(&self, event: &MigrationEvent) {
        match event {
            MigrationEvent::LedgerCreated { table } => info!(table = %table, "Ledger ensured"),
            MigrationEvent::Applied { version, hash } => {
                info!(version, hash = %hash, "Migration applied")
            }
            MigrationEvent::AlreadyApplied { version } => {
                debug!(version, "Migration already applied")
            }
        }
    }
}
