//! Transaction manager behaviour against the in-memory gateway.
//!
//! Covers the BEGIN/COMMIT/ROLLBACK bracket, retry on serialization failure
//! and deadlock, connection release and nested transactions.

mod common;

use common::{MemoryGateway, RecordingObserver};
use futures_util::FutureExt;
use pgmap::db::{Executor, TransactionEvent, TransactionState};
use pgmap::mapping::ColumnMap;
use pgmap::query::{self, Query};
use pgmap::{Database, DbError, ErrorKind, Filter, IsolationLevel, RetryPolicy};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn setup(retries: u32) -> (MemoryGateway, Database<MemoryGateway>) {
    let gateway = MemoryGateway::new();
    let db = Database::new(gateway.clone())
        .with_retry_policy(RetryPolicy::new(retries, Duration::ZERO));
    (gateway, db)
}

// ============================================================================
// Commit and rollback
// ============================================================================

#[tokio::test]
async fn test_commit_on_success() {
    let (gateway, db) = setup(3);

    let value = db
        .transaction(|tx| {
            async move {
                assert_eq!(tx.state(), TransactionState::Begun);
                tx.execute(&Query::raw("UPDATE accounts SET balance = 0"))
                    .await?;
                Ok(42)
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(
        gateway.log(),
        vec![
            "BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            "UPDATE accounts SET balance = 0",
            "COMMIT",
        ]
    );
    assert_eq!(gateway.connects(), 1);
    assert_eq!(gateway.releases(), 1);
}

#[tokio::test]
async fn test_rollback_on_error() {
    let (gateway, db) = setup(3);

    let err = db
        .transaction::<(), _>(|tx| {
            async move {
                tx.execute(&Query::raw("DELETE FROM accounts")).await?;
                Err(DbError::invalid_input("balance would go negative"))
            }
            .boxed()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::InvalidInput { .. }));
    assert_eq!(gateway.count("ROLLBACK"), 1);
    assert_eq!(gateway.count("COMMIT"), 0);
    assert_eq!(gateway.releases(), 1);
}

#[tokio::test]
async fn test_custom_isolation_level() {
    let (gateway, db) = setup(0);
    let db = db.with_isolation(IsolationLevel::RepeatableRead);

    db.transaction(|_tx| async { Ok(()) }.boxed()).await.unwrap();
    db.transaction_with(IsolationLevel::ReadCommitted, |_tx| async { Ok(()) }.boxed())
        .await
        .unwrap();

    let log = gateway.log();
    assert_eq!(log[0], "BEGIN TRANSACTION ISOLATION LEVEL REPEATABLE READ");
    assert_eq!(log[2], "BEGIN TRANSACTION ISOLATION LEVEL READ COMMITTED");
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_serialization_failure_retried_until_exhausted() {
    let (gateway, db) = setup(3);
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&attempts);
    let err = db
        .transaction::<(), _>(move |_tx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::serialization_failure("could not serialize access")) }.boxed()
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SerializationFailure);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(gateway.count("BEGIN"), 4);
    assert_eq!(gateway.count("ROLLBACK"), 4);
    assert_eq!(gateway.count("COMMIT"), 0);
    assert_eq!(gateway.connects(), 4);
    assert_eq!(gateway.releases(), 4);
}

#[tokio::test]
async fn test_default_policy_allows_ten_retries() {
    let gateway = MemoryGateway::new();
    let db = Database::new(gateway.clone());
    assert_eq!(db.retry_policy().max_attempts(), 11);

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let result = db
        .transaction::<(), _>(move |_tx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::deadlock_detected("deadlock detected")) }.boxed()
        })
        .await;

    assert!(matches!(result, Err(DbError::DeadlockDetected { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 11);
}

#[tokio::test]
async fn test_deadlock_from_driver_then_success() {
    let (gateway, db) = setup(5);
    gateway.fail_on("UPDATE inventory", 2, || {
        DbError::deadlock_detected("deadlock detected")
    });

    let attempt = db
        .transaction(|tx| {
            async move {
                tx.execute(&Query::raw("UPDATE inventory SET qty = qty - 1"))
                    .await?;
                Ok(tx.attempt())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(attempt, 2);
    assert_eq!(gateway.count("BEGIN"), 3);
    assert_eq!(gateway.count("ROLLBACK"), 2);
    assert_eq!(gateway.count("COMMIT"), 1);
    assert_eq!(gateway.connects(), gateway.releases());
}

#[tokio::test]
async fn test_commit_failure_is_retried() {
    let (gateway, db) = setup(2);
    gateway.fail_on("COMMIT", 1, || {
        DbError::serialization_failure("could not serialize access")
    });

    let value = db
        .transaction(|tx| async move { Ok(tx.attempt() + 100) }.boxed())
        .await
        .unwrap();

    assert_eq!(value, 101);
    assert_eq!(
        gateway.log(),
        vec![
            "BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            "COMMIT",
            "ROLLBACK",
            "BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn test_duplicate_key_is_not_retried() {
    let (gateway, db) = setup(10);
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&attempts);
    let err = db
        .transaction::<(), _>(move |_tx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(pgmap::db::classify(
                    pgmap::db::DriverError::new("23505", "duplicate key value")
                        .with_constraint("UQ:users:email"),
                ))
            }
            .boxed()
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DuplicateKey);
    assert_eq!(err.constraint().unwrap().column.as_deref(), Some("email"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.count("BEGIN"), 1);
}

#[tokio::test]
async fn test_begin_failure_releases_connection() {
    let (gateway, db) = setup(1);
    gateway.fail_always("BEGIN", || {
        DbError::connection("server closed the connection", "Reconnect to the database")
    });

    let err = db
        .transaction(|_tx| async { Ok(()) }.boxed())
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Connection { .. }));
    assert_eq!(gateway.connects(), 1);
    assert_eq!(gateway.releases(), 1);
}

// ============================================================================
// Nesting
// ============================================================================

#[tokio::test]
async fn test_nested_transaction_shares_outer() {
    let (gateway, db) = setup(0);

    db.transaction(|tx| {
        async move {
            tx.execute(&Query::raw("INSERT INTO orders DEFAULT VALUES"))
                .await?;
            tx.transaction(|inner| {
                async move {
                    inner
                        .execute(&Query::raw("INSERT INTO audit DEFAULT VALUES"))
                        .await?;
                    Ok(())
                }
                .boxed()
            })
            .await
        }
        .boxed()
    })
    .await
    .unwrap();

    assert_eq!(gateway.count("BEGIN"), 1);
    assert_eq!(gateway.count("COMMIT"), 1);
    assert_eq!(gateway.connects(), 1);
}

#[tokio::test]
async fn test_nested_failure_fails_whole_unit() {
    let (gateway, db) = setup(0);

    let result = db
        .transaction(|tx| {
            async move {
                tx.execute(&Query::raw("INSERT INTO orders DEFAULT VALUES"))
                    .await?;
                tx.transaction::<(), _>(|_inner| {
                    async { Err(DbError::invalid_input("rejected")) }.boxed()
                })
                .await
            }
            .boxed()
        })
        .await;

    assert!(result.is_err());
    assert_eq!(gateway.count("ROLLBACK"), 1);
    assert_eq!(gateway.count("COMMIT"), 0);
}

// ============================================================================
// Observer and typed helpers
// ============================================================================

#[tokio::test]
async fn test_observer_sees_lifecycle() {
    let (gateway, db) = setup(1);
    let observer = Arc::new(RecordingObserver::default());
    let db = db.with_observer(observer.clone());
    gateway.fail_on("SELECT 1", 1, || {
        DbError::serialization_failure("could not serialize access")
    });

    db.transaction(|tx| {
        async move {
            tx.execute(&Query::raw("SELECT 1")).await?;
            Ok(())
        }
        .boxed()
    })
    .await
    .unwrap();

    let events = observer.transactions.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            TransactionEvent::Begin {
                attempt: 0,
                isolation: IsolationLevel::Serializable
            },
            TransactionEvent::Rollback {
                attempt: 0,
                error: "Serialization failure: could not serialize access".to_string(),
            },
            TransactionEvent::Begin {
                attempt: 1,
                isolation: IsolationLevel::Serializable
            },
            TransactionEvent::Commit { attempt: 1 },
        ]
    );
    assert_eq!(observer.queries.lock().unwrap().len(), gateway.log().len());
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Account {
    id: i64,
    owner: String,
}

#[tokio::test]
async fn test_executor_helpers_on_database() {
    let (gateway, mut db) = setup(0);
    let map = ColumnMap::new([("id", "account_id"), ("owner", "owner_name")]).unwrap();

    let by_owner = query::select("accounts", &map, Some(&Filter::new().eq("owner", "ann"))).unwrap();
    let everyone = query::select("accounts", &map, None).unwrap();
    let count = Query::raw("SELECT count(*) AS n FROM accounts");

    gateway.respond(&by_owner.sql, vec![json!({"id": 1, "owner": "ann"})]);
    gateway.respond(
        &everyone.sql,
        vec![json!({"id": 1, "owner": "ann"}), json!({"id": 2, "owner": "bob"})],
    );
    gateway.respond(&count.sql, vec![json!({"n": 2, "ignored": true})]);

    let ann: Account = db.one(&by_owner).await.unwrap();
    assert_eq!(ann, Account { id: 1, owner: "ann".to_string() });

    let all: Vec<Account> = db.many(&everyone).await.unwrap();
    assert_eq!(all.len(), 2);

    let err = db.one::<Account>(&everyone).await.unwrap_err();
    assert!(matches!(err, DbError::MoreThanOne { count: 2 }));

    let n: i64 = db.scalar_value(&count).await.unwrap();
    assert_eq!(n, 2);

    let missing = Query::raw("SELECT * FROM accounts WHERE false");
    assert!(db.one_or_none::<Account>(&missing).await.unwrap().is_none());
    assert_eq!(db.one::<Account>(&missing).await.unwrap_err().kind(), ErrorKind::NotFound);

    assert_eq!(gateway.connects(), gateway.releases());
}
