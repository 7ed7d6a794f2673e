//! In-memory gateway for integration tests.
//!
//! Understands just enough SQL to host a migration ledger and a transaction
//! bracket: BEGIN snapshots the ledger, ROLLBACK restores it. Everything else
//! is logged and answered from scripted responses. Faults can be injected by
//! substring match to simulate contention or constraint errors.

#![allow(dead_code)]

use async_trait::async_trait;
use pgmap::db::classify::{DriverError, UNIQUE_VIOLATION, classify};
use pgmap::db::{Connection, Gateway, MigrationEvent, Observer, Row, TransactionEvent};
use pgmap::{DbError, DbResult, SqlValue};
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type Ledger = BTreeMap<u32, String>;

struct Fault {
    pattern: String,
    remaining: Option<usize>,
    make: fn() -> DbError,
}

#[derive(Default)]
struct State {
    log: Vec<String>,
    ddl: Vec<String>,
    connects: usize,
    releases: usize,
    next_conn_id: usize,
    ledger: Option<Ledger>,
    snapshots: HashMap<usize, Option<Ledger>>,
    responses: HashMap<String, Vec<Row>>,
    faults: Vec<Fault>,
}

impl State {
    fn take_fault(&mut self, sql: &str) -> Option<DbError> {
        let fault = self.faults.iter_mut().find(|f| {
            sql.contains(f.pattern.as_str()) && f.remaining.is_none_or(|n| n > 0)
        })?;
        if let Some(n) = fault.remaining.as_mut() {
            *n -= 1;
        }
        Some((fault.make)())
    }

    fn ledger_mut(&mut self) -> DbResult<&mut Ledger> {
        self.ledger.as_mut().ok_or_else(|| {
            DbError::database("relation does not exist", Some("42P01".to_string()))
        })
    }

    fn handle(&mut self, conn_id: usize, sql: &str, values: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.log.push(sql.to_string());
        if let Some(err) = self.take_fault(sql) {
            return Err(err);
        }

        if sql.starts_with("BEGIN") {
            self.snapshots.insert(conn_id, self.ledger.clone());
            return Ok(Vec::new());
        }
        if sql == "COMMIT" {
            self.snapshots.remove(&conn_id);
            return Ok(Vec::new());
        }
        if sql == "ROLLBACK" {
            if let Some(snapshot) = self.snapshots.remove(&conn_id) {
                self.ledger = snapshot;
            }
            return Ok(Vec::new());
        }

        if sql.contains("information_schema.tables") {
            return Ok(vec![row(json!({ "exists": self.ledger.is_some() }))]);
        }
        if sql.starts_with("CREATE TABLE IF NOT EXISTS ___") {
            self.ddl.push(sql.to_string());
            self.ledger.get_or_insert_with(Ledger::new);
            return Ok(Vec::new());
        }
        if sql.starts_with("INSERT INTO ___") {
            let (version, hash) = match values {
                [SqlValue::Int(version), SqlValue::Text(hash)] => (*version as u32, hash.clone()),
                other => panic!("unexpected ledger insert values {other:?}"),
            };
            let ledger = self.ledger_mut()?;
            if ledger.contains_key(&version) {
                return Err(classify(
                    DriverError::new(UNIQUE_VIOLATION, "duplicate key value")
                        .with_table("ledger")
                        .with_column("id"),
                ));
            }
            ledger.insert(version, hash);
            return Ok(Vec::new());
        }
        if sql.starts_with("SELECT") && sql.contains("_migrations") {
            let wanted = match values {
                [SqlValue::Int(version)] => Some(*version as u32),
                _ => None,
            };
            let ledger = self.ledger_mut()?;
            return Ok(ledger
                .iter()
                .filter(|(version, _)| wanted.is_none_or(|w| w == **version))
                .map(|(version, hash)| {
                    row(json!({
                        "version": version,
                        "hash": hash,
                        "applied_at": "2024-01-01T00:00:00",
                    }))
                })
                .collect());
        }

        if let Some(rows) = self.responses.get(sql) {
            return Ok(rows.clone());
        }
        self.ddl.push(sql.to_string());
        Ok(Vec::new())
    }
}

pub fn row(value: JsonValue) -> Row {
    Row::from_json(value).unwrap()
}

/// Shared-state gateway; clones observe the same database.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<State>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Fail the next `times` statements containing `pattern`.
    pub fn fail_on(&self, pattern: &str, times: usize, make: fn() -> DbError) {
        self.state().faults.push(Fault {
            pattern: pattern.to_string(),
            remaining: Some(times),
            make,
        });
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_always(&self, pattern: &str, make: fn() -> DbError) {
        self.state().faults.push(Fault {
            pattern: pattern.to_string(),
            remaining: None,
            make,
        });
    }

    /// Answer `sql` with fixed rows.
    pub fn respond(&self, sql: &str, rows: Vec<JsonValue>) {
        self.state()
            .responses
            .insert(sql.to_string(), rows.into_iter().map(row).collect());
    }

    /// Create the ledger with the given records.
    pub fn seed_ledger(&self, records: &[(u32, String)]) {
        self.state().ledger = Some(records.iter().cloned().collect());
    }

    pub fn ledger_exists(&self) -> bool {
        self.state().ledger.is_some()
    }

    pub fn ledger_versions(&self) -> Vec<u32> {
        self.state()
            .ledger
            .as_ref()
            .map(|l| l.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Statements other than transaction control, ledger access and scripted queries.
    pub fn ddl(&self) -> Vec<String> {
        self.state().ddl.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .log
            .iter()
            .filter(|s| s.starts_with(prefix))
            .count()
    }

    pub fn clear_log(&self) {
        let mut state = self.state();
        state.log.clear();
        state.ddl.clear();
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn releases(&self) -> usize {
        self.state().releases
    }
}

pub struct MemoryConnection {
    id: usize,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, sql: &str, values: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.state.lock().unwrap().handle(self.id, sql, values)
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    type Conn = MemoryConnection;

    async fn connect(&self) -> DbResult<MemoryConnection> {
        let mut state = self.state();
        state.connects += 1;
        state.next_conn_id += 1;
        Ok(MemoryConnection {
            id: state.next_conn_id,
            state: Arc::clone(&self.state),
        })
    }

    async fn release(&self, _conn: MemoryConnection) {
        self.state().releases += 1;
    }
}

/// Observer that keeps every transaction and migration event.
#[derive(Default)]
pub struct RecordingObserver {
    pub transactions: Mutex<Vec<TransactionEvent>>,
    pub migrations: Mutex<Vec<MigrationEvent>>,
    pub queries: Mutex<Vec<String>>,
}

impl Observer for RecordingObserver {
    fn on_query(&self, event: &pgmap::db::QueryEvent<'_>) {
        self.queries.lock().unwrap().push(event.sql.to_string());
    }

    fn on_transaction(&self, event: &TransactionEvent) {
        self.transactions.lock().unwrap().push(event.clone());
    }

    fn on_migration(&self, event: &MigrationEvent) {
        self.migrations.lock().unwrap().push(event.clone());
    }
}
