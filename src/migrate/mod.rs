//! Versioned schema migrations with hash verification.
//!
//! A migration list is a contiguous sequence of versions `1..=N`. Each applied
//! migration is recorded in a per-namespace ledger together with the SHA-256
//! of its statements; if a definition later changes, the mismatch is reported
//! as a fatal [`DbError::MigrationHashMismatch`] and nothing is reapplied.
//!
//! ```ignore
//! let migrator = Migrator::new(db, "app", loader::load_dir("migrations".as_ref())?)?;
//! match migrator.init(true).await? {
//!     MigrationState::UpToDate => {}
//!     state => unreachable!("auto-apply leaves the ledger up to date, got {state:?}"),
//! }
//! ```

pub mod ledger;
pub mod loader;

use crate::db::database::Database;
use crate::db::executor::Executor;
use crate::db::gateway::Gateway;
use crate::db::observer::MigrationEvent;
use crate::ddl::MAX_IDENTIFIER_LEN;
use crate::error::{DbError, DbResult};
use crate::query::Query;
use chrono::NaiveDateTime;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub use ledger::Ledger;

/// One schema version: statements executed in order inside one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    pub version: u32,
    pub statements: Vec<String>,
}

impl Migration {
    pub fn new<I, S>(version: u32, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version,
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }

    /// Hex SHA-256 of the statements concatenated in order.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for statement in &self.statements {
            hasher.update(statement.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// A ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub hash: String,
    #[serde(default)]
    pub applied_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// No ledger table exists
    Empty,
    /// The ledger exists but some migrations are not applied
    NeedsUpgrade,
    UpToDate,
}

/// Check that versions run `1..=N` in order.
pub fn validate_versions(migrations: &[Migration]) -> DbResult<()> {
    for (pos, migration) in migrations.iter().enumerate() {
        let expected = pos as u32 + 1;
        if migration.version != expected {
            return Err(DbError::version_mismatch(format!(
                "migration at position {} has version {}, expected {}",
                pos, migration.version, expected
            )));
        }
    }
    Ok(())
}

/// Check that applied records are a prefix of the definitions with equal hashes.
pub fn verify_applied(migrations: &[Migration], applied: &[AppliedMigration]) -> DbResult<()> {
    if applied.len() > migrations.len() {
        return Err(DbError::version_mismatch(format!(
            "ledger records {} migrations but only {} are defined",
            applied.len(),
            migrations.len()
        )));
    }

    for (pos, (record, migration)) in applied.iter().zip(migrations).enumerate() {
        let expected = pos as u32 + 1;
        if record.version != expected {
            return Err(DbError::version_mismatch(format!(
                "ledger has version {} where {} was expected",
                record.version, expected
            )));
        }
        let computed = migration.hash();
        if record.hash != computed {
            return Err(DbError::hash_mismatch(
                record.version,
                record.hash.clone(),
                computed,
            ));
        }
    }
    Ok(())
}

/// Namespaces end up inside an unquoted table name.
pub fn validate_namespace(namespace: &str) -> DbResult<()> {
    if namespace.is_empty() {
        return Err(DbError::invalid_input("Migration namespace cannot be empty"));
    }
    if !namespace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(DbError::invalid_input(format!(
            "Migration namespace '{}' may only contain ASCII letters, digits and '_'",
            namespace
        )));
    }
    // ___<namespace>_migrations
    if namespace.len() + 14 > MAX_IDENTIFIER_LEN {
        return Err(DbError::invalid_input(format!(
            "Migration namespace '{}' is too long",
            namespace
        )));
    }
    Ok(())
}

/// Applies a static migration list to one database.
pub struct Migrator<G: Gateway> {
    db: Database<G>,
    ledger: Ledger,
    migrations: Vec<Migration>,
}

impl<G: Gateway> fmt::Debug for Migrator<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("ledger", &self.ledger.table())
            .field("latest_version", &self.latest_version())
            .finish_non_exhaustive()
    }
}

impl<G: Gateway> Migrator<G> {
    pub fn new(db: Database<G>, namespace: &str, migrations: Vec<Migration>) -> DbResult<Self> {
        validate_namespace(namespace)?;
        validate_versions(&migrations)?;
        Ok(Self {
            db,
            ledger: Ledger::new(namespace)?,
            migrations,
        })
    }

    pub fn ledger_table(&self) -> &str {
        self.ledger.table()
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Highest defined version, `0` for an empty list.
    pub fn latest_version(&self) -> u32 {
        self.migrations.len() as u32
    }

    /// Probe the ledger and optionally bring the schema up to date.
    ///
    /// Without `auto_apply` and without a ledger this is read-only and returns
    /// [`MigrationState::Empty`]. Otherwise the ledger is created if needed and
    /// verified against the definitions before anything else happens.
    pub async fn init(&self, auto_apply: bool) -> DbResult<MigrationState> {
        if !self.ledger_exists().await? {
            if !auto_apply {
                return Ok(MigrationState::Empty);
            }
            self.create_ledger().await?;
        }

        let applied = self.verified_count().await?;

        if auto_apply {
            self.apply_from(applied).await?;
            return Ok(MigrationState::UpToDate);
        }

        if applied < self.migrations.len() {
            Ok(MigrationState::NeedsUpgrade)
        } else {
            Ok(MigrationState::UpToDate)
        }
    }

    /// Apply every outstanding migration; returns how many were applied.
    pub async fn update_to_latest(&self) -> DbResult<usize> {
        self.ensure_ledger().await?;
        let applied = self.verified_count().await?;
        self.apply_from(applied).await
    }

    /// Apply one migration in its own transaction.
    ///
    /// Returns `false` when the ledger already records it with a matching
    /// hash, which is re-checked inside the transaction.
    pub async fn apply_migration(&self, migration: &Migration) -> DbResult<bool> {
        let ledger = self.ledger.clone();
        let definition = migration.clone();

        let applied = self
            .db
            .transaction(move |tx| {
                let ledger = ledger.clone();
                let migration = definition.clone();
                async move {
                    if ledger.check(tx, &migration).await? {
                        return Ok(false);
                    }
                    for statement in &migration.statements {
                        tx.execute(&Query::raw(statement.as_str())).await?;
                    }
                    tx.execute(&ledger.insert_query(&migration)?).await?;
                    Ok(true)
                }
                .boxed()
            })
            .await?;

        let event = if applied {
            MigrationEvent::Applied {
                version: migration.version,
                hash: migration.hash(),
            }
        } else {
            MigrationEvent::AlreadyApplied {
                version: migration.version,
            }
        };
        self.db.observer().on_migration(&event);

        Ok(applied)
    }

    /// `false` if not applied, `true` if applied with a matching hash.
    pub async fn check_migration(&self, migration: &Migration) -> DbResult<bool> {
        let mut db = self.db.clone();
        self.ledger.check(&mut db, migration).await
    }

    /// Ledger rows in version order.
    pub async fn applied(&self) -> DbResult<Vec<AppliedMigration>> {
        let mut db = self.db.clone();
        db.many(&self.ledger.list_query()?).await
    }

    pub async fn ledger_exists(&self) -> DbResult<bool> {
        let mut db = self.db.clone();
        db.scalar_value(&self.ledger.exists_query()).await
    }

    /// Create the ledger unless it exists; returns whether it was created.
    pub async fn ensure_ledger(&self) -> DbResult<bool> {
        if self.ledger_exists().await? {
            return Ok(false);
        }
        self.create_ledger().await?;
        Ok(true)
    }

    async fn create_ledger(&self) -> DbResult<()> {
        self.db.execute(&self.ledger.create_query()).await?;
        self.db.observer().on_migration(&MigrationEvent::LedgerCreated {
            table: self.ledger.table().to_string(),
        });
        Ok(())
    }

    async fn verified_count(&self) -> DbResult<usize> {
        let applied = self.applied().await?;
        verify_applied(&self.migrations, &applied)?;
        Ok(applied.len())
    }

    async fn apply_from(&self, applied: usize) -> DbResult<usize> {
        let mut count = 0;
        for migration in &self.migrations[applied..] {
            if self.apply_migration(migration).await? {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(version: u32, migration: &Migration) -> AppliedMigration {
        AppliedMigration {
            version,
            hash: migration.hash(),
            applied_at: None,
        }
    }

    #[test]
    fn test_hash_is_stable_and_order_sensitive() {
        let both = Migration::new(1, ["CREATE TABLE a (id int)", "CREATE TABLE b (id int)"]);
        let again = Migration::new(1, ["CREATE TABLE a (id int)", "CREATE TABLE b (id int)"]);
        let first = Migration::new(1, ["CREATE TABLE a (id int)"]);
        let swapped = Migration::new(1, ["CREATE TABLE b (id int)", "CREATE TABLE a (id int)"]);

        assert_eq!(both.hash(), again.hash());
        assert_ne!(both.hash(), first.hash());
        assert_ne!(both.hash(), swapped.hash());
        assert_eq!(both.hash().len(), 64);
    }

    #[test]
    fn test_hash_of_empty_migration() {
        assert_eq!(
            Migration::new(1, Vec::<String>::new()).hash(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_validate_versions() {
        let ok = vec![Migration::new(1, ["a"]), Migration::new(2, ["b"])];
        assert!(validate_versions(&ok).is_ok());
        assert!(validate_versions(&[]).is_ok());

        let gap = vec![Migration::new(1, ["a"]), Migration::new(3, ["b"])];
        let err = validate_versions(&gap).unwrap_err();
        assert!(err.is_integrity_violation());

        let zero_based = vec![Migration::new(0, ["a"])];
        assert!(validate_versions(&zero_based).is_err());
    }

    #[test]
    fn test_verify_applied_prefix() {
        let defs = vec![Migration::new(1, ["a"]), Migration::new(2, ["b"])];
        assert!(verify_applied(&defs, &[]).is_ok());
        assert!(verify_applied(&defs, &[applied(1, &defs[0])]).is_ok());
    }

    #[test]
    fn test_verify_applied_detects_gap() {
        let defs = vec![Migration::new(1, ["a"]), Migration::new(2, ["b"])];
        let err = verify_applied(&defs, &[applied(2, &defs[1])]).unwrap_err();
        assert!(matches!(err, DbError::MigrationVersionMismatch { .. }));
    }

    #[test]
    fn test_verify_applied_detects_extra_records() {
        let defs = vec![Migration::new(1, ["a"])];
        let records = vec![applied(1, &defs[0]), applied(2, &defs[0])];
        assert!(matches!(
            verify_applied(&defs, &records),
            Err(DbError::MigrationVersionMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_applied_detects_changed_definition() {
        let original = Migration::new(1, ["CREATE TABLE a (id int)"]);
        let edited = vec![Migration::new(1, ["CREATE TABLE a (id bigint)"])];
        match verify_applied(&edited, &[applied(1, &original)]) {
            Err(DbError::MigrationHashMismatch {
                version,
                recorded,
                computed,
            }) => {
                assert_eq!(version, 1);
                assert_eq!(recorded, original.hash());
                assert_eq!(computed, edited[0].hash());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_validate_namespace() {
        assert!(validate_namespace("app").is_ok());
        assert!(validate_namespace("billing_v2").is_ok());
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("app; DROP TABLE x").is_err());
        assert!(validate_namespace("a-b").is_err());
        assert!(validate_namespace(&"n".repeat(50)).is_err());
    }

    #[test]
    fn test_applied_migration_decodes_ledger_row() {
        let row = serde_json::json!({
            "version": 1,
            "hash": "abc",
            "applied_at": "2024-05-01T12:30:00.123"
        });
        let record: AppliedMigration = serde_json::from_value(row).unwrap();
        assert_eq!(record.version, 1);
        assert!(record.applied_at.is_some());
    }
}
