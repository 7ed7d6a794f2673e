//! The applied-migration ledger table.
//!
//! One table per namespace, `___<namespace>_migrations`, holding the version,
//! the hash it was applied with and when. Rows are only ever inserted.

use crate::db::executor::Executor;
use crate::error::{DbError, DbResult};
use crate::mapping::{ColumnMap, IndexPolicy};
use crate::migrate::{AppliedMigration, Migration};
use crate::models::{Filter, SqlValue};
use crate::query::{self, Query};

const EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
    WHERE table_schema = current_schema() AND table_name = $1) AS \"exists\"";

#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
    map: ColumnMap,
}

impl Ledger {
    /// Ledger for a namespace that has already been validated.
    pub fn new(namespace: &str) -> DbResult<Self> {
        Ok(Self {
            table: format!("___{}_migrations", namespace),
            map: ColumnMap::new([("version", "id"), ("hash", "hash"), ("applied_at", "at")])?,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn exists_query(&self) -> Query {
        Query::new(EXISTS_SQL, vec![SqlValue::Text(self.table.clone())])
    }

    pub fn create_query(&self) -> Query {
        Query::raw(format!(
            "CREATE TABLE IF NOT EXISTS {} (id integer primary key, \
             at timestamp not null default (now() at time zone 'utc'), \
             hash text not null)",
            self.table
        ))
    }

    /// Every applied record, oldest first.
    pub fn list_query(&self) -> DbResult<Query> {
        Ok(query::select(&self.table, &self.map, None)?.with_suffix("ORDER BY id"))
    }

    pub fn lookup_query(&self, version: u32) -> DbResult<Query> {
        query::select(
            &self.table,
            &self.map,
            Some(&Filter::new().eq("version", version)),
        )
    }

    pub fn insert_query(&self, migration: &Migration) -> DbResult<Query> {
        let record = Filter::new()
            .eq("version", migration.version)
            .eq("hash", migration.hash());
        let map = self.map.pick(&["version", "hash"], IndexPolicy::Renumber)?;
        Ok(query::insert(&self.table, &map, &record, false))
    }

    /// Whether `migration` is recorded.
    ///
    /// A recorded hash that differs from the definition's is an integrity
    /// violation and never treated as "not applied".
    pub async fn check<E: Executor>(
        &self,
        executor: &mut E,
        migration: &Migration,
    ) -> DbResult<bool> {
        let recorded: Option<AppliedMigration> = executor
            .one_or_none(&self.lookup_query(migration.version)?)
            .await?;

        match recorded {
            None => Ok(false),
            Some(record) => {
                let computed = migration.hash();
                if record.hash == computed {
                    Ok(true)
                } else {
                    Err(DbError::hash_mismatch(
                        migration.version,
                        record.hash,
                        computed,
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> Ledger {
        Ledger::new("app").unwrap()
    }

    #[test]
    fn test_table_name_from_namespace() {
        assert_eq!(ledger().table(), "___app_migrations");
    }

    #[test]
    fn test_create_query() {
        assert_eq!(
            ledger().create_query().sql,
            "CREATE TABLE IF NOT EXISTS ___app_migrations (id integer primary key, \
             at timestamp not null default (now() at time zone 'utc'), hash text not null)"
        );
    }

    #[test]
    fn test_exists_query_binds_table_name() {
        let query = ledger().exists_query();
        assert!(query.sql.contains("information_schema.tables"));
        assert_eq!(query.values, vec![SqlValue::Text("___app_migrations".into())]);
    }

    #[test]
    fn test_lookup_query() {
        let query = ledger().lookup_query(3).unwrap();
        assert_eq!(
            query.sql,
            "SELECT id AS \"version\", hash AS \"hash\", at AS \"applied_at\" \
             FROM ___app_migrations WHERE id = $1"
        );
        assert_eq!(query.values, vec![SqlValue::Int(3)]);
    }

    #[test]
    fn test_list_query_is_ordered() {
        assert!(ledger().list_query().unwrap().sql.ends_with("ORDER BY id"));
    }

    #[test]
    fn test_insert_query() {
        let migration = Migration::new(2, ["CREATE TABLE t (id int)"]);
        let query = ledger().insert_query(&migration).unwrap();
        assert_eq!(
            query.sql,
            "INSERT INTO ___app_migrations (id, hash) VALUES ($1, $2)"
        );
        assert_eq!(
            query.values,
            vec![SqlValue::Int(2), SqlValue::Text(migration.hash())]
        );
    }
}
