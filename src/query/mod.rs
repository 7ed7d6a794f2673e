//! SQL generation and result shaping.
//!
//! The builders are pure: they take a table name, a [`ColumnMap`] and a
//! record, and return a [`Query`] whose `values[i]` binds `$i+1`. Nothing here
//! touches a connection.

use crate::db::types::Row;
use crate::error::{DbError, DbResult};
use crate::mapping::{ColumnMap, IndexPolicy};
use crate::models::{Filter, Record, SqlValue};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// SQL text plus the ordered values for its placeholders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

impl Query {
    pub fn new(sql: impl Into<String>, values: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }

    /// A statement without placeholders.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    /// Append a trailing clause such as `ORDER BY` or `LIMIT`.
    pub fn with_suffix(mut self, clause: &str) -> Self {
        self.sql.push(' ');
        self.sql.push_str(clause);
        self
    }
}

/// Turn index-aligned slots into bindable values; empty slots bind NULL.
fn bind_slots(slots: Vec<Option<SqlValue>>) -> Vec<SqlValue> {
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or(SqlValue::Null))
        .collect()
}

/// RETURNING always names bare columns; a qualifier need not match the target table.
fn returning_clause(map: &ColumnMap, returning: bool) -> String {
    if returning && !map.is_empty() {
        format!(" RETURNING {}", map.unqualified().aliased_columns())
    } else {
        String::new()
    }
}

/// `SELECT <aliased columns> FROM <table> [WHERE ...]`.
///
/// The filter's fields are picked out of `map` (renumbered, since the WHERE
/// clause is the only user of placeholders). A missing or empty filter selects
/// the whole table.
pub fn select(table: &str, map: &ColumnMap, filter: Option<&Filter>) -> DbResult<Query> {
    let base = format!("SELECT {} FROM {}", map.aliased_columns(), table);

    match filter.filter(|f| !f.is_empty()) {
        None => Ok(Query::raw(base)),
        Some(filter) => {
            let where_map = map.pick(&filter.fields(), IndexPolicy::Renumber)?;
            Ok(Query::new(
                format!("{} WHERE {}", base, where_map.conditions()),
                bind_slots(where_map.values(filter)),
            ))
        }
    }
}

/// `INSERT INTO <table> (<columns>) VALUES (<placeholders>) [RETURNING ...]`.
///
/// An empty mapping inserts a row of defaults.
pub fn insert<R: Record + ?Sized>(
    table: &str,
    map: &ColumnMap,
    value: &R,
    returning: bool,
) -> Query {
    if map.is_empty() {
        return Query::raw(format!("INSERT INTO {} DEFAULT VALUES", table));
    }
    let target = map.unqualified();
    Query::new(
        format!(
            "INSERT INTO {} ({}) VALUES ({}){}",
            table,
            target.columns(),
            target.placeholders(),
            returning_clause(map, returning)
        ),
        bind_slots(target.values(value)),
    )
}

/// `UPDATE <table> SET ... WHERE ... [RETURNING ...]`.
///
/// `update_fields` defaults to every field not in `key_fields`. Both clauses
/// are picked with preserved indices out of one shared mapping, so a single
/// values list serves both.
pub fn update<R: Record + ?Sized>(
    table: &str,
    map: &ColumnMap,
    value: &R,
    key_fields: &[&str],
    update_fields: Option<&[&str]>,
    returning: bool,
) -> DbResult<Query> {
    if key_fields.is_empty() {
        return Err(DbError::invalid_input(format!(
            "UPDATE on {table} needs at least one key field"
        )));
    }

    // Restrict to the referenced fields first so the parameter list stays dense.
    let target = map.unqualified();
    let shared = match update_fields {
        None => target,
        Some(update_fields) => {
            let referenced: Vec<&str> = target
                .fields()
                .into_iter()
                .filter(|f| key_fields.contains(f) || update_fields.contains(f))
                .collect();
            for field in key_fields.iter().chain(update_fields) {
                if !target.contains(field) {
                    return Err(DbError::invalid_input(format!(
                        "Unknown field '{field}' in column mapping"
                    )));
                }
            }
            target.pick(&referenced, IndexPolicy::Renumber)?
        }
    };

    let key_map = shared.pick(key_fields, IndexPolicy::Preserve)?;
    let update_map = match update_fields {
        Some(fields) => shared.pick(fields, IndexPolicy::Preserve)?,
        None => shared.omit(key_fields, IndexPolicy::Preserve)?,
    };
    if update_map.is_empty() {
        return Err(DbError::invalid_input(format!(
            "UPDATE on {table} has nothing to SET"
        )));
    }

    Ok(Query::new(
        format!(
            "UPDATE {} SET {} WHERE {}{}",
            table,
            update_map.assignments(),
            key_map.conditions(),
            returning_clause(map, returning)
        ),
        bind_slots(shared.values(value)),
    ))
}

/// `INSERT ... ON CONFLICT (<key column>) DO UPDATE SET ... [RETURNING ...]`.
///
/// `update_fields` defaults to every field except `key_field`.
pub fn upsert<R: Record + ?Sized>(
    table: &str,
    map: &ColumnMap,
    value: &R,
    key_field: &str,
    update_fields: Option<&[&str]>,
    returning: bool,
) -> DbResult<Query> {
    let target = map.unqualified();
    let key_column = target.column(key_field).ok_or_else(|| {
        DbError::invalid_input(format!("Unknown key field '{key_field}' in column mapping"))
    })?;
    let update_map = match update_fields {
        Some(fields) => target.pick(fields, IndexPolicy::Preserve)?,
        None => target.omit(&[key_field], IndexPolicy::Preserve)?,
    };
    if update_map.is_empty() {
        return Err(DbError::invalid_input(format!(
            "UPSERT on {table} has nothing to SET"
        )));
    }

    Ok(Query::new(
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}{}",
            table,
            target.columns(),
            target.placeholders(),
            key_column,
            update_map.assignments(),
            returning_clause(map, returning)
        ),
        bind_slots(target.values(value)),
    ))
}

/// Outcome of a query that expects at most one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Found(T),
    NotFound,
    /// More than one row; carries the row count
    Multiple(usize),
}

impl<T> Fetched<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        match self {
            Self::Found(v) => Fetched::Found(f(v)),
            Self::NotFound => Fetched::NotFound,
            Self::Multiple(n) => Fetched::Multiple(n),
        }
    }

    /// Exactly one row, else `NotFound`/`MoreThanOne`.
    pub fn into_one(self) -> DbResult<T> {
        match self {
            Self::Found(v) => Ok(v),
            Self::NotFound => Err(DbError::NotFound),
            Self::Multiple(count) => Err(DbError::MoreThanOne { count }),
        }
    }

    /// Zero or one row, else `MoreThanOne`.
    pub fn into_optional(self) -> DbResult<Option<T>> {
        match self {
            Self::Found(v) => Ok(Some(v)),
            Self::NotFound => Ok(None),
            Self::Multiple(count) => Err(DbError::MoreThanOne { count }),
        }
    }
}

/// Classify a result set by cardinality.
pub fn fetch(mut rows: Vec<Row>) -> Fetched<Row> {
    match rows.len() {
        0 => Fetched::NotFound,
        1 => rows.pop().map(Fetched::Found).unwrap_or(Fetched::NotFound),
        n => Fetched::Multiple(n),
    }
}

pub fn single(rows: Vec<Row>) -> DbResult<Row> {
    fetch(rows).into_one()
}

pub fn single_or_none(rows: Vec<Row>) -> DbResult<Option<Row>> {
    fetch(rows).into_optional()
}

/// The lone value of the lone row.
///
/// A row with several columns yields its first column in select order.
pub fn scalar(rows: Vec<Row>) -> DbResult<JsonValue> {
    single(rows).map(Row::into_first)
}

pub fn scalar_or_none(rows: Vec<Row>) -> DbResult<Option<JsonValue>> {
    Ok(single_or_none(rows)?.map(Row::into_first))
}
