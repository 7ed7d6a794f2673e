//! Driver error classification.
//!
//! Turns SQLSTATE codes into the [`DbError`] taxonomy. Duplicate-key and
//! invalid-reference errors also get table/column context, recovered from the
//! constraint naming convention `KIND:table:column[:targetTable]` produced by
//! [`crate::ddl`].

use crate::error::{ConstraintContext, DbError};
use sqlx::error::DatabaseError;
use sqlx::postgres::PgDatabaseError;

/// unique_violation
pub const UNIQUE_VIOLATION: &str = "23505";
/// foreign_key_violation
pub const FOREIGN_KEY_VIOLATION: &str = "23503";
/// serialization_failure
pub const SERIALIZATION_FAILURE: &str = "40001";
/// deadlock_detected
pub const DEADLOCK_DETECTED: &str = "40P01";

/// Driver-neutral view of an engine error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverError {
    pub code: Option<String>,
    pub message: String,
    pub constraint: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
}

impl DriverError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Extract the fields we care about from a sqlx database error.
    pub fn from_database_error(err: &dyn DatabaseError) -> Self {
        let column = err
            .try_downcast_ref::<PgDatabaseError>()
            .and_then(|pg| pg.column())
            .map(str::to_string);

        Self {
            code: err.code().map(|c| c.to_string()),
            message: err.message().to_string(),
            constraint: err.constraint().map(str::to_string),
            table: err.table().map(str::to_string),
            column,
        }
    }
}

/// Constraint kinds of the naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Index,
}

impl ConstraintKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::PrimaryKey => "PK",
            Self::Unique => "UQ",
            Self::ForeignKey => "FK",
            Self::Index => "IX",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "PK" => Some(Self::PrimaryKey),
            "UQ" => Some(Self::Unique),
            "FK" => Some(Self::ForeignKey),
            "IX" => Some(Self::Index),
            _ => None,
        }
    }
}

/// A constraint name split according to the naming convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintName {
    pub kind: ConstraintKind,
    pub table: String,
    /// Covered columns; a single entry except for indexes
    pub columns: Vec<String>,
    pub referenced_table: Option<String>,
}

/// Parse `KIND:table:column[:targetTable]`.
///
/// Returns `None` for names that do not follow the convention, e.g. names
/// generated by the engine itself.
pub fn parse_constraint_name(name: &str) -> Option<ConstraintName> {
    let mut parts = name.split(':');
    let kind = ConstraintKind::from_prefix(parts.next()?)?;
    let table = parts.next().filter(|t| !t.is_empty())?.to_string();
    let rest: Vec<String> = parts.map(str::to_string).collect();
    if rest.is_empty() || rest.iter().any(String::is_empty) {
        return None;
    }

    match kind {
        ConstraintKind::ForeignKey => {
            if rest.len() != 2 {
                return None;
            }
            Some(ConstraintName {
                kind,
                table,
                columns: vec![rest[0].clone()],
                referenced_table: Some(rest[1].clone()),
            })
        }
        ConstraintKind::PrimaryKey | ConstraintKind::Unique => {
            if rest.len() != 1 {
                return None;
            }
            Some(ConstraintName {
                kind,
                table,
                columns: rest,
                referenced_table: None,
            })
        }
        ConstraintKind::Index => Some(ConstraintName {
            kind,
            table,
            columns: rest,
            referenced_table: None,
        }),
    }
}

fn constraint_context(err: &DriverError) -> ConstraintContext {
    let parsed = err.constraint.as_deref().and_then(parse_constraint_name);
    let (table, column, referenced_table) = match parsed {
        Some(name) => (
            Some(name.table),
            name.columns.into_iter().next(),
            name.referenced_table,
        ),
        None => (None, None, None),
    };

    ConstraintContext {
        constraint: err.constraint.clone(),
        table: table.or_else(|| err.table.clone()),
        column: column.or_else(|| err.column.clone()),
        referenced_table,
    }
}

/// Map a driver error onto the taxonomy.
///
/// Unrecognized codes come back as [`DbError::Database`] carrying the raw
/// SQLSTATE untouched.
pub fn classify(err: DriverError) -> DbError {
    match err.code.as_deref() {
        Some(UNIQUE_VIOLATION) => DbError::DuplicateKey {
            context: constraint_context(&err),
            message: err.message,
        },
        Some(FOREIGN_KEY_VIOLATION) => DbError::InvalidReference {
            context: constraint_context(&err),
            message: err.message,
        },
        Some(SERIALIZATION_FAILURE) => DbError::serialization_failure(err.message),
        Some(DEADLOCK_DETECTED) => DbError::deadlock_detected(err.message),
        _ => DbError::database(err.message, err.code),
    }
}
