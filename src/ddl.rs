//! DDL fragments that follow the constraint naming convention.
//!
//! Constraint and index names are rendered as `KIND:table:column[:target]`,
//! which [`crate::db::classify`] parses back when a violation is reported.
//! Use these helpers in migrations so both sides agree.

use crate::db::classify::ConstraintKind;
use crate::error::{DbError, DbResult};

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Build a convention name, e.g. `FK:posts:author_id:users`.
///
/// Fails if a part is empty or contains `:`, or if the result would be
/// truncated by the server and become unparseable.
pub fn constraint_name(
    kind: ConstraintKind,
    table: &str,
    columns: &[&str],
    referenced_table: Option<&str>,
) -> DbResult<String> {
    let arity_ok = match kind {
        ConstraintKind::PrimaryKey | ConstraintKind::Unique => {
            columns.len() == 1 && referenced_table.is_none()
        }
        ConstraintKind::ForeignKey => columns.len() == 1 && referenced_table.is_some(),
        ConstraintKind::Index => !columns.is_empty() && referenced_table.is_none(),
    };
    if !arity_ok {
        return Err(DbError::invalid_input(format!(
            "{} constraint on '{}' has the wrong number of columns or target",
            kind.prefix(),
            table
        )));
    }

    let mut parts = vec![kind.prefix(), table];
    parts.extend_from_slice(columns);
    parts.extend(referenced_table);

    if let Some(bad) = parts.iter().find(|p| p.is_empty() || p.contains(':')) {
        return Err(DbError::invalid_input(format!(
            "Invalid constraint name part '{}'",
            bad
        )));
    }

    let name = parts.join(":");
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(DbError::invalid_input(format!(
            "Constraint name '{}' exceeds {} bytes",
            name, MAX_IDENTIFIER_LEN
        )));
    }
    Ok(name)
}

/// `CONSTRAINT "PK:t:c" PRIMARY KEY (c)`, for use inside CREATE TABLE.
pub fn primary_key(table: &str, column: &str) -> DbResult<String> {
    let name = constraint_name(ConstraintKind::PrimaryKey, table, &[column], None)?;
    Ok(format!(
        "CONSTRAINT {} PRIMARY KEY ({})",
        quote_ident(&name),
        quote_ident(column)
    ))
}

/// `CONSTRAINT "UQ:t:c" UNIQUE (c)`.
pub fn unique(table: &str, column: &str) -> DbResult<String> {
    let name = constraint_name(ConstraintKind::Unique, table, &[column], None)?;
    Ok(format!(
        "CONSTRAINT {} UNIQUE ({})",
        quote_ident(&name),
        quote_ident(column)
    ))
}

/// `CONSTRAINT "FK:t:c:target" FOREIGN KEY (c) REFERENCES target (target_column)`.
pub fn foreign_key(
    table: &str,
    column: &str,
    referenced_table: &str,
    referenced_column: &str,
) -> DbResult<String> {
    let name = constraint_name(
        ConstraintKind::ForeignKey,
        table,
        &[column],
        Some(referenced_table),
    )?;
    Ok(format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(&name),
        quote_ident(column),
        quote_ident(referenced_table),
        quote_ident(referenced_column)
    ))
}

/// `ALTER TABLE t ADD <constraint>`.
pub fn add_constraint(table: &str, constraint: &str) -> String {
    format!("ALTER TABLE {} ADD {}", quote_ident(table), constraint)
}

/// `CREATE INDEX "IX:t:c1:c2" ON t (c1, c2)`.
pub fn create_index(table: &str, columns: &[&str]) -> DbResult<String> {
    let name = constraint_name(ConstraintKind::Index, table, columns, None)?;
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    Ok(format!(
        "CREATE INDEX {} ON {} ({})",
        quote_ident(&name),
        quote_ident(table),
        cols.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::classify::parse_constraint_name;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_primary_key_clause() {
        assert_eq!(
            primary_key("users", "id").unwrap(),
            "CONSTRAINT \"PK:users:id\" PRIMARY KEY (\"id\")"
        );
    }

    #[test]
    fn test_foreign_key_clause() {
        assert_eq!(
            foreign_key("posts", "author_id", "users", "id").unwrap(),
            "CONSTRAINT \"FK:posts:author_id:users\" FOREIGN KEY (\"author_id\") REFERENCES \"users\" (\"id\")"
        );
    }

    #[test]
    fn test_create_index_statement() {
        assert_eq!(
            create_index("events", &["kind", "at"]).unwrap(),
            "CREATE INDEX \"IX:events:kind:at\" ON \"events\" (\"kind\", \"at\")"
        );
    }

    #[test]
    fn test_add_constraint() {
        let clause = unique("users", "email").unwrap();
        assert_eq!(
            add_constraint("users", &clause),
            "ALTER TABLE \"users\" ADD CONSTRAINT \"UQ:users:email\" UNIQUE (\"email\")"
        );
    }

    #[test]
    fn test_names_parse_back() {
        for name in [
            constraint_name(ConstraintKind::Unique, "users", &["email"], None).unwrap(),
            constraint_name(ConstraintKind::ForeignKey, "posts", &["author_id"], Some("users"))
                .unwrap(),
            constraint_name(ConstraintKind::Index, "events", &["kind", "at"], None).unwrap(),
        ] {
            assert!(parse_constraint_name(&name).is_some(), "{name}");
        }
    }

    #[test]
    fn test_rejects_invalid_parts() {
        assert!(constraint_name(ConstraintKind::Unique, "", &["c"], None).is_err());
        assert!(constraint_name(ConstraintKind::Unique, "t", &["a:b"], None).is_err());
        assert!(constraint_name(ConstraintKind::ForeignKey, "t", &["c"], None).is_err());
        assert!(constraint_name(ConstraintKind::PrimaryKey, "t", &["a", "b"], None).is_err());
        assert!(create_index("t", &[]).is_err());
    }

    #[test]
    fn test_rejects_names_the_server_would_truncate() {
        let long = "x".repeat(60);
        assert!(unique(&long, "email").is_err());
    }
}
