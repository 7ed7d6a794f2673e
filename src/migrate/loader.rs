//! Load migrations from a directory of `<version>_<name>.sql` files.
//!
//! Each file becomes one migration with a single statement: the file body,
//! byte for byte, so its hash only changes when the file does. Files run over
//! the simple protocol and may therefore hold several `;`-separated
//! statements.

use crate::error::{DbError, DbResult};
use crate::migrate::{Migration, validate_versions};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Split `0003_add_index.sql` into `(3, "add_index")`.
///
/// Returns `None` for anything that is not a `.sql` file with a numeric
/// version prefix.
pub fn parse_file_name(file_name: &str) -> Option<(u32, &str)> {
    let stem = file_name.strip_suffix(".sql")?;
    let (version, name) = match stem.split_once('_') {
        Some((version, name)) => (version, name),
        None => (stem, ""),
    };
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((version.parse().ok()?, name))
}

/// Read every migration file in `dir`, ordered by version.
///
/// Non-`.sql` entries are ignored. A `.sql` file without a version prefix,
/// a duplicated version or a gap in the sequence is an error.
pub fn load_dir(dir: &Path) -> DbResult<Vec<Migration>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        DbError::invalid_input(format!(
            "Cannot read migrations directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let mut migrations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DbError::internal(e.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.ends_with(".sql") {
            continue;
        }

        let (version, name) = parse_file_name(file_name).ok_or_else(|| {
            DbError::invalid_input(format!(
                "Migration file '{}' must be named <version>_<name>.sql",
                file_name
            ))
        })?;

        let body = fs::read_to_string(&path).map_err(|e| {
            DbError::invalid_input(format!("Cannot read {}: {}", path.display(), e))
        })?;

        debug!(version, migration = name, "Loaded migration file");
        migrations.push(Migration::new(version, [body]));
    }

    migrations.sort_by_key(|m| m.version);
    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(DbError::version_mismatch(format!(
            "version {} is defined more than once",
            pair[0].version
        )));
    }
    validate_versions(&migrations)?;
    Ok(migrations)
}
