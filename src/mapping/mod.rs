//! Field-to-column mappings with placeholder indices.
//!
//! A [`ColumnMap`] is the ordered association `field <-> column <-> $index`
//! for one model type. Every SQL fragment the query builder emits is rendered
//! from one of these, and [`ColumnMap::values`] lines a record's values up with
//! the placeholders those fragments reference.
//!
//! # Index policies
//!
//! Sub-mappings produced by [`ColumnMap::pick`] and [`ColumnMap::omit`] either
//! renumber their indices to `1..=k` ([`IndexPolicy::Renumber`], for standalone
//! statements) or keep the parent's indices ([`IndexPolicy::Preserve`], for
//! combining several sub-mappings in one statement without placeholder
//! collisions).

pub mod macros;

use crate::error::{DbError, DbResult};
use crate::models::{Entity, Record, SqlValue};
use std::collections::HashSet;

/// One `field <-> column <-> $index` association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnEntry {
    pub field: String,
    pub column: String,
    /// 1-based placeholder index
    pub index: usize,
}

/// How a sub-mapping numbers its placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexPolicy {
    /// Indices become `1..=k` in the sub-mapping's order.
    #[default]
    Renumber,
    /// Indices are copied from the parent mapping.
    Preserve,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    entries: Vec<ColumnEntry>,
    /// Qualifier for rendered columns (`table.column`)
    table: Option<String>,
}

impl ColumnMap {
    /// Build a mapping with positional indices `1..=n`.
    pub fn new<I, F, C>(definition: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (F, C)>,
        F: Into<String>,
        C: Into<String>,
    {
        let entries = definition
            .into_iter()
            .enumerate()
            .map(|(pos, (field, column))| ColumnEntry {
                field: field.into(),
                column: column.into(),
                index: pos + 1,
            })
            .collect();
        Self::from_entries(entries)
    }

    /// Build a mapping with explicit indices.
    ///
    /// Every field in `definition` needs an index in `indices`; indices must be
    /// positive and unique.
    pub fn with_indices<I, F, C>(definition: I, indices: &[(&str, usize)]) -> DbResult<Self>
    where
        I: IntoIterator<Item = (F, C)>,
        F: Into<String>,
        C: Into<String>,
    {
        let entries = definition
            .into_iter()
            .map(|(field, column)| {
                let field = field.into();
                let index = indices
                    .iter()
                    .find(|(f, _)| *f == field)
                    .map(|(_, i)| *i)
                    .ok_or_else(|| {
                        DbError::invalid_input(format!("No placeholder index for field '{field}'"))
                    })?;
                Ok(ColumnEntry {
                    field,
                    column: column.into(),
                    index,
                })
            })
            .collect::<DbResult<Vec<_>>>()?;
        Self::from_entries(entries)
    }

    /// The mapping declared by an [`Entity`] type.
    pub fn of<E: Entity>() -> DbResult<Self> {
        Self::new(E::COLUMNS.iter().copied())
    }

    fn from_entries(entries: Vec<ColumnEntry>) -> DbResult<Self> {
        let mut fields = HashSet::new();
        let mut indices = HashSet::new();
        for entry in &entries {
            if !fields.insert(entry.field.as_str()) {
                return Err(DbError::invalid_input(format!(
                    "Duplicate field '{}' in column mapping",
                    entry.field
                )));
            }
            if entry.index == 0 {
                return Err(DbError::invalid_input(format!(
                    "Placeholder index for field '{}' must be positive",
                    entry.field
                )));
            }
            if !indices.insert(entry.index) {
                return Err(DbError::invalid_input(format!(
                    "Duplicate placeholder index ${} in column mapping",
                    entry.index
                )));
            }
        }
        Ok(Self {
            entries,
            table: None,
        })
    }

    pub fn entries(&self) -> &[ColumnEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Field names in mapping order.
    pub fn fields(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.field.as_str()).collect()
    }

    /// Placeholder indices in mapping order.
    pub fn indices(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.index).collect()
    }

    pub fn get(&self, field: &str) -> Option<&ColumnEntry> {
        self.entries.iter().find(|e| e.field == field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Column name for `field`, unqualified.
    pub fn column(&self, field: &str) -> Option<&str> {
        self.get(field).map(|e| e.column.as_str())
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// New mapping with exactly `fields`, in the order given.
    pub fn pick(&self, fields: &[&str], policy: IndexPolicy) -> DbResult<Self> {
        let mut seen = HashSet::new();
        let picked = fields
            .iter()
            .map(|field| {
                if !seen.insert(*field) {
                    return Err(DbError::invalid_input(format!(
                        "Field '{field}' picked twice"
                    )));
                }
                self.get(field).cloned().ok_or_else(|| {
                    DbError::invalid_input(format!("Unknown field '{field}' in column mapping"))
                })
            })
            .collect::<DbResult<Vec<_>>>()?;
        Ok(self.derive(picked, policy))
    }

    /// New mapping without `fields`, keeping the remaining entries' order.
    pub fn omit(&self, fields: &[&str], policy: IndexPolicy) -> DbResult<Self> {
        if let Some(unknown) = fields.iter().find(|f| !self.contains(f)) {
            return Err(DbError::invalid_input(format!(
                "Unknown field '{unknown}' in column mapping"
            )));
        }
        let kept = self
            .entries
            .iter()
            .filter(|e| !fields.contains(&e.field.as_str()))
            .cloned()
            .collect();
        Ok(self.derive(kept, policy))
    }

    fn derive(&self, mut entries: Vec<ColumnEntry>, policy: IndexPolicy) -> Self {
        if policy == IndexPolicy::Renumber {
            for (pos, entry) in entries.iter_mut().enumerate() {
                entry.index = pos + 1;
            }
        }
        Self {
            entries,
            table: self.table.clone(),
        }
    }

    /// Copy whose rendered columns are qualified as `table.column`.
    pub fn with_table_name(&self, table: impl Into<String>) -> Self {
        Self {
            entries: self.entries.clone(),
            table: Some(table.into()),
        }
    }

    /// Copy with the table qualifier removed; INSERT column lists and SET
    /// targets must not be qualified.
    pub fn unqualified(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            table: None,
        }
    }

    fn qualified(&self, entry: &ColumnEntry) -> String {
        match &self.table {
            Some(table) => format!("{}.{}", table, entry.column),
            None => entry.column.clone(),
        }
    }

    fn render(&self, separator: &str, f: impl Fn(&ColumnEntry) -> String) -> String {
        self.entries.iter().map(f).collect::<Vec<_>>().join(separator)
    }

    /// `col_a, col_b`
    pub fn columns(&self) -> String {
        self.render(", ", |e| self.qualified(e))
    }

    /// `col_a AS "field_a", col_b AS "field_b"`, so result rows are keyed by field.
    pub fn aliased_columns(&self) -> String {
        self.render(", ", |e| format!("{} AS \"{}\"", self.qualified(e), e.field))
    }

    /// `col_a = $1, col_b = $2`
    pub fn assignments(&self) -> String {
        self.render(", ", |e| format!("{} = ${}", self.qualified(e), e.index))
    }

    /// `col_a = $1 AND col_b = $2`
    pub fn conditions(&self) -> String {
        self.render(" AND ", |e| format!("{} = ${}", self.qualified(e), e.index))
    }

    /// `$1, $2` in field order.
    pub fn placeholders(&self) -> String {
        self.render(", ", |e| format!("${}", e.index))
    }

    /// Project `record` onto this mapping's placeholders.
    ///
    /// The result is positioned by index, not by entry order: slot `i - 1`
    /// holds the value for `$i`. Absent fields, and indices no entry claims
    /// (gaps in a preserved mapping), are `None`.
    pub fn values<R: Record + ?Sized>(&self, record: &R) -> Vec<Option<SqlValue>> {
        let width = self.entries.iter().map(|e| e.index).max().unwrap_or(0);
        let mut slots = vec![None; width];
        for entry in &self.entries {
            slots[entry.index - 1] = record.field(&entry.field);
        }
        slots
    }
}
