//! Field projection for typed records.
//!
//! Models declare their column layout statically through [`Entity`] and hand
//! out field values through [`Record`]. The [`entity!`](crate::entity) macro
//! writes both impls for a plain struct.

use crate::models::SqlValue;
use serde_json::Value as JsonValue;

/// A value that can be projected field by field.
///
/// Returning `None` means the field is absent (a partial input), which is
/// different from a present field holding `SqlValue::Null`.
pub trait Record {
    fn field(&self, name: &str) -> Option<SqlValue>;
}

/// A model type with a compile-time `(field, column)` table.
pub trait Entity: Record {
    /// Ordered field-to-column descriptors.
    const COLUMNS: &'static [(&'static str, &'static str)];
}

impl<R: Record + ?Sized> Record for &R {
    fn field(&self, name: &str) -> Option<SqlValue> {
        (**self).field(name)
    }
}

impl Record for serde_json::Map<String, JsonValue> {
    fn field(&self, name: &str) -> Option<SqlValue> {
        self.get(name).map(SqlValue::from_json)
    }
}

/// An ordered, partial set of field values.
///
/// Used as the filter of a select and for ad-hoc inserts where no model
/// struct exists (the migration ledger, for one).
#[derive(Debug, Clone, Default)]
pub struct Filter {
    entries: Vec<(String, SqlValue)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a field value.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        let field = field.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((field, value)),
        }
        self
    }

    /// Field names in insertion order.
    pub fn fields(&self) -> Vec<&str> {
        self.entries.iter().map(|(f, _)| f.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Record for Filter {
    fn field(&self, name: &str) -> Option<SqlValue> {
        self.entries
            .iter()
            .find(|(f, _)| f == name)
            .map(|(_, v)| v.clone())
    }
}

impl<K: Into<String>, V: Into<SqlValue>> FromIterator<(K, V)> for Filter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Filter::new(), |filter, (k, v)| filter.eq(k, v))
    }
}
