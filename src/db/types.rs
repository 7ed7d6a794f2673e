//! Row representation and PostgreSQL column decoding.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Category-specific decoders extract the value as JSON
//!
//! Rows are kept as ordered JSON maps so they can be handed to serde for
//! typed decoding, and so that the first selected column stays first.

use crate::error::{DbError, DbResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};

// =============================================================================
// Row
// =============================================================================

/// One result row, keyed by column label in select order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row(Map<String, JsonValue>);

impl Row {
    pub fn new(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }

    /// Build a row from a JSON object. Any other JSON value is rejected.
    pub fn from_json(value: JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::Object(map) => Ok(Self(map)),
            other => Err(DbError::decode(format!(
                "Expected a JSON object for a row, got {}",
                other
            ))),
        }
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.0.get(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Value of the first selected column, `Null` for an empty row.
    pub fn into_first(self) -> JsonValue {
        self.0
            .into_iter()
            .next()
            .map(|(_, v)| v)
            .unwrap_or(JsonValue::Null)
    }

    /// Decode the row into a typed value through serde.
    pub fn into_decoded<T: DeserializeOwned>(self) -> DbResult<T> {
        Ok(serde_json::from_value(JsonValue::Object(self.0))?)
    }

    pub fn into_map(self) -> Map<String, JsonValue> {
        self.0
    }
}

impl From<Map<String, JsonValue>> for Row {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for PostgreSQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Unknown,
}

/// Classify a PostgreSQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower == "bytea" {
        return TypeCategory::Binary;
    }

    match lower.as_str() {
        "timestamptz" | "timestamp with time zone" => TypeCategory::TimestampTz,
        "timestamp" | "timestamp without time zone" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        // varchar, text, char, name, enums...
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Encode binary column data as base64 text.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Timestamp rendering shared by decoding and tests.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

// =============================================================================
// Row Decoding
// =============================================================================

/// Trait for converting driver rows to [`Row`].
pub trait RowToJson {
    fn to_row(&self) -> Row;
}

impl RowToJson for PgRow {
    fn to_row(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), decode_column(self, idx, category))
            })
            .collect::<Map<String, JsonValue>>()
            .into()
    }
}

fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_binary(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::Uuid => decode_uuid(row, idx),
        TypeCategory::Timestamp => decode_timestamp(row, idx),
        TypeCategory::TimestampTz => decode_timestamptz(row, idx),
        TypeCategory::Date => decode_date(row, idx),
        TypeCategory::Unknown => decode_text(row, idx),
    }
}

fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(Some(v)) => JsonValue::String(v.0),
        Ok(None) => JsonValue::Null,
        Err(e) => {
            tracing::error!("Failed to decode NUMERIC: {:?}", e);
            JsonValue::Null
        }
    }
}

fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
        return JsonValue::Number(v.into());
    }
    JsonValue::Null
}

fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
        return serde_json::Number::from_f64(v as f64)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    JsonValue::Null
}

fn decode_binary(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| encode_binary(&v))
        .unwrap_or(JsonValue::Null)
}

fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<JsonValue>, _>(idx)
        .ok()
        .flatten()
        .unwrap_or(JsonValue::Null)
}

fn decode_uuid(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<uuid::Uuid>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::String(v.to_string()))
        .unwrap_or(JsonValue::Null)
}

fn decode_timestamp(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<chrono::NaiveDateTime>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::String(v.format(TIMESTAMP_FORMAT).to_string()))
        .unwrap_or(JsonValue::Null)
}

fn decode_timestamptz(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::String(v.to_rfc3339()))
        .unwrap_or(JsonValue::Null)
}

fn decode_date(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get::<Option<chrono::NaiveDate>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::String(v.to_string()))
        .unwrap_or(JsonValue::Null)
}

fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
    row.try_get_unchecked::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}
