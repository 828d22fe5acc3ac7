//! Record envelopes and upsert rows.

use crate::error::ParseError;
use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use std::fmt;

/// Decoded payload of one source row.
///
/// Field names depend on the entity. Lives only while one message is being
/// processed.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEnvelope {
    fields: Map<String, Value>,
}

impl RecordEnvelope {
    /// Decode a message payload. Anything other than a JSON object is a parse error.
    pub fn from_slice(payload: Option<&[u8]>) -> Result<Self, ParseError> {
        let payload = payload.ok_or(ParseError::EmptyPayload)?;
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(ParseError::NotAnObject),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The key field's value when it is usable as a primary key: a positive
    /// integer or a non-blank string.
    pub fn primary_key(&self, field: &str) -> Option<&Value> {
        self.get(field).filter(|v| is_usable_key(v))
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}

/// Whether a JSON value can serve as a primary key.
pub fn is_usable_key(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_u64().is_some_and(|n| n > 0),
        Value::String(s) => !s.trim().is_empty(),
        _ => false,
    }
}

/// Render a key for logs and the error ledger.
pub fn key_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A sink-agnostic column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Map a JSON value onto a column value. Nested objects and arrays are
    /// stored as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    SqlValue::UInt(u)
                } else {
                    n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Null)
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            nested @ (Value::Array(_) | Value::Object(_)) => SqlValue::Text(nested.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Textual form used by transforms that operate on strings.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::UInt(u) => Some(u.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

/// Column values in the job's column order, plus the rendered key.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertRow {
    pub key: String,
    pub values: Vec<SqlValue>,
}

impl UpsertRow {
    pub fn new(key: impl Into<String>, values: Vec<SqlValue>) -> Self {
        Self {
            key: key.into(),
            values,
        }
    }
}
