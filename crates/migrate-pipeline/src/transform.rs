//! Filter and transform: `RecordEnvelope` → `UpsertRow`.

use chrono::Utc;
use migrate_core::record::key_to_string;
use migrate_core::timestamp::timestamp_from_value;
use migrate_core::{
    ColumnMapping, FieldCipher, FieldTransform, JobSpec, RecordEnvelope, SqlValue, UpsertRow,
    ValidationError,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Result of running one decoded record through the job's filters and
/// column mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Accepted(UpsertRow),
    /// Out of scope for this job; resolved without a write or ledger entry.
    Filtered,
}

/// Builds upsert rows for one job.
#[derive(Clone)]
pub struct RowBuilder {
    job: Arc<JobSpec>,
    cipher: Option<Arc<dyn FieldCipher>>,
}

impl RowBuilder {
    pub fn new(job: Arc<JobSpec>, cipher: Option<Arc<dyn FieldCipher>>) -> Self {
        Self { job, cipher }
    }

    pub fn build(&self, record: &RecordEnvelope) -> Result<RowOutcome, ValidationError> {
        if !self.job.filters.iter().all(|f| f.accepts(record)) {
            return Ok(RowOutcome::Filtered);
        }

        let key_field = &self.job.key_field;
        let key = record
            .primary_key(key_field)
            .ok_or_else(|| ValidationError::MissingPrimaryKey(key_field.clone()))?;

        let mut values = Vec::with_capacity(self.job.columns.len());
        for mapping in &self.job.columns {
            let value = self.column_value(mapping, record.get(mapping.source_field()));
            if value.is_null() && mapping.required {
                return Err(ValidationError::RequiredColumn {
                    column: mapping.column.to_string(),
                });
            }
            values.push(value);
        }

        Ok(RowOutcome::Accepted(UpsertRow::new(key_to_string(key), values)))
    }

    fn column_value(&self, mapping: &ColumnMapping, raw: Option<&Value>) -> SqlValue {
        let raw = raw.filter(|v| !v.is_null());
        match mapping.transform {
            FieldTransform::None => raw.map(SqlValue::from_json).unwrap_or(SqlValue::Null),
            FieldTransform::NormalizeMobile => text_of(raw)
                .and_then(|s| normalize_mobile(&s))
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
            FieldTransform::CleanEmail => text_of(raw)
                .and_then(|s| clean_email(&s))
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
            FieldTransform::Encrypt => text_of(raw)
                .and_then(|s| self.encrypt(mapping, &s))
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
            FieldTransform::NowIfMissing => match raw {
                None => SqlValue::Timestamp(Utc::now().naive_utc()),
                Some(value) => timestamp_from_value(value)
                    .map(|ts| SqlValue::Timestamp(ts.naive_utc()))
                    .unwrap_or_else(|| SqlValue::from_json(value)),
            },
        }
    }

    fn encrypt(&self, mapping: &ColumnMapping, plaintext: &str) -> Option<String> {
        let Some(cipher) = &self.cipher else {
            warn!(job = %self.job.name, column = %mapping.column, "No cipher configured, storing null");
            return None;
        };
        match cipher.encrypt(plaintext) {
            Ok(encrypted) => Some(encrypted),
            Err(e) => {
                warn!(job = %self.job.name, column = %mapping.column, "Encryption failed, storing null: {e}");
                None
            }
        }
    }
}

fn text_of(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Digits only, last ten; `None` when fewer than ten digits remain.
pub fn normalize_mobile(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 10 {
        return None;
    }
    Some(digits[digits.len() - 10..].to_string())
}

/// Trimmed and lowercased; `None` without an `@`.
pub fn clean_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    email.contains('@').then_some(email)
}
