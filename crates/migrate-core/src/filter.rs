//! Record filters applied before transform.
//!
//! A record rejected by a filter is out of scope for the migration: it is
//! resolved without being written and without an error-ledger entry.

use crate::record::RecordEnvelope;
use crate::timestamp::{parse_timestamp, timestamp_from_value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// What a filter does when its field is absent, null or unparseable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingField {
    Include,
    #[default]
    Exclude,
}

impl MissingField {
    fn accepts(self) -> bool {
        matches!(self, MissingField::Include)
    }
}

/// A predicate every record must satisfy to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Keep records whose timestamp is strictly after `after`.
    MinDate {
        field: String,
        #[serde(deserialize_with = "deserialize_cutoff")]
        after: DateTime<Utc>,
        #[serde(default)]
        missing: MissingField,
    },
    /// Keep records whose field equals `value` (e.g. a vehicle subtype).
    Equals {
        field: String,
        value: Value,
        #[serde(default)]
        missing: MissingField,
    },
}

impl FilterPolicy {
    pub fn min_date(field: impl Into<String>, after: DateTime<Utc>) -> Self {
        FilterPolicy::MinDate {
            field: field.into(),
            after,
            missing: MissingField::Exclude,
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterPolicy::Equals {
            field: field.into(),
            value: value.into(),
            missing: MissingField::Exclude,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            FilterPolicy::MinDate { field, .. } | FilterPolicy::Equals { field, .. } => field,
        }
    }

    pub fn accepts(&self, record: &RecordEnvelope) -> bool {
        match self {
            FilterPolicy::MinDate {
                field,
                after,
                missing,
            } => match record.get(field).and_then(timestamp_from_value) {
                Some(ts) => ts > *after,
                None => missing.accepts(),
            },
            FilterPolicy::Equals {
                field,
                value,
                missing,
            } => match record.get(field) {
                Some(Value::Null) | None => missing.accepts(),
                Some(actual) => actual == value,
            },
        }
    }
}

fn deserialize_cutoff<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid cutoff timestamp '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn envelope(value: Value) -> RecordEnvelope {
        RecordEnvelope::from_value(value).unwrap()
    }

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_min_date() {
        let filter = FilterPolicy::min_date("ts", cutoff());
        assert!(filter.accepts(&envelope(json!({"id": 1, "ts": "2024-02-01"}))));
        assert!(!filter.accepts(&envelope(json!({"id": 2, "ts": "2023-01-01"}))));
        assert!(!filter.accepts(&envelope(json!({"id": 3, "ts": "2024-01-01 00:00:00"}))));
    }

    #[test]
    fn test_missing_policy() {
        let exclude = FilterPolicy::min_date("ts", cutoff());
        let include = FilterPolicy::MinDate {
            field: "ts".into(),
            after: cutoff(),
            missing: MissingField::Include,
        };
        let no_ts = envelope(json!({"id": 1}));
        let null_ts = envelope(json!({"id": 1, "ts": null}));
        let bad_ts = envelope(json!({"id": 1, "ts": "0000-00-00 00:00:00"}));
        for record in [&no_ts, &null_ts, &bad_ts] {
            assert!(!exclude.accepts(record));
            assert!(include.accepts(record));
        }
    }

    #[test]
    fn test_equals() {
        let filter = FilterPolicy::equals("type", "4w");
        assert!(filter.accepts(&envelope(json!({"id": 1, "type": "4w"}))));
        assert!(!filter.accepts(&envelope(json!({"id": 1, "type": "2w"}))));
        assert!(!filter.accepts(&envelope(json!({"id": 1}))));
    }

    #[test]
    fn test_yaml_cutoff_accepts_date_only() {
        let yaml = r#"
kind: min_date
field: b2b_log
after: "2023-12-31 23:59:59"
missing: include
"#;
        let filter: FilterPolicy = serde_yaml::from_str(yaml).unwrap();
        match filter {
            FilterPolicy::MinDate { after, missing, .. } => {
                assert_eq!(after, Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap());
                assert_eq!(missing, MissingField::Include);
            }
            other => panic!("unexpected filter {other:?}"),
        }
    }
}
