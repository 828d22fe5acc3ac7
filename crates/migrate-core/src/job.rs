//! Per-entity job definitions.
//!
//! A [`JobSpec`] fully describes one entity's migration: where rows come
//! from, which topic and consumer group carry them, how a payload becomes an
//! upsert row, and which target sinks receive it. The pipeline engine is
//! generic over this data; there is no per-entity code.

use crate::error::ConfigError;
use crate::filter::FilterPolicy;
use crate::identifier::{ColumnIdent, TableIdent};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_PAGE_SIZE: u64 = 10_000;
pub const DEFAULT_PUBLISH_CHUNK_SIZE: usize = 200;

/// Field-level transform applied while building an upsert row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    #[default]
    None,
    /// Keep digits only and take the last ten; fewer than ten digits is null.
    NormalizeMobile,
    /// Trim and lowercase; values without `@` are null.
    CleanEmail,
    /// Encrypt the textual value with the configured field cipher.
    Encrypt,
    /// Use the current UTC time when the field is absent or null.
    NowIfMissing,
}

/// What an upsert does with a column when the key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    /// Replace the stored value with the incoming one.
    #[default]
    Overwrite,
    /// Replace only when the incoming value is not null.
    Coalesce,
    /// Written on insert, never updated.
    InsertOnly,
}

/// Mapping of one source field to one target column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub column: ColumnIdent,
    /// Source field name; defaults to the column name.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub transform: FieldTransform,
    #[serde(default)]
    pub on_conflict: ConflictAction,
    /// Reject the row when this column ends up null.
    #[serde(default)]
    pub required: bool,
}

impl ColumnMapping {
    pub fn new(column: ColumnIdent) -> Self {
        Self {
            column,
            field: None,
            transform: FieldTransform::None,
            on_conflict: ConflictAction::Overwrite,
            required: false,
        }
    }

    pub fn from_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_transform(mut self, transform: FieldTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_conflict(mut self, on_conflict: ConflictAction) -> Self {
        self.on_conflict = on_conflict;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn source_field(&self) -> &str {
        self.field.as_deref().unwrap_or(self.column.as_str())
    }
}

/// One target table on one named connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSpec {
    pub connection: String,
    pub table: TableIdent,
}

impl TargetSpec {
    pub fn new(connection: impl Into<String>, table: TableIdent) -> Self {
        Self {
            connection: connection.into(),
            table,
        }
    }
}

/// Immutable description of one entity migration.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Entity name, unique within a run.
    pub name: String,
    /// Table identifier understood by the source reader.
    pub source_table: String,
    pub topic: String,
    /// Stable across restarts so committed offsets persist.
    pub group_id: String,
    /// Payload field holding the natural key.
    pub key_field: String,
    /// Target column for the key; defaults to `key_field`.
    pub key_column: Option<ColumnIdent>,
    pub targets: Vec<TargetSpec>,
    pub columns: Vec<ColumnMapping>,
    pub filters: Vec<FilterPolicy>,
    /// Maximum messages handed to the batch consumer at once.
    pub batch_size: usize,
    /// Rows requested per source page.
    pub page_size: u64,
    /// Messages per publish request.
    pub publish_chunk_size: usize,
    /// Stop extracting when no usable rows arrived for this long.
    pub inactivity_timeout: Option<Duration>,
    pub migration_step: Option<String>,
}

impl JobSpec {
    /// A job with default topic (`<name>_migration`), group
    /// (`migration_<name>_group`) and sizes. Targets and columns are empty.
    pub fn new(
        name: impl Into<String>,
        source_table: impl Into<String>,
        key_field: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            topic: format!("{name}_migration"),
            group_id: format!("migration_{name}_group"),
            source_table: source_table.into(),
            key_field: key_field.into(),
            key_column: None,
            targets: Vec::new(),
            columns: Vec::new(),
            filters: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            publish_chunk_size: DEFAULT_PUBLISH_CHUNK_SIZE,
            inactivity_timeout: None,
            migration_step: None,
            name,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_target(mut self, target: TargetSpec) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_column(mut self, column: ColumnMapping) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_filter(mut self, filter: FilterPolicy) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_publish_chunk_size(mut self, chunk: usize) -> Self {
        self.publish_chunk_size = chunk;
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    /// Column that receives the primary key.
    pub fn key_column(&self) -> Result<ColumnIdent, ConfigError> {
        match &self.key_column {
            Some(column) => Ok(column.clone()),
            None => ColumnIdent::new(self.key_field.clone()),
        }
    }

    pub fn migration_step(&self) -> String {
        self.migration_step
            .clone()
            .unwrap_or_else(|| format!("{}_migration", self.name))
    }

    /// Comma-joined list of target tables, as recorded in the error ledger.
    pub fn target_tables(&self) -> String {
        self.targets
            .iter()
            .map(|t| t.table.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Structural checks that do not depend on the rest of the run config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidJob {
            job: self.name.clone(),
            message: message.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.topic.trim().is_empty() || self.group_id.trim().is_empty() {
            return Err(invalid("topic and group_id must not be empty"));
        }
        if self.targets.is_empty() {
            return Err(invalid("at least one target is required"));
        }
        if self.batch_size == 0 || self.page_size == 0 || self.publish_chunk_size == 0 {
            return Err(invalid("batch_size, page_size and publish_chunk_size must be positive"));
        }

        let key_column = self.key_column()?;
        let mut seen = HashSet::new();
        for mapping in &self.columns {
            if !seen.insert(mapping.column.as_str()) {
                return Err(invalid(&format!("column '{}' is mapped twice", mapping.column)));
            }
            // A fresh timestamp on every redelivery would rewrite the row.
            if mapping.transform == FieldTransform::NowIfMissing
                && mapping.on_conflict != ConflictAction::InsertOnly
            {
                return Err(invalid(&format!(
                    "column '{}' uses now_if_missing and must be on_conflict: insert_only",
                    mapping.column
                )));
            }
        }
        if !seen.contains(key_column.as_str()) {
            return Err(invalid(&format!(
                "key column '{key_column}' is not in the column list"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> ColumnMapping {
        ColumnMapping::new(ColumnIdent::new(name).unwrap())
    }

    fn booking_job() -> JobSpec {
        JobSpec::new("user_booking", "user_booking_tb", "booking_id")
            .with_target(TargetSpec::new(
                "live",
                TableIdent::parse("mytvs_bridge.user_booking").unwrap(),
            ))
            .with_column(col("booking_id"))
            .with_column(col("reg_id"))
    }

    #[test]
    fn test_defaults() {
        let job = booking_job();
        assert_eq!(job.topic, "user_booking_migration");
        assert_eq!(job.group_id, "migration_user_booking_group");
        assert_eq!(job.migration_step(), "user_booking_migration");
        assert_eq!(job.key_column().unwrap().as_str(), "booking_id");
        assert_eq!(job.batch_size, DEFAULT_BATCH_SIZE);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_key_column_must_be_mapped() {
        let job = JobSpec::new("x", "x", "id")
            .with_target(TargetSpec::new("live", TableIdent::parse("x").unwrap()))
            .with_column(col("name"));
        assert!(matches!(job.validate(), Err(ConfigError::InvalidJob { .. })));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let job = booking_job().with_column(col("reg_id"));
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_now_if_missing_requires_insert_only() {
        let stamped = col("migrated_at").with_transform(FieldTransform::NowIfMissing);
        let job = booking_job().with_column(stamped.clone());
        let err = job.validate().unwrap_err();
        assert!(err.to_string().contains("must be on_conflict: insert_only"));

        let job = booking_job().with_column(stamped.with_conflict(ConflictAction::InsertOnly));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_column_mapping_yaml() {
        let yaml = r#"
column: veh_reg_no
field: reg_no
transform: encrypt
on_conflict: coalesce
"#;
        let mapping: ColumnMapping = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(mapping.source_field(), "reg_no");
        assert_eq!(mapping.transform, FieldTransform::Encrypt);
        assert_eq!(mapping.on_conflict, ConflictAction::Coalesce);
        assert!(!mapping.required);
    }
}
