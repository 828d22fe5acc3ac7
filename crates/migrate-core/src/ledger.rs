//! Error ledger: durable, best-effort record of per-row failures.
//!
//! The pipeline only appends. Implementations must swallow their own write
//! failures; a ledger outage never blocks or fails a batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorLedgerEntry {
    pub source_table: String,
    /// One target table, or the comma-joined list when the failure is not
    /// specific to a sink.
    pub target_tables: String,
    pub source_primary_key: Option<String>,
    /// Serialized failing payload (`{}` when nothing could be decoded).
    pub failed_data: String,
    pub error_message: String,
    pub migration_step: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ErrorLedger: Send + Sync {
    /// Append an entry. Never fails from the caller's point of view.
    async fn record(&self, entry: ErrorLedgerEntry);
}

/// Ledger that only logs; used when no ledger table is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyLedger;

#[async_trait]
impl ErrorLedger for LogOnlyLedger {
    async fn record(&self, entry: ErrorLedgerEntry) {
        tracing::warn!(
            source_table = %entry.source_table,
            target = %entry.target_tables,
            key = entry.source_primary_key.as_deref().unwrap_or("-"),
            step = %entry.migration_step,
            "Migration error: {}",
            entry.error_message
        );
    }
}
