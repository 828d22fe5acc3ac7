use crate::sql::render_ledger_insert;
use async_trait::async_trait;
use migrate_core::{ErrorLedger, ErrorLedgerEntry, SqlValue, TableIdent};
use mysql_async::{prelude::*, Params, Pool, Value};
use tracing::warn;

/// Appends failures to `migration_error_log` (or a configured table).
///
/// Write failures are logged and dropped.
#[derive(Clone)]
pub struct MySqlErrorLedger {
    pool: Pool,
    table: TableIdent,
}

impl MySqlErrorLedger {
    pub fn new(pool: Pool, table: TableIdent) -> Self {
        Self { pool, table }
    }

    async fn insert(&self, entry: &ErrorLedgerEntry) -> Result<(), mysql_async::Error> {
        let mut conn = self.pool.get_conn().await?;
        let created_at = SqlValue::Timestamp(entry.created_at.naive_utc());
        let params: Vec<Value> = vec![
            entry.source_table.as_str().into(),
            entry.target_tables.as_str().into(),
            entry.source_primary_key.as_deref().into(),
            entry.failed_data.as_str().into(),
            entry.error_message.as_str().into(),
            entry.migration_step.as_str().into(),
            crate::value::MySqlValue::from(&created_at).into_inner(),
        ];
        conn.exec_drop(render_ledger_insert(&self.table), Params::Positional(params))
            .await
    }
}

#[async_trait]
impl ErrorLedger for MySqlErrorLedger {
    async fn record(&self, entry: ErrorLedgerEntry) {
        if let Err(e) = self.insert(&entry).await {
            warn!(
                ledger = %self.table,
                source_table = %entry.source_table,
                key = entry.source_primary_key.as_deref().unwrap_or("-"),
                error = %e,
                "Failed to write error ledger entry: {}",
                entry.error_message
            );
        }
    }
}
