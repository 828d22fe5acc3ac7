use crate::error::classify;
use crate::sql::render_upsert;
use crate::value::bind_row;
use async_trait::async_trait;
use migrate_core::{SinkError, TargetSink, UpsertRow, UpsertStatement};
use mysql_async::{prelude::*, Params, Pool};
use tracing::trace;

/// One MySQL connection pool, addressed by its configured name.
///
/// Shared by every job whose targets live on that connection.
#[derive(Clone)]
pub struct MySqlSink {
    name: String,
    pool: Pool,
}

impl MySqlSink {
    pub fn new(name: impl Into<String>, pool: Pool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn disconnect(self) -> Result<(), mysql_async::Error> {
        self.pool.disconnect().await
    }
}

#[async_trait]
impl TargetSink for MySqlSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, statement: &UpsertStatement, row: &UpsertRow) -> Result<(), SinkError> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| SinkError::unavailable(&self.name, e.to_string()))?;

        let sql = render_upsert(statement);
        trace!(sink = %self.name, key = %row.key, "{sql}");

        conn.exec_drop(&sql, Params::Positional(bind_row(&row.values)))
            .await
            .map_err(|e| classify(&self.name, e))
    }
}
