//! Dialect-neutral description of an upsert.
//!
//! Built once per (job, target) from configuration; sink adapters render it
//! into their own SQL and bind [`UpsertRow`](crate::record::UpsertRow)
//! values positionally in `columns` order.

use crate::error::ConfigError;
use crate::identifier::{ColumnIdent, TableIdent};
use crate::job::{ConflictAction, JobSpec, TargetSpec};

/// One column updated on key conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictUpdate {
    pub column: ColumnIdent,
    pub action: ConflictAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertStatement {
    pub table: TableIdent,
    pub columns: Vec<ColumnIdent>,
    pub key_column: ColumnIdent,
    /// Never contains the key column or `insert_only` columns.
    pub updates: Vec<ConflictUpdate>,
}

impl UpsertStatement {
    pub fn for_target(job: &JobSpec, target: &TargetSpec) -> Result<Self, ConfigError> {
        let key_column = job.key_column()?;
        let columns = job.columns.iter().map(|c| c.column.clone()).collect();
        let updates = job
            .columns
            .iter()
            .filter(|c| c.column != key_column && c.on_conflict != ConflictAction::InsertOnly)
            .map(|c| ConflictUpdate {
                column: c.column.clone(),
                action: c.on_conflict,
            })
            .collect();

        Ok(Self {
            table: target.table.clone(),
            columns,
            key_column,
            updates,
        })
    }
}
