//! Batch consumer: the per-batch state machine.
//!
//! Every message of a batch is resolved exactly once:
//!
//! - unparseable payloads go to the error ledger without a key
//! - filtered records are dropped silently
//! - records that fail validation go to the ledger with their key
//! - accepted rows are upserted into every target concurrently; a failed
//!   write is recorded against that target and does not stop the others
//!
//! Offsets are committed once all messages are resolved, unless some target
//! was unreachable for every write it received in the batch. That batch is
//! abandoned uncommitted and the error propagates, so the whole batch is
//! redelivered to the next session.

pub mod offsets;

use crate::context::PipelineContext;
use crate::transform::{RowBuilder, RowOutcome};
use chrono::Utc;
use futures::future::join_all;
use migrate_core::record::key_to_string;
use migrate_core::{
    ConfigError, ConsumerConnector, ConsumerSession, ErrorLedger, ErrorLedgerEntry,
    InboundMessage, JobSpec, PipelineError, RecordEnvelope, TargetSink, UpsertStatement,
};
use offsets::OffsetTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Upper bound on leaving the group at shutdown.
    pub disconnect_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            disconnect_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-batch outcome counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    /// Rows written to every target.
    pub upserted: usize,
    pub filtered: usize,
    pub parse_errors: usize,
    pub rejected: usize,
    /// Individual (row, target) write failures.
    pub write_failures: usize,
    pub committed: bool,
}

struct Target {
    sink: Arc<dyn TargetSink>,
    statement: UpsertStatement,
}

#[derive(Debug, Default, Clone, Copy)]
struct TargetStats {
    attempts: usize,
    unavailable: usize,
}

impl TargetStats {
    fn all_unavailable(&self) -> bool {
        self.attempts > 0 && self.unavailable == self.attempts
    }
}

pub struct BatchConsumer {
    job: Arc<JobSpec>,
    targets: Vec<Target>,
    rows: RowBuilder,
    ledger: Arc<dyn ErrorLedger>,
    connector: Arc<dyn ConsumerConnector>,
    settings: ConsumerSettings,
}

impl BatchConsumer {
    pub fn new(
        job: Arc<JobSpec>,
        context: &PipelineContext,
        settings: ConsumerSettings,
    ) -> Result<Self, ConfigError> {
        job.validate()?;
        let sinks = context.sinks.resolve(&job)?;
        let targets = job
            .targets
            .iter()
            .zip(sinks)
            .map(|(spec, sink)| {
                Ok(Target {
                    sink,
                    statement: UpsertStatement::for_target(&job, spec)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            rows: RowBuilder::new(job.clone(), context.cipher.clone()),
            ledger: context.ledger.clone(),
            connector: context.connector.clone(),
            job,
            targets,
            settings,
        })
    }

    pub fn job(&self) -> &JobSpec {
        &self.job
    }

    /// Consume until cancelled. A batch already being processed is finished
    /// before the cancellation is observed.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
        let job = &self.job;
        let mut session = self.connector.connect(&job.group_id, &job.topic).await?;
        info!(job = %job.name, topic = %job.topic, group = %job.group_id, "Batch consumer started");

        let result = self.consume(session.as_mut(), &cancel).await;
        self.disconnect(session).await;

        if let Err(e) = &result {
            error!(job = %job.name, "Batch consumer stopped: {e}");
        }
        result
    }

    async fn consume(
        &self,
        session: &mut dyn ConsumerSession,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        loop {
            let messages = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(job = %self.job.name, "Shutdown requested, no new batches");
                    return Ok(());
                }
                batch = session.next_batch(self.job.batch_size) => batch?,
            };

            if messages.is_empty() {
                continue;
            }

            let report = self.process_batch(session, messages).await?;
            debug!(job = %self.job.name, ?report, "Batch processed");
        }
    }

    async fn disconnect(&self, session: Box<dyn ConsumerSession>) {
        match tokio::time::timeout(self.settings.disconnect_timeout, session.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(job = %self.job.name, "Consumer disconnect failed: {e}"),
            Err(_) => warn!(
                job = %self.job.name,
                timeout = ?self.settings.disconnect_timeout,
                "Consumer disconnect timed out"
            ),
        }
    }

    /// Resolve every message of the batch and commit it if it is safe.
    pub async fn process_batch(
        &self,
        session: &mut dyn ConsumerSession,
        messages: Vec<InboundMessage>,
    ) -> Result<BatchReport, PipelineError> {
        let mut tracker = OffsetTracker::new(messages.len());
        let mut report = BatchReport {
            received: messages.len(),
            ..Default::default()
        };
        let mut stats = vec![TargetStats::default(); self.targets.len()];
        let mut entries = Vec::new();

        for message in &messages {
            self.process_message(message, &mut report, &mut stats, &mut entries)
                .await;
            tracker.resolve(message);

            if let Err(e) = session.heartbeat().await {
                warn!(job = %self.job.name, "Heartbeat failed: {e}");
            }
        }

        if let Some((target, stat)) = self
            .targets
            .iter()
            .zip(&stats)
            .find(|(_, s)| s.all_unavailable())
        {
            // Ledger entries are dropped too; redelivery produces them again.
            return Err(PipelineError::BatchFatal {
                sink: target.sink.name().to_string(),
                message: format!(
                    "all {} writes to {} failed, batch of {} left uncommitted",
                    stat.attempts,
                    target.statement.table,
                    messages.len()
                ),
            });
        }

        for entry in entries {
            self.ledger.record(entry).await;
        }

        if tracker.all_resolved() {
            match session.commit(&tracker.positions()).await {
                Ok(()) => report.committed = true,
                Err(e) => warn!(job = %self.job.name, "Offset commit failed, batch will be redelivered: {e}"),
            }
        }

        Ok(report)
    }

    async fn process_message(
        &self,
        message: &InboundMessage,
        report: &mut BatchReport,
        stats: &mut [TargetStats],
        entries: &mut Vec<ErrorLedgerEntry>,
    ) {
        let record = match RecordEnvelope::from_slice(message.payload.as_deref()) {
            Ok(record) => record,
            Err(e) => {
                report.parse_errors += 1;
                warn!(job = %self.job.name, partition = message.partition, offset = message.offset, "Unparseable message: {e}");
                let failed_data = message
                    .payload
                    .as_deref()
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .unwrap_or_else(|| "{}".to_string());
                entries.push(self.entry(
                    self.job.target_tables(),
                    None,
                    failed_data,
                    "INVALID_JSON".to_string(),
                ));
                return;
            }
        };

        let row = match self.rows.build(&record) {
            Ok(RowOutcome::Accepted(row)) => row,
            Ok(RowOutcome::Filtered) => {
                report.filtered += 1;
                return;
            }
            Err(e) => {
                report.rejected += 1;
                let key = record.primary_key(&self.job.key_field).map(key_to_string);
                debug!(job = %self.job.name, key = key.as_deref().unwrap_or("-"), "Record rejected: {e}");
                entries.push(self.entry(self.job.target_tables(), key, record.to_json(), e.code()));
                return;
            }
        };

        let writes = self
            .targets
            .iter()
            .map(|target| target.sink.upsert(&target.statement, &row));
        let results = join_all(writes).await;

        let mut written_everywhere = true;
        for ((target, stat), result) in self.targets.iter().zip(stats.iter_mut()).zip(results) {
            stat.attempts += 1;
            let Err(e) = result else { continue };

            written_everywhere = false;
            report.write_failures += 1;
            if e.is_unavailable() {
                stat.unavailable += 1;
            }
            warn!(
                job = %self.job.name,
                sink = %e.sink,
                table = %target.statement.table,
                key = %row.key,
                "Upsert failed: {}",
                e.message
            );
            entries.push(self.entry(
                target.statement.table.to_string(),
                Some(row.key.clone()),
                record.to_json(),
                format!("WRITE_FAILED: {}", e.message),
            ));
        }

        if written_everywhere {
            report.upserted += 1;
        }
    }

    fn entry(
        &self,
        target_tables: String,
        source_primary_key: Option<String>,
        failed_data: String,
        error_message: String,
    ) -> ErrorLedgerEntry {
        ErrorLedgerEntry {
            source_table: self.job.source_table.clone(),
            target_tables,
            source_primary_key,
            failed_data,
            error_message,
            migration_step: self.job.migration_step(),
            created_at: Utc::now(),
        }
    }
}
