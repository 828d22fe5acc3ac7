//! Extractor/publisher: pages rows out of the source and publishes them as
//! keyed messages on the job's topic.
//!
//! Publishing is a best-effort pump. A failed chunk is logged and skipped;
//! re-extraction is the recovery path. Only a source failure ends a run
//! early, and the returned error carries the cursor to resume from.

use crate::key::message_key;
use migrate_core::{
    ExtractionError, JobSpec, MessagePublisher, OutboundMessage, SourceReader,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    /// Pause between pages to bound load on the source.
    pub page_delay: Duration,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub records_sent: u64,
    /// Records in chunks the log refused.
    pub records_failed: u64,
    pub pages: u64,
    /// Cursor after the last page read.
    pub next_offset: u64,
}

pub struct Extractor {
    source: Arc<dyn SourceReader>,
    publisher: Arc<dyn MessagePublisher>,
    settings: ExtractorSettings,
}

impl Extractor {
    pub fn new(
        source: Arc<dyn SourceReader>,
        publisher: Arc<dyn MessagePublisher>,
        settings: ExtractorSettings,
    ) -> Self {
        Self {
            source,
            publisher,
            settings,
        }
    }

    /// Extract and publish from `start_offset` until the source is exhausted
    /// or inactive. The publisher is flushed on every exit path.
    pub async fn run(
        &self,
        job: &JobSpec,
        start_offset: u64,
    ) -> Result<ExtractionReport, ExtractionError> {
        let result = self.pump(job, start_offset).await;

        if let Err(e) = self.publisher.disconnect().await {
            error!(job = %job.name, "Publisher disconnect failed: {e}");
        }

        match &result {
            Ok(report) => info!(
                job = %job.name,
                table = %job.source_table,
                sent = report.records_sent,
                failed = report.records_failed,
                pages = report.pages,
                "Extraction completed"
            ),
            Err(e) => error!(job = %job.name, "Extraction failed: {e}"),
        }
        result
    }

    async fn pump(
        &self,
        job: &JobSpec,
        start_offset: u64,
    ) -> Result<ExtractionReport, ExtractionError> {
        let mut report = ExtractionReport {
            next_offset: start_offset,
            ..Default::default()
        };
        let mut last_activity = Instant::now();

        loop {
            let offset = report.next_offset;
            debug!(job = %job.name, table = %job.source_table, offset, "Fetching page");

            let page = self
                .source
                .fetch(&job.source_table, job.page_size, offset)
                .await
                .map_err(|source| ExtractionError {
                    table: job.source_table.clone(),
                    offset,
                    records_sent: report.records_sent,
                    source,
                })?;

            if page.is_empty() {
                info!(job = %job.name, table = %job.source_table, offset, "No more records");
                break;
            }

            report.pages += 1;
            report.next_offset = offset + job.page_size;

            let messages = to_messages(page, &job.key_field);
            if messages.is_empty() {
                if let Some(timeout) = job.inactivity_timeout {
                    if last_activity.elapsed() >= timeout {
                        info!(job = %job.name, ?timeout, "Source inactive, stopping extraction");
                        break;
                    }
                }
            } else {
                last_activity = Instant::now();
                self.publish_chunks(job, &messages, &mut report).await;
                debug!(
                    job = %job.name,
                    page_records = messages.len(),
                    total = report.records_sent,
                    "Page published"
                );
            }

            tokio::time::sleep(self.settings.page_delay).await;
        }

        Ok(report)
    }

    async fn publish_chunks(
        &self,
        job: &JobSpec,
        messages: &[OutboundMessage],
        report: &mut ExtractionReport,
    ) {
        for chunk in messages.chunks(job.publish_chunk_size) {
            match self.publisher.publish(&job.topic, chunk).await {
                Ok(()) => report.records_sent += chunk.len() as u64,
                Err(e) => {
                    report.records_failed += chunk.len() as u64;
                    warn!(job = %job.name, topic = %job.topic, size = chunk.len(), "Chunk publish failed: {e}");
                }
            }
        }
    }
}

/// Null rows are dropped; every remaining row gets a non-empty key.
fn to_messages(page: Vec<Value>, key_field: &str) -> Vec<OutboundMessage> {
    page.into_iter()
        .filter(|row| !row.is_null())
        .map(|row| OutboundMessage {
            key: message_key(&row, key_field),
            value: row.to_string(),
        })
        .collect()
}
