#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use migrate_core::{
    ColumnIdent, ColumnMapping, ConflictAction, FilterPolicy, JobSpec, MessagePublisher,
    OutboundMessage, TableIdent, TargetSpec,
};
use migrate_pipeline::testing::{MemoryLedger, MemoryLog, MemorySink, MemorySource};
use migrate_pipeline::{PipelineContext, SinkRegistry};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LIVE_TABLE: &str = "bridge.feedback_track";
pub const UAT_TABLE: &str = "uat_bridge.feedback_track";

/// Initialize logging for tests
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn col(name: &str) -> ColumnMapping {
    ColumnMapping::new(ColumnIdent::new(name).unwrap())
}

/// Two targets, rows keyed by `id`, kept only when `ts` is after 2024-01-01.
pub fn feedback_job() -> JobSpec {
    JobSpec::new("feedback_track", "feedback_track", "id")
        .with_target(TargetSpec::new("live", TableIdent::parse(LIVE_TABLE).unwrap()))
        .with_target(TargetSpec::new("uat", TableIdent::parse(UAT_TABLE).unwrap()))
        .with_column(col("id"))
        .with_column(col("ts"))
        .with_column(col("note").with_conflict(ConflictAction::Coalesce))
        .with_filter(FilterPolicy::min_date(
            "ts",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ))
        .with_batch_size(100)
}

pub struct Harness {
    pub log: MemoryLog,
    pub source: MemorySource,
    pub live: MemorySink,
    pub uat: MemorySink,
    pub ledger: MemoryLedger,
}

impl Harness {
    pub fn new(source: MemorySource) -> Self {
        init_logging();
        Self {
            log: MemoryLog::new(3),
            source,
            live: MemorySink::new("live"),
            uat: MemorySink::new("uat"),
            ledger: MemoryLedger::new(),
        }
    }

    pub fn context(&self) -> PipelineContext {
        PipelineContext {
            source: Arc::new(self.source.clone()),
            publisher: Arc::new(self.log.clone()),
            connector: Arc::new(self.log.clone()),
            admin: Arc::new(self.log.clone()),
            sinks: SinkRegistry::new()
                .with("live", Arc::new(self.live.clone()))
                .with("uat", Arc::new(self.uat.clone())),
            ledger: Arc::new(self.ledger.clone()),
            cipher: None,
        }
    }

    pub async fn publish_rows(&self, topic: &str, rows: &[Value]) {
        let messages: Vec<OutboundMessage> = rows
            .iter()
            .map(|row| OutboundMessage {
                key: row["id"].to_string(),
                value: row.to_string(),
            })
            .collect();
        self.log.publish(topic, &messages).await.unwrap();
    }
}
