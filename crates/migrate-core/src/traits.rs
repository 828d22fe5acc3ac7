//! Seams to the external collaborators: source, message log, sinks, cipher.
//!
//! The pipeline is written against these traits only. Adapters live in
//! their own crates (`migrate-kafka`, `migrate-mysql`,
//! `migrate-http-source`); in-memory versions live in
//! `migrate_pipeline::testing`.

use crate::drain::DrainStatus;
use crate::error::{LogError, SinkError, SourceError};
use crate::record::UpsertRow;
use crate::statement::UpsertStatement;
use async_trait::async_trait;
use serde_json::Value;

/// Paged reader over the legacy store.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Fetch up to `limit` rows starting at `offset`. An empty page signals
    /// exhaustion.
    async fn fetch(&self, table: &str, limit: u64, offset: u64) -> Result<Vec<Value>, SourceError>;
}

/// A keyed message ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Never empty; empty keys break per-key partition ordering.
    pub key: String,
    pub value: String,
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish one chunk in order. The chunk succeeds or fails as a whole.
    async fn publish(&self, topic: &str, messages: &[OutboundMessage]) -> Result<(), LogError>;

    /// Flush and release resources held for the current run.
    async fn disconnect(&self) -> Result<(), LogError>;
}

/// A message received by a consumer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

/// Next offset to commit for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitPosition {
    pub topic: String,
    pub partition: i32,
    /// Offset of the next message to read (last resolved + 1).
    pub next_offset: i64,
}

/// One live membership of a consumer group.
#[async_trait]
pub trait ConsumerSession: Send + Sync {
    /// Wait briefly for messages and return up to `max`; may return empty.
    async fn next_batch(&mut self, max: usize) -> Result<Vec<InboundMessage>, LogError>;

    /// Signal liveness to the group between slow row-processing steps.
    async fn heartbeat(&self) -> Result<(), LogError>;

    /// Commit the given positions for this session's group.
    async fn commit(&mut self, positions: &[CommitPosition]) -> Result<(), LogError>;

    /// Leave the group. Uncommitted messages are redelivered to the next session.
    async fn disconnect(self: Box<Self>) -> Result<(), LogError>;
}

/// Opens consumer sessions; called again after every restart.
#[async_trait]
pub trait ConsumerConnector: Send + Sync {
    async fn connect(&self, group_id: &str, topic: &str)
        -> Result<Box<dyn ConsumerSession>, LogError>;
}

/// Administrative view of consumer groups.
#[async_trait]
pub trait GroupAdmin: Send + Sync {
    async fn describe_group(&self, group_id: &str, topic: &str) -> Result<DrainStatus, LogError>;
}

/// One relational store holding one or more target tables.
#[async_trait]
pub trait TargetSink: Send + Sync {
    fn name(&self) -> &str;

    /// Insert the row, or overwrite the statement's update columns when the
    /// key exists. Must be idempotent per key.
    async fn upsert(&self, statement: &UpsertStatement, row: &UpsertRow) -> Result<(), SinkError>;
}

/// Field-level encryption used by the `encrypt` transform.
pub trait FieldCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, String>;
}
