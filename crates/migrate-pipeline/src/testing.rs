//! In-memory collaborators for exercising the pipeline without a broker or
//! a database.
//!
//! [`MemoryLog`] is a partitioned log with consumer groups and committed
//! offsets; a new session resumes from the group's commits, so uncommitted
//! batches are redelivered exactly like they are by Kafka.

use async_trait::async_trait;
use migrate_core::{
    CommitPosition, ConflictAction, ConsumerConnector, ConsumerSession, DrainStatus, ErrorLedger,
    ErrorLedgerEntry, GroupAdmin, InboundMessage, LogError, MessagePublisher, OutboundMessage,
    PartitionOffsets, SinkError, SourceError, SourceReader, SqlValue, TargetSink, UpsertRow,
    UpsertStatement,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
struct Stored {
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
}

#[derive(Default)]
struct LogState {
    topics: HashMap<String, Vec<Vec<Stored>>>,
    committed: HashMap<(String, String, i32), i64>,
    failing_publishes: usize,
    connects: usize,
    disconnects: usize,
    commits: usize,
    heartbeats: usize,
}

/// Partitioned in-memory message log.
#[derive(Clone)]
pub struct MemoryLog {
    partitions: i32,
    state: Arc<Mutex<LogState>>,
}

impl MemoryLog {
    pub fn new(partitions: i32) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Arc::new(Mutex::new(LogState::default())),
        }
    }

    fn partition_for(&self, key: &[u8]) -> i32 {
        let sum: u32 = key.iter().map(|b| u32::from(*b)).sum();
        (sum % self.partitions as u32) as i32
    }

    fn append(&self, topic: &str, partition: i32, stored: Stored) {
        let mut state = lock(&self.state);
        let partitions = self.partitions as usize;
        let log = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions]);
        log[partition as usize].push(stored);
    }

    /// Append a raw message, bypassing JSON encoding.
    pub fn push_raw(&self, topic: &str, key: &str, payload: Option<&[u8]>) {
        let partition = self.partition_for(key.as_bytes());
        self.append(
            topic,
            partition,
            Stored {
                key: Some(key.as_bytes().to_vec()),
                payload: payload.map(<[u8]>::to_vec),
            },
        );
    }

    /// Make the next `n` publish calls fail.
    pub fn fail_next_publishes(&self, n: usize) {
        lock(&self.state).failing_publishes = n;
    }

    /// Every message on the topic, in partition then offset order.
    pub fn messages(&self, topic: &str) -> Vec<InboundMessage> {
        let state = lock(&self.state);
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(p, log)| {
                log.iter().enumerate().map(move |(o, m)| InboundMessage {
                    topic: topic.to_string(),
                    partition: p as i32,
                    offset: o as i64,
                    key: m.key.clone(),
                    payload: m.payload.clone(),
                })
            })
            .collect()
    }

    pub fn committed(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        lock(&self.state)
            .committed
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .copied()
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn disconnects(&self) -> usize {
        lock(&self.state).disconnects
    }

    pub fn commits(&self) -> usize {
        lock(&self.state).commits
    }

    pub fn heartbeats(&self) -> usize {
        lock(&self.state).heartbeats
    }
}

#[async_trait]
impl MessagePublisher for MemoryLog {
    async fn publish(&self, topic: &str, messages: &[OutboundMessage]) -> Result<(), LogError> {
        {
            let mut state = lock(&self.state);
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                return Err(LogError::Publish {
                    topic: topic.to_string(),
                    message: "injected publish failure".to_string(),
                });
            }
        }
        for message in messages {
            let partition = self.partition_for(message.key.as_bytes());
            self.append(
                topic,
                partition,
                Stored {
                    key: Some(message.key.as_bytes().to_vec()),
                    payload: Some(message.value.as_bytes().to_vec()),
                },
            );
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LogError> {
        Ok(())
    }
}

#[async_trait]
impl ConsumerConnector for MemoryLog {
    async fn connect(
        &self,
        group_id: &str,
        topic: &str,
    ) -> Result<Box<dyn ConsumerSession>, LogError> {
        let cursors = {
            let mut state = lock(&self.state);
            state.connects += 1;
            (0..self.partitions)
                .map(|p| {
                    state
                        .committed
                        .get(&(group_id.to_string(), topic.to_string(), p))
                        .copied()
                        .unwrap_or(0)
                })
                .collect()
        };
        Ok(Box::new(MemorySession {
            log: self.clone(),
            group_id: group_id.to_string(),
            topic: topic.to_string(),
            cursors,
        }))
    }
}

#[async_trait]
impl GroupAdmin for MemoryLog {
    async fn describe_group(&self, group_id: &str, topic: &str) -> Result<DrainStatus, LogError> {
        let state = lock(&self.state);
        let partitions = state
            .topics
            .get(topic)
            .map(|logs| {
                logs.iter()
                    .enumerate()
                    .map(|(p, log)| PartitionOffsets {
                        partition: p as i32,
                        log_start: 0,
                        log_end: log.len() as i64,
                        committed: state
                            .committed
                            .get(&(group_id.to_string(), topic.to_string(), p as i32))
                            .copied(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(DrainStatus::from_partitions(group_id, partitions))
    }
}

/// One consumer-group membership on a [`MemoryLog`].
pub struct MemorySession {
    log: MemoryLog,
    group_id: String,
    topic: String,
    cursors: Vec<i64>,
}

#[async_trait]
impl ConsumerSession for MemorySession {
    async fn next_batch(&mut self, max: usize) -> Result<Vec<InboundMessage>, LogError> {
        let batch: Vec<InboundMessage> = {
            let state = lock(&self.log.state);
            let mut batch = Vec::new();
            if let Some(partitions) = state.topics.get(&self.topic) {
                for (p, log) in partitions.iter().enumerate() {
                    let start = self.cursors[p] as usize;
                    for (offset, m) in log.iter().enumerate().skip(start) {
                        if batch.len() >= max {
                            break;
                        }
                        batch.push(InboundMessage {
                            topic: self.topic.clone(),
                            partition: p as i32,
                            offset: offset as i64,
                            key: m.key.clone(),
                            payload: m.payload.clone(),
                        });
                    }
                }
            }
            batch
        };

        if batch.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        for m in &batch {
            let cursor = &mut self.cursors[m.partition as usize];
            *cursor = (*cursor).max(m.offset + 1);
        }
        Ok(batch)
    }

    async fn heartbeat(&self) -> Result<(), LogError> {
        lock(&self.log.state).heartbeats += 1;
        Ok(())
    }

    async fn commit(&mut self, positions: &[CommitPosition]) -> Result<(), LogError> {
        let mut state = lock(&self.log.state);
        state.commits += 1;
        for position in positions {
            state.committed.insert(
                (self.group_id.clone(), position.topic.clone(), position.partition),
                position.next_offset,
            );
        }
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> Result<(), LogError> {
        lock(&self.log.state).disconnects += 1;
        Ok(())
    }
}

/// Paged in-memory source.
#[derive(Clone, Default)]
pub struct MemorySource {
    rows: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    failures: Arc<Mutex<HashMap<u64, usize>>>,
    fetches: Arc<Mutex<Vec<u64>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, table: &str, rows: Vec<Value>) -> Self {
        lock(&self.rows).insert(table.to_string(), rows);
        self
    }

    /// Fail the next `times` fetches that start at `offset`.
    pub fn fail_at(&self, offset: u64, times: usize) {
        lock(&self.failures).insert(offset, times);
    }

    /// Offsets of every fetch so far.
    pub fn fetches(&self) -> Vec<u64> {
        lock(&self.fetches).clone()
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn fetch(&self, table: &str, limit: u64, offset: u64) -> Result<Vec<Value>, SourceError> {
        lock(&self.fetches).push(offset);
        {
            let mut failures = lock(&self.failures);
            if let Some(remaining) = failures.get_mut(&offset) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SourceError::Status {
                        status: 503,
                        message: "injected source failure".to_string(),
                    });
                }
            }
        }
        let rows = lock(&self.rows);
        let table_rows = rows.get(table).map(Vec::as_slice).unwrap_or_default();
        Ok(table_rows
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

type StoredRow = BTreeMap<String, SqlValue>;

#[derive(Default)]
struct SinkState {
    tables: HashMap<String, BTreeMap<String, StoredRow>>,
    rejected_keys: HashSet<String>,
    unavailable: bool,
    writes: usize,
}

/// Upsert sink with the same conflict semantics as the MySQL renderer.
#[derive(Clone)]
pub struct MemorySink {
    name: String,
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(SinkState::default())),
        }
    }

    /// Refuse writes for this key with a row-level error.
    pub fn reject_key(&self, key: &str) {
        lock(&self.state).rejected_keys.insert(key.to_string());
    }

    /// Fail every write as if the database could not be reached.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    pub fn row(&self, table: &str, key: &str) -> Option<StoredRow> {
        lock(&self.state).tables.get(table)?.get(key).cloned()
    }

    pub fn rows(&self, table: &str) -> BTreeMap<String, StoredRow> {
        lock(&self.state)
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        lock(&self.state).writes
    }
}

#[async_trait]
impl TargetSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, statement: &UpsertStatement, row: &UpsertRow) -> Result<(), SinkError> {
        let mut state = lock(&self.state);
        if state.unavailable {
            return Err(SinkError::unavailable(&self.name, "connection refused"));
        }
        if state.rejected_keys.contains(&row.key) {
            return Err(SinkError::rejected(
                &self.name,
                format!("constraint violation for key {}", row.key),
            ));
        }

        let incoming: StoredRow = statement
            .columns
            .iter()
            .map(|c| c.to_string())
            .zip(row.values.iter().cloned())
            .collect();

        let table = state.tables.entry(statement.table.to_string()).or_default();
        match table.get_mut(&row.key) {
            None => {
                table.insert(row.key.clone(), incoming);
            }
            Some(existing) => {
                for update in &statement.updates {
                    let column = update.column.to_string();
                    let Some(value) = incoming.get(&column) else {
                        continue;
                    };
                    if update.action == ConflictAction::Coalesce && value.is_null() {
                        continue;
                    }
                    existing.insert(column, value.clone());
                }
            }
        }
        state.writes += 1;
        Ok(())
    }
}

/// Error ledger that keeps every entry.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    entries: Arc<Mutex<Vec<ErrorLedgerEntry>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ErrorLedgerEntry> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl ErrorLedger for MemoryLedger {
    async fn record(&self, entry: ErrorLedgerEntry) {
        lock(&self.entries).push(entry);
    }
}
