use crate::config::KafkaConfig;
use async_trait::async_trait;
use migrate_core::{CommitPosition, ConsumerConnector, ConsumerSession, InboundMessage, LogError};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Wait for follow-up messages once the first one of a batch has arrived.
const FILL_TIMEOUT: Duration = Duration::from_millis(10);

/// True once more than half of `max.poll.interval.ms` has passed since the
/// last poll. Past the full interval the broker evicts the member.
fn poll_interval_at_risk(since_poll: Duration, max_poll_interval: Duration) -> bool {
    since_poll > max_poll_interval / 2
}

/// Opens one consumer-group membership per call.
///
/// The supervisor calls this again after every worker restart; the fresh
/// session resumes from the group's committed offsets.
#[derive(Debug, Clone)]
pub struct KafkaConnector {
    config: KafkaConfig,
}

impl KafkaConnector {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConsumerConnector for KafkaConnector {
    async fn connect(
        &self,
        group_id: &str,
        topic: &str,
    ) -> Result<Box<dyn ConsumerSession>, LogError> {
        let session = KafkaConsumerSession::new(&self.config, group_id, topic)?;
        Ok(Box::new(session))
    }
}

/// Kafka consumer with manual offset management.
pub struct KafkaConsumerSession {
    consumer: StreamConsumer,
    group_id: String,
    topic: String,
    poll_timeout: Duration,
    max_poll_interval: Duration,
    last_poll: Instant,
}

impl KafkaConsumerSession {
    pub fn new(config: &KafkaConfig, group_id: &str, topic: &str) -> Result<Self, LogError> {
        let consumer: StreamConsumer = config
            .consumer_config(group_id)
            .create()
            .map_err(|e| LogError::Connect(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| LogError::Connect(format!("Failed to subscribe to topic: {e}")))?;

        info!(group_id, topic, "Consumer subscribed");

        Ok(Self {
            consumer,
            group_id: group_id.to_string(),
            topic: topic.to_string(),
            poll_timeout: config.poll_timeout,
            max_poll_interval: Duration::from_millis(config.max_poll_interval_ms.into()),
            last_poll: Instant::now(),
        })
    }

    fn to_inbound(msg: &BorrowedMessage<'_>) -> InboundMessage {
        InboundMessage {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()),
        }
    }
}

#[async_trait]
impl ConsumerSession for KafkaConsumerSession {
    async fn next_batch(&mut self, max: usize) -> Result<Vec<InboundMessage>, LogError> {
        let mut messages = Vec::new();
        self.last_poll = Instant::now();

        match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
            Ok(Ok(msg)) => messages.push(Self::to_inbound(&msg)),
            Ok(Err(e)) => return Err(LogError::Receive(format!("Error receiving message: {e}"))),
            Err(_) => return Ok(messages),
        }

        while messages.len() < max {
            match tokio::time::timeout(FILL_TIMEOUT, self.consumer.recv()).await {
                Ok(Ok(msg)) => messages.push(Self::to_inbound(&msg)),
                _ => break,
            }
        }

        Ok(messages)
    }

    /// Surfaces a lost membership early and warns when the batch is close to
    /// `max.poll.interval.ms`.
    ///
    /// librdkafka sends session heartbeats from its own thread, so this does
    /// not extend the poll interval: only the next `next_batch` call does.
    /// A batch whose row writes outlast that interval gets the member evicted
    /// and the batch redelivered to the next session.
    async fn heartbeat(&self) -> Result<(), LogError> {
        let since_poll = self.last_poll.elapsed();
        if poll_interval_at_risk(since_poll, self.max_poll_interval) {
            warn!(
                group_id = %self.group_id,
                since_poll_ms = since_poll.as_millis() as u64,
                max_poll_interval_ms = self.max_poll_interval.as_millis() as u64,
                "Batch is close to max.poll.interval.ms, consider a smaller batch_size"
            );
        }
        self.consumer
            .assignment()
            .map(|_| ())
            .map_err(|e| LogError::SessionLost(e.to_string()))
    }

    async fn commit(&mut self, positions: &[CommitPosition]) -> Result<(), LogError> {
        if positions.is_empty() {
            return Ok(());
        }

        let mut tpl = TopicPartitionList::new();
        for position in positions {
            tpl.add_partition_offset(
                &position.topic,
                position.partition,
                Offset::Offset(position.next_offset),
            )
            .map_err(|e| LogError::Commit(format!("Failed to add partition offset: {e}")))?;
        }

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| LogError::Commit(format!("Failed to commit offsets: {e}")))?;

        debug!(group_id = %self.group_id, partitions = positions.len(), "Committed offsets");
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> Result<(), LogError> {
        self.consumer.unsubscribe();
        info!(group_id = %self.group_id, topic = %self.topic, "Consumer disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_at_risk() {
        let max = Duration::from_secs(300);
        assert!(!poll_interval_at_risk(Duration::from_secs(10), max));
        assert!(!poll_interval_at_risk(Duration::from_secs(150), max));
        assert!(poll_interval_at_risk(Duration::from_secs(151), max));
    }
}
