use crate::config::KafkaConfig;
use async_trait::async_trait;
use futures::future::join_all;
use migrate_core::{LogError, MessagePublisher, OutboundMessage};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;
use tracing::debug;

/// Publisher backed by a single shared `FutureProducer`.
///
/// Constructed once per process and shared by every job's extractor.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    message_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self, LogError> {
        let producer: FutureProducer = config
            .producer_config()
            .create()
            .map_err(|e| LogError::Connect(format!("Failed to create producer: {e}")))?;

        Ok(Self {
            producer,
            message_timeout: config.message_timeout,
        })
    }
}

#[async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, messages: &[OutboundMessage]) -> Result<(), LogError> {
        // Futures are polled in slice order, so records are enqueued in order.
        let deliveries = messages.iter().map(|message| {
            let record = FutureRecord::to(topic)
                .key(message.key.as_bytes())
                .payload(message.value.as_bytes());
            self.producer.send(record, self.message_timeout)
        });

        let results = join_all(deliveries).await;
        let failed: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|(err, _)| err.to_string()))
            .collect();

        if let Some(first) = failed.first() {
            return Err(LogError::Publish {
                topic: topic.to_string(),
                message: format!("{} of {} messages failed: {first}", failed.len(), messages.len()),
            });
        }

        debug!(topic, count = messages.len(), "Published chunk");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LogError> {
        let producer = self.producer.clone();
        let timeout = self.message_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| LogError::Connect(format!("Flush task failed: {e}")))?
            .map_err(|e| LogError::Connect(format!("Failed to flush producer: {e}")))
    }
}
