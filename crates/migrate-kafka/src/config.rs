use rdkafka::config::ClientConfig;
use std::time::Duration;

/// Connection settings shared by the publisher, consumer sessions and admin.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Client id reported to the brokers
    pub client_id: String,
    /// Session timeout in milliseconds
    ///
    /// Sink writes happen between polls, so this is generous: a consumer that
    /// misses it is evicted and its uncommitted batch goes to another member.
    pub session_timeout_ms: u32,
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u32,
    /// Maximum time between polls before the member is considered stuck
    pub max_poll_interval_ms: u32,
    /// Auto offset reset strategy ("earliest" or "latest")
    ///
    /// "earliest" so a new group reads every message already published.
    pub auto_offset_reset: String,
    /// Delivery timeout for published messages
    pub message_timeout: Duration,
    /// How long `next_batch` waits for the first message
    pub poll_timeout: Duration,
    /// Timeout for metadata, watermark and committed-offset requests
    pub admin_timeout: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            client_id: "bridge-migration".to_string(),
            session_timeout_ms: 60_000,
            heartbeat_interval_ms: 3_000,
            max_poll_interval_ms: 300_000,
            auto_offset_reset: "earliest".to_string(),
            message_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(1),
            admin_timeout: Duration::from_secs(10),
        }
    }
}

impl KafkaConfig {
    pub(crate) fn base(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id);
        config
    }

    pub(crate) fn producer_config(&self) -> ClientConfig {
        let mut config = self.base();
        config
            .set(
                "message.timeout.ms",
                self.message_timeout.as_millis().to_string(),
            )
            // Keeps per-partition order intact across internal retries.
            .set("enable.idempotence", "true");
        config
    }

    pub(crate) fn consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = self.base();
        config
            .set("group.id", group_id)
            // Offsets are committed explicitly once a batch is judged safe.
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set(
                "heartbeat.interval.ms",
                self.heartbeat_interval_ms.to_string(),
            )
            .set("max.poll.interval.ms", self.max_poll_interval_ms.to_string())
            .set("enable.partition.eof", "false");
        config
    }
}
