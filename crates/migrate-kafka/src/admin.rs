use crate::config::KafkaConfig;
use async_trait::async_trait;
use migrate_core::{DrainStatus, GroupAdmin, LogError, PartitionOffsets};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

/// Group and topic administration: drain detection and topic creation.
#[derive(Debug, Clone)]
pub struct KafkaGroupAdmin {
    config: KafkaConfig,
}

impl KafkaGroupAdmin {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    /// Create the topic if it doesn't exist.
    pub async fn ensure_topic(
        &self,
        topic: &str,
        partitions: i32,
        replication: i32,
    ) -> Result<(), LogError> {
        let admin_client: AdminClient<DefaultClientContext> = self
            .config
            .base()
            .create()
            .map_err(|e| LogError::Connect(format!("Failed to create admin client: {e}")))?;

        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(replication));
        let opts = AdminOptions::new().operation_timeout(Some(self.config.admin_timeout));

        let results = admin_client
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(|e| LogError::Connect(format!("Failed to create topic {topic}: {e}")))?;

        for result in results {
            match result {
                Ok(topic_name) => info!("Topic '{topic_name}' created"),
                Err((topic_name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!("Topic '{topic_name}' already exists")
                }
                Err((topic_name, err)) => {
                    return Err(LogError::Connect(format!(
                        "Failed to create topic {topic_name}: {err}"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl GroupAdmin for KafkaGroupAdmin {
    async fn describe_group(&self, group_id: &str, topic: &str) -> Result<DrainStatus, LogError> {
        let config = self.config.clone();
        let group = group_id.to_string();
        let topic = topic.to_string();

        // Metadata, watermark and committed-offset lookups are blocking calls.
        tokio::task::spawn_blocking(move || describe_blocking(&config, &group, &topic))
            .await
            .map_err(|e| LogError::Describe {
                group: group_id.to_string(),
                message: format!("describe task failed: {e}"),
            })?
    }
}

fn describe_blocking(
    config: &KafkaConfig,
    group_id: &str,
    topic: &str,
) -> Result<DrainStatus, LogError> {
    let describe_err = |message: String| LogError::Describe {
        group: group_id.to_string(),
        message,
    };
    let timeout = config.admin_timeout;

    // Never subscribes, so it does not join the group it inspects.
    let consumer: BaseConsumer = config
        .consumer_config(group_id)
        .create()
        .map_err(|e| describe_err(format!("failed to create admin consumer: {e}")))?;

    let metadata = consumer
        .fetch_metadata(Some(topic), timeout)
        .map_err(|e| describe_err(format!("failed to fetch metadata: {e}")))?;

    let Some(topic_metadata) = metadata.topics().iter().find(|t| t.name() == topic) else {
        return Ok(DrainStatus::from_partitions(group_id, Vec::new()));
    };

    match topic_metadata.error().map(RDKafkaErrorCode::from) {
        None => {}
        // Nothing was ever published to it.
        Some(RDKafkaErrorCode::UnknownTopicOrPartition) => {
            debug!(topic, "Topic does not exist yet");
            return Ok(DrainStatus::from_partitions(group_id, Vec::new()));
        }
        Some(code) => return Err(describe_err(format!("topic metadata error: {code}"))),
    }

    let partition_ids: Vec<i32> = topic_metadata.partitions().iter().map(|p| p.id()).collect();

    let mut tpl = TopicPartitionList::new();
    for id in &partition_ids {
        tpl.add_partition(topic, *id);
    }
    let committed = consumer
        .committed_offsets(tpl, timeout)
        .map_err(|e| describe_err(format!("failed to fetch committed offsets: {e}")))?;

    let mut partitions = Vec::with_capacity(partition_ids.len());
    for id in partition_ids {
        let (log_start, log_end) = consumer
            .fetch_watermarks(topic, id, timeout)
            .map_err(|e| describe_err(format!("failed to fetch watermarks for partition {id}: {e}")))?;

        let committed_offset = committed
            .find_partition(topic, id)
            .and_then(|elem| committed_position(elem.offset()));

        partitions.push(PartitionOffsets {
            partition: id,
            log_start,
            log_end,
            committed: committed_offset,
        });
    }

    Ok(DrainStatus::from_partitions(group_id, partitions))
}

/// Only a concrete offset counts as a commit; `Invalid` means none yet.
fn committed_position(offset: Offset) -> Option<i64> {
    match offset {
        Offset::Offset(n) if n >= 0 => Some(n),
        _ => None,
    }
}
