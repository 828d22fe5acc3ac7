//! Builds live collaborators from a validated run file.

use crate::config::MigrationConfig;
use anyhow::Context;
use migrate_core::{ErrorLedger, FieldCipher, LogOnlyLedger, TargetSink};
use migrate_http_source::HttpSourceReader;
use migrate_kafka::{KafkaConnector, KafkaGroupAdmin, KafkaPublisher};
use migrate_mysql::{pool_from_url, MySqlErrorLedger, MySqlSink};
use migrate_pipeline::{AesGcmCipher, PipelineContext, SinkRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a run needs, plus the pools to close on exit.
pub struct Connections {
    pub context: PipelineContext,
    sinks: Vec<MySqlSink>,
}

impl Connections {
    /// Close every MySQL pool. Failures are logged.
    pub async fn close(self) {
        for sink in self.sinks {
            let name = sink.name().to_string();
            if let Err(e) = sink.disconnect().await {
                warn!(connection = %name, "Failed to close MySQL pool: {e}");
            }
        }
    }
}

pub async fn connect(config: &MigrationConfig) -> anyhow::Result<Connections> {
    let kafka = config.kafka.to_kafka_config();
    let publisher = KafkaPublisher::new(&kafka).context("Failed to create Kafka producer")?;
    let admin = Arc::new(KafkaGroupAdmin::new(kafka.clone()));

    if let Some(topics) = config.kafka.create_topics {
        for job in &config.jobs {
            let topic = job.to_job_spec().topic;
            admin
                .ensure_topic(&topic, topics.partitions, topics.replication)
                .await
                .with_context(|| format!("Failed to create topic {topic}"))?;
        }
    }

    let source = HttpSourceReader::new(&config.source.url, config.source.timeout)
        .context("Failed to build source client")?;

    let mut registry = SinkRegistry::new();
    let mut sinks = Vec::new();
    for (name, connection) in &config.connections {
        let url = connection.resolve_url(name)?;
        let pool = pool_from_url(&url)
            .with_context(|| format!("Invalid MySQL URL for connection '{name}'"))?;
        let sink = MySqlSink::new(name, pool);
        registry.insert(name, Arc::new(sink.clone()));
        sinks.push(sink);
    }

    let ledger: Arc<dyn ErrorLedger> = match &config.error_ledger {
        Some(section) => {
            let sink = sinks
                .iter()
                .find(|s| s.name() == section.connection)
                .with_context(|| {
                    format!("error_ledger connection '{}' not found", section.connection)
                })?;
            info!(table = %section.table, "Recording row failures in ledger table");
            Arc::new(MySqlErrorLedger::new(sink.pool().clone(), section.table.clone()))
        }
        None => {
            warn!("No error_ledger configured, row failures are only logged");
            Arc::new(LogOnlyLedger)
        }
    };

    let cipher: Option<Arc<dyn FieldCipher>> = match &config.encryption {
        Some(section) => {
            let material = std::env::var(&section.key_env).with_context(|| {
                format!("Encryption key variable {} is not set", section.key_env)
            })?;
            let cipher = AesGcmCipher::from_key_material(&material)
                .with_context(|| format!("Invalid encryption key in {}", section.key_env))?;
            Some(Arc::new(cipher))
        }
        None => None,
    };

    let context = PipelineContext {
        source: Arc::new(source),
        publisher: Arc::new(publisher),
        connector: Arc::new(KafkaConnector::new(kafka)),
        admin,
        sinks: registry,
        ledger,
        cipher,
    };

    Ok(Connections { context, sinks })
}
