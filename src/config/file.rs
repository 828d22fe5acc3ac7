//! The YAML run file: connections, timing and the ordered job list.

use super::duration;
use anyhow::Context;
use migrate_core::{
    ColumnIdent, ColumnMapping, ConfigError, FieldTransform, FilterPolicy, JobSpec, TableIdent,
    TargetSpec,
};
use migrate_kafka::KafkaConfig;
use migrate_pipeline::{
    ConsumerSettings, ExtractorSettings, RestartPolicy, RunMode, SequencerSettings,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_cycle_delay", deserialize_with = "duration::deserialize")]
    pub cycle_delay: Duration,
    #[serde(default)]
    pub kafka: KafkaSection,
    pub source: SourceSection,
    /// Named MySQL connections that targets and the ledger refer to.
    pub connections: BTreeMap<String, ConnectionConfig>,
    /// Without a ledger table, row failures are only logged.
    #[serde(default)]
    pub error_ledger: Option<LedgerSection>,
    #[serde(default)]
    pub sequencer: SequencerSection,
    #[serde(default)]
    pub restart: RestartSection,
    #[serde(default)]
    pub encryption: Option<EncryptionSection>,
    pub jobs: Vec<JobConfig>,
}

fn default_cycle_delay() -> Duration {
    SequencerSettings::default().cycle_delay
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KafkaSection {
    pub brokers: String,
    pub client_id: String,
    #[serde(deserialize_with = "duration::deserialize")]
    pub session_timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub heartbeat_interval: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub max_poll_interval: Duration,
    pub auto_offset_reset: String,
    #[serde(deserialize_with = "duration::deserialize")]
    pub message_timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub poll_timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub admin_timeout: Duration,
    /// Create missing job topics before running.
    pub create_topics: Option<TopicSection>,
}

impl Default for KafkaSection {
    fn default() -> Self {
        let defaults = KafkaConfig::default();
        Self {
            brokers: defaults.brokers,
            client_id: defaults.client_id,
            session_timeout: Duration::from_millis(defaults.session_timeout_ms.into()),
            heartbeat_interval: Duration::from_millis(defaults.heartbeat_interval_ms.into()),
            max_poll_interval: Duration::from_millis(defaults.max_poll_interval_ms.into()),
            auto_offset_reset: defaults.auto_offset_reset,
            message_timeout: defaults.message_timeout,
            poll_timeout: defaults.poll_timeout,
            admin_timeout: defaults.admin_timeout,
            create_topics: None,
        }
    }
}

impl KafkaSection {
    pub fn to_kafka_config(&self) -> KafkaConfig {
        KafkaConfig {
            brokers: self.brokers.clone(),
            client_id: self.client_id.clone(),
            session_timeout_ms: millis(self.session_timeout),
            heartbeat_interval_ms: millis(self.heartbeat_interval),
            max_poll_interval_ms: millis(self.max_poll_interval),
            auto_offset_reset: self.auto_offset_reset.clone(),
            message_timeout: self.message_timeout,
            poll_timeout: self.poll_timeout,
            admin_timeout: self.admin_timeout,
        }
    }
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicSection {
    pub partitions: i32,
    #[serde(default = "default_replication")]
    pub replication: i32,
}

fn default_replication() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSection {
    /// Endpoint queried with `table`, `limit` and `offset`.
    pub url: String,
    #[serde(deserialize_with = "duration::deserialize")]
    pub timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub page_delay: Duration,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: migrate_http_source::DEFAULT_FETCH_TIMEOUT,
            page_delay: ExtractorSettings::default().page_delay,
        }
    }
}

/// A database URL given inline or through an environment variable.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_env: Option<String>,
}

impl ConnectionConfig {
    pub fn resolve_url(&self, name: &str) -> anyhow::Result<String> {
        match (&self.url, &self.url_env) {
            (Some(url), None) => Ok(url.clone()),
            (None, Some(var)) => std::env::var(var).with_context(|| {
                format!("Connection '{name}': environment variable {var} is not set")
            }),
            _ => anyhow::bail!("Connection '{name}' needs exactly one of url or url_env"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerSection {
    pub connection: String,
    pub table: TableIdent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequencerSection {
    /// Extra extractor attempts after the first failure.
    pub producer_retries: u32,
    #[serde(deserialize_with = "duration::deserialize")]
    pub producer_backoff: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub drain_poll_interval: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub drain_max_wait: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub consumer_disconnect_timeout: Duration,
}

impl Default for SequencerSection {
    fn default() -> Self {
        let defaults = SequencerSettings::default();
        Self {
            producer_retries: defaults.producer_retries,
            producer_backoff: defaults.producer_backoff,
            drain_poll_interval: defaults.drain_poll_interval,
            drain_max_wait: defaults.drain_max_wait,
            consumer_disconnect_timeout: defaults.consumer.disconnect_timeout,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestartSection {
    pub max_restarts: u32,
    #[serde(deserialize_with = "duration::deserialize")]
    pub backoff: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub max_backoff: Duration,
    /// How long a stopping consumer may take before it is aborted.
    #[serde(deserialize_with = "duration::deserialize")]
    pub stop_grace: Duration,
}

impl Default for RestartSection {
    fn default() -> Self {
        let defaults = RestartPolicy::default();
        Self {
            max_restarts: defaults.max_restarts,
            backoff: defaults.backoff,
            max_backoff: defaults.max_backoff,
            stop_grace: Duration::from_secs(30),
        }
    }
}

impl RestartSection {
    pub fn policy(&self) -> RestartPolicy {
        RestartPolicy {
            max_restarts: self.max_restarts,
            backoff: self.backoff,
            max_backoff: self.max_backoff,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionSection {
    /// Environment variable holding the 32-byte key (raw or hex).
    pub key_env: String,
}

/// One entity migration as written in the run file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub name: String,
    /// Defaults to the job name.
    #[serde(default)]
    pub source_table: Option<String>,
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default)]
    pub key_column: Option<ColumnIdent>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    pub targets: Vec<TargetSpec>,
    pub columns: Vec<ColumnMapping>,
    #[serde(default)]
    pub filters: Vec<FilterPolicy>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub publish_chunk_size: Option<usize>,
    #[serde(default, deserialize_with = "duration::deserialize_option")]
    pub inactivity_timeout: Option<Duration>,
    #[serde(default)]
    pub migration_step: Option<String>,
}

fn default_key_field() -> String {
    "id".to_string()
}

impl JobConfig {
    pub fn to_job_spec(&self) -> JobSpec {
        let source_table = self.source_table.as_deref().unwrap_or(&self.name);
        let mut job = JobSpec::new(&self.name, source_table, &self.key_field);
        if let Some(topic) = &self.topic {
            job = job.with_topic(topic);
        }
        if let Some(group_id) = &self.group_id {
            job = job.with_group(group_id);
        }
        if let Some(batch_size) = self.batch_size {
            job = job.with_batch_size(batch_size);
        }
        if let Some(page_size) = self.page_size {
            job = job.with_page_size(page_size);
        }
        if let Some(chunk) = self.publish_chunk_size {
            job = job.with_publish_chunk_size(chunk);
        }
        if let Some(timeout) = self.inactivity_timeout {
            job = job.with_inactivity_timeout(timeout);
        }
        job.key_column = self.key_column.clone();
        job.targets = self.targets.clone();
        job.columns = self.columns.clone();
        job.filters = self.filters.clone();
        job.migration_step = self.migration_step.clone();
        job
    }

    fn uses_encryption(&self) -> bool {
        self.columns
            .iter()
            .any(|c| c.transform == FieldTransform::Encrypt)
    }
}

impl MigrationConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(text).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source.url.trim().is_empty() {
            anyhow::bail!("source.url must be set");
        }
        if self.jobs.is_empty() {
            anyhow::bail!("at least one job is required");
        }
        for (name, connection) in &self.connections {
            if connection.url.is_some() == connection.url_env.is_some() {
                anyhow::bail!("Connection '{name}' needs exactly one of url or url_env");
            }
        }
        if let Some(ledger) = &self.error_ledger {
            if !self.connections.contains_key(&ledger.connection) {
                anyhow::bail!(
                    "error_ledger refers to unknown connection '{}'",
                    ledger.connection
                );
            }
        }

        let mut names = HashSet::new();
        for job in &self.jobs {
            if !names.insert(job.name.as_str()) {
                return Err(ConfigError::DuplicateJob(job.name.clone()).into());
            }
            let spec = job.to_job_spec();
            spec.validate()?;
            for target in &spec.targets {
                if !self.connections.contains_key(&target.connection) {
                    return Err(ConfigError::UnknownConnection {
                        job: spec.name.clone(),
                        connection: target.connection.clone(),
                    }
                    .into());
                }
            }
            if job.uses_encryption() && self.encryption.is_none() {
                anyhow::bail!(
                    "job '{}' uses the encrypt transform but no encryption key is configured",
                    job.name
                );
            }
        }
        Ok(())
    }

    pub fn job_specs(&self) -> Vec<JobSpec> {
        self.jobs.iter().map(JobConfig::to_job_spec).collect()
    }

    /// The named jobs in run-file order, or every job when `names` is empty.
    pub fn select_jobs(&self, names: &[String]) -> anyhow::Result<Vec<JobSpec>> {
        if let Some(unknown) = names
            .iter()
            .find(|n| !self.jobs.iter().any(|j| &j.name == *n))
        {
            anyhow::bail!("Unknown job '{unknown}'");
        }
        Ok(self
            .jobs
            .iter()
            .filter(|j| names.is_empty() || names.contains(&j.name))
            .map(JobConfig::to_job_spec)
            .collect())
    }

    pub fn job(&self, name: &str) -> anyhow::Result<JobSpec> {
        self.jobs
            .iter()
            .find(|j| j.name == name)
            .map(JobConfig::to_job_spec)
            .with_context(|| format!("Unknown job '{name}'"))
    }

    pub fn sequencer_settings(&self) -> SequencerSettings {
        SequencerSettings {
            mode: self.mode,
            cycle_delay: self.cycle_delay,
            producer_retries: self.sequencer.producer_retries,
            producer_backoff: self.sequencer.producer_backoff,
            drain_poll_interval: self.sequencer.drain_poll_interval,
            drain_max_wait: self.sequencer.drain_max_wait,
            extractor: self.extractor_settings(),
            consumer: self.consumer_settings(),
        }
    }

    pub fn extractor_settings(&self) -> ExtractorSettings {
        ExtractorSettings {
            page_delay: self.source.page_delay,
        }
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            disconnect_timeout: self.sequencer.consumer_disconnect_timeout,
        }
    }
}
