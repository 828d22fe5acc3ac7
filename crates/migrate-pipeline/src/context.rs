//! Explicit client objects shared by every job of a run.

use migrate_core::{
    ConfigError, ConsumerConnector, ErrorLedger, FieldCipher, GroupAdmin, JobSpec,
    MessagePublisher, SourceReader, TargetSink,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Target sinks by connection name.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    sinks: HashMap<String, Arc<dyn TargetSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, sink: Arc<dyn TargetSink>) {
        self.sinks.insert(name.into(), sink);
    }

    pub fn with(mut self, name: impl Into<String>, sink: Arc<dyn TargetSink>) -> Self {
        self.insert(name, sink);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TargetSink>> {
        self.sinks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sinks.contains_key(name)
    }

    /// Resolve every target of the job to its sink.
    pub fn resolve(&self, job: &JobSpec) -> Result<Vec<Arc<dyn TargetSink>>, ConfigError> {
        job.targets
            .iter()
            .map(|target| {
                self.get(&target.connection)
                    .ok_or_else(|| ConfigError::UnknownConnection {
                        job: job.name.clone(),
                        connection: target.connection.clone(),
                    })
            })
            .collect()
    }
}

/// Collaborators built once per process and passed into each job's workers.
#[derive(Clone)]
pub struct PipelineContext {
    pub source: Arc<dyn SourceReader>,
    pub publisher: Arc<dyn MessagePublisher>,
    pub connector: Arc<dyn ConsumerConnector>,
    pub admin: Arc<dyn GroupAdmin>,
    pub sinks: SinkRegistry,
    pub ledger: Arc<dyn ErrorLedger>,
    pub cipher: Option<Arc<dyn FieldCipher>>,
}
