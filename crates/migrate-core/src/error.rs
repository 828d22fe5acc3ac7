//! Error taxonomy shared by every stage of the pipeline.
//!
//! Row-level errors (`ParseError`, `ValidationError`, `SinkError` with
//! [`SinkErrorKind::Rejected`]) are recovered locally and end up in the
//! error ledger. Only [`PipelineError::BatchFatal`] is allowed to stop a
//! batch from committing.

use thiserror::Error;

/// Failure to decode a message payload into a record envelope.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("message has no payload")]
    EmptyPayload,

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// A record that was decoded but cannot be written.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("record has no usable primary key in field '{0}'")]
    MissingPrimaryKey(String),

    #[error("required column '{column}' has no value")]
    RequiredColumn { column: String },
}

impl ValidationError {
    /// Short code written to the error ledger.
    pub fn code(&self) -> String {
        match self {
            ValidationError::MissingPrimaryKey(_) => "MISSING_PRIMARY_KEY".to_string(),
            ValidationError::RequiredColumn { column } => {
                format!("INVALID_{}", column.to_uppercase())
            }
        }
    }
}

/// How a sink failure should be treated by the batch consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkErrorKind {
    /// The sink could not be reached at all (pool, socket, driver state).
    Unavailable,
    /// The sink answered but refused this row (constraint, type, syntax).
    Rejected,
}

/// Failure of one upsert against one target sink.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{sink}: {message}")]
pub struct SinkError {
    pub sink: String,
    pub kind: SinkErrorKind,
    pub message: String,
}

impl SinkError {
    pub fn unavailable(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            kind: SinkErrorKind::Unavailable,
            message: message.into(),
        }
    }

    pub fn rejected(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            kind: SinkErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.kind == SinkErrorKind::Unavailable
    }
}

/// Errors raised by the message log (broker) adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LogError {
    #[error("failed to connect to message log: {0}")]
    Connect(String),

    #[error("failed to publish to topic '{topic}': {message}")]
    Publish { topic: String, message: String },

    #[error("failed to receive messages: {0}")]
    Receive(String),

    #[error("failed to commit offsets: {0}")]
    Commit(String),

    #[error("consumer session lost: {0}")]
    SessionLost(String),

    #[error("topic '{0}' not found")]
    TopicNotFound(String),

    #[error("failed to describe consumer group '{group}': {message}")]
    Describe { group: String, message: String },
}

/// Errors raised by the paged source reader.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("source request failed: {0}")]
    Request(String),

    #[error("source request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("source returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("source response could not be decoded: {0}")]
    Decode(String),
}

/// Failure of a whole extraction run; carries the cursor so a retry can resume.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("extraction of '{table}' failed at offset {offset} after {records_sent} records: {source}")]
pub struct ExtractionError {
    pub table: String,
    pub offset: u64,
    pub records_sent: u64,
    #[source]
    pub source: SourceError,
}

/// Errors that end a consumer run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// None of the batch's outcomes can be trusted; offsets stay uncommitted.
    #[error("batch-fatal failure on '{sink}': {message}")]
    BatchFatal { sink: String, message: String },

    #[error(transparent)]
    Log(#[from] LogError),
}

/// Invalid run configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid identifier '{0}': only ASCII letters, digits and '_' are allowed")]
    InvalidIdentifier(String),

    #[error("job '{job}': {message}")]
    InvalidJob { job: String, message: String },

    #[error("duplicate job name '{0}'")]
    DuplicateJob(String),

    #[error("unknown connection '{connection}' referenced by job '{job}'")]
    UnknownConnection { job: String, connection: String },
}
