//! Shared contracts for the bridge-migrate pipeline.
//!
//! This crate holds the data model (job specs, record envelopes, upsert
//! rows, drain status, error-ledger entries), the error taxonomy, and the
//! traits the pipeline uses to talk to the source, the message log, the
//! target sinks and the field cipher. It has no I/O of its own.

pub mod drain;
pub mod error;
pub mod filter;
pub mod identifier;
pub mod job;
pub mod ledger;
pub mod record;
pub mod statement;
pub mod timestamp;
pub mod traits;

pub use drain::{DrainStatus, PartitionOffsets};
pub use error::{
    ConfigError, ExtractionError, LogError, ParseError, PipelineError, SinkError, SinkErrorKind,
    SourceError, ValidationError,
};
pub use filter::{FilterPolicy, MissingField};
pub use identifier::{ColumnIdent, TableIdent};
pub use job::{ColumnMapping, ConflictAction, FieldTransform, JobSpec, TargetSpec};
pub use ledger::{ErrorLedger, ErrorLedgerEntry, LogOnlyLedger};
pub use record::{RecordEnvelope, SqlValue, UpsertRow};
pub use statement::{ConflictUpdate, UpsertStatement};
pub use traits::{
    CommitPosition, ConsumerConnector, ConsumerSession, FieldCipher, GroupAdmin, InboundMessage,
    MessagePublisher, OutboundMessage, SourceReader, TargetSink,
};
