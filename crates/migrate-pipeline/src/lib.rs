//! The migration engine.
//!
//! One generic pipeline, parameterized by [`JobSpec`](migrate_core::JobSpec):
//!
//! - [`extractor`]: pages rows out of the source and publishes keyed messages
//! - [`consumer`]: consumes them in batches and upserts into every target
//! - [`supervisor`]: runs each job's consumer as a restartable background task
//! - [`sequencer`]: runs jobs one at a time, gating each on consumer-group drain

pub mod cipher;
pub mod consumer;
pub mod context;
pub mod extractor;
pub mod key;
pub mod sequencer;
pub mod supervisor;
pub mod testing;
pub mod transform;

pub use cipher::AesGcmCipher;
pub use consumer::{BatchConsumer, BatchReport, ConsumerSettings};
pub use context::{PipelineContext, SinkRegistry};
pub use extractor::{ExtractionReport, Extractor, ExtractorSettings};
pub use sequencer::{
    DrainOutcome, JobOutcome, JobPhase, JobReport, RunMode, Sequencer, SequencerSettings,
    SkipReason,
};
pub use supervisor::{
    RestartPolicy, StopOutcome, Supervisor, SupervisorError, WorkerControl, WorkerFn,
    WorkerState, WorkerStatus,
};
pub use transform::{RowBuilder, RowOutcome};
