//! Run-file configuration.

pub mod duration;
mod file;

pub use duration::parse_duration;
pub use file::{
    ConnectionConfig, EncryptionSection, JobConfig, KafkaSection, LedgerSection,
    MigrationConfig, RestartSection, SequencerSection, SourceSection, TopicSection,
};
