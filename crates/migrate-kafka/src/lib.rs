//! Kafka adapter for the migration pipeline.
//!
//! Implements the message-log traits from `migrate-core` on top of rdkafka:
//!
//! - [`KafkaPublisher`]: keyed, ordered chunk publishing through one shared producer
//! - [`KafkaConnector`]: opens consumer-group sessions with manual offset commits
//! - [`KafkaGroupAdmin`]: committed offsets vs. watermarks for drain detection

/// Drain detection and topic creation
pub mod admin;
pub mod config;

/// Consumer sessions with manual offsets
///
/// One session per worker run; a restarted worker opens a new one and
/// resumes from the group's committed offsets.
pub mod consumer;
pub mod producer;

pub use admin::KafkaGroupAdmin;
pub use config::KafkaConfig;
pub use consumer::{KafkaConnector, KafkaConsumerSession};
pub use producer::KafkaPublisher;
