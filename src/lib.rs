//! bridge-migrate
//!
//! Moves legacy tables into MySQL one entity at a time: rows are paged out of
//! the legacy source, published to a per-entity Kafka topic, and consumed in
//! batches into every configured target. A job only counts as finished once
//! its consumer group has drained the topic.
//!
//! # Crates
//!
//! - `migrate_core` - job specs, records, errors and collaborator traits
//! - `migrate_kafka` - publisher, consumer sessions and drain status on rdkafka
//! - `migrate_mysql` - upsert sink and error ledger on mysql_async
//! - `migrate_http_source` - paged source reader on reqwest
//! - `migrate_pipeline` - extractor, batch consumer, supervisor and sequencer
//!
//! # CLI Usage
//!
//! ```bash
//! # Run every job in order, once
//! bridge-migrate run --config migration.yaml
//!
//! # Keep cycling through the job list
//! bridge-migrate run --config migration.yaml --mode cycle
//!
//! # How far behind is a job's consumer group?
//! bridge-migrate drain-status --config migration.yaml --job feedback_track
//! ```

use clap::Parser;
use std::path::PathBuf;

pub mod config;
pub mod connect;

pub use config::MigrationConfig;

#[derive(Parser, Clone, Debug)]
pub struct ConfigOpts {
    /// Path to the YAML run file
    #[arg(
        long = "config",
        short = 'c',
        default_value = "migration.yaml",
        env = "BRIDGE_MIGRATE_CONFIG"
    )]
    pub path: PathBuf,
}

impl ConfigOpts {
    pub fn load(&self) -> anyhow::Result<MigrationConfig> {
        MigrationConfig::from_file(&self.path)
    }
}
