//! Command-line interface for bridge-migrate
//!
//! # Usage Examples
//!
//! ```bash
//! # Full sequence: for each job start the consumer, extract, wait for drain
//! bridge-migrate run --config migration.yaml
//! bridge-migrate run --config migration.yaml --mode cycle --job feedback_track
//!
//! # Re-run one extraction from where a failed run stopped
//! bridge-migrate extract --config migration.yaml --job feedback_track --start-offset 20000
//!
//! # Consume one job's topic until Ctrl-C
//! bridge-migrate consume --config migration.yaml --job feedback_track
//!
//! # Lag per partition of one job's consumer group
//! bridge-migrate drain-status --config migration.yaml --job feedback_track
//!
//! # Validate the run file without connecting to anything
//! bridge-migrate check-config --config migration.yaml
//! ```
//!
//! Connection URLs can be kept out of the run file with `url_env`; the
//! config path itself falls back to `BRIDGE_MIGRATE_CONFIG`.

use anyhow::Context;
use bridge_migrate::connect::connect;
use bridge_migrate::ConfigOpts;
use clap::{Parser, Subcommand, ValueEnum};
use migrate_core::GroupAdmin;
use migrate_kafka::KafkaGroupAdmin;
use migrate_pipeline::{BatchConsumer, Extractor, JobOutcome, RunMode, Sequencer, Supervisor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bridge-migrate")]
#[command(about = "Migrate legacy tables into MySQL through Kafka, one entity at a time")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job sequence: consumer up, extract, wait for drain, consumer down
    Run {
        #[command(flatten)]
        config: ConfigOpts,

        /// Override the run file's mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Only run these jobs (repeatable); default is every job
        #[arg(long = "job", value_name = "NAME")]
        jobs: Vec<String>,
    },

    /// Extract one job's source table into its topic
    Extract {
        #[command(flatten)]
        config: ConfigOpts,

        #[arg(long)]
        job: String,

        /// Source offset to start from
        #[arg(long, default_value = "0")]
        start_offset: u64,
    },

    /// Consume one job's topic into its targets until interrupted
    Consume {
        #[command(flatten)]
        config: ConfigOpts,

        #[arg(long)]
        job: String,
    },

    /// Print the drain status of one job's consumer group
    DrainStatus {
        #[command(flatten)]
        config: ConfigOpts,

        #[arg(long)]
        job: String,
    },

    /// Validate the run file and list its jobs
    CheckConfig {
        #[command(flatten)]
        config: ConfigOpts,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    /// One pass over the job list
    Once,
    /// Repeat the job list until interrupted
    Cycle,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Once => RunMode::Once,
            ModeArg::Cycle => RunMode::Cycle,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, mode, jobs } => run_sequence(config, mode, jobs).await?,
        Commands::Extract {
            config,
            job,
            start_offset,
        } => run_extract(config, job, start_offset).await?,
        Commands::Consume { config, job } => run_consume(config, job).await?,
        Commands::DrainStatus { config, job } => run_drain_status(config, job).await?,
        Commands::CheckConfig { config } => run_check_config(config)?,
    }

    Ok(())
}

/// Cancelled on the first Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            token.cancel();
        }
    });
    cancel
}

async fn run_sequence(
    opts: ConfigOpts,
    mode: Option<ModeArg>,
    jobs: Vec<String>,
) -> anyhow::Result<()> {
    let config = opts.load()?;
    let jobs = config.select_jobs(&jobs)?;
    let mut settings = config.sequencer_settings();
    if let Some(mode) = mode {
        settings.mode = mode.into();
    }

    let connections = connect(&config).await?;
    let supervisor = Arc::new(Supervisor::new(
        config.restart.policy(),
        config.restart.stop_grace,
    ));
    let sequencer = Sequencer::new(jobs, connections.context.clone(), supervisor, settings);

    let reports = sequencer.run(shutdown_token()).await;
    connections.close().await;

    let skipped: Vec<&str> = reports
        .iter()
        .filter(|r| matches!(r.outcome, JobOutcome::Skipped(_)))
        .map(|r| r.job.as_str())
        .collect();
    if !skipped.is_empty() {
        anyhow::bail!(
            "{} of {} jobs skipped: {}",
            skipped.len(),
            reports.len(),
            skipped.join(", ")
        );
    }
    info!(jobs = reports.len(), "All jobs completed");
    Ok(())
}

async fn run_extract(opts: ConfigOpts, job: String, start_offset: u64) -> anyhow::Result<()> {
    let config = opts.load()?;
    let job = config.job(&job)?;
    let connections = connect(&config).await?;
    let extractor = Extractor::new(
        connections.context.source.clone(),
        connections.context.publisher.clone(),
        config.extractor_settings(),
    );

    let cancel = shutdown_token();
    let result = tokio::select! {
        _ = cancel.cancelled() => None,
        result = extractor.run(&job, start_offset) => Some(result),
    };
    if result.is_none() {
        if let Err(e) = connections.context.publisher.disconnect().await {
            warn!(job = %job.name, "Publisher disconnect failed: {e}");
        }
    }
    connections.close().await;

    match result {
        Some(Ok(report)) => {
            println!(
                "{}: sent {} records ({} failed) over {} pages, next offset {}",
                job.name, report.records_sent, report.records_failed, report.pages, report.next_offset
            );
            Ok(())
        }
        Some(Err(e)) => {
            let offset = e.offset;
            Err(anyhow::Error::new(e)
                .context(format!("Extraction stopped, resume with --start-offset {offset}")))
        }
        None => anyhow::bail!("Extraction interrupted"),
    }
}

async fn run_consume(opts: ConfigOpts, job: String) -> anyhow::Result<()> {
    let config = opts.load()?;
    let job = Arc::new(config.job(&job)?);
    let connections = connect(&config).await?;
    let consumer = BatchConsumer::new(job.clone(), &connections.context, config.consumer_settings())?;

    info!(job = %job.name, topic = %job.topic, group = %job.group_id, "Consuming until interrupted");
    let result = consumer.run(shutdown_token()).await;
    connections.close().await;
    result.with_context(|| format!("Consumer for job '{}' failed", job.name))
}

async fn run_drain_status(opts: ConfigOpts, job: String) -> anyhow::Result<()> {
    let config = opts.load()?;
    let job = config.job(&job)?;
    let admin = KafkaGroupAdmin::new(config.kafka.to_kafka_config());

    let status = admin
        .describe_group(&job.group_id, &job.topic)
        .await
        .with_context(|| format!("Failed to describe group {}", job.group_id))?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    println!(
        "{} on {}: {} of {} messages outstanding ({})",
        job.group_id,
        job.topic,
        status.lag_total,
        status.log_end_total,
        if status.is_drained() { "drained" } else { "draining" }
    );
    Ok(())
}

fn run_check_config(opts: ConfigOpts) -> anyhow::Result<()> {
    let config = opts.load()?;
    println!(
        "{}: {} jobs, mode {:?}",
        opts.path.display(),
        config.jobs.len(),
        config.mode
    );
    for job in config.job_specs() {
        println!(
            "  {} <- {} via {} [{}] -> {}",
            job.name,
            job.source_table,
            job.topic,
            job.group_id,
            job.target_tables()
        );
    }
    Ok(())
}
