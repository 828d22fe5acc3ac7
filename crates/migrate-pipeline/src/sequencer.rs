//! Job sequencer: runs jobs one at a time and gates each on drain.
//!
//! Per job:
//!
//! ```text
//! Idle -> ConsumerStarting -> ProducerRunning -> DrainWaiting -> ConsumerStopping -> Done
//!                                                                                 \-> Skipped
//! ```
//!
//! A producer that exhausts its retries or a drain wait that times out marks
//! the job skipped, but the lifecycle still runs to the end so messages that
//! were already published get consumed and the consumer is always stopped.

use crate::consumer::{BatchConsumer, ConsumerSettings};
use crate::context::PipelineContext;
use crate::extractor::{Extractor, ExtractorSettings};
use crate::supervisor::{StopOutcome, WorkerControl, WorkerFn, WorkerState, WorkerStatus};
use futures::FutureExt;
use migrate_core::JobSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One pass over the job list, then exit.
    #[default]
    Once,
    /// Repeat the job list forever with `cycle_delay` between passes.
    Cycle,
}

#[derive(Debug, Clone)]
pub struct SequencerSettings {
    pub mode: RunMode,
    pub cycle_delay: Duration,
    /// Extra extractor attempts after the first failure.
    pub producer_retries: u32,
    pub producer_backoff: Duration,
    pub drain_poll_interval: Duration,
    pub drain_max_wait: Duration,
    pub extractor: ExtractorSettings,
    pub consumer: ConsumerSettings,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            mode: RunMode::Once,
            cycle_delay: Duration::from_secs(60),
            producer_retries: 1,
            producer_backoff: Duration::from_secs(5),
            drain_poll_interval: Duration::from_secs(30),
            drain_max_wait: Duration::from_secs(6 * 60 * 60),
            extractor: ExtractorSettings::default(),
            consumer: ConsumerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    ConsumerStarting,
    ProducerRunning,
    DrainWaiting,
    ConsumerStopping,
    Done,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ProducerFailed(String),
    DrainTimeout,
    ConsumerFailed(String),
    JobError(String),
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ProducerFailed(e) => write!(f, "producer failed: {e}"),
            SkipReason::DrainTimeout => f.write_str("drain wait timed out"),
            SkipReason::ConsumerFailed(e) => write!(f, "consumer failed: {e}"),
            SkipReason::JobError(e) => write!(f, "job error: {e}"),
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained { log_end_total: i64, waited: Duration },
    TimedOut { lag_total: Option<i64>, waited: Duration },
    ConsumerFailed { waited: Duration },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job: String,
    pub outcome: JobOutcome,
    pub records_sent: u64,
    pub records_failed: u64,
    pub drain: Option<DrainOutcome>,
    pub consumer: Option<WorkerStatus>,
    pub elapsed: Duration,
}

impl JobReport {
    fn new(job: &JobSpec) -> Self {
        Self {
            job: job.name.clone(),
            outcome: JobOutcome::Done,
            records_sent: 0,
            records_failed: 0,
            drain: None,
            consumer: None,
            elapsed: Duration::ZERO,
        }
    }

    /// The first reason recorded wins.
    fn skip(&mut self, reason: SkipReason) {
        if self.outcome == JobOutcome::Done {
            self.outcome = JobOutcome::Skipped(reason);
        }
    }
}

pub struct Sequencer {
    jobs: Vec<Arc<JobSpec>>,
    context: PipelineContext,
    workers: Arc<dyn WorkerControl>,
    settings: SequencerSettings,
}

impl Sequencer {
    pub fn new(
        jobs: Vec<JobSpec>,
        context: PipelineContext,
        workers: Arc<dyn WorkerControl>,
        settings: SequencerSettings,
    ) -> Self {
        Self {
            jobs: jobs.into_iter().map(Arc::new).collect(),
            context,
            workers,
            settings,
        }
    }

    /// Run cycles until the mode says stop or `cancel` fires. Returns the
    /// reports of the last cycle.
    pub async fn run(&self, cancel: CancellationToken) -> Vec<JobReport> {
        let mut cycle = 1u64;
        loop {
            info!(cycle, jobs = self.jobs.len(), mode = ?self.settings.mode, "Starting cycle");
            let reports = self.run_cycle(&cancel).await;
            log_summary(cycle, &reports);

            if self.settings.mode == RunMode::Once || cancel.is_cancelled() {
                return reports;
            }

            info!(delay = ?self.settings.cycle_delay, "Waiting before next cycle");
            tokio::select! {
                _ = cancel.cancelled() => return reports,
                _ = tokio::time::sleep(self.settings.cycle_delay) => {}
            }
            cycle += 1;
        }
    }

    /// One pass over every job, in order. A failing job never stops the pass.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Vec<JobReport> {
        let mut reports = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            if cancel.is_cancelled() {
                break;
            }

            let report = match AssertUnwindSafe(self.run_job(job.clone(), cancel))
                .catch_unwind()
                .await
            {
                Ok(report) => report,
                Err(_) => {
                    error!(job = %job.name, "Job panicked");
                    self.workers.stop(&worker_name(job)).await;
                    let mut report = JobReport::new(job);
                    report.skip(SkipReason::JobError("job panicked".to_string()));
                    report
                }
            };
            reports.push(report);
        }
        reports
    }

    pub async fn run_job(&self, job: Arc<JobSpec>, cancel: &CancellationToken) -> JobReport {
        let started = Instant::now();
        let mut report = JobReport::new(&job);
        let mut phase = JobPhase::Idle;
        let name = worker_name(&job);

        transition(&job, &mut phase, JobPhase::ConsumerStarting);
        if let Err(reason) = self.start_consumer(&job, &name).await {
            error!(job = %job.name, "Consumer could not be started: {reason}");
            report.skip(reason);
            transition(&job, &mut phase, JobPhase::Skipped);
            report.elapsed = started.elapsed();
            return report;
        }

        transition(&job, &mut phase, JobPhase::ProducerRunning);
        self.extract_with_retries(&job, cancel, &mut report).await;

        transition(&job, &mut phase, JobPhase::DrainWaiting);
        let drain = self.wait_for_drain(&job, &name, cancel).await;
        match &drain {
            DrainOutcome::Drained { .. } => {}
            DrainOutcome::TimedOut { lag_total, waited } => {
                warn!(job = %job.name, ?lag_total, ?waited, "Drain wait timed out, moving on");
                report.skip(SkipReason::DrainTimeout);
            }
            DrainOutcome::ConsumerFailed { .. } => {
                let message = self
                    .workers
                    .describe(&name)
                    .await
                    .and_then(|s| s.last_error)
                    .unwrap_or_default();
                report.skip(SkipReason::ConsumerFailed(message));
            }
            DrainOutcome::Cancelled => report.skip(SkipReason::Cancelled),
        }
        report.drain = Some(drain);

        transition(&job, &mut phase, JobPhase::ConsumerStopping);
        report.consumer = self.workers.describe(&name).await;
        match self.workers.stop(&name).await {
            StopOutcome::Stopped => info!(job = %job.name, "Consumer stopped"),
            StopOutcome::AlreadyStopped => warn!(job = %job.name, "Consumer already stopped"),
        }

        let end = match report.outcome {
            JobOutcome::Done => JobPhase::Done,
            JobOutcome::Skipped(_) => JobPhase::Skipped,
        };
        transition(&job, &mut phase, end);
        report.elapsed = started.elapsed();
        report
    }

    async fn start_consumer(&self, job: &Arc<JobSpec>, name: &str) -> Result<(), SkipReason> {
        let consumer = BatchConsumer::new(job.clone(), &self.context, self.settings.consumer.clone())
            .map_err(|e| SkipReason::JobError(e.to_string()))?;
        let consumer = Arc::new(consumer);

        let worker: WorkerFn = Arc::new(move |token| {
            let consumer = consumer.clone();
            async move { consumer.run(token).await.map_err(anyhow::Error::from) }.boxed()
        });

        self.workers
            .start(name, worker)
            .await
            .map_err(|e| SkipReason::JobError(e.to_string()))
    }

    async fn extract_with_retries(
        &self,
        job: &JobSpec,
        cancel: &CancellationToken,
        report: &mut JobReport,
    ) {
        let extractor = Extractor::new(
            self.context.source.clone(),
            self.context.publisher.clone(),
            self.settings.extractor.clone(),
        );
        let attempts = 1 + self.settings.producer_retries;
        let mut offset = 0;

        for attempt in 1..=attempts {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = self.context.publisher.disconnect().await {
                        warn!(job = %job.name, "Publisher disconnect failed: {e}");
                    }
                    report.skip(SkipReason::Cancelled);
                    return;
                }
                result = extractor.run(job, offset) => result,
            };

            match result {
                Ok(extraction) => {
                    report.records_sent += extraction.records_sent;
                    report.records_failed += extraction.records_failed;
                    return;
                }
                Err(e) => {
                    report.records_sent += e.records_sent;
                    offset = e.offset;
                    if attempt == attempts {
                        error!(job = %job.name, attempts, "Producer retries exhausted: {e}");
                        report.skip(SkipReason::ProducerFailed(e.to_string()));
                        return;
                    }
                    warn!(
                        job = %job.name,
                        attempt,
                        resume_offset = offset,
                        backoff = ?self.settings.producer_backoff,
                        "Producer failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            report.skip(SkipReason::Cancelled);
                            return;
                        }
                        _ = tokio::time::sleep(self.settings.producer_backoff) => {}
                    }
                }
            }
        }
    }

    async fn wait_for_drain(
        &self,
        job: &JobSpec,
        worker: &str,
        cancel: &CancellationToken,
    ) -> DrainOutcome {
        let started = Instant::now();
        let max_wait = self.settings.drain_max_wait;
        let mut lag_total = None;
        info!(job = %job.name, group = %job.group_id, "Waiting for consumer group to drain");

        loop {
            let waited = started.elapsed();
            match self.context.admin.describe_group(&job.group_id, &job.topic).await {
                Ok(status) => {
                    info!(
                        job = %job.name,
                        lag = status.lag_total,
                        log_end = status.log_end_total,
                        waited_secs = waited.as_secs(),
                        "Consumer group lag"
                    );
                    if status.is_drained() {
                        info!(job = %job.name, waited_secs = waited.as_secs(), "Drained");
                        return DrainOutcome::Drained {
                            log_end_total: status.log_end_total,
                            waited,
                        };
                    }
                    lag_total = Some(status.lag_total);
                }
                Err(e) => warn!(job = %job.name, waited_secs = waited.as_secs(), "Group not ready: {e}"),
            }

            if let Some(status) = self.workers.describe(worker).await {
                if status.state == WorkerState::Failed {
                    error!(job = %job.name, "Consumer failed permanently, abandoning drain wait");
                    return DrainOutcome::ConsumerFailed { waited };
                }
            }

            if waited >= max_wait {
                return DrainOutcome::TimedOut { lag_total, waited };
            }

            let pause = self.settings.drain_poll_interval.min(max_wait - waited);
            tokio::select! {
                _ = cancel.cancelled() => return DrainOutcome::Cancelled,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

fn worker_name(job: &JobSpec) -> String {
    format!("consumer_{}", job.name)
}

fn transition(job: &JobSpec, phase: &mut JobPhase, next: JobPhase) {
    debug!(job = %job.name, from = ?*phase, to = ?next, "Job phase");
    *phase = next;
}

fn log_summary(cycle: u64, reports: &[JobReport]) {
    for report in reports {
        let outcome = match &report.outcome {
            JobOutcome::Done => "done".to_string(),
            JobOutcome::Skipped(reason) => format!("skipped ({reason})"),
        };
        info!(
            cycle,
            job = %report.job,
            outcome,
            sent = report.records_sent,
            failed = report.records_failed,
            drain = ?report.drain,
            restarts = report.consumer.as_ref().map(|s| s.restarts).unwrap_or(0),
            elapsed_secs = report.elapsed.as_secs(),
            "Job finished"
        );
    }
    let skipped = reports
        .iter()
        .filter(|r| matches!(r.outcome, JobOutcome::Skipped(_)))
        .count();
    info!(cycle, jobs = reports.len(), skipped, "Cycle completed");
}
