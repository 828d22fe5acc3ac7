mod common;

use common::{feedback_job, Harness, LIVE_TABLE, UAT_TABLE};
use migrate_core::{ColumnIdent, ColumnMapping, JobSpec, TableIdent, TargetSpec};
use migrate_pipeline::testing::MemorySource;
use migrate_pipeline::{
    DrainOutcome, ExtractorSettings, JobOutcome, RestartPolicy, RunMode, Sequencer,
    SequencerSettings, SkipReason, Supervisor, WorkerControl, WorkerState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WORKER: &str = "consumer_feedback_track";

fn rows(n: u64) -> Vec<Value> {
    (1..=n).map(|id| json!({"id": id, "ts": "2024-02-01"})).collect()
}

fn job() -> JobSpec {
    feedback_job().with_page_size(10)
}

fn settings() -> SequencerSettings {
    SequencerSettings {
        mode: RunMode::Once,
        cycle_delay: Duration::from_secs(60),
        producer_retries: 1,
        producer_backoff: Duration::from_secs(5),
        drain_poll_interval: Duration::from_secs(1),
        drain_max_wait: Duration::from_secs(30),
        extractor: ExtractorSettings {
            page_delay: Duration::ZERO,
        },
        ..Default::default()
    }
}

fn supervisor(max_restarts: u32) -> Arc<Supervisor> {
    Arc::new(Supervisor::new(
        RestartPolicy {
            max_restarts,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(1),
        },
        Duration::from_secs(5),
    ))
}

fn sequencer(
    harness: &Harness,
    jobs: Vec<JobSpec>,
    workers: Arc<Supervisor>,
    settings: SequencerSettings,
) -> Sequencer {
    Sequencer::new(jobs, harness.context(), workers, settings)
}

#[tokio::test(start_paused = true)]
async fn test_job_completes_after_drain() {
    let harness = Harness::new(MemorySource::new().with_rows("feedback_track", rows(30)));
    let workers = supervisor(3);
    let sequencer = sequencer(&harness, vec![job()], workers.clone(), settings());

    let reports = sequencer.run(CancellationToken::new()).await;

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.outcome, JobOutcome::Done);
    assert_eq!(report.records_sent, 30);
    assert!(matches!(
        report.drain,
        Some(DrainOutcome::Drained { log_end_total: 30, .. })
    ));
    assert_eq!(report.consumer.as_ref().map(|s| s.state), Some(WorkerState::Running));

    assert_eq!(harness.live.rows(LIVE_TABLE).len(), 30);
    assert_eq!(harness.uat.rows(UAT_TABLE).len(), 30);
    assert_eq!(
        workers.describe(WORKER).await.map(|s| s.state),
        Some(WorkerState::Stopped)
    );
    assert_eq!(harness.log.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_source_is_drained_immediately() {
    let harness = Harness::new(MemorySource::new());
    let sequencer = sequencer(&harness, vec![job()], supervisor(3), settings());

    let reports = sequencer.run(CancellationToken::new()).await;

    assert_eq!(reports[0].outcome, JobOutcome::Done);
    assert_eq!(reports[0].records_sent, 0);
    assert!(matches!(
        reports[0].drain,
        Some(DrainOutcome::Drained { log_end_total: 0, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_producer_retry_resumes_from_failed_page() {
    let source = MemorySource::new().with_rows("feedback_track", rows(25));
    source.fail_at(10, 1);
    let harness = Harness::new(source);
    let sequencer = sequencer(&harness, vec![job()], supervisor(3), settings());

    let reports = sequencer.run(CancellationToken::new()).await;

    assert_eq!(reports[0].outcome, JobOutcome::Done);
    assert_eq!(reports[0].records_sent, 25);
    assert_eq!(harness.source.fetches(), vec![0, 10, 10, 20, 30]);
    assert_eq!(harness.log.messages(&job().topic).len(), 25);
    assert_eq!(harness.live.rows(LIVE_TABLE).len(), 25);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_producer_skips_job_but_drains_published_rows() {
    let source = MemorySource::new().with_rows("feedback_track", rows(25));
    source.fail_at(10, 5);
    let harness = Harness::new(source);
    let workers = supervisor(3);
    let sequencer = sequencer(&harness, vec![job()], workers.clone(), settings());

    let reports = sequencer.run(CancellationToken::new()).await;

    let report = &reports[0];
    assert!(matches!(
        report.outcome,
        JobOutcome::Skipped(SkipReason::ProducerFailed(_))
    ));
    assert_eq!(report.records_sent, 10);
    assert!(matches!(
        report.drain,
        Some(DrainOutcome::Drained { log_end_total: 10, .. })
    ));
    assert_eq!(harness.live.rows(LIVE_TABLE).len(), 10);
    assert_eq!(
        workers.describe(WORKER).await.map(|s| s.state),
        Some(WorkerState::Stopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_drain_timeout_skips_job() {
    let harness = Harness::new(MemorySource::new().with_rows("feedback_track", rows(5)));
    harness.live.set_unavailable(true);
    let workers = supervisor(100);
    let sequencer = sequencer(&harness, vec![job()], workers.clone(), settings());

    let reports = sequencer.run(CancellationToken::new()).await;

    let report = &reports[0];
    assert_eq!(report.outcome, JobOutcome::Skipped(SkipReason::DrainTimeout));
    assert!(matches!(
        report.drain,
        Some(DrainOutcome::TimedOut { lag_total: Some(5), .. })
    ));
    let consumer = report.consumer.as_ref().unwrap();
    assert!(consumer.restarts > 0);
    assert!(consumer.last_error.as_deref().unwrap().contains("live"));

    assert_eq!(harness.log.commits(), 0);
    assert!(harness.uat.rows(UAT_TABLE).len() <= 5);
    assert_eq!(
        workers.describe(WORKER).await.map(|s| s.state),
        Some(WorkerState::Stopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_consumer_ends_drain_wait() {
    let harness = Harness::new(MemorySource::new().with_rows("feedback_track", rows(5)));
    harness.live.set_unavailable(true);
    let sequencer = sequencer(&harness, vec![job()], supervisor(0), settings());

    let reports = sequencer.run(CancellationToken::new()).await;

    let report = &reports[0];
    let JobOutcome::Skipped(SkipReason::ConsumerFailed(message)) = &report.outcome else {
        panic!("unexpected outcome {:?}", report.outcome);
    };
    assert!(message.contains("batch-fatal"), "{message}");
    assert!(matches!(report.drain, Some(DrainOutcome::ConsumerFailed { .. })));
    assert!(report.elapsed < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_broken_job_does_not_stop_the_cycle() {
    let harness = Harness::new(MemorySource::new().with_rows("feedback_track", rows(3)));
    let orphan = JobSpec::new("orphan", "orphan", "id")
        .with_target(TargetSpec::new(
            "nowhere",
            TableIdent::parse("bridge.orphan").unwrap(),
        ))
        .with_column(ColumnMapping::new(ColumnIdent::new("id").unwrap()));
    let sequencer = sequencer(&harness, vec![orphan, job()], supervisor(3), settings());

    let reports = sequencer.run(CancellationToken::new()).await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].job, "orphan");
    let JobOutcome::Skipped(SkipReason::JobError(message)) = &reports[0].outcome else {
        panic!("unexpected outcome {:?}", reports[0].outcome);
    };
    assert!(message.contains("nowhere"), "{message}");
    assert!(reports[0].drain.is_none());

    assert_eq!(reports[1].outcome, JobOutcome::Done);
    assert_eq!(harness.live.rows(LIVE_TABLE).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_mode_repeats_until_cancelled() {
    let harness = Harness::new(MemorySource::new().with_rows("feedback_track", rows(3)));
    let settings = SequencerSettings {
        mode: RunMode::Cycle,
        ..settings()
    };
    let sequencer = sequencer(&harness, vec![job()], supervisor(3), settings);
    let cancel = CancellationToken::new();

    let (reports, ()) = tokio::join!(sequencer.run(cancel.clone()), async {
        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
    });

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, JobOutcome::Done);
    let passes = harness.source.fetches().iter().filter(|o| **o == 0).count();
    assert!(passes >= 2, "{passes} passes");
    // Re-extracted rows land on the same keys.
    assert_eq!(harness.live.rows(LIVE_TABLE).len(), 3);
}
