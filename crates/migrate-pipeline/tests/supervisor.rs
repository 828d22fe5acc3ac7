mod common;

use common::init_logging;
use futures::FutureExt;
use migrate_pipeline::{
    RestartPolicy, StopOutcome, Supervisor, SupervisorError, WorkerControl, WorkerFn, WorkerState,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn supervisor(max_restarts: u32) -> Supervisor {
    init_logging();
    Supervisor::new(
        RestartPolicy {
            max_restarts,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(4),
        },
        Duration::from_secs(2),
    )
}

/// Fails the first `failures` runs, then waits for cancellation.
fn flaky(failures: u32, runs: Arc<AtomicU32>) -> WorkerFn {
    Arc::new(move |cancel| {
        let runs = runs.clone();
        async move {
            let run = runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run <= failures {
                anyhow::bail!("boom {run}");
            }
            cancel.cancelled().await;
            Ok(())
        }
        .boxed()
    })
}

fn explode() -> anyhow::Result<()> {
    panic!("worker exploded")
}

#[tokio::test(start_paused = true)]
async fn test_restarts_after_errors() {
    let supervisor = supervisor(5);
    let runs = Arc::new(AtomicU32::new(0));
    supervisor.start("worker", flaky(2, runs.clone())).await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    let status = supervisor.describe("worker").await.unwrap();
    assert_eq!(status.state, WorkerState::Running);
    assert_eq!(status.restarts, 2);
    assert_eq!(status.last_error.as_deref(), Some("boom 2"));
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    assert_eq!(supervisor.stop("worker").await, StopOutcome::Stopped);
    assert_eq!(
        supervisor.describe("worker").await.map(|s| s.state),
        Some(WorkerState::Stopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_panics_are_contained_until_restart_limit() {
    let supervisor = supervisor(2);
    let runs = Arc::new(AtomicU32::new(0));
    let worker: WorkerFn = {
        let runs = runs.clone();
        Arc::new(move |_cancel| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                explode()
            }
            .boxed()
        })
    };
    supervisor.start("worker", worker).await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;

    let status = supervisor.describe("worker").await.unwrap();
    assert_eq!(status.state, WorkerState::Failed);
    assert_eq!(status.restarts, 2);
    assert!(status.last_error.unwrap().contains("panicked"));
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    assert_eq!(supervisor.stop("worker").await, StopOutcome::AlreadyStopped);
}

#[tokio::test(start_paused = true)]
async fn test_clean_exit_is_not_restarted() {
    let supervisor = supervisor(5);
    let runs = Arc::new(AtomicU32::new(0));
    let worker: WorkerFn = {
        let runs = runs.clone();
        Arc::new(move |_cancel| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
            .boxed()
        })
    };
    supervisor.start("worker", worker).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    let status = supervisor.describe("worker").await.unwrap();
    assert_eq!(status.state, WorkerState::Stopped);
    assert_eq!(status.restarts, 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_start_is_rejected() {
    let supervisor = supervisor(5);
    let runs = Arc::new(AtomicU32::new(0));
    supervisor.start("worker", flaky(0, runs.clone())).await.unwrap();

    let err = supervisor
        .start("worker", flaky(0, runs.clone()))
        .await
        .unwrap_err();
    assert_eq!(err, SupervisorError::AlreadyRunning("worker".to_string()));

    supervisor.stop("worker").await;
    supervisor.start("worker", flaky(0, runs)).await.unwrap();
    assert_eq!(supervisor.stop("worker").await, StopOutcome::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_aborts_unresponsive_worker() {
    let supervisor = supervisor(5);
    let worker: WorkerFn = Arc::new(|_cancel| {
        async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            anyhow::Ok(())
        }
        .boxed()
    });
    supervisor.start("stubborn", worker).await.unwrap();
    tokio::task::yield_now().await;

    let started = tokio::time::Instant::now();
    assert_eq!(supervisor.stop("stubborn").await, StopOutcome::Stopped);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(
        supervisor.describe("stubborn").await.map(|s| s.state),
        Some(WorkerState::Stopped)
    );
}

#[tokio::test]
async fn test_unknown_worker() {
    let supervisor = supervisor(5);
    assert!(supervisor.describe("ghost").await.is_none());
    assert_eq!(supervisor.stop("ghost").await, StopOutcome::AlreadyStopped);
}
