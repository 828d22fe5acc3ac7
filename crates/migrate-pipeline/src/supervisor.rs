//! Supervised background workers with a restart policy.
//!
//! Each worker runs as a tokio task inside a supervision loop. An error or a
//! panic restarts it after a backoff, up to `max_restarts`; past that the
//! worker is left `Failed`. Nothing a worker does can take down the caller.

use async_trait::async_trait;
use futures::future::BoxFuture;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Builds one run of a worker. Called again for every restart.
pub type WorkerFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    /// Delay before the first restart; doubles per restart.
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    fn delay(&self, restarts: u32) -> Duration {
        let factor = 2u32.saturating_pow(restarts.min(16));
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Restarting,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub restarts: u32,
    pub last_error: Option<String>,
}

impl WorkerStatus {
    fn starting() -> Self {
        Self {
            state: WorkerState::Starting,
            restarts: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("worker '{0}' is already running")]
    AlreadyRunning(String),
}

/// Start/stop/describe interface over named background workers.
#[async_trait]
pub trait WorkerControl: Send + Sync {
    async fn start(&self, name: &str, worker: WorkerFn) -> Result<(), SupervisorError>;

    /// Stop the worker, waiting a bounded time for it to finish.
    async fn stop(&self, name: &str) -> StopOutcome;

    async fn describe(&self, name: &str) -> Option<WorkerStatus>;
}

struct WorkerEntry {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    status: Arc<Mutex<WorkerStatus>>,
}

pub struct Supervisor {
    policy: RestartPolicy,
    /// How long `stop` waits before aborting the task.
    grace: Duration,
    workers: Mutex<HashMap<String, WorkerEntry>>,
}

impl Supervisor {
    pub fn new(policy: RestartPolicy, grace: Duration) -> Self {
        Self {
            policy,
            grace,
            workers: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(RestartPolicy::default(), Duration::from_secs(30))
    }
}

#[async_trait]
impl WorkerControl for Supervisor {
    async fn start(&self, name: &str, worker: WorkerFn) -> Result<(), SupervisorError> {
        let mut workers = self.workers.lock().await;
        if let Some(entry) = workers.get(name) {
            if entry.task.as_ref().is_some_and(|t| !t.is_finished()) {
                return Err(SupervisorError::AlreadyRunning(name.to_string()));
            }
        }

        let cancel = CancellationToken::new();
        let status = Arc::new(Mutex::new(WorkerStatus::starting()));
        let task = tokio::spawn(supervise(
            name.to_string(),
            worker,
            self.policy.clone(),
            cancel.clone(),
            status.clone(),
        ));

        workers.insert(
            name.to_string(),
            WorkerEntry {
                cancel,
                task: Some(task),
                status,
            },
        );
        info!(worker = name, "Worker started");
        Ok(())
    }

    async fn stop(&self, name: &str) -> StopOutcome {
        let (cancel, task, status) = {
            let mut workers = self.workers.lock().await;
            let Some(entry) = workers.get_mut(name) else {
                return StopOutcome::AlreadyStopped;
            };
            (entry.cancel.clone(), entry.task.take(), entry.status.clone())
        };

        let Some(mut task) = task.filter(|t| !t.is_finished()) else {
            return StopOutcome::AlreadyStopped;
        };

        cancel.cancel();
        if tokio::time::timeout(self.grace, &mut task).await.is_err() {
            warn!(worker = name, grace = ?self.grace, "Worker did not stop in time, aborting");
            task.abort();
        }

        status.lock().await.state = WorkerState::Stopped;
        info!(worker = name, "Worker stopped");
        StopOutcome::Stopped
    }

    async fn describe(&self, name: &str) -> Option<WorkerStatus> {
        let status = {
            let workers = self.workers.lock().await;
            workers.get(name)?.status.clone()
        };
        let snapshot = status.lock().await.clone();
        Some(snapshot)
    }
}

async fn supervise(
    name: String,
    worker: WorkerFn,
    policy: RestartPolicy,
    cancel: CancellationToken,
    status: Arc<Mutex<WorkerStatus>>,
) {
    loop {
        status.lock().await.state = WorkerState::Running;

        // A nested task turns a panic into a JoinError instead of unwinding here.
        let outcome = match tokio::spawn(worker(cancel.child_token())).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(e) => Some(format!("worker panicked: {e}")),
        };

        let Some(message) = outcome.filter(|_| !cancel.is_cancelled()) else {
            status.lock().await.state = WorkerState::Stopped;
            return;
        };

        let restarts = {
            let mut s = status.lock().await;
            s.last_error = Some(message.clone());
            if s.restarts >= policy.max_restarts {
                s.state = WorkerState::Failed;
                error!(worker = %name, restarts = s.restarts, "Worker failed permanently: {message}");
                return;
            }
            s.state = WorkerState::Restarting;
            s.restarts += 1;
            s.restarts
        };

        let base = policy.delay(restarts - 1);
        let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64 / 10);
        let delay = base + Duration::from_millis(jitter_ms);
        warn!(worker = %name, restart = restarts, ?delay, "Worker error, restarting: {message}");

        tokio::select! {
            _ = cancel.cancelled() => {
                status.lock().await.state = WorkerState::Stopped;
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy {
            max_restarts: 10,
            backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(30),
        };
        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(2), Duration::from_secs(20));
        assert_eq!(policy.delay(3), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }
}
