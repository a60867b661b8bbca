//! Integration tests for the download queue
//!
//! These tests verify:
//! - Jobs start in the order they were enqueued
//! - At most one job runs at any time
//! - A failed job does not stall the jobs behind it
//! - Shutdown lets the running job finish and cancels the rest

use async_trait::async_trait;
use camino::Utf8PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::time::timeout;
use trainer_manager::models::{DownloadJob, JobKind, JobOutcome, JobSource, JobStage, Trainer};
use trainer_manager::services::{DownloadQueue, JobExecutor, JobFailure, Reporter, StageReporter};
use trainer_manager::{Metrics, StateChange, StateManager};

/// Executor that waits for a permit per job and records concurrency.
struct GatedExecutor {
    gate: Semaphore,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl GatedExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }

    fn release(&self, jobs: usize) {
        self.gate.add_permits(jobs);
    }
}

#[async_trait]
impl JobExecutor for GatedExecutor {
    async fn execute(&self, job: &DownloadJob, stages: &StageReporter) -> Result<Vec<Trainer>, JobFailure> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        stages.info(format!("working on {}", job.display_name));
        let permit = self.gate.acquire().await.unwrap();
        permit.forget();

        self.running.fetch_sub(1, Ordering::SeqCst);
        if job.display_name.starts_with("bad") {
            return Err(JobFailure::new(JobStage::Download, "connection reset"));
        }
        Ok(Vec::new())
    }
}

fn job(name: &str) -> DownloadJob {
    DownloadJob {
        kind: JobKind::New,
        source: JobSource::Direct(format!("https://catalog.example/{name}.zip")),
        display_name: name.to_string(),
        destination: Utf8PathBuf::from("/store"),
    }
}

fn spawn_queue(executor: Arc<GatedExecutor>) -> (DownloadQueue, StateManager, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let state = StateManager::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (queue, worker) = DownloadQueue::spawn(
        executor,
        state.clone(),
        Reporter::log_only(),
        Arc::new(Metrics::new()),
        shutdown_rx,
    );
    (queue, state, shutdown_tx, worker)
}

async fn next_started(rx: &mut tokio::sync::broadcast::Receiver<StateChange>) -> String {
    loop {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Timeout waiting for a job to start")
            .expect("Channel closed");
        if let StateChange::JobStarted { name, .. } = event {
            return name;
        }
    }
}

#[tokio::test]
async fn test_jobs_start_in_fifo_order_one_at_a_time() {
    let executor = GatedExecutor::new();
    let (queue, state, _shutdown_tx, _worker) = spawn_queue(Arc::clone(&executor));
    let mut rx = state.subscribe();

    let tickets: Vec<_> = ["A", "B", "C"].into_iter().map(|n| queue.enqueue(job(n))).collect();

    let mut started = Vec::new();
    for _ in 0..3 {
        started.push(next_started(&mut rx).await);
        assert!(state.read(|s| s.active_job.is_some()));
        executor.release(1);
    }

    for ticket in tickets {
        assert!(ticket.wait().await.is_success());
    }

    assert_eq!(started, vec!["A", "B", "C"]);
    assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
    assert_eq!(state.read(|s| s.job_stats()), (3, 0, 0, 0));
}

#[tokio::test]
async fn test_failure_does_not_stall_queue() {
    let executor = GatedExecutor::new();
    let (queue, state, _shutdown_tx, _worker) = spawn_queue(Arc::clone(&executor));

    let bad = queue.enqueue(job("bad-mirror"));
    let good = queue.enqueue(job("good"));
    executor.release(2);

    match bad.wait().await {
        JobOutcome::Failed { stage, cause } => {
            assert_eq!(stage, JobStage::Download);
            assert_eq!(cause, "connection reset");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(good.wait().await.is_success());
    assert_eq!(state.read(|s| s.job_stats()), (1, 1, 0, 0));
}

#[tokio::test]
async fn test_shutdown_finishes_running_job_and_cancels_queue() {
    let executor = GatedExecutor::new();
    let (queue, state, shutdown_tx, worker) = spawn_queue(Arc::clone(&executor));
    let mut rx = state.subscribe();

    let running = queue.enqueue(job("A"));
    let queued: Vec<_> = ["B", "C"].into_iter().map(|n| queue.enqueue(job(n))).collect();
    assert_eq!(next_started(&mut rx).await, "A");

    shutdown_tx.send(true).unwrap();
    executor.release(1);

    assert!(running.wait().await.is_success());
    for ticket in queued {
        match ticket.wait().await {
            JobOutcome::Failed { stage, cause } => {
                assert_eq!(stage, JobStage::Queue);
                assert_eq!(cause, "cancelled");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();
    let snapshot = state.snapshot();
    assert!(snapshot.queued_jobs.is_empty());
    assert!(snapshot.active_job.is_none());
    assert_eq!(snapshot.jobs_failed, 2);
}
