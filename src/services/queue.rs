//! Single-worker download queue.
//!
//! Jobs are appended to an unbounded FIFO and served by exactly one worker
//! task, so at most one job is ever Running ([`MAX_ACTIVE_DOWNLOADS`]). The
//! worker promotes the next job as soon as the current one reaches a terminal
//! state, whatever that state is.
//!
//! Each job body runs in its own spawned task: a panic inside it becomes a
//! failed job instead of taking the worker down.

use crate::metrics::Metrics;
use crate::models::{DownloadJob, JobId, JobOutcome, JobStage, MAX_ACTIVE_DOWNLOADS, Trainer};
use crate::services::reporter::{Reporter, StageReporter};
use crate::state::StateManager;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Why a job body gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub stage: JobStage,
    pub cause: String,
}

impl JobFailure {
    pub fn new(stage: JobStage, cause: impl Into<String>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }
}

/// The work performed for one Running job.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(&self, job: &DownloadJob, stages: &StageReporter) -> Result<Vec<Trainer>, JobFailure>;
}

/// Completion handle returned by [`DownloadQueue::enqueue`].
#[derive(Debug)]
pub struct JobTicket {
    id: JobId,
    done: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(self) -> JobOutcome {
        self.done.await.unwrap_or_else(|_| JobOutcome::Failed {
            stage: JobStage::Queue,
            cause: "download queue stopped".to_string(),
        })
    }
}

struct QueuedJob {
    id: JobId,
    job: DownloadJob,
    done: oneshot::Sender<JobOutcome>,
}

/// Shared services the worker needs; also used to settle jobs that never run.
#[derive(Clone)]
struct Worker {
    executor: Arc<dyn JobExecutor>,
    state: StateManager,
    reporter: Reporter,
    metrics: Arc<Metrics>,
}

/// Producer handle for the download queue. Cheap to clone.
#[derive(Clone)]
pub struct DownloadQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    next_id: Arc<AtomicU64>,
    worker: Worker,
}

impl DownloadQueue {
    /// Start the worker task.
    ///
    /// The worker exits when `shutdown` flips to `true` (after the running
    /// job finishes) or when every queue handle has been dropped. Jobs still
    /// queued at shutdown are failed as cancelled.
    pub fn spawn(
        executor: Arc<dyn JobExecutor>,
        state: StateManager,
        reporter: Reporter,
        metrics: Arc<Metrics>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            executor,
            state,
            reporter,
            metrics,
        };

        tracing::debug!("Download queue started (max active downloads: {})", MAX_ACTIVE_DOWNLOADS);
        let handle = tokio::spawn(worker.clone().run(rx, shutdown));

        (
            Self {
                tx,
                next_id: Arc::new(AtomicU64::new(1)),
                worker,
            },
            handle,
        )
    }

    /// Append a job to the tail of the queue.
    ///
    /// While a migration is running the job is refused and its ticket
    /// resolves as failed right away.
    pub fn enqueue(&self, job: DownloadJob) -> JobTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        let queued = QueuedJob {
            id,
            job,
            done: done_tx,
        };

        if !self.worker.state.queue_job(id, &queued.job.display_name) {
            tracing::warn!("Refused job {} while trainers are being migrated", queued.job.display_name);
            self.worker
                .cancel(queued, "downloads are paused while trainers are being migrated");
            return JobTicket { id, done: done_rx };
        }
        tracing::info!("Queued job {}: {}", id, queued.job.display_name);

        if let Err(mpsc::error::SendError(rejected)) = self.tx.send(queued) {
            self.worker.cancel(rejected, "download queue is not running");
        }

        JobTicket { id, done: done_rx }
    }
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<QueuedJob>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => None,
                next = rx.recv() => next,
            };

            let Some(queued) = next else {
                break;
            };
            self.run_job(queued).await;
        }

        rx.close();
        let mut cancelled = 0usize;
        while let Ok(queued) = rx.try_recv() {
            self.cancel(queued, "cancelled");
            cancelled += 1;
        }
        tracing::info!("Download queue stopped ({} queued jobs cancelled)", cancelled);
    }

    async fn run_job(&self, queued: QueuedJob) {
        let QueuedJob { id, job, done } = queued;
        let name = job.display_name.clone();
        let replaces = job.replaces().map(|path| path.to_path_buf());

        self.state.start_job(id);
        let task = self.reporter.begin(name.clone());
        task.info(format!("Downloading {}...", name));

        let started = Instant::now();
        let executor = Arc::clone(&self.executor);
        let stages = task.stages();
        let body = tokio::spawn(async move { executor.execute(&job, &stages).await });

        let outcome = match body.await {
            Ok(Ok(installed)) => JobOutcome::Succeeded { installed },
            Ok(Err(failure)) => JobOutcome::Failed {
                stage: failure.stage,
                cause: failure.cause,
            },
            Err(join_error) if join_error.is_panic() => JobOutcome::Failed {
                stage: JobStage::Queue,
                cause: format!("job panicked: {}", panic_message(join_error.into_panic())),
            },
            Err(_) => JobOutcome::Failed {
                stage: JobStage::Queue,
                cause: "job task was aborted".to_string(),
            },
        };

        let elapsed = started.elapsed();
        match &outcome {
            JobOutcome::Succeeded { installed } => task.succeed(format!(
                "{} installed ({} file{}) in {:.1}s",
                name,
                installed.len(),
                if installed.len() == 1 { "" } else { "s" },
                elapsed.as_secs_f32()
            )),
            JobOutcome::Failed { stage, cause } => {
                task.fail(format!("{} failed during {}: {}", name, stage, cause))
            }
        }

        self.settle(id, replaces.as_ref(), &outcome, elapsed);

        // The requester may have stopped waiting
        let _ = done.send(outcome);
    }

    /// Fail a job that never ran.
    fn cancel(&self, queued: QueuedJob, reason: &str) {
        let QueuedJob { id, job, done } = queued;
        self.reporter
            .begin(job.display_name.clone())
            .fail(format!("{} was not downloaded: {}", job.display_name, reason));

        let outcome = JobOutcome::Failed {
            stage: JobStage::Queue,
            cause: reason.to_string(),
        };
        let replaces = job.replaces().map(|path| path.to_path_buf());
        self.settle(id, replaces.as_ref(), &outcome, Duration::ZERO);
        let _ = done.send(outcome);
    }

    /// Terminal bookkeeping shared by finished and cancelled jobs.
    ///
    /// The pending update mark is cleared before the job leaves the queue, so
    /// anyone reacting to `JobFinished` already sees it gone.
    fn settle(&self, id: JobId, replaces: Option<&Utf8PathBuf>, outcome: &JobOutcome, elapsed: Duration) {
        if let Some(path) = replaces {
            self.state.clear_update_pending(path);
        }
        self.metrics.record_job(outcome.is_success(), elapsed);
        self.state.finish_job(id, outcome.state());
    }
}

/// Resolves once the shutdown flag is set; never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
