//! One-way status channel from background work to whatever renders it.
//!
//! Every unit of work gets a task id from [`Reporter::begin`]. Events for one
//! task arrive in emission order because they share a single FIFO channel.
//! Each task emits exactly one terminal event: [`TaskReporter::succeed`] and
//! [`TaskReporter::fail`] consume the handle, and dropping an unfinished
//! handle emits a failure on its behalf.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Failure,
}

impl Severity {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Severity::Info)
    }
}

/// A single status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEvent {
    pub task: TaskId,
    pub label: String,
    pub message: String,
    pub severity: Severity,
}

/// Sending half of the status channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<ReportEvent>,
    next_id: Arc<AtomicU64>,
}

impl Reporter {
    /// Create a reporter and the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            rx,
        )
    }

    /// Reporter whose events only go to the log.
    pub fn log_only() -> Self {
        Self::channel().0
    }

    /// Start reporting for a new task.
    pub fn begin(&self, label: impl Into<String>) -> TaskReporter {
        TaskReporter {
            reporter: self.clone(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            finished: false,
        }
    }

    fn emit(&self, task: TaskId, label: &str, message: String, severity: Severity) {
        match severity {
            Severity::Info => tracing::info!(task, label, "{}", message),
            Severity::Success => tracing::info!(task, label, "{}", message),
            Severity::Failure => tracing::error!(task, label, "{}", message),
        }

        // A closed receiver just means nobody renders status right now
        let _ = self.tx.send(ReportEvent {
            task,
            label: label.to_string(),
            message,
            severity,
        });
    }
}

/// Reporting handle for one task; owns the task's terminal event.
#[derive(Debug)]
#[must_use = "dropping a TaskReporter reports the task as failed"]
pub struct TaskReporter {
    reporter: Reporter,
    id: TaskId,
    label: String,
    finished: bool,
}

impl TaskReporter {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn info(&self, message: impl Into<String>) {
        self.reporter
            .emit(self.id, &self.label, message.into(), Severity::Info);
    }

    /// Handle for intermediate stage messages only.
    pub fn stages(&self) -> StageReporter {
        StageReporter {
            reporter: self.reporter.clone(),
            id: self.id,
            label: self.label.clone(),
        }
    }

    pub fn succeed(mut self, message: impl Into<String>) {
        self.finish(message.into(), Severity::Success);
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.finish(message.into(), Severity::Failure);
    }

    fn finish(&mut self, message: String, severity: Severity) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.reporter.emit(self.id, &self.label, message, severity);
    }
}

impl Drop for TaskReporter {
    fn drop(&mut self) {
        if !self.finished {
            self.finish("Task ended without a result".to_string(), Severity::Failure);
        }
    }
}

/// Non-terminal reporting handle given to job bodies.
#[derive(Debug, Clone)]
pub struct StageReporter {
    reporter: Reporter,
    id: TaskId,
    label: String,
}

impl StageReporter {
    pub fn info(&self, message: impl Into<String>) {
        self.reporter
            .emit(self.id, &self.label, message.into(), Severity::Info);
    }
}
