use super::trainer::{SearchResult, Trainer, UpdateCandidate};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;

/// Identifier assigned to a job when it is enqueued.
pub type JobId = u64;

/// What a download job does to the store once its payload is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Fresh install from a search result
    New,
    /// Replace an installed trainer; the old file is removed only after the
    /// replacement has been added
    Update { replaces: Utf8PathBuf },
}

/// Where the payload comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    /// Catalog detail page that still has to be resolved to a download link
    Detail(String),
    /// Direct download link, resolution is skipped
    Direct(String),
}

/// One unit of download-and-install work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub kind: JobKind,
    pub source: JobSource,
    /// Name used for the installed file and for status messages
    pub display_name: String,
    /// Store directory the trainer lands in
    pub destination: Utf8PathBuf,
}

impl DownloadJob {
    pub fn from_search_result(result: &SearchResult, destination: Utf8PathBuf) -> Self {
        Self {
            kind: JobKind::New,
            source: JobSource::Detail(result.detail_url.clone()),
            display_name: result.display_name.clone(),
            destination,
        }
    }

    pub fn from_update(candidate: &UpdateCandidate, destination: Utf8PathBuf) -> Self {
        Self {
            kind: JobKind::Update {
                replaces: candidate.trainer.path.clone(),
            },
            source: JobSource::Detail(candidate.update_url.clone()),
            display_name: candidate.trainer.name.clone(),
            destination,
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self.kind, JobKind::Update { .. })
    }

    /// Installed file an update job supersedes.
    pub fn replaces(&self) -> Option<&Utf8Path> {
        match &self.kind {
            JobKind::Update { replaces } => Some(replaces),
            JobKind::New => None,
        }
    }
}

/// Lifecycle of a job inside the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Pipeline stage a job was in when it finished or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStage {
    Queue,
    Resolve,
    Download,
    Unpack,
    Verify,
    Install,
    RemoveOld,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Queue => "queue",
            JobStage::Resolve => "resolve",
            JobStage::Download => "download",
            JobStage::Unpack => "unpack",
            JobStage::Verify => "verify",
            JobStage::Install => "install",
            JobStage::RemoveOld => "remove old version",
        };
        f.write_str(name)
    }
}

/// Terminal result of a job, delivered through its ticket.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded { installed: Vec<Trainer> },
    Failed { stage: JobStage, cause: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }

    pub fn state(&self) -> JobState {
        if self.is_success() {
            JobState::Succeeded
        } else {
            JobState::Failed
        }
    }
}
