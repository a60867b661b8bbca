use super::config::Settings;
use super::job::JobId;
use super::trainer::{SearchResult, Trainer};
use camino::Utf8PathBuf;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Maximum number of download jobs executing at once.
///
/// **IMPORTANT:** This is deliberately 1. Every job unpacks into and then
/// writes the same store directory, and the status channel assumes a single
/// active download. The limit is enforced structurally by the single worker
/// task in [`crate::services::queue::DownloadQueue`].
pub const MAX_ACTIVE_DOWNLOADS: usize = 1;

/// Background task kinds that must never overlap with themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Search,
    DatabaseFetch,
    TrainerUpdate,
    Migration,
    ReleaseCheck,
}

impl TaskKind {
    /// Stable label used for reporter events and log lines.
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::Search => "search",
            TaskKind::DatabaseFetch => "database",
            TaskKind::TrainerUpdate => "trainerUpdate",
            TaskKind::Migration => "migration",
            TaskKind::ReleaseCheck => "release",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Single source of truth for runtime state shared between the control layer
/// and background workers.
///
/// Never mutate this directly; go through [`crate::state::StateManager`] so
/// change events are emitted.
#[derive(Clone, Debug)]
pub struct AppState {
    pub settings: Settings,

    // Store snapshot (refreshed after every job and user mutation)
    pub trainers: Vec<Trainer>,

    // Catalog search
    pub search_results: Vec<SearchResult>,
    pub downloadable: bool,

    // Download queue
    pub active_job: Option<JobId>,
    pub queued_jobs: VecDeque<JobId>,
    pub job_names: HashMap<JobId, String>,
    pub pending_updates: HashSet<Utf8PathBuf>,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,

    // Single-flight background tasks
    pub running_tasks: HashSet<TaskKind>,

    pub current_operation: String,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            settings: Settings::default(),

            trainers: Vec::new(),

            search_results: Vec::new(),
            downloadable: false,

            active_job: None,
            queued_jobs: VecDeque::new(),
            job_names: HashMap::new(),
            pending_updates: HashSet::new(),
            jobs_succeeded: 0,
            jobs_failed: 0,

            running_tasks: HashSet::new(),

            current_operation: String::new(),
        }
    }
}

impl AppState {
    pub fn download_dir(&self) -> &Utf8PathBuf {
        &self.settings.download_path
    }

    /// A job is running right now.
    pub fn is_downloading(&self) -> bool {
        self.active_job.is_some()
    }

    /// Something is running or waiting in the download queue.
    pub fn has_pending_jobs(&self) -> bool {
        self.active_job.is_some() || !self.queued_jobs.is_empty()
    }

    pub fn is_task_running(&self, kind: TaskKind) -> bool {
        self.running_tasks.contains(&kind)
    }

    /// Searching is blocked while another search or a download runs.
    pub fn can_search(&self) -> bool {
        !self.is_task_running(TaskKind::Search) && !self.is_downloading()
    }

    /// Search results can be turned into jobs.
    pub fn can_download(&self) -> bool {
        self.downloadable && !self.search_results.is_empty()
    }

    /// Store-wide mutations (migration) need an idle queue.
    pub fn can_migrate(&self) -> bool {
        !self.has_pending_jobs() && !self.is_task_running(TaskKind::Migration)
    }

    /// Get queue statistics.
    ///
    /// Returns a tuple of (succeeded, failed, queued, running).
    pub fn job_stats(&self) -> (usize, usize, usize, usize) {
        (
            self.jobs_succeeded,
            self.jobs_failed,
            self.queued_jobs.len(),
            usize::from(self.active_job.is_some()),
        )
    }

    /// Find an installed trainer by display name (case-insensitive).
    pub fn find_trainer(&self, name: &str) -> Option<&Trainer> {
        self.trainers
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = AppState::default();
        assert!(!state.is_downloading());
        assert!(!state.has_pending_jobs());
        assert!(state.can_search());
        assert!(!state.can_download());
        assert!(state.can_migrate());
    }

    #[test]
    fn test_search_blocked_while_downloading() {
        let mut state = AppState::default();
        state.active_job = Some(1);
        assert!(!state.can_search());
        assert!(!state.can_migrate());

        state.active_job = None;
        state.running_tasks.insert(TaskKind::Search);
        assert!(!state.can_search());
    }

    #[test]
    fn test_queued_jobs_block_migration() {
        let mut state = AppState::default();
        state.queued_jobs.push_back(7);
        assert!(state.has_pending_jobs());
        assert!(!state.can_migrate());
        assert_eq!(state.job_stats(), (0, 0, 1, 0));
    }

    #[test]
    fn test_can_download_requires_results() {
        let mut state = AppState::default();
        state.downloadable = true;
        assert!(!state.can_download());

        state.search_results.push(SearchResult {
            display_name: "Hades Trainer".to_string(),
            remote_id: "hades-trainer".to_string(),
            detail_url: "https://example.com/trainer/hades-trainer/".to_string(),
        });
        assert!(state.can_download());
    }

    #[test]
    fn test_find_trainer_case_insensitive() {
        let mut state = AppState::default();
        state.trainers.push(Trainer {
            name: "Elden Ring".to_string(),
            path: Utf8PathBuf::from("/store/Elden Ring.exe"),
            size_bytes: 1,
            modified: None,
        });

        assert!(state.find_trainer("elden ring").is_some());
        assert!(state.find_trainer("hades").is_none());
    }

    #[test]
    fn test_task_labels() {
        assert_eq!(TaskKind::TrainerUpdate.label(), "trainerUpdate");
        assert_eq!(TaskKind::DatabaseFetch.to_string(), "database");
    }
}
