// State management module
//
// This module provides the StateManager which wraps AppState with thread-safe access
// using Arc<RwLock<T>> and emits change events for the presentation layer.

use crate::models::{AppState, JobId, JobState, SearchResult, Settings, TaskKind, Trainer};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Buffered events per subscriber before slow receivers start lagging.
const EVENT_BUFFER: usize = 256;

/// Change events emitted when state is modified
///
/// These events notify interested parties (the CLI, the store refresher,
/// tests) about state changes without requiring them to poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// Settings have been updated
    SettingsChanged,

    /// The store directory moved
    DownloadDirChanged { path: Utf8PathBuf },

    /// The installed trainer snapshot was re-read
    TrainersRefreshed { count: usize },

    /// A catalog search produced a new result list
    SearchResultsChanged { count: usize, downloadable: bool },

    /// A job was appended to the download queue
    JobQueued { id: JobId, name: String },

    /// A job was promoted to running
    JobStarted { id: JobId, name: String },

    /// A job reached a terminal state
    JobFinished { id: JobId, state: JobState },

    /// A single-flight background task began
    TaskStarted { kind: TaskKind },

    /// A single-flight background task ended
    TaskFinished { kind: TaskKind },

    /// Current operation text has changed
    OperationChanged { operation: String },
}

/// Thread-safe state manager with event emission
///
/// This is the central state management component that:
/// - Provides thread-safe access to [`AppState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`StateChange`] events
/// - Owns the Idle/Running state of every single-flight [`TaskKind`]
/// - Tracks download job transitions for the queue
///
/// # Usage
///
/// - [`read()`](Self::read) for reading state
/// - [`update()`](Self::update) for mutations with automatic event emission
/// - [`subscribe()`](Self::subscribe) for listening to state changes
/// - [`try_begin_task()`](Self::try_begin_task) to claim a task kind
pub struct StateManager {
    /// The application state protected by RwLock for thread-safe access
    state: Arc<RwLock<AppState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with default state
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            state_tx,
        }
    }

    /// Get a read-only snapshot of the current state
    pub fn snapshot(&self) -> AppState {
        self.read(|state| state.clone())
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let busy = state_manager.read(|state| state.is_downloading());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// This is the primary way to modify state. It:
    /// 1. Captures the old state
    /// 2. Applies the update function
    /// 3. Detects what changed
    /// 4. Emits appropriate events
    ///
    /// The whole sequence runs under one write lock, so a closure that checks
    /// and then sets a field cannot race with another updater.
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = Self::detect_changes(&old_state, &state);

        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn emit(&self, change: StateChange) -> StateChange {
        let _ = self.state_tx.send(change.clone());
        change
    }

    /// Detect what changed between two states and generate events
    ///
    /// Job transitions are emitted explicitly by the job methods below.
    fn detect_changes(old: &AppState, new: &AppState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.settings.download_path != new.settings.download_path {
            changes.push(StateChange::DownloadDirChanged {
                path: new.settings.download_path.clone(),
            });
        }

        if old.settings != new.settings {
            changes.push(StateChange::SettingsChanged);
        }

        for kind in new.running_tasks.difference(&old.running_tasks) {
            changes.push(StateChange::TaskStarted { kind: *kind });
        }
        for kind in old.running_tasks.difference(&new.running_tasks) {
            changes.push(StateChange::TaskFinished { kind: *kind });
        }

        if old.trainers != new.trainers {
            changes.push(StateChange::TrainersRefreshed {
                count: new.trainers.len(),
            });
        }

        if old.search_results != new.search_results || old.downloadable != new.downloadable {
            changes.push(StateChange::SearchResultsChanged {
                count: new.search_results.len(),
                downloadable: new.downloadable,
            });
        }

        if old.current_operation != new.current_operation {
            changes.push(StateChange::OperationChanged {
                operation: new.current_operation.clone(),
            });
        }

        changes
    }

    // Single-flight tasks

    /// Claim a task kind, moving it from Idle to Running.
    ///
    /// Returns `None` when a task of the same kind is already running. The
    /// returned guard moves the kind back to Idle when dropped.
    pub fn try_begin_task(&self, kind: TaskKind) -> Option<TaskGuard> {
        self.try_begin_task_when(kind, |_| true)
    }

    /// Claim a task kind only if `ready` holds for the current state.
    ///
    /// The check and the claim happen under the same write lock.
    pub fn try_begin_task_when<P>(&self, kind: TaskKind, ready: P) -> Option<TaskGuard>
    where
        P: FnOnce(&AppState) -> bool,
    {
        let mut claimed = false;
        self.update(|state| {
            claimed = ready(state) && state.running_tasks.insert(kind);
        });

        if claimed {
            tracing::debug!("Task {} started", kind);
            Some(TaskGuard {
                state: self.clone(),
                kind,
            })
        } else {
            tracing::debug!("Task {} already running, request suppressed", kind);
            None
        }
    }

    fn end_task(&self, kind: TaskKind) {
        self.update(|state| {
            state.running_tasks.remove(&kind);
        });
        tracing::debug!("Task {} finished", kind);
    }

    // Download job transitions

    /// Record a newly enqueued job at the tail of the queue.
    ///
    /// Returns false, leaving the queue unchanged, while a migration runs.
    pub fn queue_job(&self, id: JobId, name: &str) -> bool {
        let mut accepted = false;
        self.update(|state| {
            if state.is_task_running(TaskKind::Migration) {
                return;
            }
            state.queued_jobs.push_back(id);
            state.job_names.insert(id, name.to_string());
            accepted = true;
        });

        if accepted {
            self.emit(StateChange::JobQueued {
                id,
                name: name.to_string(),
            });
        }
        accepted
    }

    /// Promote a queued job to running.
    pub fn start_job(&self, id: JobId) -> Vec<StateChange> {
        let mut name = String::new();
        let mut changes = self.update(|state| {
            if let Some(active) = state.active_job {
                tracing::error!("Job {} started while job {} is still running", id, active);
            }
            state.queued_jobs.retain(|queued| *queued != id);
            state.active_job = Some(id);
            name = state.job_names.get(&id).cloned().unwrap_or_default();
            state.current_operation = format!("Downloading {}...", name);
        });
        changes.push(self.emit(StateChange::JobStarted { id, name }));
        changes
    }

    /// Move a job (running, or still queued when the queue shuts down) to a terminal state.
    pub fn finish_job(&self, id: JobId, outcome: JobState) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            if state.active_job == Some(id) {
                state.active_job = None;
                state.current_operation.clear();
            }
            state.queued_jobs.retain(|queued| *queued != id);
            state.job_names.remove(&id);
            match outcome {
                JobState::Succeeded => state.jobs_succeeded += 1,
                _ => state.jobs_failed += 1,
            }
        });
        changes.push(self.emit(StateChange::JobFinished { id, state: outcome }));
        changes
    }

    // Convenience methods for common state updates

    /// Replace the installed trainer snapshot
    pub fn set_trainers(&self, trainers: Vec<Trainer>) -> Vec<StateChange> {
        self.update(|state| {
            state.trainers = trainers;
        })
    }

    /// Replace the search results; `downloadable` marks whether they can be enqueued
    pub fn set_search_results(&self, results: Vec<SearchResult>, downloadable: bool) -> Vec<StateChange> {
        self.update(|state| {
            state.search_results = results;
            state.downloadable = downloadable;
        })
    }

    /// Change the store directory
    pub fn set_download_dir(&self, path: &Utf8Path) -> Vec<StateChange> {
        self.update(|state| {
            state.settings.download_path = path.to_path_buf();
        })
    }

    /// Mark an installed trainer as having an update job in flight.
    ///
    /// Returns false when one is already pending.
    pub fn mark_update_pending(&self, path: &Utf8Path) -> bool {
        let mut inserted = false;
        self.update(|state| {
            inserted = state.pending_updates.insert(path.to_path_buf());
        });
        inserted
    }

    pub fn clear_update_pending(&self, path: &Utf8Path) {
        self.update(|state| {
            state.pending_updates.remove(path);
        });
    }

    /// Update settings
    pub fn update_settings<F>(&self, settings_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut Settings),
    {
        self.update(|state| settings_fn(&mut state.settings))
    }

    /// Load configuration from Settings
    pub fn load_from_settings(&self, settings: &Settings) -> Vec<StateChange> {
        self.update(|state| {
            state.settings = settings.clone();

            tracing::info!(
                "Loaded settings: download_path={}, server={}, auto_update={}, auto_update_database={}",
                settings.download_path,
                settings.download_server,
                settings.auto_update,
                settings.auto_update_database
            );
        })
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make StateManager cloneable for sharing across threads
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}

/// Running claim on a single-flight [`TaskKind`].
///
/// Dropping the guard returns the kind to Idle and emits
/// [`StateChange::TaskFinished`].
#[must_use = "the task is released as soon as the guard is dropped"]
pub struct TaskGuard {
    state: StateManager,
    kind: TaskKind,
}

impl TaskGuard {
    pub fn kind(&self) -> TaskKind {
        self.kind
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.state.end_task(self.kind);
    }
}
