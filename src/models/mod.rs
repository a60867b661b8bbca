//! Data models for the trainer manager.
//!
//! This module contains the core data structures used throughout the crate:
//! - [`AppState`]: The central runtime state (settings, store snapshot, queue bookkeeping, task flags)
//! - [`Settings`]: User preferences persisted in `Settings.yaml`
//! - [`Trainer`], [`SearchResult`], [`DetailRecord`], [`CatalogIndex`], [`UpdateCandidate`]: store and catalog records
//! - [`DownloadJob`], [`JobOutcome`], [`JobState`]: download queue records
//! - [`MAX_ACTIVE_DOWNLOADS`]: Critical concurrency limit constant (always 1)
//!
//! # Architecture Note
//!
//! - **Serializable**: settings and the catalog index derive `Serialize`/`Deserialize` for persistence
//! - **Cloneable**: AppState is wrapped in `Arc<RwLock<>>` by [`StateManager`](crate::state::StateManager)
//! - **Immutable**: State updates go through StateManager's `update()` method to ensure consistency

pub mod app_state;
pub mod config;
pub mod job;
pub mod trainer;

pub use app_state::{AppState, MAX_ACTIVE_DOWNLOADS, TaskKind};
pub use config::{CatalogHosts, Region, Settings, TRAINER_DIR_NAME};
pub use job::{DownloadJob, JobId, JobKind, JobOutcome, JobSource, JobStage, JobState};
pub use trainer::{CatalogIndex, DetailRecord, RemoteEntry, SearchResult, Trainer, UpdateCandidate};
