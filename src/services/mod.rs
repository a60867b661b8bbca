//! Services module - Business logic for fetching, installing and updating trainers.
//!
//! The services have no dependency on any front end. Each one takes its inputs
//! explicitly, which keeps them testable with temp directories and a mocked
//! [`Catalog`].
//!
//! # Components
//!
//! - [`TrainerStore`]: The local trainer directory. Lists, adds, removes,
//!   renames, imports and migrates trainer executables.
//! - [`Catalog`] / [`CatalogClient`]: Remote catalog access over HTTP:
//!   - keyword search with pagination
//!   - detail page resolution to a payload URL
//!   - the bulk index used for update checks
//!   - streamed payload downloads with an inactivity timeout
//! - [`ArchiveUnpacker`]: Runs the external 7-Zip compatible tool with a timeout.
//! - [`Installer`]: The download pipeline run for each job
//!   (resolve, download, unpack, verify, install, remove old version).
//! - [`DownloadQueue`]: FIFO queue with a single worker; every job ends in a
//!   terminal [`JobOutcome`](crate::models::JobOutcome).
//! - [`updater::scan`]: Compares installed trainers with the catalog index.
//! - [`Reporter`]: Status events for the attached front end, mirrored to tracing.
//! - [`naming`]: Name normalization, sort keys and file naming rules.
//!
//! # Usage Example
//!
//! ```ignore
//! use trainer_manager::services::{ArchiveUnpacker, CatalogClient, Installer};
//!
//! let catalog = Arc::new(CatalogClient::from_settings(&settings)?);
//! let installer = Installer::new(catalog, ArchiveUnpacker::from_settings(&settings), metrics);
//! let installed = installer.install(&job, &stages).await?;
//! ```

pub mod catalog;
pub mod installer;
pub mod naming;
pub mod queue;
pub mod release;
pub mod reporter;
pub mod store;
pub mod unpacker;
pub mod updater;

pub use catalog::{Catalog, CatalogClient, CatalogError};
pub use installer::{InstallError, Installer};
pub use queue::{DownloadQueue, JobExecutor, JobFailure, JobTicket};
pub use release::ReleaseStatus;
pub use reporter::{ReportEvent, Reporter, Severity, StageReporter, TaskReporter};
pub use store::{ImportReport, StoreError, TrainerStore};
pub use unpacker::{ArchiveUnpacker, UnpackError};
pub use updater::scan;
