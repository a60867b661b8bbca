use crate::metrics::Metrics;
use crate::models::{DownloadJob, JobKind, JobSource, JobStage, Trainer};
use crate::services::catalog::{Catalog, CatalogError};
use crate::services::naming::{has_trainer_extension, trainer_file_name};
use crate::services::queue::{JobExecutor, JobFailure};
use crate::services::reporter::StageReporter;
use crate::services::store::{StoreError, TrainerStore};
use crate::services::unpacker::{ArchiveUnpacker, UnpackError};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;
use std::io::{self, Read};
use std::sync::Arc;
use thiserror::Error;

/// File name used when the download URL does not provide one.
const FALLBACK_PAYLOAD_NAME: &str = "payload";

/// Errors that end a download job, one variant per pipeline stage
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Failed to resolve download link: {0}")]
    Resolve(#[source] CatalogError),

    #[error("Download failed: {0}")]
    Download(#[source] CatalogError),

    #[error("Failed to prepare staging directory: {0}")]
    Staging(#[source] io::Error),

    #[error("Extraction failed: {0}")]
    Unpack(#[from] UnpackError),

    #[error("No trainer executable found for {0}")]
    NoExecutable(String),

    #[error("Failed to install trainer: {0}")]
    Install(#[source] StoreError),

    #[error("Failed to remove the old version: {0}")]
    RemoveOld(#[source] StoreError),

    #[error("Background task failed: {0}")]
    Join(String),
}

impl InstallError {
    /// Pipeline stage the failure belongs to.
    pub fn stage(&self) -> JobStage {
        match self {
            InstallError::Resolve(_) => JobStage::Resolve,
            InstallError::Download(_) | InstallError::Staging(_) => JobStage::Download,
            InstallError::Unpack(_) => JobStage::Unpack,
            InstallError::NoExecutable(_) => JobStage::Verify,
            InstallError::Install(_) | InstallError::Join(_) => JobStage::Install,
            InstallError::RemoveOld(_) => JobStage::RemoveOld,
        }
    }
}

impl From<InstallError> for JobFailure {
    fn from(e: InstallError) -> Self {
        JobFailure::new(e.stage(), e.to_string())
    }
}

/// Runs one download job: resolve, download, unpack, verify, install.
///
/// Staging happens in a temporary directory that is removed when the job
/// ends, whatever the outcome. For update jobs the superseded file is removed
/// only after the replacement is in the store, and never when the
/// replacement was written to the same path.
pub struct Installer {
    catalog: Arc<dyn Catalog>,
    unpacker: ArchiveUnpacker,
    metrics: Arc<Metrics>,
}

impl Installer {
    pub fn new(catalog: Arc<dyn Catalog>, unpacker: ArchiveUnpacker, metrics: Arc<Metrics>) -> Self {
        Self {
            catalog,
            unpacker,
            metrics,
        }
    }

    pub async fn install(&self, job: &DownloadJob, stages: &StageReporter) -> Result<Vec<Trainer>, InstallError> {
        let url = match &job.source {
            JobSource::Detail(detail_url) => {
                stages.info("Resolving download link...");
                self.catalog
                    .fetch_details(detail_url)
                    .await
                    .map_err(InstallError::Resolve)?
                    .download_url
            }
            JobSource::Direct(url) => url.clone(),
        };

        let staging = tempfile::Builder::new()
            .prefix("trainer-download-")
            .tempdir()
            .map_err(InstallError::Staging)?;
        let staging_dir = Utf8PathBuf::try_from(staging.path().to_path_buf())
            .map_err(|e| InstallError::Staging(e.into_io_error()))?;

        let payload = staging_dir.join(payload_file_name(&url));
        stages.info(format!("Fetching {}", url));
        let bytes = self
            .catalog
            .download(&url, &payload)
            .await
            .map_err(InstallError::Download)?;
        self.metrics.record_bytes_downloaded(bytes);

        // The PE sniff applies to the raw download only; inside an archive
        // just `.exe` files count, so bundled DLLs stay out of the store
        let candidates = if is_executable_payload(&payload) {
            vec![payload]
        } else {
            stages.info("Extracting...");
            self.unpacker
                .unpack(&payload, &staging_dir.join("extracted"))
                .await?
                .into_iter()
                .filter(|path| has_trainer_extension(path))
                .collect()
        };

        let executables: Vec<Utf8PathBuf> = candidates
            .into_iter()
            .filter(|path| path.metadata().is_ok_and(|m| m.len() > 0))
            .collect();
        if executables.is_empty() {
            return Err(InstallError::NoExecutable(job.display_name.clone()));
        }

        stages.info("Installing...");
        let destination = job.destination.clone();
        let display_name = job.display_name.clone();
        let installed = tokio::task::spawn_blocking(move || add_all(&destination, &executables, &display_name))
            .await
            .map_err(|e| InstallError::Join(e.to_string()))?
            .map_err(InstallError::Install)?;

        if let JobKind::Update { replaces } = &job.kind {
            if installed.iter().any(|t| t.path == *replaces) {
                tracing::debug!("Update for {} replaced the file in place", replaces);
            } else {
                stages.info("Removing old version...");
                let store = TrainerStore::new(job.destination.clone());
                let old = replaces.clone();
                tokio::task::spawn_blocking(move || store.remove(&old))
                    .await
                    .map_err(|e| InstallError::Join(e.to_string()))?
                    .map_err(InstallError::RemoveOld)?;
            }
        }

        drop(staging);
        Ok(installed)
    }
}

#[async_trait]
impl JobExecutor for Installer {
    async fn execute(&self, job: &DownloadJob, stages: &StageReporter) -> Result<Vec<Trainer>, JobFailure> {
        self.install(job, stages).await.map_err(JobFailure::from)
    }
}

/// Add the verified executables to the store.
///
/// A single executable is installed under the job's display name; several are
/// kept under their own names.
fn add_all(destination: &Utf8Path, executables: &[Utf8PathBuf], display_name: &str) -> Result<Vec<Trainer>, StoreError> {
    let store = TrainerStore::open(destination)?;

    if let [single] = executables {
        return Ok(vec![store.add_as(single, &trainer_file_name(display_name))?]);
    }

    executables.iter().map(|exe| store.add(exe)).collect()
}

/// Local file name for a download URL; keeps the extension so archives are
/// recognisable.
fn payload_file_name(url: &str) -> String {
    let segment = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()?
                .filter(|s| !s.is_empty())
                .next_back()
                .map(str::to_string)
        })
        .unwrap_or_default();

    let cleaned: String = segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        FALLBACK_PAYLOAD_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// `.exe` extension or a PE header.
fn is_executable_payload(path: &Utf8Path) -> bool {
    if has_trainer_extension(path) {
        return true;
    }

    let mut magic = [0u8; 2];
    std::fs::File::open(path)
        .and_then(|mut file| file.read_exact(&mut magic))
        .is_ok_and(|()| &magic == b"MZ")
}
