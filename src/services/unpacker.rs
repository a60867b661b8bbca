use crate::models::Settings;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Errors that can occur while extracting an archive
#[derive(Error, Debug)]
pub enum UnpackError {
    #[error("Failed to start extractor {tool}: {source}")]
    Spawn {
        tool: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Extractor exited with code {code}: {stderr}")]
    ExitCode { code: i32, stderr: String },

    #[error("I/O error during extraction: {0}")]
    Io(#[from] io::Error),
}

/// Runs the 7-Zip command line tool as a subprocess.
///
/// The child is killed when the timeout elapses. On any failure the entries
/// the extraction created inside the destination directory are removed, so
/// callers never see half-written executables.
#[derive(Debug, Clone)]
pub struct ArchiveUnpacker {
    tool: Utf8PathBuf,
    timeout: Duration,
}

impl ArchiveUnpacker {
    pub fn new(tool: impl Into<Utf8PathBuf>, timeout: Duration) -> Self {
        Self {
            tool: tool.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.unpacker_path.clone(),
            Duration::from_secs(settings.unpack_timeout),
        )
    }

    /// Extract `archive` into `dest`, returning the extracted files sorted by path.
    pub async fn unpack(&self, archive: &Utf8Path, dest: &Utf8Path) -> Result<Vec<Utf8PathBuf>, UnpackError> {
        tokio::fs::create_dir_all(dest).await?;
        let before = top_level_entries(dest).await?;

        match self.run(archive, dest).await {
            Ok(()) => {
                let mut files = Vec::new();
                for entry in top_level_entries(dest).await?.difference(&before) {
                    collect_files(entry, &mut files).await?;
                }
                files.sort();
                tracing::debug!("Extracted {} files from {}", files.len(), archive);
                Ok(files)
            }
            Err(e) => {
                remove_new_entries(dest, &before).await;
                Err(e)
            }
        }
    }

    async fn run(&self, archive: &Utf8Path, dest: &Utf8Path) -> Result<(), UnpackError> {
        tracing::info!("Extracting {} into {}", archive, dest);
        let start = Instant::now();

        let mut command = Command::new(self.tool.as_std_path());
        command
            .arg("x")
            .arg(archive.as_str())
            .arg(format!("-o{}", dest))
            .arg("-y")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| UnpackError::Spawn {
            tool: self.tool.clone(),
            source,
        })?;

        // Dropping the wait future on timeout kills the child
        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::warn!("Extractor timed out after {:?}", self.timeout);
                UnpackError::Timeout(self.timeout)
            })??;

        let code = output.status.code().unwrap_or(-1);
        tracing::info!(
            "Extractor completed in {:.2}s with exit code {}",
            start.elapsed().as_secs_f32(),
            code
        );

        if output.status.success() {
            Ok(())
        } else {
            Err(UnpackError::ExitCode {
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

async fn top_level_entries(dir: &Utf8Path) -> io::Result<HashSet<Utf8PathBuf>> {
    let mut entries = HashSet::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        match Utf8PathBuf::from_path_buf(entry.path()) {
            Ok(path) => {
                entries.insert(path);
            }
            Err(path) => tracing::warn!("Ignoring non UTF-8 path {}", path.display()),
        }
    }
    Ok(entries)
}

async fn collect_files(root: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> io::Result<()> {
    let mut pending = vec![root.to_path_buf()];
    while let Some(path) = pending.pop() {
        let metadata = tokio::fs::symlink_metadata(&path).await?;
        if metadata.is_dir() {
            pending.extend(top_level_entries(&path).await?);
        } else if metadata.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

async fn remove_new_entries(dest: &Utf8Path, before: &HashSet<Utf8PathBuf>) {
    let after = match top_level_entries(dest).await {
        Ok(after) => after,
        Err(e) => {
            tracing::error!("Cannot list {} for cleanup: {}", dest, e);
            return;
        }
    };

    for entry in after.difference(before) {
        let result = match tokio::fs::symlink_metadata(entry).await {
            Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(entry).await,
            Ok(_) => tokio::fs::remove_file(entry).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => tracing::debug!("Removed partial extraction output {}", entry),
            Err(e) => tracing::error!("Failed to remove partial extraction output {}: {}", entry, e),
        }
    }
}
