use crate::models::Trainer;
use crate::services::naming::{has_trainer_extension, sort_key, trainer_file_name};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use std::fs::{self, File, Permissions};
use std::io::{self, Read};
use std::time::SystemTime;
use thiserror::Error;

/// Suffix of in-flight copies; never matches the trainer extension.
const PARTIAL_SUFFIX: &str = ".partial";

/// Errors raised by store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Trainer is currently in use, close any programs using {0} and try again")]
    ResourceBusy(Utf8PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Error migrating trainers: {0}")]
    Migration(String),

    #[error("Trainer not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("Invalid trainer name: {0}")]
    InvalidName(String),
}

impl StoreError {
    fn io(path: &Utf8Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Locked-file failures clear up once the user closes the trainer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ResourceBusy(_))
    }
}

/// Outcome of a bulk import.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<Trainer>,
    pub failed: Vec<(Utf8PathBuf, String)>,
    pub originals_deleted: usize,
    pub delete_failures: Vec<(Utf8PathBuf, String)>,
}

/// Flat directory of trainer executables.
///
/// Every query re-reads the directory; nothing is cached. The store is the
/// only component that writes into the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerStore {
    dir: Utf8PathBuf,
}

impl TrainerStore {
    /// Wrap an existing directory.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Wrap a directory, creating it if needed.
    pub fn open(dir: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Snapshot of the installed trainers, sorted by [`sort_key`].
    ///
    /// Only non-empty `.exe` files directly inside the directory count.
    pub fn list(&self) -> Result<Vec<Trainer>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let mut trainers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let Ok(file_name) = entry.file_name().into_string() else {
                tracing::warn!("Skipping non UTF-8 file name in {}", self.dir);
                continue;
            };

            let path = self.dir.join(&file_name);
            if !has_trainer_extension(&path) {
                continue;
            }

            match read_trainer(&path) {
                Ok(Some(trainer)) => trainers.push(trainer),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping {}: {}", path, e),
            }
        }

        trainers.sort_by(|a, b| {
            sort_key(&a.name)
                .cmp(&sort_key(&b.name))
                .then_with(|| a.path.cmp(&b.path))
        });

        Ok(trainers)
    }

    /// Installed trainers whose name contains `needle` (case-insensitive).
    pub fn filter(&self, needle: &str) -> Result<Vec<Trainer>, StoreError> {
        let needle = needle.trim().to_lowercase();
        let trainers = self.list()?;
        if needle.is_empty() {
            return Ok(trainers);
        }
        Ok(trainers
            .into_iter()
            .filter(|t| t.name.to_lowercase().contains(&needle))
            .collect())
    }

    /// Copy a file into the store under its own file name.
    pub fn add(&self, source: &Utf8Path) -> Result<Trainer, StoreError> {
        let file_name = source
            .file_name()
            .ok_or_else(|| StoreError::InvalidName(source.to_string()))?;
        self.add_as(source, file_name)
    }

    /// Copy a file into the store as `file_name`.
    ///
    /// The copy is written next to the destination and renamed over it, so a
    /// trainer already installed under that name stays intact until the new
    /// one is complete. A read-only destination is made writable first. The
    /// installed copy gets a fresh modification time, which serves as its
    /// local version stamp.
    pub fn add_as(&self, source: &Utf8Path, file_name: &str) -> Result<Trainer, StoreError> {
        validate_file_name(file_name)?;
        let dest = self.dir.join(file_name);

        if is_same_file(source, &dest) {
            set_modified(&dest, SystemTime::now()).map_err(|e| StoreError::io(&dest, e))?;
        } else {
            let file = File::open(source).map_err(|e| StoreError::io(source, e))?;
            let permissions = file
                .metadata()
                .map_err(|e| StoreError::io(source, e))?
                .permissions();
            replace_atomically(&dest, file, permissions, SystemTime::now())
                .map_err(|e| map_busy(&dest, e))?;
        }
        tracing::info!("Trainer installed: {}", dest);

        read_trainer(&dest)
            .map_err(|e| StoreError::io(&dest, e))?
            .ok_or_else(|| StoreError::InvalidName(format!("{} is empty", file_name)))
    }

    /// Delete a trainer.
    pub fn remove(&self, path: &Utf8Path) -> Result<(), StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        clear_readonly(path).map_err(|e| map_busy(path, e))?;
        fs::remove_file(path).map_err(|e| map_busy(path, e))?;

        tracing::info!("Trainer removed: {}", path);
        Ok(())
    }

    /// Rename a trainer, keeping it in the store.
    pub fn rename(&self, path: &Utf8Path, new_name: &str) -> Result<Trainer, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        let dest = self.dir.join(trainer_file_name(new_name));
        if dest != path && dest.exists() {
            return Err(StoreError::InvalidName(format!("{} already exists", dest)));
        }

        clear_readonly(path).map_err(|e| map_busy(path, e))?;
        fs::rename(path, &dest).map_err(|e| map_busy(path, e))?;

        read_trainer(&dest)
            .map_err(|e| StoreError::io(&dest, e))?
            .ok_or_else(|| StoreError::NotFound(dest.clone()))
    }

    /// Move every trainer into `new_dir` and return the store for it.
    ///
    /// All files are copied first and the originals are deleted only once
    /// every copy succeeded. Any copy failure removes the copies made so far
    /// and leaves this store untouched.
    pub fn migrate(&self, new_dir: &Utf8Path) -> Result<TrainerStore, StoreError> {
        if new_dir == self.dir {
            return Err(StoreError::Migration("Please choose a new path.".to_string()));
        }

        fs::create_dir_all(new_dir)
            .map_err(|e| StoreError::Migration(format!("cannot create {}: {}", new_dir, e)))?;

        let trainers = self
            .list()
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        let mut created: Vec<Utf8PathBuf> = Vec::new();
        for trainer in &trainers {
            let Some(file_name) = trainer.path.file_name() else {
                continue;
            };
            let dest = new_dir.join(file_name);
            let existed = dest.exists();

            if let Err(e) = copy_preserving_mtime(&trainer.path, &dest) {
                for copy in &created {
                    if let Err(cleanup) = fs::remove_file(copy) {
                        tracing::warn!("Failed to roll back {}: {}", copy, cleanup);
                    }
                }
                return Err(StoreError::Migration(format!("{}: {}", trainer.name, e)));
            }

            if !existed {
                created.push(dest);
            }
        }

        for trainer in &trainers {
            if let Err(e) = clear_readonly(&trainer.path).and_then(|_| fs::remove_file(&trainer.path)) {
                tracing::warn!("Migrated trainer left behind at {}: {}", trainer.path, e);
            }
        }

        // Only succeeds when nothing else lives there
        if fs::remove_dir(&self.dir).is_ok() {
            tracing::debug!("Removed empty directory {}", self.dir);
        }

        tracing::info!("Migrated {} trainers from {} to {}", trainers.len(), self.dir, new_dir);
        Ok(TrainerStore::new(new_dir))
    }

    /// Start a trainer as a detached process.
    pub fn launch(&self, path: &Utf8Path) -> Result<(), StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        let mut command = std::process::Command::new(path.as_std_path());
        if let Some(parent) = path.parent() {
            command.current_dir(parent);
        }
        let child = command.spawn().map_err(|e| StoreError::io(path, e))?;

        tracing::info!("Launched {} (pid {})", path, child.id());
        Ok(())
    }

    /// Import many trainers, continuing past individual failures.
    ///
    /// When `delete_originals` is set, sources that were imported
    /// successfully are deleted afterwards.
    pub fn import(&self, sources: &[Utf8PathBuf], delete_originals: bool) -> ImportReport {
        let mut report = ImportReport::default();

        for source in sources {
            match self.add(source) {
                Ok(trainer) => {
                    tracing::info!("Trainer copied: {}", source);
                    report.imported.push(trainer);
                }
                Err(e) => {
                    tracing::error!("Failed to import trainer {}: {}", source, e);
                    report.failed.push((source.clone(), e.to_string()));
                }
            }
        }

        if delete_originals {
            for trainer in &report.imported {
                let Some(source) = sources
                    .iter()
                    .find(|s| s.file_name() == trainer.path.file_name())
                else {
                    continue;
                };
                if is_same_file(source, &trainer.path) {
                    continue;
                }
                match fs::remove_file(source) {
                    Ok(()) => report.originals_deleted += 1,
                    Err(e) => {
                        tracing::error!("Failed to delete original trainer {}: {}", source, e);
                        report.delete_failures.push((source.clone(), e.to_string()));
                    }
                }
            }
        }

        report
    }
}

/// Read one trainer file; `None` when it is empty or not a regular file.
fn read_trainer(path: &Utf8Path) -> io::Result<Option<Trainer>> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_file() || metadata.len() == 0 {
        return Ok(None);
    }

    let name = path.file_stem().unwrap_or_default().to_string();
    Ok(Some(Trainer {
        name,
        path: path.to_path_buf(),
        size_bytes: metadata.len(),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    }))
}

fn validate_file_name(file_name: &str) -> Result<(), StoreError> {
    if file_name.is_empty()
        || file_name.contains(['/', '\\'])
        || file_name == "."
        || file_name == ".."
    {
        return Err(StoreError::InvalidName(file_name.to_string()));
    }
    Ok(())
}

fn is_same_file(a: &Utf8Path, b: &Utf8Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn copy_preserving_mtime(source: &Utf8Path, dest: &Utf8Path) -> io::Result<()> {
    let file = File::open(source)?;
    let metadata = file.metadata()?;
    let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
    replace_atomically(dest, file, metadata.permissions(), modified)
}

/// Write `contents` to `dest` through a temp file in the same directory.
///
/// `dest` is either left as it was or replaced by the complete new file.
/// The temp file is removed when anything fails before the rename.
fn replace_atomically(
    dest: &Utf8Path,
    mut contents: impl Read,
    permissions: Permissions,
    modified: SystemTime,
) -> io::Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("{dest} has no parent")))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".")
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(dir)?;
    io::copy(&mut contents, &mut temp)?;
    temp.as_file().sync_all()?;
    temp.as_file().set_modified(modified)?;
    fs::set_permissions(temp.path(), permissions)?;

    if dest.exists() {
        clear_readonly(dest)?;
    }
    temp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

fn set_modified(path: &Utf8Path, time: SystemTime) -> io::Result<()> {
    File::options().write(true).open(path)?.set_modified(time)
}

/// Make a file writable if it carries the read-only attribute.
fn clear_readonly(path: &Utf8Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    if !permissions.readonly() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o200);
    }
    #[cfg(not(unix))]
    {
        permissions.set_readonly(false);
    }

    fs::set_permissions(path, permissions)
}

/// Map "file in use" failures to [`StoreError::ResourceBusy`].
fn map_busy(path: &Utf8Path, err: io::Error) -> StoreError {
    if is_locked(&err) {
        StoreError::ResourceBusy(path.to_path_buf())
    } else {
        StoreError::io(path, err)
    }
}

fn is_locked(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::ResourceBusy {
        return true;
    }
    // ERROR_ACCESS_DENIED (running exe), ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(err.raw_os_error(), Some(5) | Some(32) | Some(33))
}
