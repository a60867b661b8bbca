// Controller - Coordinates presentation requests with the download pipeline
//
// This module contains the Controller which coordinates between:
// - StateManager (application state and single-flight task flags)
// - ConfigManager (settings file and cached trainer database)
// - Catalog (remote search, details, bulk index)
// - DownloadQueue (single-worker job execution)
// - Reporter (status events for whatever front end is attached)
//
// Every public operation is async and never blocks the caller's thread on
// disk or network work.

use crate::config::ConfigManager;
use crate::metrics::Metrics;
use crate::models::{AppState, CatalogIndex, DownloadJob, SearchResult, Settings, TRAINER_DIR_NAME, TaskKind, Trainer};
use crate::services::catalog::Catalog;
use crate::services::queue::{DownloadQueue, JobExecutor, JobTicket};
use crate::services::release::{self, ReleaseStatus};
use crate::services::reporter::Reporter;
use crate::services::store::{ImportReport, StoreError, TrainerStore};
use crate::services::updater;
use crate::state::{StateChange, StateManager};
use anyhow::{Context, Result, anyhow, bail};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Front-end agnostic controller for the trainer manager
///
/// Owns the download queue worker and a listener that re-reads the store
/// whenever a job finishes. Call [`shutdown`](Self::shutdown) before exiting
/// so queued jobs are reported as cancelled.
///
/// # Example
/// ```ignore
/// let controller = Controller::new(state, config, catalog, executor, reporter, metrics);
/// controller.refresh_trainers().await?;
/// if let Some(results) = controller.search("elden ring").await? {
///     let ticket = controller.download(&results[0])?;
///     ticket.wait().await;
/// }
/// controller.shutdown().await;
/// ```
pub struct Controller {
    state: Arc<StateManager>,
    config: Arc<ConfigManager>,
    catalog: Arc<dyn Catalog>,
    queue: DownloadQueue,
    reporter: Reporter,
    metrics: Arc<Metrics>,

    /// Send `true` to stop the queue worker and the periodic updater
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    listener: JoinHandle<()>,
}

impl Controller {
    /// Create the controller and start its background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        state: Arc<StateManager>,
        config: Arc<ConfigManager>,
        catalog: Arc<dyn Catalog>,
        executor: Arc<dyn JobExecutor>,
        reporter: Reporter,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue, worker) = DownloadQueue::spawn(
            executor,
            (*state).clone(),
            reporter.clone(),
            Arc::clone(&metrics),
            shutdown_rx,
        );

        let listener = spawn_job_listener(Arc::clone(&state));

        tracing::info!("Controller initialized");

        Self {
            state,
            config,
            catalog,
            queue,
            reporter,
            metrics,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
            listener,
        }
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    /// Receiver that flips to `true` once shutdown is requested.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    fn store(&self) -> TrainerStore {
        TrainerStore::new(self.state.read(|s| s.download_dir().clone()))
    }

    // Store operations

    /// Re-read the store and publish the snapshot.
    pub async fn refresh_trainers(&self) -> Result<Vec<Trainer>> {
        let trainers = list_store(self.store()).await?;
        self.state.set_trainers(trainers.clone());
        Ok(trainers)
    }

    /// Installed trainers whose name contains `needle`.
    pub async fn filter_installed(&self, needle: &str) -> Result<Vec<Trainer>> {
        let store = self.store();
        let needle = needle.to_string();
        blocking(move || store.filter(&needle)).await
    }

    /// Look up an installed trainer by display name.
    pub async fn find_installed(&self, name: &str) -> Result<Trainer> {
        self.refresh_trainers().await?;
        self.state
            .read(|s| s.find_trainer(name).cloned())
            .ok_or_else(|| anyhow!("No installed trainer named {:?}", name))
    }

    /// Delete an installed trainer.
    ///
    /// A trainer that is still running fails with [`StoreError::ResourceBusy`],
    /// reachable through `downcast_ref`.
    pub async fn delete(&self, trainer: &Trainer) -> Result<()> {
        let task = self.reporter.begin(format!("delete {}", trainer.name));
        let store = self.store();
        let path = trainer.path.clone();

        match blocking(move || store.remove(&path)).await {
            Ok(()) => {
                task.succeed(format!("Removed {}", trainer.name));
                self.refresh_trainers().await?;
                Ok(())
            }
            Err(e) => {
                task.fail(format!("Failed to remove {}: {}", trainer.name, e));
                Err(e)
            }
        }
    }

    /// Give an installed trainer a new display name.
    pub async fn rename(&self, trainer: &Trainer, new_name: &str) -> Result<Trainer> {
        let store = self.store();
        let path = trainer.path.clone();
        let new_name = new_name.to_string();
        let renamed = blocking(move || store.rename(&path, &new_name)).await?;
        self.refresh_trainers().await?;
        Ok(renamed)
    }

    pub async fn launch(&self, trainer: &Trainer) -> Result<()> {
        let store = self.store();
        let path = trainer.path.clone();
        blocking(move || store.launch(&path)).await
    }

    /// Copy trainers in from elsewhere, optionally deleting the originals.
    pub async fn import(&self, sources: Vec<Utf8PathBuf>, delete_originals: bool) -> Result<ImportReport> {
        let task = self.reporter.begin("import");
        let store = self.store();

        let report = tokio::task::spawn_blocking(move || {
            TrainerStore::open(store.dir())?;
            Ok::<_, StoreError>(store.import(&sources, delete_originals))
        })
        .await
        .context("Import task failed")??;

        self.refresh_trainers().await?;

        if report.failed.is_empty() {
            task.succeed(format!("Imported {} trainers", report.imported.len()));
        } else {
            task.fail(format!(
                "Imported {} trainers, {} failed",
                report.imported.len(),
                report.failed.len()
            ));
        }
        Ok(report)
    }

    /// Move the store into `<parent>/GCM Trainers` and persist the new path.
    ///
    /// Refused while any download is running or queued.
    pub async fn change_download_dir(&self, parent: &Utf8Path) -> Result<Utf8PathBuf> {
        let new_dir = parent.join(TRAINER_DIR_NAME);
        let old_dir = self.state.read(|s| s.download_dir().clone());
        if new_dir == old_dir {
            bail!("Please choose a new path.");
        }

        let Some(_guard) = self
            .state
            .try_begin_task_when(TaskKind::Migration, AppState::can_migrate)
        else {
            if self.state.read(|s| s.is_task_running(TaskKind::Migration)) {
                bail!("A migration is already running");
            }
            bail!("Cannot move trainers while downloads are pending");
        };

        let task = self.reporter.begin(TaskKind::Migration.label());
        task.info(format!("Migrating trainers to {}...", new_dir));

        let store = TrainerStore::new(old_dir);
        let target = new_dir.clone();
        let migrated = tokio::task::spawn_blocking(move || {
            if store.dir().exists() {
                store.migrate(&target)
            } else {
                TrainerStore::open(target)
            }
        })
        .await
        .context("Migration task failed")?;

        if let Err(e) = migrated {
            task.fail(e.to_string());
            return Err(e.into());
        }

        self.state.set_download_dir(&new_dir);
        let saved_dir = new_dir.clone();
        self.save_settings_change(move |settings| settings.download_path = saved_dir)
            .await?;
        self.refresh_trainers().await?;

        task.succeed(format!("Trainers moved to {}", new_dir));
        Ok(new_dir)
    }

    // Settings

    /// Apply a settings change and write it to disk.
    ///
    /// The change is applied twice: to the running settings, and to the file
    /// contents so environment overrides stay out of the saved file.
    pub async fn update_settings<F>(&self, settings_fn: F) -> Result<Settings>
    where
        F: Fn(&mut Settings) + Send + 'static,
    {
        self.state.update_settings(&settings_fn);
        self.save_settings_change(settings_fn).await?;
        Ok(self.state.read(|s| s.settings.clone()))
    }

    async fn save_settings_change<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Settings) + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || config.save_settings_change(change))
            .await
            .context("Settings task failed")??;
        Ok(())
    }

    // Catalog

    /// Search the catalog and publish the results.
    ///
    /// Returns `Ok(None)` when the search is suppressed because another
    /// search or a download is running.
    pub async fn search(&self, keyword: &str) -> Result<Option<Vec<SearchResult>>> {
        let Some(_guard) = self
            .state
            .try_begin_task_when(TaskKind::Search, AppState::can_search)
        else {
            tracing::info!("Search suppressed while a search or download is running");
            return Ok(None);
        };

        let task = self.reporter.begin(TaskKind::Search.label());
        task.info(format!("Searching for {:?}...", keyword));
        self.metrics.record_search();

        match self.catalog.search(keyword).await {
            Ok(results) => {
                let downloadable = !results.is_empty();
                self.state.set_search_results(results.clone(), downloadable);
                if downloadable {
                    task.succeed(format!("Found {} trainers", results.len()));
                } else {
                    task.succeed("No results found");
                }
                Ok(Some(results))
            }
            Err(e) => {
                self.state.set_search_results(Vec::new(), false);
                task.fail(format!("Search failed: {}", e));
                Err(e).context("Catalog search failed")
            }
        }
    }

    /// Queue a download for a search result.
    ///
    /// Fails while a migration runs; a migration that starts right after
    /// this check is caught by the queue, which refuses the job.
    pub fn download(&self, result: &SearchResult) -> Result<JobTicket> {
        let destination = self.writable_download_dir()?;
        Ok(self
            .queue
            .enqueue(DownloadJob::from_search_result(result, destination)))
    }

    /// Queue a download for the `index`th result of the last search.
    pub fn download_index(&self, index: usize) -> Result<JobTicket> {
        let result = self.state.read(|s| {
            if s.can_download() {
                s.search_results.get(index).cloned()
            } else {
                None
            }
        });
        let result = result.ok_or_else(|| anyhow!("No downloadable search result at index {}", index))?;
        self.download(&result)
    }

    fn writable_download_dir(&self) -> Result<Utf8PathBuf> {
        self.state.read(|s| {
            if s.is_task_running(TaskKind::Migration) {
                Err(anyhow!("Downloads are paused while trainers are being migrated"))
            } else {
                Ok(s.download_dir().clone())
            }
        })
    }

    /// Fetch the bulk index and cache it on disk.
    ///
    /// Returns `Ok(None)` when a fetch is already running.
    pub async fn fetch_database(&self) -> Result<Option<CatalogIndex>> {
        let Some(_guard) = self.state.try_begin_task(TaskKind::DatabaseFetch) else {
            return Ok(None);
        };

        let task = self.reporter.begin(TaskKind::DatabaseFetch.label());
        task.info("Updating trainer database...");

        match self.fetch_and_cache_index().await {
            Ok(index) => {
                task.succeed(format!("Trainer database updated ({} entries)", index.len()));
                Ok(Some(index))
            }
            Err(e) => {
                task.fail(format!("Failed to update trainer database: {}", e));
                Err(e)
            }
        }
    }

    async fn fetch_and_cache_index(&self) -> Result<CatalogIndex> {
        let index = self
            .catalog
            .fetch_catalog_index()
            .await
            .context("Failed to fetch the catalog index")?;

        let config = Arc::clone(&self.config);
        let cached = index.clone();
        tokio::task::spawn_blocking(move || config.save_catalog_cache(&cached))
            .await
            .context("Database cache task failed")??;

        Ok(index)
    }

    /// Scan installed trainers against the catalog index and queue updates.
    ///
    /// Uses the cached database when present. Trainers that already have an
    /// update queued are skipped. Returns `Ok(None)` when a scan is already
    /// running.
    pub async fn update_trainers(&self) -> Result<Option<Vec<JobTicket>>> {
        let Some(_guard) = self.state.try_begin_task(TaskKind::TrainerUpdate) else {
            return Ok(None);
        };

        let task = self.reporter.begin(TaskKind::TrainerUpdate.label());
        task.info("Checking for trainer updates...");

        let config = Arc::clone(&self.config);
        let cached = tokio::task::spawn_blocking(move || config.load_catalog_cache())
            .await
            .context("Database cache task failed")?;
        let index = match cached {
            Some(index) => index,
            None => match self.fetch_and_cache_index().await {
                Ok(index) => index,
                Err(e) => {
                    task.fail(format!("Trainer update check failed: {}", e));
                    return Err(e);
                }
            },
        };

        let installed = self.refresh_trainers().await?;
        let destination = self.writable_download_dir()?;

        let mut tickets = Vec::new();
        for candidate in updater::scan(&installed, &index) {
            if !self.state.mark_update_pending(&candidate.trainer.path) {
                tracing::debug!("Update for {} already queued", candidate.trainer.name);
                continue;
            }

            task.info(format!("Updating {}...", candidate.trainer.name));
            tickets.push(
                self.queue
                    .enqueue(DownloadJob::from_update(&candidate, destination.clone())),
            );
        }

        self.metrics.record_update_scan(tickets.len());
        if tickets.is_empty() {
            task.succeed("All trainers are up to date");
        } else {
            task.succeed(format!("{} trainer updates queued", tickets.len()));
        }
        Ok(Some(tickets))
    }

    /// One automatic maintenance pass, honouring the auto-update settings.
    ///
    /// Failures are logged; the next pass retries.
    pub async fn run_periodic(&self) {
        let (auto_database, auto_update) = self
            .state
            .read(|s| (s.settings.auto_update_database, s.settings.auto_update));

        if auto_database {
            if let Err(e) = self.fetch_database().await {
                tracing::warn!("Automatic database update failed: {:#}", e);
            }
        }

        if auto_update {
            match self.update_trainers().await {
                Ok(Some(tickets)) => tracing::debug!("Automatic update queued {} jobs", tickets.len()),
                Ok(None) => tracing::debug!("Automatic update skipped, a scan is already running"),
                Err(e) => tracing::warn!("Automatic trainer update failed: {:#}", e),
            }
        }
    }

    /// Run [`run_periodic`](Self::run_periodic) now and then every `period`
    /// until shutdown.
    pub async fn run_interval(&self, period: Duration) {
        let mut shutdown = self.shutdown_signal();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.run_periodic().await,
            }
        }
        tracing::debug!("Periodic updater stopped");
    }

    /// Check GitHub for a newer application release.
    pub async fn check_release(&self) -> Result<Option<ReleaseStatus>> {
        let Some(_guard) = self.state.try_begin_task(TaskKind::ReleaseCheck) else {
            return Ok(None);
        };

        let task = self.reporter.begin(TaskKind::ReleaseCheck.label());
        let timeout = Duration::from_secs(self.state.read(|s| s.settings.request_timeout));

        match release::fetch_latest_release(release::RELEASE_URL, timeout).await {
            Ok(latest) => {
                let status = release::release_status(crate::VERSION, &latest);
                match &status {
                    ReleaseStatus::UpToDate => task.succeed("You are running the latest version"),
                    ReleaseStatus::Available { version, url } => {
                        task.succeed(format!("Version {} is available: {}", version, url))
                    }
                }
                Ok(Some(status))
            }
            Err(e) => {
                task.fail(format!("Release check failed: {}", e));
                Err(e)
            }
        }
    }

    /// Stop the queue after the running job and cancel whatever is still queued.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down");
        let _ = self.shutdown_tx.send(true);

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("Download worker ended abnormally: {}", e);
            }
        }

        self.listener.abort();
        self.metrics.log_summary();
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Re-read the store whenever a job finishes.
fn spawn_job_listener(state: Arc<StateManager>) -> JoinHandle<()> {
    let mut rx = state.subscribe();

    tokio::spawn(async move {
        tracing::debug!("Job listener started");
        loop {
            match rx.recv().await {
                Ok(StateChange::JobFinished { id, state: outcome }) => {
                    tracing::trace!("Job {} finished: {:?}", id, outcome);
                    refresh_snapshot(&state).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Job listener lagged by {} events, refreshing", skipped);
                    refresh_snapshot(&state).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn refresh_snapshot(state: &StateManager) {
    let store = TrainerStore::new(state.read(|s| s.download_dir().clone()));
    match list_store(store).await {
        Ok(trainers) => {
            state.set_trainers(trainers);
        }
        Err(e) => tracing::warn!("Failed to refresh installed trainers: {:#}", e),
    }
}

/// List a store, treating a directory that does not exist yet as empty.
async fn list_store(store: TrainerStore) -> Result<Vec<Trainer>> {
    blocking(move || {
        if store.dir().exists() {
            store.list()
        } else {
            Ok(Vec::new())
        }
    })
    .await
}

/// Run a store call on the blocking pool, keeping `StoreError` as the root cause.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f)
        .await
        .context("Store task failed")??)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobOutcome, RemoteEntry};
    use crate::services::catalog::{CatalogError, MockCatalog};
    use crate::services::queue::JobFailure;
    use crate::services::reporter::StageReporter;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::fs;
    use tempfile::TempDir;

    /// Executor that writes the trainer straight into the destination.
    struct WritingExecutor;

    #[async_trait]
    impl JobExecutor for WritingExecutor {
        async fn execute(&self, job: &DownloadJob, _stages: &StageReporter) -> Result<Vec<Trainer>, JobFailure> {
            let store = TrainerStore::open(job.destination.clone())
                .map_err(|e| JobFailure::new(crate::models::JobStage::Install, e.to_string()))?;
            let path = store.dir().join(format!("{}.exe", job.display_name));
            fs::write(&path, b"MZ updated").unwrap();
            Ok(store.list().unwrap().into_iter().filter(|t| t.path == path).collect())
        }
    }

    struct Fixture {
        _temp: TempDir,
        root: Utf8PathBuf,
        controller: Controller,
    }

    fn fixture(catalog: MockCatalog) -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let config = Arc::new(ConfigManager::new(root.join("settings")).unwrap());

        let state = Arc::new(StateManager::new());
        state.set_download_dir(&root.join("store").join(TRAINER_DIR_NAME));

        let controller = Controller::new(
            state,
            config,
            Arc::new(catalog),
            Arc::new(WritingExecutor),
            Reporter::log_only(),
            Arc::new(Metrics::new()),
        );
        Fixture {
            _temp: temp,
            root,
            controller,
        }
    }

    fn hit(name: &str) -> SearchResult {
        SearchResult {
            display_name: name.to_string(),
            remote_id: name.to_lowercase(),
            detail_url: format!("https://catalog.example/trainer/{}/", name.to_lowercase()),
        }
    }

    #[tokio::test]
    async fn test_search_publishes_results() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_search()
            .returning(|_| Ok(vec![hit("Hades"), hit("Celeste")]));
        let f = fixture(catalog);

        let results = f.controller.search("a").await.unwrap().unwrap();

        assert_eq!(results.len(), 2);
        let state = f.controller.state().snapshot();
        assert!(state.can_download());
        assert!(!state.is_task_running(TaskKind::Search));
    }

    #[tokio::test]
    async fn test_empty_search_is_not_an_error() {
        let mut catalog = MockCatalog::new();
        catalog.expect_search().returning(|_| Ok(Vec::new()));
        let f = fixture(catalog);

        let results = f.controller.search("abc").await.unwrap().unwrap();

        assert!(results.is_empty());
        assert!(!f.controller.state().read(|s| s.can_download()));
        assert!(f.controller.download_index(0).is_err());
    }

    #[tokio::test]
    async fn test_search_failure_clears_results() {
        let mut catalog = MockCatalog::new();
        catalog.expect_search().returning(|_| {
            Err(CatalogError::Parse {
                url: "https://catalog.example/".to_string(),
                reason: "unreachable".to_string(),
            })
        });
        let f = fixture(catalog);
        f.controller.state().set_search_results(vec![hit("Old")], true);

        assert!(f.controller.search("x").await.is_err());
        assert!(f.controller.state().read(|s| s.search_results.is_empty()));
    }

    #[tokio::test]
    async fn test_search_suppressed_while_running() {
        let f = fixture(MockCatalog::new());
        let _guard = f.controller.state().try_begin_task(TaskKind::Search).unwrap();

        assert!(f.controller.search("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_download_index_installs_and_refreshes() {
        let mut catalog = MockCatalog::new();
        catalog.expect_search().returning(|_| Ok(vec![hit("Hades")]));
        let f = fixture(catalog);

        f.controller.search("hades").await.unwrap();
        let outcome = f.controller.download_index(0).unwrap().wait().await;
        assert!(outcome.is_success());

        let trainers = f.controller.refresh_trainers().await.unwrap();
        assert_eq!(trainers.len(), 1);
        assert_eq!(trainers[0].name, "Hades");
    }

    #[tokio::test]
    async fn test_update_trainers_queues_once_per_trainer() {
        let mut catalog = MockCatalog::new();
        catalog.expect_fetch_catalog_index().returning(|| {
            let mut index = CatalogIndex::default();
            index.entries.insert(
                "hades".to_string(),
                RemoteEntry {
                    name: "Hades Trainer".to_string(),
                    detail_url: "https://catalog.example/trainer/hades/".to_string(),
                    updated: (Utc::now() + ChronoDuration::days(2)).date_naive(),
                },
            );
            Ok(index)
        });
        let f = fixture(catalog);

        let store_dir = f.controller.state().read(|s| s.download_dir().clone());
        fs::create_dir_all(&store_dir).unwrap();
        fs::write(store_dir.join("Hades.exe"), b"MZ old").unwrap();

        let tickets = f.controller.update_trainers().await.unwrap().unwrap();
        assert_eq!(tickets.len(), 1);
        assert!(f.controller.config.catalog_cache_path().exists());

        let outcomes: Vec<JobOutcome> = futures::future::join_all(tickets.into_iter().map(JobTicket::wait)).await;
        assert!(outcomes.iter().all(JobOutcome::is_success));
        assert_eq!(fs::read(store_dir.join("Hades.exe")).unwrap(), b"MZ updated");
        assert!(f.controller.state().read(|s| s.pending_updates.is_empty()));
    }

    #[tokio::test]
    async fn test_pending_update_is_not_requeued() {
        let mut catalog = MockCatalog::new();
        catalog.expect_fetch_catalog_index().returning(|| {
            let mut index = CatalogIndex::default();
            index.entries.insert(
                "hades".to_string(),
                RemoteEntry {
                    name: "Hades Trainer".to_string(),
                    detail_url: "https://catalog.example/trainer/hades/".to_string(),
                    updated: (Utc::now() + ChronoDuration::days(2)).date_naive(),
                },
            );
            Ok(index)
        });
        let f = fixture(catalog);

        let store_dir = f.controller.state().read(|s| s.download_dir().clone());
        fs::create_dir_all(&store_dir).unwrap();
        let trainer_path = store_dir.join("Hades.exe");
        fs::write(&trainer_path, b"MZ old").unwrap();

        assert!(f.controller.state().mark_update_pending(&trainer_path));
        let tickets = f.controller.update_trainers().await.unwrap().unwrap();
        assert!(tickets.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_database_failure_reports_error() {
        let mut catalog = MockCatalog::new();
        catalog.expect_fetch_catalog_index().returning(|| {
            Err(CatalogError::TooLarge {
                url: "https://catalog.example/all-trainers/".to_string(),
                limit: 10,
            })
        });
        let f = fixture(catalog);

        assert!(f.controller.fetch_database().await.is_err());
        assert!(!f.controller.config.catalog_cache_path().exists());
        assert!(!f.controller.state().read(|s| s.is_task_running(TaskKind::DatabaseFetch)));
    }

    #[tokio::test]
    async fn test_change_download_dir() {
        let f = fixture(MockCatalog::new());
        let old_dir = f.controller.state().read(|s| s.download_dir().clone());
        fs::create_dir_all(&old_dir).unwrap();
        fs::write(old_dir.join("Hades.exe"), b"MZ").unwrap();

        let same_parent = old_dir.parent().unwrap().to_path_buf();
        let err = f.controller.change_download_dir(&same_parent).await.unwrap_err();
        assert_eq!(err.to_string(), "Please choose a new path.");

        let new_parent = f.root.join("elsewhere");
        let new_dir = f.controller.change_download_dir(&new_parent).await.unwrap();

        assert_eq!(new_dir, new_parent.join(TRAINER_DIR_NAME));
        assert!(new_dir.join("Hades.exe").exists());
        assert!(!old_dir.join("Hades.exe").exists());
        assert_eq!(f.controller.state().read(|s| s.trainers.len()), 1);

        let saved = fs::read_to_string(f.controller.config.settings_path()).unwrap();
        assert!(saved.contains("elsewhere"));
    }

    #[tokio::test]
    async fn test_migration_refused_with_pending_jobs() {
        let f = fixture(MockCatalog::new());
        assert!(f.controller.state().queue_job(99, "Waiting"));

        let err = f
            .controller
            .change_download_dir(&f.root.join("elsewhere"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("pending"));
        assert!(!f.controller.state().read(|s| s.is_task_running(TaskKind::Migration)));
    }

    #[tokio::test]
    async fn test_download_refused_during_migration() {
        let f = fixture(MockCatalog::new());
        let _migration = f.controller.state().try_begin_task(TaskKind::Migration).unwrap();

        assert!(f.controller.download(&hit("Hades")).is_err());

        // A job that slips past the check is still refused by the queue
        let destination = f.controller.state().read(|s| s.download_dir().clone());
        let outcome = f
            .controller
            .queue
            .enqueue(DownloadJob::from_search_result(&hit("Hades"), destination))
            .wait()
            .await;
        assert!(!outcome.is_success());
        assert!(!f.controller.state().read(|s| s.has_pending_jobs()));
    }

    #[tokio::test]
    async fn test_search_suppressed_while_downloading() {
        let f = fixture(MockCatalog::new());
        assert!(f.controller.state().queue_job(7, "Running"));
        f.controller.state().start_job(7);

        assert!(f.controller.search("x").await.unwrap().is_none());
        assert!(!f.controller.state().read(|s| s.is_task_running(TaskKind::Search)));
    }

    #[tokio::test]
    async fn test_saved_settings_leave_out_runtime_overrides() {
        let f = fixture(MockCatalog::new());
        // Stands in for a TRAINER_MANAGER_DOWNLOAD_SERVER override
        f.controller
            .state()
            .update_settings(|s| s.download_server = crate::models::Region::China);

        let effective = f
            .controller
            .update_settings(|s| s.auto_update = false)
            .await
            .unwrap();
        assert_eq!(effective.download_server, crate::models::Region::China);

        let saved = fs::read_to_string(f.controller.config.settings_path()).unwrap();
        assert!(saved.contains("auto_update: false"));
        assert!(saved.contains("download_server: intl"));
    }

    #[tokio::test]
    async fn test_delete_missing_trainer_keeps_store_error() {
        let f = fixture(MockCatalog::new());
        let ghost = Trainer {
            name: "Ghost".to_string(),
            path: f.root.join("Ghost.exe"),
            size_bytes: 1,
            modified: None,
        };

        let err = f.controller.delete(&ghost).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<StoreError>(), Some(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_jobs() {
        let f = fixture(MockCatalog::new());
        f.controller.shutdown().await;

        let outcome = f.controller.download(&hit("Late")).unwrap().wait().await;
        assert!(!outcome.is_success());
    }
}
