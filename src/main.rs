//! Trainer Manager - Browse, download, update and manage game trainers
//!
//! Main entry point for the command line application.
//!
//! # Overview
//!
//! This binary wires the library together. It initializes:
//! - Settings from the platform settings directory ([`ConfigManager`])
//! - Logging infrastructure (daily rotating file + console output)
//! - Tokio async runtime
//! - State management ([`StateManager`])
//! - The catalog client, the installer and the [`Controller`]
//!
//! Status events from the controller are printed to stdout as they arrive;
//! failures go to stderr.
//!
//! # Execution Flow
//!
//! 1. Parse the command line
//! 2. Load `Settings.yaml`, writing defaults for missing keys
//! 3. Initialize logging → `<settings dir>/logs/trainer-manager.<date>`
//! 4. Create the tokio runtime and the controller
//! 5. Run the requested command (`run` keeps going until Ctrl+C)
//! 6. Shut the download queue down and log a metrics summary

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use trainer_manager::config::default_config_dir;
use trainer_manager::services::{
    ArchiveUnpacker, CatalogClient, Installer, ReleaseStatus, ReportEvent, Reporter, Severity,
};
use trainer_manager::{APP_NAME, ConfigManager, Controller, Metrics, StateManager, VERSION};

#[derive(Parser, Debug)]
#[command(name = "trainer-manager", version, about = "Browse, download, update and manage game trainers")]
struct Cli {
    /// Settings directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<Utf8PathBuf>,

    /// Enable debug logging for this run
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installed trainers
    List {
        /// Only show trainers whose name contains this text
        filter: Option<String>,
    },
    /// Search the catalog
    Search { keyword: String },
    /// Search the catalog and download one of the results
    Download {
        keyword: String,
        /// Position in the search results, starting at 0
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// Check installed trainers against the catalog and install updates
    Update,
    /// Refresh the cached trainer database
    FetchDb,
    /// Copy trainer executables into the store
    Import {
        #[arg(required = true)]
        paths: Vec<Utf8PathBuf>,
        /// Delete the originals after a successful import
        #[arg(long)]
        delete: bool,
    },
    /// Delete an installed trainer
    Remove { name: String },
    /// Rename an installed trainer
    Rename { name: String, new_name: String },
    /// Start an installed trainer
    Launch { name: String },
    /// Move the store into a new parent directory
    Migrate { parent: Utf8PathBuf },
    /// Keep running, updating the database and trainers periodically
    Run,
    /// Check for a newer release of this application
    CheckRelease,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = match cli.config_dir.clone() {
        Some(dir) => dir,
        None => default_config_dir()?,
    };
    let config_manager = Arc::new(ConfigManager::new(&config_dir)?);
    let settings = config_manager.load_settings()?;

    let _log_guard = trainer_manager::logging::setup_logging(
        &config_manager.log_dir(),
        trainer_manager::logging::LOG_PREFIX,
        cli.debug || settings.debug_mode,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("trainer-manager-worker")
        .build()?;

    let result = runtime.block_on(run(cli.command, config_manager, settings));

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Application shutdown complete");

    result
}

async fn run(
    command: Command,
    config_manager: Arc<ConfigManager>,
    settings: trainer_manager::Settings,
) -> Result<()> {
    let state_manager = Arc::new(StateManager::new());
    state_manager.load_from_settings(&settings);

    let metrics = Arc::new(Metrics::new());
    let catalog = Arc::new(CatalogClient::from_settings(&settings).context("Failed to create catalog client")?);
    let installer = Arc::new(Installer::new(
        catalog.clone(),
        ArchiveUnpacker::from_settings(&settings),
        Arc::clone(&metrics),
    ));

    let (reporter, events) = Reporter::channel();
    let printer = tokio::spawn(print_events(events));

    let controller = Controller::new(
        state_manager,
        config_manager,
        catalog,
        installer,
        reporter,
        metrics,
    );

    let result = execute(&controller, command, &settings).await;
    controller.shutdown().await;

    drop(controller);
    let _ = printer.await;
    result
}

async fn execute(controller: &Controller, command: Command, settings: &trainer_manager::Settings) -> Result<()> {
    match command {
        Command::List { filter } => {
            let trainers = match filter {
                Some(needle) => controller.filter_installed(&needle).await?,
                None => controller.refresh_trainers().await?,
            };
            for trainer in trainers {
                println!("{}\t{}", trainer.name, trainer.path);
            }
        }
        Command::Search { keyword } => {
            let Some(results) = controller.search(&keyword).await? else {
                bail!("Another search is already running");
            };
            for (i, result) in results.iter().enumerate() {
                println!("{:>3}  {}", i, result.display_name);
            }
        }
        Command::Download { keyword, index } => {
            if controller.search(&keyword).await?.is_none() {
                bail!("Another search is already running");
            }
            let outcome = controller.download_index(index)?.wait().await;
            if !outcome.is_success() {
                bail!("Download failed");
            }
        }
        Command::Update => {
            let tickets = controller.update_trainers().await?.unwrap_or_default();
            let outcomes = futures::future::join_all(tickets.into_iter().map(|t| t.wait())).await;
            let failed = outcomes.iter().filter(|o| !o.is_success()).count();
            if failed > 0 {
                bail!("{} trainer updates failed", failed);
            }
        }
        Command::FetchDb => {
            controller.fetch_database().await?;
        }
        Command::Import { paths, delete } => {
            let report = controller.import(paths, delete).await?;
            for (path, reason) in &report.failed {
                eprintln!("{}: {}", path, reason);
            }
        }
        Command::Remove { name } => {
            let trainer = controller.find_installed(&name).await?;
            controller.delete(&trainer).await?;
        }
        Command::Rename { name, new_name } => {
            let trainer = controller.find_installed(&name).await?;
            let renamed = controller.rename(&trainer, &new_name).await?;
            println!("{}", renamed.path);
        }
        Command::Launch { name } => {
            let trainer = controller.find_installed(&name).await?;
            controller.launch(&trainer).await?;
        }
        Command::Migrate { parent } => {
            let new_dir = controller.change_download_dir(&parent).await?;
            println!("{}", new_dir);
        }
        Command::Run => {
            controller.refresh_trainers().await?;
            let period = Duration::from_secs(settings.update_interval.max(60));
            tokio::select! {
                _ = controller.run_interval(period) => {}
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for Ctrl+C")?;
                    tracing::info!("Ctrl+C received");
                }
            }
        }
        Command::CheckRelease => {
            if let Some(ReleaseStatus::Available { version, url }) = controller.check_release().await? {
                println!("{} {}", version, url);
            }
        }
    }
    Ok(())
}

async fn print_events(mut events: mpsc::UnboundedReceiver<ReportEvent>) {
    while let Some(event) = events.recv().await {
        match event.severity {
            Severity::Failure => eprintln!("[{}] {}", event.label, event.message),
            Severity::Info | Severity::Success => println!("[{}] {}", event.label, event.message),
        }
    }
}
