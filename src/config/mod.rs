use crate::models::{CatalogIndex, Settings};
use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Name of the settings directory under the platform config dir.
pub const SETTINGS_DIR_NAME: &str = "GCM Settings";

/// Prefix for environment overrides, e.g. `TRAINER_MANAGER_AUTO_UPDATE=false`.
/// Nested keys use a double underscore: `TRAINER_MANAGER_CATALOG_HOSTS__CHINA`.
pub const ENV_PREFIX: &str = "TRAINER_MANAGER";

/// Configuration manager for the settings file and the cached trainer database.
///
/// Layout of the settings directory:
/// - `Settings.yaml`: user settings
/// - `db/catalog.json`: last fetched catalog index
/// - `logs/`: rolling log files
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
    database_dir: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory holding the settings file (created if missing)
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join("Settings.yaml"),
            database_dir: config_dir.join("db"),
            config_dir,
        })
    }

    /// Load settings, filling missing keys with defaults and writing the
    /// completed file back.
    ///
    /// Environment variables prefixed with [`ENV_PREFIX`] override file values
    /// for this run only. Use [`save_settings_change`](Self::save_settings_change)
    /// to persist later edits without writing the overrides.
    pub fn load_settings(&self) -> Result<Settings> {
        self.load_settings_with_env(settings_env())
    }

    fn load_settings_with_env(&self, env: config::Environment) -> Result<Settings> {
        let file_exists = self.settings_path.exists();
        if !file_exists {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
        }

        // The file without overrides is what gets written back
        let loaded = self.load_file_settings()?;
        self.save_settings(&loaded)?;

        let settings: Settings = config::Config::builder()
            .add_source(
                config::File::new(self.settings_path.as_str(), config::FileFormat::Yaml).required(false),
            )
            .add_source(env)
            .build()
            .and_then(|merged| merged.try_deserialize())
            .context("Failed to apply environment overrides to settings")?;

        if file_exists {
            tracing::info!("Loaded settings from {}", self.settings_path);
        }
        Ok(settings)
    }

    /// Apply `change` to the settings as stored on disk and save them.
    ///
    /// Environment overrides active for this run are not part of the result.
    pub fn save_settings_change<F>(&self, change: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.load_file_settings()?;
        change(&mut settings);
        self.save_settings(&settings)?;
        Ok(settings)
    }

    /// Settings file contents with defaults filled in, no overrides.
    fn load_file_settings(&self) -> Result<Settings> {
        config::Config::builder()
            .add_source(
                config::File::new(self.settings_path.as_str(), config::FileFormat::Yaml).required(false),
            )
            .build()
            .and_then(|file_only| file_only.try_deserialize::<Settings>())
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))
    }

    /// Save the settings file.
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::debug!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    /// Load the cached trainer database.
    ///
    /// Returns `None` when no cache exists or the cache cannot be read; the
    /// database is rebuilt by the next fetch in both cases.
    pub fn load_catalog_cache(&self) -> Option<CatalogIndex> {
        let path = self.catalog_cache_path();
        if !path.exists() {
            return None;
        }

        let parsed = fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|contents| serde_json::from_str::<CatalogIndex>(&contents).map_err(anyhow::Error::from));

        match parsed {
            Ok(index) => {
                tracing::debug!("Loaded trainer database with {} entries", index.len());
                Some(index)
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable trainer database {}: {}", path, e);
                None
            }
        }
    }

    /// Save the trainer database.
    pub fn save_catalog_cache(&self, index: &CatalogIndex) -> Result<()> {
        fs::create_dir_all(&self.database_dir)
            .with_context(|| format!("Failed to create database directory: {}", self.database_dir))?;

        let json = serde_json::to_string(index).context("Failed to serialize trainer database")?;
        let path = self.catalog_cache_path();
        fs::write(&path, json).with_context(|| format!("Failed to write trainer database: {}", path))?;

        tracing::info!("Saved trainer database ({} entries) to {}", index.len(), path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }

    pub fn database_dir(&self) -> &Utf8Path {
        &self.database_dir
    }

    pub fn catalog_cache_path(&self) -> Utf8PathBuf {
        self.database_dir.join("catalog.json")
    }

    pub fn log_dir(&self) -> Utf8PathBuf {
        self.config_dir.join("logs")
    }
}

/// Environment source for settings overrides.
fn settings_env() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Platform settings directory, e.g. `%APPDATA%\GCM Settings`.
pub fn default_config_dir() -> Result<Utf8PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| anyhow!("Cannot determine the user config directory"))?;
    let base = Utf8PathBuf::from_path_buf(base)
        .map_err(|p| anyhow!("Config directory is not valid UTF-8: {}", p.display()))?;
    Ok(base.join(SETTINGS_DIR_NAME))
}
