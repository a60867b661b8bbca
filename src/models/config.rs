use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the trainer directory created inside whatever folder the user picks.
pub const TRAINER_DIR_NAME: &str = "GCM Trainers";

/// Default international catalog host.
pub const DEFAULT_INTL_HOST: &str = "https://flingtrainer.com";

/// Catalog server region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Intl,
    China,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Intl => f.write_str("intl"),
            Region::China => f.write_str("china"),
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "intl" | "international" => Ok(Region::Intl),
            "china" | "cn" => Ok(Region::China),
            other => Err(format!("unknown download server: {}", other)),
        }
    }
}

/// Base hosts per region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogHosts {
    #[serde(default = "default_intl_host")]
    pub intl: String,

    /// Mirror used when the China server is selected. Empty means "use intl".
    #[serde(default)]
    pub china: String,
}

impl Default for CatalogHosts {
    fn default() -> Self {
        Self {
            intl: default_intl_host(),
            china: String::new(),
        }
    }
}

impl CatalogHosts {
    /// Resolve the base host for a region.
    pub fn host_for(&self, region: Region) -> &str {
        match region {
            Region::Intl => &self.intl,
            Region::China if self.china.trim().is_empty() => {
                tracing::warn!("No China catalog host configured, falling back to {}", self.intl);
                &self.intl
            }
            Region::China => &self.china,
        }
    }
}

/// User settings persisted in `Settings.yaml`.
///
/// Every field carries a serde default so a partially written file (or one
/// from an older version) still loads; [`crate::ConfigManager`] writes the
/// completed record back after loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_download_path")]
    pub download_path: Utf8PathBuf,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_theme")]
    pub theme: String,

    #[serde(default)]
    pub en_search_results: bool,

    #[serde(default = "default_true")]
    pub auto_update_database: bool,

    #[serde(default = "default_true")]
    pub auto_update: bool,

    #[serde(default = "default_true")]
    pub show_warning: bool,

    #[serde(default)]
    pub download_server: Region,

    #[serde(default)]
    pub catalog_hosts: CatalogHosts,

    /// Archive extraction timeout in seconds.
    #[serde(default = "default_unpack_timeout")]
    pub unpack_timeout: u64,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Interval between automatic database/trainer update runs, in seconds.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,

    /// Path to the 7-Zip command line tool.
    #[serde(default = "default_unpacker_path")]
    pub unpacker_path: Utf8PathBuf,

    #[serde(default)]
    pub debug_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_path: default_download_path(),
            language: default_language(),
            theme: default_theme(),
            en_search_results: false,
            auto_update_database: true,
            auto_update: true,
            show_warning: true,
            download_server: Region::Intl,
            catalog_hosts: CatalogHosts::default(),
            unpack_timeout: default_unpack_timeout(),
            request_timeout: default_request_timeout(),
            update_interval: default_update_interval(),
            unpacker_path: default_unpacker_path(),
            debug_mode: false,
        }
    }
}

impl Settings {
    /// Base URL of the catalog for the selected download server.
    pub fn catalog_host(&self) -> &str {
        self.catalog_hosts.host_for(self.download_server)
    }
}

fn default_true() -> bool {
    true
}

fn default_intl_host() -> String {
    DEFAULT_INTL_HOST.to_string()
}

fn default_download_path() -> Utf8PathBuf {
    dirs::data_dir()
        .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
        .join(TRAINER_DIR_NAME)
}

fn default_language() -> String {
    "en_US".to_string()
}

fn default_theme() -> String {
    "black".to_string()
}

fn default_unpack_timeout() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_update_interval() -> u64 {
    3600
}

fn default_unpacker_path() -> Utf8PathBuf {
    if cfg!(target_os = "windows") {
        Utf8PathBuf::from("dependency/7z/7z.exe")
    } else {
        Utf8PathBuf::from("7z")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert!(settings.auto_update);
        assert!(settings.auto_update_database);
        assert!(!settings.en_search_results);
        assert_eq!(settings.download_server, Region::Intl);
        assert_eq!(settings.update_interval, 3600);
        assert!(settings.download_path.ends_with(TRAINER_DIR_NAME));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let settings: Settings =
            serde_yaml_ng::from_str("auto_update: false\ndownload_server: china\n").unwrap();

        assert!(!settings.auto_update);
        assert!(settings.auto_update_database);
        assert_eq!(settings.download_server, Region::China);
        assert_eq!(settings.unpack_timeout, 60);
    }

    #[test]
    fn test_china_host_falls_back_to_intl() {
        let mut settings = Settings::default();
        settings.download_server = Region::China;
        assert_eq!(settings.catalog_host(), DEFAULT_INTL_HOST);

        settings.catalog_hosts.china = "https://mirror.example.cn".to_string();
        assert_eq!(settings.catalog_host(), "https://mirror.example.cn");
    }

    #[test]
    fn test_region_parsing() {
        assert_eq!("intl".parse::<Region>().unwrap(), Region::Intl);
        assert_eq!("China".parse::<Region>().unwrap(), Region::China);
        assert!("mars".parse::<Region>().is_err());
        assert_eq!(Region::China.to_string(), "china");
    }
}
