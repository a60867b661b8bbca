use camino::Utf8PathBuf;
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An installed trainer executable.
///
/// Identity is the file path: two `Trainer` values are equal when they point
/// at the same file, regardless of the size or timestamp observed.
#[derive(Debug, Clone, Eq)]
pub struct Trainer {
    /// Display name (file stem)
    pub name: String,
    pub path: Utf8PathBuf,
    pub size_bytes: u64,
    /// Last modification time, used as the local version stamp
    pub modified: Option<DateTime<Utc>>,
}

impl PartialEq for Trainer {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl std::hash::Hash for Trainer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// One hit from a catalog search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub display_name: String,
    /// Opaque catalog identifier (the entry slug)
    pub remote_id: String,
    pub detail_url: String,
}

/// Resolved metadata for one catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub title: String,
    pub download_url: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub updated: Option<NaiveDate>,
}

/// Remote metadata for one trainer in the bulk index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub detail_url: String,
    pub updated: NaiveDate,
}

/// Bulk catalog index keyed by normalized trainer key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogIndex {
    pub fetched_at: Option<DateTime<Utc>>,
    pub entries: IndexMap<String, RemoteEntry>,
}

impl CatalogIndex {
    pub fn get(&self, key: &str) -> Option<&RemoteEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An installed trainer with a newer version available remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCandidate {
    pub trainer: Trainer,
    pub update_url: String,
}
