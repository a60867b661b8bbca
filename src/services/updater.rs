//! Update scanner.
//!
//! Pure comparison of the installed trainers against the catalog index. The
//! scanner never touches the store; the controller turns candidates into
//! update jobs.

use crate::models::{CatalogIndex, Trainer, UpdateCandidate};
use crate::services::naming::trainer_key;

/// Yield an [`UpdateCandidate`] for every installed trainer with a newer
/// catalog entry.
///
/// Trainers are matched by [`trainer_key`]. The local version stamp is the
/// file's modification date; a trainer without one is skipped since there is
/// nothing to compare.
pub fn scan<'a>(
    installed: &'a [Trainer],
    index: &'a CatalogIndex,
) -> impl Iterator<Item = UpdateCandidate> + 'a {
    installed.iter().filter_map(move |trainer| {
        let key = trainer_key(&trainer.name);
        let Some(remote) = index.get(&key) else {
            tracing::trace!("No catalog entry for {}", trainer.name);
            return None;
        };

        let Some(local) = trainer.modified.map(|m| m.date_naive()) else {
            tracing::debug!("Skipping {}: no modification time", trainer.name);
            return None;
        };

        (remote.updated > local).then(|| {
            tracing::debug!(
                "Update available for {}: remote {} newer than local {}",
                trainer.name,
                remote.updated,
                local
            );
            UpdateCandidate {
                trainer: trainer.clone(),
                update_url: remote.detail_url.clone(),
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteEntry;
    use camino::Utf8PathBuf;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn trainer(name: &str, modified: Option<(i32, u32, u32)>) -> Trainer {
        Trainer {
            name: name.to_string(),
            path: Utf8PathBuf::from(format!("/store/{name}.exe")),
            size_bytes: 1,
            modified: modified.map(|(y, m, d)| Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()),
        }
    }

    fn index() -> CatalogIndex {
        let mut index = CatalogIndex::default();
        for (key, name, date) in [
            ("eldenring", "Elden Ring Trainer", (2024, 5, 1)),
            ("hades", "Hades Trainer", (2024, 1, 1)),
        ] {
            index.entries.insert(
                key.to_string(),
                RemoteEntry {
                    name: name.to_string(),
                    detail_url: format!("https://catalog.example/trainer/{key}/"),
                    updated: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
                },
            );
        }
        index
    }

    #[test]
    fn test_scan_yields_only_newer_remote() {
        let installed = vec![
            trainer("Elden Ring Trainer", Some((2024, 3, 1))),
            trainer("Hades", Some((2024, 2, 1))),
            trainer("Unknown Game", Some((2020, 1, 1))),
        ];
        let index = index();

        let candidates: Vec<UpdateCandidate> = scan(&installed, &index).collect();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].trainer.name, "Elden Ring Trainer");
        assert_eq!(candidates[0].update_url, "https://catalog.example/trainer/eldenring/");
    }

    #[test]
    fn test_same_day_is_not_an_update() {
        let installed = vec![trainer("Hades", Some((2024, 1, 1)))];
        let index = index();
        assert_eq!(scan(&installed, &index).count(), 0);
    }

    #[test]
    fn test_missing_mtime_is_skipped() {
        let installed = vec![trainer("Hades", None)];
        let index = index();
        assert_eq!(scan(&installed, &index).count(), 0);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let installed = vec![
            trainer("Elden Ring Trainer", Some((2024, 3, 1))),
            trainer("Hades", Some((2023, 2, 1))),
        ];
        let index = index();

        let first: Vec<UpdateCandidate> = scan(&installed, &index).collect();
        let second: Vec<UpdateCandidate> = scan(&installed, &index).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }
}
