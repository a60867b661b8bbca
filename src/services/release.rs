//! Application release check against the GitHub "latest release" API

use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::cmp::Ordering;
use std::time::Duration;

/// Latest-release endpoint of the upstream repository.
pub const RELEASE_URL: &str = "https://api.github.com/repos/dyang886/Game-Cheats-Manager/releases/latest";

/// GitHub release metadata from API
#[derive(Deserialize, Debug, Clone)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub html_url: String,
}

/// Result of comparing the running version with the latest release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseStatus {
    UpToDate,
    Available { version: String, url: String },
}

/// Fetch the latest release from GitHub
pub async fn fetch_latest_release(url: &str, request_timeout: Duration) -> Result<GitHubRelease> {
    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(request_timeout)
        .build()?;

    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(anyhow!("GitHub API error for {}: HTTP {}", url, response.status()));
    }

    Ok(response.json().await?)
}

/// Compare the running version with a release.
pub fn release_status(current: &str, release: &GitHubRelease) -> ReleaseStatus {
    let latest = release.tag_name.trim_start_matches(['v', 'V']);
    if compare_versions(latest, current) == Ordering::Greater {
        ReleaseStatus::Available {
            version: latest.to_string(),
            url: release.html_url.clone(),
        }
    } else {
        ReleaseStatus::UpToDate
    }
}

/// Compare dotted versions numerically; missing components count as zero and
/// non-numeric suffixes are ignored.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| {
                part.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };

    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            a.get(i)
                .copied()
                .unwrap_or(0)
                .cmp(&b.get(i).copied().unwrap_or(0))
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}
