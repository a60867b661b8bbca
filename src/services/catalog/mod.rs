//! Remote catalog client.
//!
//! [`Catalog`] is the seam the queue, the update scanner and the controller
//! talk to; [`CatalogClient`] is the HTTP implementation. Page parsing lives
//! in [`parse`] so it can be tested against fixtures.

pub mod parse;

use crate::models::{CatalogIndex, DetailRecord, SearchResult, Settings};
use async_trait::async_trait;
use camino::Utf8Path;
use chrono::Utc;
use futures::StreamExt;
use reqwest::{StatusCode, Url};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

/// Upper bound on result pages followed per search.
pub const MAX_SEARCH_PAGES: usize = 5;

/// Byte cap for the bulk index response.
pub const MAX_INDEX_BYTES: u64 = 32 * 1024 * 1024;

/// Byte cap for ordinary pages.
const MAX_PAGE_BYTES: u64 = 8 * 1024 * 1024;

/// Path of the bulk trainer list on the catalog host.
const INDEX_PATH: &str = "/all-trainers/";

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Errors raised by catalog requests
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("Failed to parse {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("Response from {url} exceeded {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("No data received for {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CatalogError {
    /// Transport failures go away by re-issuing the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogError::Network(_) | CatalogError::Timeout(_) => true,
            CatalogError::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }

    fn bad_url(url: &str, e: impl std::fmt::Display) -> Self {
        CatalogError::Parse {
            url: url.to_string(),
            reason: format!("invalid URL: {e}"),
        }
    }
}

/// Read access to the remote trainer catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Search the catalog. No matches is an empty list, not an error.
    async fn search(&self, keyword: &str) -> Result<Vec<SearchResult>, CatalogError>;

    /// Resolve a detail page to its download link and metadata.
    async fn fetch_details(&self, detail_url: &str) -> Result<DetailRecord, CatalogError>;

    /// Fetch the bulk index used by the update scanner.
    async fn fetch_catalog_index(&self) -> Result<CatalogIndex, CatalogError>;

    /// Stream a payload to `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Utf8Path) -> Result<u64, CatalogError>;
}

/// HTTP catalog client bound to one regional host.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    host: Url,
    request_timeout: Duration,
    index_limit: u64,
}

impl CatalogClient {
    pub fn new(host: &str, request_timeout: Duration) -> Result<Self, CatalogError> {
        let host = Url::parse(host).map_err(|e| CatalogError::bad_url(host, e))?;
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            host,
            request_timeout,
            index_limit: MAX_INDEX_BYTES,
        })
    }

    /// Client for the region selected in settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, CatalogError> {
        Self::new(
            settings.catalog_host(),
            Duration::from_secs(settings.request_timeout),
        )
    }

    pub fn with_index_limit(mut self, limit: u64) -> Self {
        self.index_limit = limit;
        self
    }

    pub fn host(&self) -> &Url {
        &self.host
    }

    fn search_url(&self, keyword: &str) -> Url {
        let mut url = self.host.clone();
        url.set_path("/");
        url.query_pairs_mut().clear().append_pair("s", keyword);
        url
    }

    /// Send a GET and check the status; the time to response headers is bounded.
    async fn get(&self, url: &Url) -> Result<reqwest::Response, CatalogError> {
        tracing::debug!("GET {}", url);
        let response = timeout(self.request_timeout, self.http.get(url.clone()).send())
            .await
            .map_err(|_| CatalogError::Timeout(self.request_timeout))??;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }

    /// Read a response body into memory, refusing anything over `limit` bytes.
    async fn get_text(&self, url: &Url, limit: u64) -> Result<String, CatalogError> {
        let response = self.get(url).await?;
        let too_large = || CatalogError::TooLarge {
            url: url.to_string(),
            limit,
        };

        if response.content_length().is_some_and(|len| len > limit) {
            return Err(too_large());
        }

        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = self.next_chunk(&mut stream).await? {
            if body.len() as u64 + chunk.len() as u64 > limit {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Next body chunk, failing when nothing arrives within the request timeout.
    async fn next_chunk<S, B>(&self, stream: &mut S) -> Result<Option<B>, CatalogError>
    where
        S: futures::Stream<Item = reqwest::Result<B>> + Unpin,
    {
        match timeout(self.request_timeout, stream.next()).await {
            Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(None) => Ok(None),
            Err(_) => Err(CatalogError::Timeout(self.request_timeout)),
        }
    }

    async fn stream_to_file(&self, url: &Url, dest: &Utf8Path) -> Result<u64, CatalogError> {
        let response = self.get(url).await?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = self.next_chunk(&mut stream).await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(downloaded)
    }
}

#[async_trait]
impl Catalog for CatalogClient {
    async fn search(&self, keyword: &str) -> Result<Vec<SearchResult>, CatalogError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.search_url(keyword);
        let mut results: Vec<SearchResult> = Vec::new();

        for _ in 0..MAX_SEARCH_PAGES {
            let html = self.get_text(&url, MAX_PAGE_BYTES).await?;
            let page = parse::search_page(&html, &url);

            for result in page.results {
                if !results.iter().any(|r| r.detail_url == result.detail_url) {
                    results.push(result);
                }
            }

            match page.next_page {
                Some(next) if next != url => url = next,
                _ => break,
            }
        }

        tracing::info!("Search for {:?} returned {} results", keyword, results.len());
        Ok(results)
    }

    async fn fetch_details(&self, detail_url: &str) -> Result<DetailRecord, CatalogError> {
        let url = Url::parse(detail_url).map_err(|e| CatalogError::bad_url(detail_url, e))?;
        let html = self.get_text(&url, MAX_PAGE_BYTES).await?;
        parse::detail_page(&html, &url)
    }

    async fn fetch_catalog_index(&self) -> Result<CatalogIndex, CatalogError> {
        let url = self
            .host
            .join(INDEX_PATH)
            .map_err(|e| CatalogError::bad_url(INDEX_PATH, e))?;
        let html = self.get_text(&url, self.index_limit).await?;

        let mut index = parse::catalog_index(&html, &url);
        index.fetched_at = Some(Utc::now());

        tracing::info!("Fetched catalog index with {} entries", index.len());
        Ok(index)
    }

    async fn download(&self, url: &str, dest: &Utf8Path) -> Result<u64, CatalogError> {
        let parsed = Url::parse(url).map_err(|e| CatalogError::bad_url(url, e))?;

        match self.stream_to_file(&parsed, dest).await {
            Ok(bytes) => {
                tracing::info!("Downloaded {} bytes to {}", bytes, dest);
                Ok(bytes)
            }
            Err(e) => {
                if tokio::fs::remove_file(dest).await.is_ok() {
                    tracing::debug!("Removed partial download {}", dest);
                }
                Err(e)
            }
        }
    }
}
