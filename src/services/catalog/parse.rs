//! Defensive HTML parsers for catalog pages.
//!
//! The site markup is third-party and changes without notice, so every
//! lookup tries a list of selectors and an unusable entry is skipped with a
//! debug line instead of failing the page. Only a detail page without any
//! download link is an error.

use super::CatalogError;
use crate::models::{CatalogIndex, DetailRecord, RemoteEntry, SearchResult};
use crate::services::naming::trainer_key;
use chrono::NaiveDate;
use indexmap::map::Entry;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

const ENTRY_SELECTORS: &[&str] = &["article", ".post", ".search-result"];
const ENTRY_LINK_SELECTORS: &[&str] = &[".post-title a[href]", ".entry-title a[href]", "h2 a[href]", "h3 a[href]"];
const TITLE_SELECTORS: &[&str] = &["h1.entry-title", "h1.post-title", "h1", "title"];
const DESCRIPTION_SELECTORS: &[&str] = &["div.entry-content p", "div.entry p", "article p"];
const PAYLOAD_EXTENSIONS: &[&str] = &[".zip", ".rar", ".7z", ".exe"];

static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static NEXT_PAGE: LazyLock<Selector> = LazyLock::new(|| selector("a.next[href], a[rel=\"next\"][href]"));
static TIME: LazyLock<Selector> = LazyLock::new(|| selector("time[datetime]"));
static INDEX_ITEM: LazyLock<Selector> = LazyLock::new(|| selector("li"));

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bv\d[\w.\-]*").expect("Invalid version regex"));

static UPDATED_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)updated\s*:?\s*(\d{4}[./-]\d{1,2}[./-]\d{1,2})").expect("Invalid updated date regex")
});

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("Invalid selector {css}: {e}"))
}

/// One page of search results.
#[derive(Debug, Default)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    pub next_page: Option<Url>,
}

/// Parse a search results page. A page without entries yields an empty list.
pub fn search_page(html: &str, page_url: &Url) -> SearchPage {
    let document = Html::parse_document(html);
    let mut page = SearchPage::default();

    let entries = ENTRY_SELECTORS.iter().find_map(|css| {
        let entry_selector = Selector::parse(css).ok()?;
        let found: Vec<ElementRef<'_>> = document.select(&entry_selector).collect();
        (!found.is_empty()).then_some(found)
    });

    for entry in entries.unwrap_or_default() {
        let link = ENTRY_LINK_SELECTORS.iter().find_map(|css| {
            Selector::parse(css)
                .ok()
                .and_then(|link_selector| entry.select(&link_selector).next())
        });
        let Some(link) = link else {
            tracing::debug!("Skipping search entry without a title link");
            continue;
        };

        match search_result(link, page_url) {
            Ok(result) => {
                if !page.results.iter().any(|r| r.detail_url == result.detail_url) {
                    page.results.push(result);
                }
            }
            Err(reason) => tracing::debug!("Skipping search entry: {}", reason),
        }
    }

    page.next_page = document
        .select(&NEXT_PAGE)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| page_url.join(href).ok());

    page
}

fn search_result(link: ElementRef<'_>, base: &Url) -> Result<SearchResult, String> {
    let href = link.value().attr("href").ok_or("link without href")?;
    let url = base
        .join(href)
        .map_err(|e| format!("bad link {href}: {e}"))?;

    let display_name = element_text(link);
    if display_name.is_empty() {
        return Err(format!("empty title for {url}"));
    }

    let remote_id = slug(&url).ok_or_else(|| format!("no identifier in {url}"))?;

    Ok(SearchResult {
        display_name,
        remote_id,
        detail_url: url.to_string(),
    })
}

/// Parse a trainer detail page.
pub fn detail_page(html: &str, page_url: &Url) -> Result<DetailRecord, CatalogError> {
    let document = Html::parse_document(html);

    let download_url = document
        .select(&LINK)
        .filter_map(|a| {
            let url = page_url.join(a.value().attr("href")?).ok()?;
            is_payload_link(a, &url).then_some(url)
        })
        .next()
        .ok_or_else(|| CatalogError::Parse {
            url: page_url.to_string(),
            reason: "no download link found".to_string(),
        })?;

    let title = first_text(&document, TITLE_SELECTORS)
        .or_else(|| slug(page_url))
        .unwrap_or_default();

    let version = VERSION.find(&title).map(|m| m.as_str().to_string());
    let description = first_text(&document, DESCRIPTION_SELECTORS);

    let updated = document
        .select(&TIME)
        .find_map(|t| t.value().attr("datetime").and_then(parse_date))
        .or_else(|| {
            let text: String = document.root_element().text().collect();
            UPDATED_TEXT
                .captures(&text)
                .and_then(|caps| parse_date(&caps[1]))
        });

    Ok(DetailRecord {
        title,
        download_url: download_url.to_string(),
        version,
        description,
        updated,
    })
}

/// Parse the bulk trainer list into an index keyed by [`trainer_key`].
///
/// Items need a link and a date, either a `data-updated` attribute or a
/// nested `<time datetime>`. When two items share a key the newer one wins.
pub fn catalog_index(html: &str, page_url: &Url) -> CatalogIndex {
    let document = Html::parse_document(html);
    let mut index = CatalogIndex::default();
    let mut skipped = 0usize;

    for item in document.select(&INDEX_ITEM) {
        let Some(link) = item.select(&LINK).next() else {
            continue;
        };

        match index_entry(item, link, page_url) {
            Ok((key, entry)) => match index.entries.entry(key) {
                Entry::Occupied(mut existing) => {
                    if entry.updated > existing.get().updated {
                        existing.insert(entry);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
            },
            Err(reason) => {
                skipped += 1;
                tracing::debug!("Skipping index entry: {}", reason);
            }
        }
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} unusable index entries", skipped);
    }
    index
}

fn index_entry(item: ElementRef<'_>, link: ElementRef<'_>, base: &Url) -> Result<(String, RemoteEntry), String> {
    let name = element_text(link);
    let key = trainer_key(&name);
    if key.is_empty() {
        return Err(format!("no usable name in {name:?}"));
    }

    let href = link.value().attr("href").ok_or("link without href")?;
    let url = base
        .join(href)
        .map_err(|e| format!("bad link {href}: {e}"))?;

    let updated = item
        .value()
        .attr("data-updated")
        .and_then(parse_date)
        .or_else(|| {
            item.select(&TIME)
                .find_map(|t| t.value().attr("datetime").and_then(parse_date))
        })
        .ok_or_else(|| format!("no date for {name}"))?;

    Ok((
        key,
        RemoteEntry {
            name,
            detail_url: url.to_string(),
            updated,
        },
    ))
}

fn is_payload_link(anchor: ElementRef<'_>, url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    PAYLOAD_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        || anchor.value().attr("download").is_some()
        || anchor.value().classes().any(|c| c == "attachment-link")
}

fn first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|css| {
        let text_selector = Selector::parse(css).ok()?;
        document
            .select(&text_selector)
            .map(element_text)
            .find(|text| !text.is_empty())
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Last non-empty path segment of a URL.
fn slug(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()
        .map(str::to_string)
}

/// Accepts `2024-03-01`, `2024.3.1`, `2024/03/01` and full RFC 3339 timestamps.
pub(crate) fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    let date_part = text.split(['T', ' ']).next().unwrap_or(text);
    let normalized = date_part.replace(['.', '/'], "-");
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://catalog.example/?s=elden").unwrap()
    }

    #[test]
    fn test_search_page_entries_and_next_link() {
        let html = r#"
            <html><body>
              <article class="post">
                <h2 class="post-title"><a href="/trainer/elden-ring-trainer/">Elden   Ring Trainer</a></h2>
              </article>
              <article class="post">
                <h2 class="entry-title"><a href="https://catalog.example/trainer/elden-ring-nightreign-trainer/">Elden Ring Nightreign Trainer</a></h2>
              </article>
              <article class="post"><h2>No link here</h2></article>
              <article class="post"><h2 class="post-title"><a href="/trainer/blank/">  </a></h2></article>
              <a class="next page-numbers" href="/page/2/?s=elden">Next</a>
            </body></html>"#;

        let page = search_page(html, &base());

        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].display_name, "Elden Ring Trainer");
        assert_eq!(page.results[0].remote_id, "elden-ring-trainer");
        assert_eq!(
            page.results[0].detail_url,
            "https://catalog.example/trainer/elden-ring-trainer/"
        );
        assert_eq!(
            page.next_page.unwrap().as_str(),
            "https://catalog.example/page/2/?s=elden"
        );
    }

    #[test]
    fn test_search_page_without_entries_is_empty() {
        let html = "<html><body><p>Sorry, nothing matched your search.</p></body></html>";
        let page = search_page(html, &base());
        assert!(page.results.is_empty());
        assert!(page.next_page.is_none());
    }

    #[test]
    fn test_detail_page() {
        let url = Url::parse("https://catalog.example/trainer/hades-trainer/").unwrap();
        let html = r#"
            <html><head><title>Hades Trainer | Site</title></head><body>
              <h1 class="entry-title">Hades v1.38290 Plus 12 Trainer</h1>
              <time datetime="2024-03-01T10:00:00+00:00">March 1, 2024</time>
              <div class="entry-content">
                <p></p>
                <p>Options: infinite health.</p>
                <a href="/wp-content/uploads/Hades.v1.38290.Plus.12.Trainer.zip">Download</a>
              </div>
            </body></html>"#;

        let record = detail_page(html, &url).unwrap();
        assert_eq!(record.title, "Hades v1.38290 Plus 12 Trainer");
        assert_eq!(
            record.download_url,
            "https://catalog.example/wp-content/uploads/Hades.v1.38290.Plus.12.Trainer.zip"
        );
        assert_eq!(record.version.as_deref(), Some("v1.38290"));
        assert_eq!(record.description.as_deref(), Some("Options: infinite health."));
        assert_eq!(record.updated, NaiveDate::from_ymd_opt(2024, 3, 1));
    }

    #[test]
    fn test_detail_page_date_from_text_and_attachment_link() {
        let url = Url::parse("https://catalog.example/trainer/celeste-trainer/").unwrap();
        let html = r#"
            <h1>Celeste Trainer</h1>
            <p>Last Updated: 2023.11.05</p>
            <a class="attachment-link" href="/downloads/4411">Celeste Trainer</a>"#;

        let record = detail_page(html, &url).unwrap();
        assert_eq!(record.download_url, "https://catalog.example/downloads/4411");
        assert_eq!(record.updated, NaiveDate::from_ymd_opt(2023, 11, 5));
        assert!(record.version.is_none());
    }

    #[test]
    fn test_detail_page_without_download_is_parse_error() {
        let url = Url::parse("https://catalog.example/trainer/empty/").unwrap();
        let err = detail_page("<h1>Empty</h1><a href='/about/'>About</a>", &url).unwrap_err();
        assert!(matches!(err, CatalogError::Parse { .. }));
    }

    #[test]
    fn test_catalog_index_skips_bad_entries() {
        let url = Url::parse("https://catalog.example/all-trainers/").unwrap();
        let html = r#"
            <ul>
              <li data-updated="2024-02-10"><a href="/trainer/elden-ring-trainer/">Elden Ring Trainer</a></li>
              <li><a href="/trainer/hades-trainer/">Hades Trainer</a> <time datetime="2024-01-05">Jan 5</time></li>
              <li><a href="/trainer/no-date-trainer/">No Date Trainer</a></li>
              <li data-updated="2024-01-01"><a href="/trainer/fling/">FLiNG Trainer</a></li>
              <li data-updated="2024-05-01"><a href="/trainer/elden-ring-v2-trainer/">Elden Ring v2.0 Trainer</a></li>
              <li>Plain item</li>
            </ul>"#;

        let index = catalog_index(html, &url);

        assert_eq!(index.len(), 2);
        let elden = index.get("eldenring").unwrap();
        assert_eq!(elden.updated, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(
            elden.detail_url,
            "https://catalog.example/trainer/elden-ring-v2-trainer/"
        );
        assert!(index.get("hades").is_some());
        assert!(index.get("nodate").is_none());
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1);
        assert_eq!(parse_date("2024-03-01"), expected);
        assert_eq!(parse_date("2024.3.1"), expected);
        assert_eq!(parse_date("2024/03/01"), expected);
        assert_eq!(parse_date(" 2024-03-01T08:00:00Z "), expected);
        assert_eq!(parse_date("March 1"), None);
    }
}
