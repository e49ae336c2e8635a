//! Scraper trait and common types for comic metadata.
//!
//! This module defines the interface the download coordinator consumes,
//! along with the data types for catalog entries, comics and chapters.

mod toonkor;

pub use toonkor::ToonkorScraper;

use crate::decoder::PageRecord;
use crate::error::ScraperError;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a chapter, ordered by progress through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum ChapterStatus {
    #[default]
    OnSite,
    Queued,
    Downloaded,
    Translated,
}

impl ChapterStatus {
    /// Returns true if the chapter pages are on disk.
    pub fn is_downloaded(self) -> bool {
        self >= ChapterStatus::Downloaded
    }
}

impl fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChapterStatus::OnSite => "OnSite",
            ChapterStatus::Queued => "Queued",
            ChapterStatus::Downloaded => "Downloaded",
            ChapterStatus::Translated => "Translated",
        };
        f.write_str(name)
    }
}

/// Known per-index chapter status supplied by the caller of a details scrape.
pub type KnownChapters = BTreeMap<usize, ChapterStatus>;

/// One entry of a listing or search result page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub title: String,
    /// Site path identifying the comic, e.g. `/abc`.
    pub id: String,
    pub thumbnail: String,
}

/// A single chapter of a comic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterInfo {
    /// 0-based position; 0 is the oldest chapter.
    pub index: usize,
    /// Site path of the chapter document.
    pub chapter_id: String,
    pub upload_date: Option<NaiveDate>,
    pub status: ChapterStatus,
}

/// Snapshot of a comic page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComicDetails {
    pub id: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub thumbnail: String,
    pub chapters: Vec<ChapterInfo>,
}

impl ComicDetails {
    pub fn chapter(&self, index: usize) -> Option<&ChapterInfo> {
        self.chapters.get(index).filter(|c| c.index == index)
    }

    pub fn chapter_mut(&mut self, index: usize) -> Option<&mut ChapterInfo> {
        self.chapters.get_mut(index).filter(|c| c.index == index)
    }
}

/// Applies known statuses to freshly scraped chapters.
///
/// Returns a new list; the inputs are left untouched.
pub fn merge_known_chapters(chapters: &[ChapterInfo], known: &KnownChapters) -> Vec<ChapterInfo> {
    chapters
        .iter()
        .map(|chapter| match known.get(&chapter.index) {
            Some(status) => ChapterInfo {
                status: *status,
                ..chapter.clone()
            },
            None => chapter.clone(),
        })
        .collect()
}

/// Synthesizes a chapter path for rows that carry none.
pub fn synthesize_chapter_id(comic_id: &str, index: usize) -> String {
    format!("{}_{}화.html", comic_id.replace('-', "_"), index)
}

/// Fixed listing pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Popular,
    Latest,
}

/// Webtoon listing path, shared by popular and latest.
pub(crate) const WEBTOONS_PATH: &str = "/%EC%9B%B9%ED%88%B0";

/// Query suffix ordering a listing by latest update.
pub(crate) const LATEST_MODIFIER: &str = "?fil=%EC%B5%9C%EC%8B%A0";

impl Listing {
    pub fn path(self) -> String {
        match self {
            Listing::Popular => WEBTOONS_PATH.to_string(),
            Listing::Latest => format!("{}{}", WEBTOONS_PATH, LATEST_MODIFIER),
        }
    }
}

/// Comic type filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComicType {
    Webtoons,
    Manga,
    Hentai,
}

impl ComicType {
    pub fn path(self) -> &'static str {
        match self {
            ComicType::Webtoons => WEBTOONS_PATH,
            ComicType::Manga => "/%EB%8B%A8%ED%96%89%EB%B3%B8",
            ComicType::Hentai => "/%EB%A7%9D%EA%B0%80",
        }
    }
}

impl FromStr for ComicType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webtoons" | "webtoon" => Ok(ComicType::Webtoons),
            "manga" => Ok(ComicType::Manga),
            "hentai" => Ok(ComicType::Hentai),
            other => Err(format!("unknown comic type: {}", other)),
        }
    }
}

/// Sort filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Popular,
    Latest,
    Completed,
}

impl SortOrder {
    pub fn path(self) -> &'static str {
        match self {
            SortOrder::Popular => "",
            SortOrder::Latest => LATEST_MODIFIER,
            SortOrder::Completed => "/%EC%99%84%EA%B2%B0",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "popular" => Ok(SortOrder::Popular),
            "latest" => Ok(SortOrder::Latest),
            "completed" => Ok(SortOrder::Completed),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// Filters applied when searching without a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchFilters {
    pub kind: ComicType,
    pub sort: SortOrder,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            kind: ComicType::Manga,
            sort: SortOrder::Latest,
        }
    }
}

/// Builds the site path for a search.
///
/// A query always goes to the search endpoint; otherwise the filtered listing
/// is used. The site files completed hentai directly under the type path.
pub fn search_path(query: Option<&str>, filters: Option<SearchFilters>) -> String {
    if let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        return format!("/bbs/search.php?sfl=wr_subject%7C%7Cwr_content&stx={}", encoded);
    }

    let filters = filters.unwrap_or_default();
    match (filters.kind, filters.sort) {
        (ComicType::Hentai, SortOrder::Completed) => filters.kind.path().to_string(),
        (kind, sort) => format!("{}{}", kind.path(), sort.path()),
    }
}

/// Source of comic metadata and page lists.
///
/// Implemented by [`ToonkorScraper`]; the download coordinator only depends on
/// this trait.
#[async_trait]
pub trait ComicSource: Send + Sync {
    /// Scrapes a comic page, applying `known` statuses to its chapters.
    async fn get_comic_details(
        &self,
        comic_id: &str,
        known: &KnownChapters,
    ) -> Result<ComicDetails, ScraperError>;

    /// Resolves the ordered page list of a chapter.
    async fn get_page_list(&self, chapter_id: &str) -> Result<Vec<PageRecord>, ScraperError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(index: usize) -> ChapterInfo {
        ChapterInfo {
            index,
            chapter_id: format!("/c{}", index),
            upload_date: None,
            status: ChapterStatus::OnSite,
        }
    }

    #[test]
    fn test_status_order() {
        assert!(ChapterStatus::OnSite < ChapterStatus::Queued);
        assert!(ChapterStatus::Queued < ChapterStatus::Downloaded);
        assert!(ChapterStatus::Downloaded < ChapterStatus::Translated);
        assert!(ChapterStatus::Translated.is_downloaded());
        assert!(!ChapterStatus::Queued.is_downloaded());
    }

    #[test]
    fn test_status_serializes_by_name() {
        assert_eq!(
            serde_json::to_string(&ChapterStatus::Downloaded).unwrap(),
            "\"Downloaded\""
        );
        assert_eq!(ChapterStatus::OnSite.to_string(), "OnSite");
    }

    #[test]
    fn test_merge_known_is_pure() {
        let scraped = vec![chapter(0), chapter(1), chapter(2)];
        let known = KnownChapters::from([(1, ChapterStatus::Translated), (7, ChapterStatus::Downloaded)]);

        let merged = merge_known_chapters(&scraped, &known);

        assert_eq!(merged[0].status, ChapterStatus::OnSite);
        assert_eq!(merged[1].status, ChapterStatus::Translated);
        assert_eq!(merged[1].chapter_id, "/c1");
        assert_eq!(merged.len(), 3);
        assert!(scraped.iter().all(|c| c.status == ChapterStatus::OnSite));
    }

    #[test]
    fn test_synthesized_id_is_reproducible() {
        assert_eq!(synthesize_chapter_id("/my-comic", 4), "/my_comic_4화.html");
        assert_eq!(
            synthesize_chapter_id("/my-comic", 4),
            synthesize_chapter_id("/my-comic", 4)
        );
    }

    #[test]
    fn test_search_path_with_query() {
        assert_eq!(
            search_path(Some("나 혼자"), None),
            "/bbs/search.php?sfl=wr_subject%7C%7Cwr_content&stx=%EB%82%98+%ED%98%BC%EC%9E%90"
        );
    }

    #[test]
    fn test_search_path_filters() {
        assert_eq!(
            search_path(None, None),
            "/%EB%8B%A8%ED%96%89%EB%B3%B8?fil=%EC%B5%9C%EC%8B%A0"
        );
        assert_eq!(
            search_path(
                Some("  "),
                Some(SearchFilters {
                    kind: ComicType::Webtoons,
                    sort: SortOrder::Completed,
                })
            ),
            "/%EC%9B%B9%ED%88%B0/%EC%99%84%EA%B2%B0"
        );
        assert_eq!(
            search_path(
                None,
                Some(SearchFilters {
                    kind: ComicType::Manga,
                    sort: SortOrder::Popular,
                })
            ),
            "/%EB%8B%A8%ED%96%89%EB%B3%B8"
        );
    }

    #[test]
    fn test_search_path_hentai_completed() {
        let filters = SearchFilters {
            kind: ComicType::Hentai,
            sort: SortOrder::Completed,
        };
        assert_eq!(search_path(None, Some(filters)), "/%EB%A7%9D%EA%B0%80");
    }

    #[test]
    fn test_filter_parsing() {
        assert_eq!("Hentai".parse::<ComicType>().unwrap(), ComicType::Hentai);
        assert_eq!("completed".parse::<SortOrder>().unwrap(), SortOrder::Completed);
        assert!("novel".parse::<ComicType>().is_err());
    }

    #[test]
    fn test_listing_paths() {
        assert_eq!(Listing::Popular.path(), "/%EC%9B%B9%ED%88%B0");
        assert_eq!(
            Listing::Latest.path(),
            "/%EC%9B%B9%ED%88%B0?fil=%EC%B5%9C%EC%8B%A0"
        );
    }
}
