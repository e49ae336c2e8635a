//! Toonkor scraper implementation.
//!
//! Catalog, search and detail pages are parsed with a fixed selector table;
//! chapter page lists come from the obfuscated script payload.

use super::{
    CatalogEntry, ChapterInfo, ChapterStatus, ComicDetails, ComicSource, KnownChapters, Listing,
    SearchFilters, merge_known_chapters, search_path, synthesize_chapter_id,
};
use crate::client::{SiteClient, resolve_url};
use crate::decoder::{PageRecord, decode_page_list};
use crate::error::ScraperError;
use crate::pool::WorkerPool;
use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;

/// Date format of the chapter list.
const UPLOAD_DATE_FORMAT: &str = "%Y-%m-%d";

/// CSS selectors used for parsing.
struct Selectors {
    /// Repeated entry block of listing and search pages.
    entry: Selector,
    /// Entry title heading.
    entry_title: Selector,
    /// Entry link carrying the comic path.
    entry_link: Selector,
    /// Entry thumbnail.
    entry_thumbnail: Selector,
    /// Any element of the listing section family, present even when empty.
    catalog_section: Selector,
    detail_title: Selector,
    detail_author: Selector,
    detail_description: Selector,
    detail_thumbnail: Selector,
    /// Chapter table.
    chapter_table: Selector,
    /// Rows of the chapter table.
    chapter_row: Selector,
    /// Title cell; rows without it are headers or ads.
    chapter_title_cell: Selector,
    /// Upload date cell.
    chapter_date_cell: Selector,
    /// Links in mirror announcements.
    mirror_link: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            entry: Selector::parse("div.section-item-inner").unwrap(),
            entry_title: Selector::parse("div.section-item-title a h3").unwrap(),
            entry_link: Selector::parse("div.section-item-title a").unwrap(),
            entry_thumbnail: Selector::parse("img").unwrap(),
            catalog_section: Selector::parse(r#"[class*="section-item"]"#).unwrap(),
            detail_title: Selector::parse("td.bt_title").unwrap(),
            detail_author: Selector::parse("td.bt_label span.bt_data").unwrap(),
            detail_description: Selector::parse("td.bt_over").unwrap(),
            detail_thumbnail: Selector::parse("td.bt_thumb img").unwrap(),
            chapter_table: Selector::parse("table.web_list").unwrap(),
            chapter_row: Selector::parse("table.web_list tr").unwrap(),
            chapter_title_cell: Selector::parse("td.content__title").unwrap(),
            chapter_date_cell: Selector::parse("td.episode__index").unwrap(),
            mirror_link: Selector::parse("div.tgme_widget_message_text.js-message_text > a")
                .unwrap(),
        }
    }
}

/// Scraper for the Toonkor site.
pub struct ToonkorScraper {
    client: Arc<SiteClient>,
    selectors: Selectors,
    pool: WorkerPool,
    mirror_channel_url: String,
}

impl ToonkorScraper {
    /// Creates a scraper over a shared site client.
    pub fn new(client: Arc<SiteClient>, pool: WorkerPool, mirror_channel_url: impl Into<String>) -> Self {
        Self {
            client,
            selectors: Selectors::new(),
            pool,
            mirror_channel_url: mirror_channel_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// Lists a catalog page. The site serves a single page per listing.
    pub async fn list_catalog(&self, listing: Listing, page: u32) -> Result<Vec<CatalogEntry>, ScraperError> {
        if page > 1 {
            return Ok(Vec::new());
        }

        let body = self.client.get_text(&self.client.site_url(&listing.path())).await?;
        self.parse_catalog(&body)
    }

    /// Searches by title, or lists a filtered catalog when `query` is empty.
    pub async fn search(
        &self,
        query: Option<&str>,
        filters: Option<SearchFilters>,
    ) -> Result<Vec<CatalogEntry>, ScraperError> {
        let url = self.client.site_url(&search_path(query, filters));
        let body = self.client.get_text(&url).await?;
        self.parse_catalog(&body)
    }

    /// Matches external titles against the site, keeping the first hit of each.
    ///
    /// Titles that fail or find nothing are omitted; order follows `titles`.
    pub async fn search_many(&self, titles: Vec<String>) -> Vec<(String, CatalogEntry)> {
        self.pool
            .run(titles, |title| async move {
                match self.search(Some(&title), None).await {
                    Ok(entries) => entries.into_iter().next().map(|entry| (title, entry)),
                    Err(e) => {
                        tracing::warn!(%title, error = %e, "search failed");
                        None
                    }
                }
            })
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Scrapes a comic page.
    pub async fn get_comic_details(
        &self,
        comic_id: &str,
        known: &KnownChapters,
    ) -> Result<ComicDetails, ScraperError> {
        let body = self.client.get_text(&self.client.site_url(comic_id)).await?;
        let details = self.parse_details(&body, comic_id, known)?;
        tracing::debug!(comic_id, chapters = details.chapters.len(), "scraped details");
        Ok(details)
    }

    /// Fetches a chapter document and decodes its page list.
    pub async fn get_page_list(&self, chapter_id: &str) -> Result<Vec<PageRecord>, ScraperError> {
        let body = self.client.get_text(&self.client.site_url(chapter_id)).await?;
        Ok(decode_page_list(&body, self.client.base_url())?)
    }

    /// Looks up the newest mirror announced on the mirror channel.
    pub async fn discover_mirror(&self) -> Result<Option<String>, ScraperError> {
        let body = self.client.get_text(&self.mirror_channel_url).await?;
        Ok(self.parse_mirror(&body))
    }

    /// Returns true if `url` is a reachable mirror.
    pub async fn check_mirror(&self, url: &str) -> bool {
        self.client.is_reachable(url).await
    }

    fn parse_catalog(&self, body: &str) -> Result<Vec<CatalogEntry>, ScraperError> {
        let doc = Html::parse_document(body);
        let blocks: Vec<ElementRef> = doc.select(&self.selectors.entry).collect();

        if blocks.is_empty() {
            if doc.select(&self.selectors.catalog_section).next().is_none() {
                return Err(ScraperError::Parse("catalog section not found".to_string()));
            }
            return Ok(Vec::new());
        }

        let entries: Vec<CatalogEntry> = blocks
            .iter()
            .filter_map(|block| self.parse_entry(*block))
            .collect();

        if entries.is_empty() {
            return Err(ScraperError::Parse(format!(
                "{} catalog entries found but none could be read",
                blocks.len()
            )));
        }

        Ok(entries)
    }

    /// Reads one entry block; `None` if a required field is missing.
    fn parse_entry(&self, block: ElementRef) -> Option<CatalogEntry> {
        let title = element_text(block.select(&self.selectors.entry_title).next()?);
        let href = block
            .select(&self.selectors.entry_link)
            .next()?
            .value()
            .attr("href")?;
        let thumbnail = block
            .select(&self.selectors.entry_thumbnail)
            .next()?
            .value()
            .attr("src")?;

        if title.is_empty() {
            return None;
        }

        Some(CatalogEntry {
            title,
            id: comic_id_from_href(href)?,
            thumbnail: resolve_url(self.client.base_url(), thumbnail),
        })
    }

    fn parse_details(
        &self,
        body: &str,
        comic_id: &str,
        known: &KnownChapters,
    ) -> Result<ComicDetails, ScraperError> {
        let doc = Html::parse_document(body);

        let required_text = |selector: &Selector, name: &str| {
            doc.select(selector)
                .next()
                .map(element_text)
                .ok_or_else(|| ScraperError::ElementNotFound(name.to_string()))
        };

        let title = required_text(&self.selectors.detail_title, "comic title")?;
        let author = required_text(&self.selectors.detail_author, "comic author")?;
        let description = required_text(&self.selectors.detail_description, "comic description")?;
        let thumbnail = doc
            .select(&self.selectors.detail_thumbnail)
            .next()
            .and_then(|img| img.value().attr("src"))
            .ok_or_else(|| ScraperError::ElementNotFound("comic thumbnail".to_string()))?;

        let chapters = self.parse_chapters(&doc, comic_id)?;

        Ok(ComicDetails {
            id: comic_id.to_string(),
            title,
            author,
            description,
            thumbnail: resolve_url(self.client.base_url(), thumbnail),
            chapters: merge_known_chapters(&chapters, known),
        })
    }

    /// Reads the chapter table oldest first.
    fn parse_chapters(&self, doc: &Html, comic_id: &str) -> Result<Vec<ChapterInfo>, ScraperError> {
        if doc.select(&self.selectors.chapter_table).next().is_none() {
            return Err(ScraperError::ElementNotFound("chapter table".to_string()));
        }

        let rows: Vec<ElementRef> = doc
            .select(&self.selectors.chapter_row)
            .filter(|row| row.select(&self.selectors.chapter_title_cell).next().is_some())
            .collect();

        // the site lists newest first
        let chapters = rows
            .into_iter()
            .rev()
            .enumerate()
            .map(|(index, row)| {
                let chapter_id = row
                    .select(&self.selectors.chapter_title_cell)
                    .next()
                    .and_then(|cell| cell.value().attr("data-role"))
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| synthesize_chapter_id(comic_id, index));

                let upload_date = row
                    .select(&self.selectors.chapter_date_cell)
                    .next()
                    .map(element_text)
                    .and_then(|text| NaiveDate::parse_from_str(&text, UPLOAD_DATE_FORMAT).ok());

                ChapterInfo {
                    index,
                    chapter_id,
                    upload_date,
                    status: ChapterStatus::OnSite,
                }
            })
            .collect();

        Ok(chapters)
    }

    fn parse_mirror(&self, body: &str) -> Option<String> {
        let doc = Html::parse_document(body);
        let links: Vec<String> = doc
            .select(&self.selectors.mirror_link)
            .map(element_text)
            .collect();

        // newest announcement is last
        links.into_iter().rev().find(|text| text.contains("toonkor"))
    }
}

#[async_trait]
impl ComicSource for ToonkorScraper {
    async fn get_comic_details(
        &self,
        comic_id: &str,
        known: &KnownChapters,
    ) -> Result<ComicDetails, ScraperError> {
        ToonkorScraper::get_comic_details(self, comic_id, known).await
    }

    async fn get_page_list(&self, chapter_id: &str) -> Result<Vec<PageRecord>, ScraperError> {
        ToonkorScraper::get_page_list(self, chapter_id).await
    }
}

fn element_text(elem: ElementRef) -> String {
    elem.text().collect::<String>().trim().to_string()
}

/// Normalizes a catalog link into a site path.
fn comic_id_from_href(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    if let Ok(absolute) = url::Url::parse(href) {
        let path = absolute.path();
        return (path != "/").then(|| path.to_string());
    }

    if href.starts_with('/') {
        Some(href.to_string())
    } else {
        Some(format!("/{}", href))
    }
}
