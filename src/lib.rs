//! Toonkor - webcomic scraper and chapter downloader.
//!
//! This library provides functionality for:
//! - Listing, searching and scraping comics from the Toonkor site
//! - Decoding the page list embedded in chapter documents
//! - Downloading chapter images with bounded concurrency
//! - Coordinating per-title download jobs with progress reporting

pub mod client;
pub mod config;
pub mod console;
pub mod decoder;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod pool;
pub mod progress;
pub mod scrapers;
pub mod store;

// Re-export commonly used types
pub use client::SiteClient;
pub use config::Config;
pub use console::Console;
pub use downloader::{Collaborators, DownloadRequest, Downloader, Enqueued};
pub use error::{ConfigError, DecodeError, FetchError, JobError, ScraperError, StoreError};
pub use fetch::{FetchExecutor, FetchReport, FetchTarget};
pub use layout::MediaLayout;
pub use progress::{ProgressEvent, ProgressSink, TranslationHandoff};
pub use scrapers::{ChapterInfo, ChapterStatus, ComicDetails, ComicSource, ToonkorScraper};
pub use store::{JsonStatusStore, MemoryStatusStore, StatusStore};
