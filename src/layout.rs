//! On-disk layout for downloaded comics.
//!
//! Every path a component writes is derived here from the comic identifier,
//! through a one-way name encoding, so that the scraper, the fetch executor
//! and the coordinator agree on where things live.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Prefix of the progress topic for a comic.
const TOPIC_PREFIX: &str = "download_translate_";

/// Extension used when a URL carries none.
const DEFAULT_EXTENSION: &str = ".jpg";

/// Encodes a comic identifier into a filesystem- and topic-safe name.
///
/// Same input always yields the same name; the hex SHA-256 digest makes
/// collisions between distinct identifiers practically impossible.
pub fn encode_name(comic_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(comic_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns the progress topic for a comic.
pub fn progress_topic(comic_id: &str) -> String {
    format!("{}{}", TOPIC_PREFIX, encode_name(comic_id))
}

/// Extracts the file extension (with leading dot) from a resource URL.
fn url_extension(url: &str) -> String {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };

    let file_name = path.rsplit('/').next().unwrap_or_default();
    match file_name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// Media directory layout rooted at a single directory.
#[derive(Debug, Clone)]
pub struct MediaLayout {
    root: PathBuf,
}

impl MediaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything for one comic.
    pub fn comic_dir(&self, comic_id: &str) -> PathBuf {
        self.root.join(encode_name(comic_id))
    }

    /// Directory holding the pages of one chapter.
    pub fn chapter_dir(&self, comic_id: &str, chapter_index: usize) -> PathBuf {
        self.comic_dir(comic_id).join(chapter_index.to_string())
    }

    /// Destination of one page image.
    pub fn page_path(&self, comic_id: &str, chapter_index: usize, page_index: usize, url: &str) -> PathBuf {
        self.chapter_dir(comic_id, chapter_index)
            .join(format!("{}{}", page_index, url_extension(url)))
    }

    /// Destination of the comic thumbnail.
    pub fn thumbnail_path(&self, comic_id: &str, url: &str) -> PathBuf {
        self.comic_dir(comic_id)
            .join(format!("thumbnail{}", url_extension(url)))
    }
}
