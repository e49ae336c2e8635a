//! Decoder for the obfuscated page list embedded in chapter documents.
//!
//! Chapter pages carry a script assignment `toon_img = '<base64>'` whose
//! decoded body is an HTML fragment of `<img src="...">` tags.

use crate::client::resolve_url;
use crate::error::DecodeError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Regex locating the encoded payload inside the chapter script.
static PAYLOAD_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)toon_img\s*=\s*'(.*?)'").unwrap());

/// Regex extracting image sources from the decoded fragment.
static IMAGE_SOURCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"src="([^"]*)""#).unwrap());

/// One page image of a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Position within the chapter; 0 is the first panel.
    pub index: usize,
    /// Absolute image URL.
    pub url: String,
}

/// Extracts the ordered page list from a chapter document.
///
/// Relative sources are prefixed with `base_url`.
pub fn decode_page_list(document: &str, base_url: &str) -> Result<Vec<PageRecord>, DecodeError> {
    let encoded = PAYLOAD_MARKER
        .captures(document)
        .and_then(|caps| caps.get(1))
        .ok_or(DecodeError::MarkerNotFound)?
        .as_str();

    // payloads may be wrapped across lines
    let encoded: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if encoded.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    let bytes = STANDARD.decode(&encoded)?;
    let decoded = String::from_utf8(bytes)?;

    let pages: Vec<PageRecord> = IMAGE_SOURCE
        .captures_iter(&decoded)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|src| !src.is_empty())
        .enumerate()
        .map(|(index, src)| PageRecord {
            index,
            url: resolve_url(base_url, src),
        })
        .collect();

    if pages.is_empty() {
        return Err(DecodeError::NoImages);
    }

    Ok(pages)
}

#[cfg(test)]
pub(crate) fn encode_page_list(urls: &[&str]) -> String {
    let fragment: String = urls
        .iter()
        .map(|url| format!(r#"<img src="{}" alt="">"#, url))
        .collect::<Vec<_>>()
        .join("\n");
    STANDARD.encode(fragment)
}

#[cfg(test)]
pub(crate) fn chapter_document(urls: &[&str]) -> String {
    format!(
        "<html><body><script>var toon_img = '{}';</script></body></html>",
        encode_page_list(urls)
    )
}
