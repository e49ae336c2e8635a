//! Error types for the Toonkor pipeline.
//!
//! Uses `thiserror` for structured error definitions, one enum per concern.
//! Document-level failures (`ScraperError`) abort a single chapter, resource
//! failures (`FetchError`) are isolated to a single page.

use thiserror::Error;

/// Errors raised while fetching or parsing site documents.
#[derive(Error, Debug)]
pub enum ScraperError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Document structure did not match the selector table
    #[error("Failed to parse HTML: {0}")]
    Parse(String),

    /// A required element is missing from the document
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The chapter page payload could not be decoded
    #[error("Failed to decode page list: {0}")]
    Decode(#[from] DecodeError),

    /// URL parsing or joining failed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ScraperError {
    /// Returns true if the error signals upstream layout drift rather than
    /// a transient network problem.
    pub fn is_layout_change(&self) -> bool {
        matches!(
            self,
            ScraperError::Parse(_) | ScraperError::ElementNotFound(_) | ScraperError::Decode(_)
        )
    }
}

/// Errors raised by the page decoder.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The `toon_img` script marker is absent
    #[error("encoded payload marker not found")]
    MarkerNotFound,

    /// The marker is present but carries no payload
    #[error("encoded payload is empty")]
    EmptyPayload,

    /// The payload is not valid base64
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded payload is not valid UTF-8
    #[error("decoded payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The decoded payload contains no image sources
    #[error("decoded payload contains no image sources")]
    NoImages,
}

/// Errors raised while transferring a single resource to disk.
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request or body stream failed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Writing the destination failed
    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    /// The transfer did not finish within the configured limit
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors raised when accepting a download request.
#[derive(Error, Debug)]
pub enum JobError {
    /// Payload is not valid JSON or misses fields
    #[error("invalid request payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Payload names a task the coordinator does not run
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Payload names no chapters
    #[error("request contains no chapters")]
    NoChapters,

    /// Chapter has no stored status to advance from
    #[error("chapter {index} of {comic_id} was never recorded")]
    UnknownChapter { comic_id: String, index: usize },

    /// Reading or writing chapter status failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by status store implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to read or write the backing file
    #[error("status store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Backing file is not valid JSON
    #[error("status store is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
