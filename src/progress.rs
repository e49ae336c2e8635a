//! Progress events and the outbound interfaces that carry them.
//!
//! The coordinator publishes [`ProgressEvent`]s to a [`ProgressSink`] under
//! the comic's topic and hands translation-ready chapters to a
//! [`TranslationHandoff`]. Delivery semantics belong to the implementations.

use crate::console::Console;
use crate::scrapers::ChapterStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Event type understood by subscribers.
pub const SEND_PROGRESS: &str = "send_progress";

/// Status of one chapter inside an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterProgress {
    pub index: usize,
    pub status: ChapterStatus,
    /// Set when the attempt on this chapter failed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
}

impl ChapterProgress {
    pub fn new(index: usize, status: ChapterStatus) -> Self {
        Self {
            index,
            status,
            failed: false,
        }
    }

    pub fn failed(index: usize, status: ChapterStatus) -> Self {
        Self {
            index,
            status,
            failed: true,
        }
    }
}

/// Progress message relayed to subscribers of a comic topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub chapters: Vec<ChapterProgress>,
    /// Fraction of the request completed, or a caller-supplied marker.
    pub progress: f64,
}

impl ProgressEvent {
    pub fn new(chapters: Vec<ChapterProgress>, progress: f64) -> Self {
        Self {
            kind: SEND_PROGRESS.to_string(),
            chapters,
            progress,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.chapters.iter().any(|c| c.failed)
    }
}

/// Pub/sub relay for progress events.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, topic: &str, event: ProgressEvent);
}

#[async_trait]
impl ProgressSink for UnboundedSender<(String, ProgressEvent)> {
    async fn publish(&self, topic: &str, event: ProgressEvent) {
        if self.send((topic.to_string(), event)).is_err() {
            tracing::debug!(topic, "progress receiver dropped");
        }
    }
}

/// Prints progress events on the terminal.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    console: Console,
}

impl ConsoleSink {
    pub fn new(console: Console) -> Self {
        Self { console }
    }
}

#[async_trait]
impl ProgressSink for ConsoleSink {
    async fn publish(&self, _topic: &str, event: ProgressEvent) {
        for chapter in &event.chapters {
            let line = format!(
                "{} chapter {} {}",
                self.console.percent(event.progress),
                chapter.index,
                self.console.status(chapter.status, chapter.failed)
            );
            if chapter.failed {
                self.console.warning(&line);
            } else {
                self.console.info(&line);
            }
        }
    }
}

/// A chapter ready for the external translation workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub comic_id: String,
    pub index: usize,
}

/// Receives chapters eligible for translation.
#[async_trait]
pub trait TranslationHandoff: Send + Sync {
    async fn submit(&self, request: TranslationRequest);
}

#[async_trait]
impl TranslationHandoff for UnboundedSender<TranslationRequest> {
    async fn submit(&self, request: TranslationRequest) {
        if self.send(request).is_err() {
            tracing::debug!("translation receiver dropped");
        }
    }
}

/// Handoff that only records eligible chapters in the log.
#[derive(Debug, Default)]
pub struct LogHandoff;

#[async_trait]
impl TranslationHandoff for LogHandoff {
    async fn submit(&self, request: TranslationRequest) {
        tracing::info!(comic_id = %request.comic_id, index = request.index, "chapter ready for translation");
    }
}
