//! Chapter status persistence.
//!
//! The coordinator reads statuses before scraping and writes every
//! transition. Two implementations are provided: an in-memory map and a
//! JSON file rewritten atomically on each change.

use crate::error::StoreError;
use crate::scrapers::{ChapterStatus, KnownChapters};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Persisted status of one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub comic_id: String,
    pub index: usize,
    pub status: ChapterStatus,
}

/// Authoritative chapter status across restarts.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Returns the record for a chapter, or `None` if never stored.
    async fn get(&self, comic_id: &str, index: usize) -> Result<Option<ChapterRecord>, StoreError>;

    /// Creates or replaces the status of a chapter.
    async fn upsert(&self, comic_id: &str, index: usize, status: ChapterStatus) -> Result<(), StoreError>;

    /// Returns every stored status of a comic keyed by chapter index.
    async fn list(&self, comic_id: &str) -> Result<KnownChapters, StoreError>;
}

type StatusMap = HashMap<String, BTreeMap<usize, ChapterStatus>>;

fn record(map: &StatusMap, comic_id: &str, index: usize) -> Option<ChapterRecord> {
    map.get(comic_id)
        .and_then(|chapters| chapters.get(&index))
        .map(|status| ChapterRecord {
            comic_id: comic_id.to_string(),
            index,
            status: *status,
        })
}

/// Status store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    inner: Mutex<StatusMap>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, comic_id: &str, index: usize) -> Result<Option<ChapterRecord>, StoreError> {
        Ok(record(&*self.inner.lock().await, comic_id, index))
    }

    async fn upsert(&self, comic_id: &str, index: usize, status: ChapterStatus) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .entry(comic_id.to_string())
            .or_default()
            .insert(index, status);
        Ok(())
    }

    async fn list(&self, comic_id: &str) -> Result<KnownChapters, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .get(comic_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Status store backed by a JSON file.
#[derive(Debug)]
pub struct JsonStatusStore {
    path: PathBuf,
    inner: Mutex<StatusMap>,
}

impl JsonStatusStore {
    /// Opens the store, starting empty if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let map = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => StatusMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            inner: Mutex::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, map: &StatusMap) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for JsonStatusStore {
    async fn get(&self, comic_id: &str, index: usize) -> Result<Option<ChapterRecord>, StoreError> {
        Ok(record(&*self.inner.lock().await, comic_id, index))
    }

    async fn upsert(&self, comic_id: &str, index: usize, status: ChapterStatus) -> Result<(), StoreError> {
        let mut map = self.inner.lock().await;
        map.entry(comic_id.to_string())
            .or_default()
            .insert(index, status);
        self.persist(&map).await
    }

    async fn list(&self, comic_id: &str) -> Result<KnownChapters, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .get(comic_id)
            .cloned()
            .unwrap_or_default())
    }
}
