//! Download job coordinator.
//!
//! Requests are queued per comic title. A title is either idle (no entry in
//! the title table) or running (one drain task owns its queue); both the
//! check and the transition happen under the same lock, so at most one drain
//! task exists per title. Different titles drain independently.

use crate::error::{JobError, ScraperError, StoreError};
use crate::fetch::{FetchExecutor, FetchTarget};
use crate::layout::{MediaLayout, progress_topic};
use crate::progress::{ChapterProgress, ProgressEvent, ProgressSink, TranslationHandoff, TranslationRequest};
use crate::scrapers::{ChapterStatus, ComicDetails, ComicSource, KnownChapters};
use crate::store::StatusStore;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::Instrument;

/// Inbound payload: `{"task": "download" | "download_and_translate", "chapters": [..]}`.
#[derive(Debug, Deserialize)]
struct Payload {
    task: String,
    chapters: Vec<usize>,
}

/// A queued request for one comic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub comic_id: String,
    pub session_token: String,
    /// Distinct chapter indices, ascending.
    pub chapters: Vec<usize>,
    pub also_translate: bool,
}

impl DownloadRequest {
    /// Parses an inbound payload.
    pub fn parse(comic_id: &str, session_token: &str, payload: &str) -> Result<Self, JobError> {
        let payload: Payload = serde_json::from_str(payload)?;

        let also_translate = match payload.task.as_str() {
            "download" => false,
            "download_and_translate" => true,
            other => return Err(JobError::UnknownTask(other.to_string())),
        };

        let mut chapters = payload.chapters;
        chapters.sort_unstable();
        chapters.dedup();
        if chapters.is_empty() {
            return Err(JobError::NoChapters);
        }

        Ok(Self {
            comic_id: comic_id.to_string(),
            session_token: session_token.to_string(),
            chapters,
            also_translate,
        })
    }
}

/// What `append` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The title was idle; a drain cycle started.
    Started,
    /// The title is running; the request waits behind earlier ones.
    Waiting,
}

/// Outbound collaborators of the coordinator.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn ComicSource>,
    pub store: Arc<dyn StatusStore>,
    pub sink: Arc<dyn ProgressSink>,
    pub handoff: Arc<dyn TranslationHandoff>,
}

/// Result of one chapter attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChapterOutcome {
    /// Pages fetched in this attempt.
    Downloaded,
    /// Nothing to do; carries the existing status.
    AlreadyDone(ChapterStatus),
    Failed,
}

struct CachedDetails {
    fetched_at: Instant,
    details: ComicDetails,
}

struct Inner {
    collab: Collaborators,
    fetcher: FetchExecutor,
    layout: MediaLayout,
    details_ttl: Duration,
    /// Present entry means the title is running.
    titles: Mutex<HashMap<String, VecDeque<DownloadRequest>>>,
    cache: Mutex<HashMap<String, CachedDetails>>,
    /// Serializes read-then-write status changes.
    status_lock: Mutex<()>,
    idle: Notify,
}

/// Per-title serialized download coordinator.
#[derive(Clone)]
pub struct Downloader {
    inner: Arc<Inner>,
}

impl Downloader {
    pub fn new(
        collab: Collaborators,
        fetcher: FetchExecutor,
        layout: MediaLayout,
        details_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                collab,
                fetcher,
                layout,
                details_ttl,
                titles: Mutex::new(HashMap::new()),
                cache: Mutex::new(HashMap::new()),
                status_lock: Mutex::new(()),
                idle: Notify::new(),
            }),
        }
    }

    pub fn layout(&self) -> &MediaLayout {
        &self.inner.layout
    }

    /// Queues a request for `comic_id`, starting a drain cycle if the title
    /// is idle.
    pub async fn append(&self, comic_id: &str, session_token: &str, payload: &str) -> Result<Enqueued, JobError> {
        let request = DownloadRequest::parse(comic_id, session_token, payload)?;
        Ok(self.enqueue(request).await)
    }

    /// Queues an already parsed request.
    pub async fn enqueue(&self, request: DownloadRequest) -> Enqueued {
        let comic_id = request.comic_id.clone();
        let mut titles = self.inner.titles.lock().await;

        if let Some(queue) = titles.get_mut(&comic_id) {
            queue.push_back(request);
            tracing::debug!(%comic_id, waiting = queue.len(), "request queued behind running drain");
            return Enqueued::Waiting;
        }

        titles.insert(comic_id.clone(), VecDeque::from([request]));
        drop(titles);

        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!("drain", comic_id = %comic_id);
        tokio::spawn(async move { inner.drain(comic_id).await }.instrument(span));
        Enqueued::Started
    }

    /// Returns true if a drain cycle is active for the title.
    pub async fn is_running(&self, comic_id: &str) -> bool {
        self.inner.titles.lock().await.contains_key(comic_id)
    }

    /// Waits until the title has no active drain cycle.
    pub async fn wait_idle(&self, comic_id: &str) {
        loop {
            let notified = self.inner.idle.notified();
            if !self.is_running(comic_id).await {
                return;
            }
            notified.await;
        }
    }

    /// Records completion of an external translation and notifies subscribers.
    ///
    /// The chapter must already have a stored status.
    pub async fn mark_translated(&self, comic_id: &str, index: usize, progress: f64) -> Result<(), JobError> {
        {
            let _writes = self.inner.status_lock.lock().await;
            let store = &self.inner.collab.store;
            if store.get(comic_id, index).await?.is_none() {
                return Err(JobError::UnknownChapter {
                    comic_id: comic_id.to_string(),
                    index,
                });
            }
            store.upsert(comic_id, index, ChapterStatus::Translated).await?;
        }
        self.inner
            .set_cached_status(comic_id, index, ChapterStatus::Translated)
            .await;
        self.inner
            .publish(
                comic_id,
                ChapterProgress::new(index, ChapterStatus::Translated),
                progress,
            )
            .await;
        Ok(())
    }
}

impl Inner {
    async fn drain(self: Arc<Self>, comic_id: String) {
        tracing::info!("drain started");
        loop {
            let next = {
                let mut titles = self.titles.lock().await;
                match titles.get_mut(&comic_id).and_then(VecDeque::pop_front) {
                    Some(request) => request,
                    None => {
                        titles.remove(&comic_id);
                        drop(titles);
                        self.idle.notify_waiters();
                        tracing::info!("drain finished");
                        return;
                    }
                }
            };

            self.process(next).await;
        }
    }

    async fn process(&self, request: DownloadRequest) {
        let comic_id = request.comic_id.as_str();
        tracing::info!(
            session = %request.session_token,
            chapters = ?request.chapters,
            translate = request.also_translate,
            "processing request"
        );

        let details = match self.resolve_details(comic_id, &request.chapters).await {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!(error = %e, "could not scrape comic details");
                self.fail_all(&request).await;
                return;
            }
        };

        self.fetch_thumbnail(&details).await;

        let total = request.chapters.len();
        let mut ready = Vec::new();
        for (position, &index) in request.chapters.iter().enumerate() {
            let outcome = self.process_chapter(&details, index, position, total).await;
            match outcome {
                ChapterOutcome::Downloaded | ChapterOutcome::AlreadyDone(ChapterStatus::Downloaded) => {
                    ready.push(index)
                }
                _ => {}
            }
        }

        if request.also_translate {
            for index in ready {
                self.collab
                    .handoff
                    .submit(TranslationRequest {
                        comic_id: comic_id.to_string(),
                        index,
                    })
                    .await;
            }
        }
    }

    async fn process_chapter(
        &self,
        details: &ComicDetails,
        index: usize,
        position: usize,
        total: usize,
    ) -> ChapterOutcome {
        let comic_id = details.id.as_str();
        let started = position as f64 / total as f64;
        let finished = (position + 1) as f64 / total as f64;

        let Some(chapter) = details.chapter(index) else {
            tracing::warn!(index, "chapter not on site");
            self.publish(comic_id, ChapterProgress::failed(index, ChapterStatus::OnSite), finished)
                .await;
            return ChapterOutcome::Failed;
        };

        // a Queued left behind by an interrupted run is not in flight
        let prior = match self.current_status(comic_id, index, chapter.status).await {
            ChapterStatus::Queued => ChapterStatus::OnSite,
            status => status,
        };
        if prior.is_downloaded() {
            self.publish(comic_id, ChapterProgress::new(index, prior), finished)
                .await;
            return ChapterOutcome::AlreadyDone(prior);
        }

        match self.transition(comic_id, index, ChapterStatus::Queued).await {
            Ok(ChapterStatus::Queued) => {}
            Ok(status) => {
                self.publish(comic_id, ChapterProgress::new(index, status), finished)
                    .await;
                return ChapterOutcome::AlreadyDone(status);
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "could not persist queued status");
                self.publish(comic_id, ChapterProgress::failed(index, prior), finished)
                    .await;
                return ChapterOutcome::Failed;
            }
        }
        self.publish(comic_id, ChapterProgress::new(index, ChapterStatus::Queued), started)
            .await;

        let pages = match self.collab.source.get_page_list(&chapter.chapter_id).await {
            Ok(pages) => pages,
            Err(e) => {
                self.log_document_failure(index, &e);
                let status = self.restore(comic_id, index, prior).await;
                self.publish(comic_id, ChapterProgress::failed(index, status), finished)
                    .await;
                return ChapterOutcome::Failed;
            }
        };

        let targets: Vec<FetchTarget> = pages
            .iter()
            .map(|page| {
                FetchTarget::new(
                    self.layout.page_path(comic_id, index, page.index, &page.url),
                    page.url.as_str(),
                )
            })
            .collect();
        let report = self.fetcher.fetch_many(targets).await;

        if !report.is_complete() {
            tracing::warn!(
                index,
                failed = report.failed().len(),
                total = report.len(),
                "chapter incomplete"
            );
            let status = self.restore(comic_id, index, prior).await;
            self.publish(comic_id, ChapterProgress::failed(index, status), finished)
                .await;
            return ChapterOutcome::Failed;
        }

        match self.transition(comic_id, index, ChapterStatus::Downloaded).await {
            Ok(ChapterStatus::Downloaded) => {
                tracing::info!(index, pages = report.len(), fetched = report.fetched_count(), "chapter downloaded");
                self.publish(comic_id, ChapterProgress::new(index, ChapterStatus::Downloaded), finished)
                    .await;
                ChapterOutcome::Downloaded
            }
            Ok(status) => {
                self.publish(comic_id, ChapterProgress::new(index, status), finished)
                    .await;
                ChapterOutcome::AlreadyDone(status)
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "could not persist downloaded status");
                let status = self.restore(comic_id, index, prior).await;
                self.publish(comic_id, ChapterProgress::failed(index, status), finished)
                    .await;
                ChapterOutcome::Failed
            }
        }
    }

    /// Returns cached details when fresh and covering `indices`, otherwise
    /// scrapes again with the stored statuses merged in.
    async fn resolve_details(&self, comic_id: &str, indices: &[usize]) -> Result<ComicDetails, ScraperError> {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(comic_id) {
                let fresh = cached.fetched_at.elapsed() < self.details_ttl;
                let covers = indices.iter().all(|&i| cached.details.chapter(i).is_some());
                if fresh && covers {
                    return Ok(cached.details.clone());
                }
            }
        }

        let known = match self.collab.store.list(comic_id).await {
            Ok(known) => known,
            Err(e) => {
                tracing::warn!(error = %e, "could not read stored statuses");
                KnownChapters::new()
            }
        };

        let details = self.collab.source.get_comic_details(comic_id, &known).await?;
        self.cache.lock().await.insert(
            comic_id.to_string(),
            CachedDetails {
                fetched_at: Instant::now(),
                details: details.clone(),
            },
        );
        Ok(details)
    }

    async fn fetch_thumbnail(&self, details: &ComicDetails) {
        if details.thumbnail.is_empty() {
            return;
        }

        let target = FetchTarget::new(
            self.layout.thumbnail_path(&details.id, &details.thumbnail),
            details.thumbnail.as_str(),
        );
        if let Err(e) = self.fetcher.fetch_one(&target).await {
            tracing::warn!(url = %details.thumbnail, error = %e, "thumbnail fetch failed");
        }
    }

    async fn current_status(&self, comic_id: &str, index: usize, scraped: ChapterStatus) -> ChapterStatus {
        match self.collab.store.get(comic_id, index).await {
            Ok(Some(record)) => record.status,
            Ok(None) => scraped,
            Err(e) => {
                tracing::warn!(index, error = %e, "could not read chapter status");
                scraped
            }
        }
    }

    /// Writes `next` unless the stored status is further along, and returns
    /// the status in effect. Only the transient Queued may be lowered.
    async fn transition(&self, comic_id: &str, index: usize, next: ChapterStatus) -> Result<ChapterStatus, StoreError> {
        let _writes = self.status_lock.lock().await;
        let stored = self.collab.store.get(comic_id, index).await?.map(|record| record.status);

        let effective = match stored {
            Some(current) if current != ChapterStatus::Queued && current > next => current,
            _ => {
                self.collab.store.upsert(comic_id, index, next).await?;
                next
            }
        };

        self.set_cached_status(comic_id, index, effective).await;
        Ok(effective)
    }

    async fn restore(&self, comic_id: &str, index: usize, prior: ChapterStatus) -> ChapterStatus {
        match self.transition(comic_id, index, prior).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(index, error = %e, "could not restore chapter status");
                prior
            }
        }
    }

    async fn set_cached_status(&self, comic_id: &str, index: usize, status: ChapterStatus) {
        let mut cache = self.cache.lock().await;
        if let Some(chapter) = cache
            .get_mut(comic_id)
            .and_then(|cached| cached.details.chapter_mut(index))
        {
            chapter.status = status;
        }
    }

    async fn fail_all(&self, request: &DownloadRequest) {
        let mut chapters = Vec::with_capacity(request.chapters.len());
        for &index in &request.chapters {
            let status = self
                .current_status(&request.comic_id, index, ChapterStatus::OnSite)
                .await;
            chapters.push(ChapterProgress::failed(index, status));
        }

        self.collab
            .sink
            .publish(&progress_topic(&request.comic_id), ProgressEvent::new(chapters, 0.0))
            .await;
    }

    async fn publish(&self, comic_id: &str, chapter: ChapterProgress, progress: f64) {
        self.collab
            .sink
            .publish(&progress_topic(comic_id), ProgressEvent::new(vec![chapter], progress))
            .await;
    }

    fn log_document_failure(&self, index: usize, error: &ScraperError) {
        if error.is_layout_change() {
            tracing::error!(index, error = %error, "chapter document changed layout");
        } else {
            tracing::warn!(index, error = %error, "chapter document unavailable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::PageRecord;
    use crate::error::DecodeError;
    use crate::fetch::testing::FakeTransport;
    use crate::pool::WorkerPool;
    use crate::scrapers::ChapterInfo;
    use crate::store::MemoryStatusStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Semaphore;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    enum PageBehavior {
        Pages(Vec<String>),
        MissingMarker,
    }

    struct FakeSource {
        chapter_counts: HashMap<String, usize>,
        overrides: HashMap<String, PageBehavior>,
        /// Page lists of this comic wait for a permit.
        gate: Option<(String, Arc<Semaphore>)>,
        delay: Duration,
        detail_calls: AtomicUsize,
        page_calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(comics: &[(&str, usize)]) -> Self {
            Self {
                chapter_counts: comics.iter().map(|(id, n)| (id.to_string(), *n)).collect(),
                overrides: HashMap::new(),
                gate: None,
                delay: Duration::ZERO,
                detail_calls: AtomicUsize::new(0),
                page_calls: AtomicUsize::new(0),
            }
        }

        fn chapter_id(comic_id: &str, index: usize) -> String {
            format!("{}/{}", comic_id, index)
        }
    }

    #[async_trait]
    impl ComicSource for FakeSource {
        async fn get_comic_details(
            &self,
            comic_id: &str,
            known: &KnownChapters,
        ) -> Result<ComicDetails, ScraperError> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            let count = *self
                .chapter_counts
                .get(comic_id)
                .ok_or_else(|| ScraperError::ElementNotFound("comic title".to_string()))?;

            let chapters: Vec<ChapterInfo> = (0..count)
                .map(|index| ChapterInfo {
                    index,
                    chapter_id: Self::chapter_id(comic_id, index),
                    upload_date: None,
                    status: ChapterStatus::OnSite,
                })
                .collect();

            Ok(ComicDetails {
                id: comic_id.to_string(),
                title: "Title".to_string(),
                author: "Author".to_string(),
                description: String::new(),
                thumbnail: format!("https://cdn.test{}/thumb.png", comic_id),
                chapters: crate::scrapers::merge_known_chapters(&chapters, known),
            })
        }

        async fn get_page_list(&self, chapter_id: &str) -> Result<Vec<PageRecord>, ScraperError> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            if let Some((comic_id, gate)) = &self.gate
                && chapter_id.starts_with(comic_id.as_str())
            {
                let _permit = gate.acquire().await.unwrap();
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let urls = match self.overrides.get(chapter_id) {
                Some(PageBehavior::MissingMarker) => {
                    return Err(ScraperError::Decode(DecodeError::MarkerNotFound));
                }
                Some(PageBehavior::Pages(urls)) => urls.clone(),
                None => (0..2)
                    .map(|p| format!("https://cdn.test{}/{}.jpg", chapter_id, p))
                    .collect(),
            };

            Ok(urls
                .into_iter()
                .enumerate()
                .map(|(index, url)| PageRecord { index, url })
                .collect())
        }
    }

    struct Harness {
        _dir: TempDir,
        downloader: Downloader,
        source: Arc<FakeSource>,
        transport: Arc<FakeTransport>,
        store: Arc<MemoryStatusStore>,
        events: UnboundedReceiver<(String, ProgressEvent)>,
        handoffs: UnboundedReceiver<TranslationRequest>,
    }

    impl Harness {
        fn new(source: FakeSource, transport: FakeTransport) -> Self {
            let dir = TempDir::new().unwrap();
            let source = Arc::new(source);
            let transport = Arc::new(transport);
            let store = Arc::new(MemoryStatusStore::new());
            let (event_tx, events): (UnboundedSender<(String, ProgressEvent)>, _) = unbounded_channel();
            let (handoff_tx, handoffs): (UnboundedSender<TranslationRequest>, _) = unbounded_channel();

            let collab = Collaborators {
                source: source.clone(),
                store: store.clone(),
                sink: Arc::new(event_tx),
                handoff: Arc::new(handoff_tx),
            };
            let fetcher = FetchExecutor::new(transport.clone(), WorkerPool::new(2), Duration::from_secs(5));
            let downloader = Downloader::new(
                collab,
                fetcher,
                MediaLayout::new(dir.path().join("media")),
                Duration::from_secs(600),
            );

            Self {
                _dir: dir,
                downloader,
                source,
                transport,
                store,
                events,
                handoffs,
            }
        }

        /// Drained `(index, status, failed)` triples in publish order.
        fn events(&mut self) -> Vec<(usize, ChapterStatus, bool)> {
            let mut seen = Vec::new();
            while let Ok((_, event)) = self.events.try_recv() {
                for chapter in event.chapters {
                    seen.push((chapter.index, chapter.status, chapter.failed));
                }
            }
            seen
        }

        async fn status(&self, comic_id: &str, index: usize) -> Option<ChapterStatus> {
            self.store
                .get(comic_id, index)
                .await
                .unwrap()
                .map(|record| record.status)
        }
    }

    const DOWNLOAD_0_1: &str = r#"{"task":"download","chapters":[0,1]}"#;

    #[test]
    fn test_parse_request() {
        let req = DownloadRequest::parse("/abc", "tok", r#"{"task":"download_and_translate","chapters":[3,1,3]}"#)
            .unwrap();
        assert_eq!(req.chapters, vec![1, 3]);
        assert!(req.also_translate);
        assert_eq!(req.session_token, "tok");

        assert!(matches!(
            DownloadRequest::parse("/abc", "tok", r#"{"task":"upload","chapters":[1]}"#),
            Err(JobError::UnknownTask(_))
        ));
        assert!(matches!(
            DownloadRequest::parse("/abc", "tok", r#"{"task":"download","chapters":[]}"#),
            Err(JobError::NoChapters)
        ));
        assert!(matches!(
            DownloadRequest::parse("/abc", "tok", "not json"),
            Err(JobError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_two_chapter_download() {
        let mut h = Harness::new(FakeSource::new(&[("/abc", 2)]), FakeTransport::default());

        let started = h.downloader.append("/abc", "tok", DOWNLOAD_0_1).await.unwrap();
        assert_eq!(started, Enqueued::Started);
        h.downloader.wait_idle("/abc").await;

        assert_eq!(
            h.events(),
            vec![
                (0, ChapterStatus::Queued, false),
                (0, ChapterStatus::Downloaded, false),
                (1, ChapterStatus::Queued, false),
                (1, ChapterStatus::Downloaded, false),
            ]
        );
        assert_eq!(h.status("/abc", 0).await, Some(ChapterStatus::Downloaded));
        assert_eq!(h.status("/abc", 1).await, Some(ChapterStatus::Downloaded));

        let layout = h.downloader.layout();
        for index in 0..2 {
            let dir = layout.chapter_dir("/abc", index);
            assert!(dir.join("0.jpg").exists());
            assert!(dir.join("1.jpg").exists());
        }
        assert!(layout.comic_dir("/abc").join("thumbnail.png").exists());
    }

    #[tokio::test]
    async fn test_events_carry_topic_and_progress() {
        let mut h = Harness::new(FakeSource::new(&[("/abc", 2)]), FakeTransport::default());
        h.downloader.append("/abc", "tok", DOWNLOAD_0_1).await.unwrap();
        h.downloader.wait_idle("/abc").await;

        let mut progress = Vec::new();
        while let Ok((topic, event)) = h.events.try_recv() {
            assert_eq!(topic, progress_topic("/abc"));
            assert_eq!(event.kind, "send_progress");
            progress.push(event.progress);
        }
        assert_eq!(progress, vec![0.0, 0.5, 0.5, 1.0]);
    }

    #[tokio::test]
    async fn test_missing_marker_leaves_status_unchanged() {
        let mut source = FakeSource::new(&[("/abc", 2)]);
        source
            .overrides
            .insert(FakeSource::chapter_id("/abc", 0), PageBehavior::MissingMarker);
        let mut h = Harness::new(source, FakeTransport::default());

        h.downloader.append("/abc", "tok", DOWNLOAD_0_1).await.unwrap();
        h.downloader.wait_idle("/abc").await;

        assert_eq!(
            h.events(),
            vec![
                (0, ChapterStatus::Queued, false),
                (0, ChapterStatus::OnSite, true),
                (1, ChapterStatus::Queued, false),
                (1, ChapterStatus::Downloaded, false),
            ]
        );
        assert_eq!(h.status("/abc", 0).await, Some(ChapterStatus::OnSite));
        assert!(!h.downloader.layout().chapter_dir("/abc", 0).exists());
    }

    #[tokio::test]
    async fn test_partial_page_failure_keeps_fetched_pages() {
        let urls: Vec<String> = (0..3).map(|p| format!("https://cdn.test/p/{}.jpg", p)).collect();
        let mut source = FakeSource::new(&[("/abc", 1)]);
        source
            .overrides
            .insert(FakeSource::chapter_id("/abc", 0), PageBehavior::Pages(urls.clone()));
        let mut h = Harness::new(source, FakeTransport::failing_on(&[urls[1].as_str()]));

        h.downloader
            .append("/abc", "tok", r#"{"task":"download","chapters":[0]}"#)
            .await
            .unwrap();
        h.downloader.wait_idle("/abc").await;

        assert_eq!(
            h.events(),
            vec![(0, ChapterStatus::Queued, false), (0, ChapterStatus::OnSite, true)]
        );
        assert_ne!(h.status("/abc", 0).await, Some(ChapterStatus::Downloaded));

        let dir = h.downloader.layout().chapter_dir("/abc", 0);
        assert!(dir.join("0.jpg").exists());
        assert!(!dir.join("1.jpg").exists());
        assert!(dir.join("2.jpg").exists());

        // retry after the page recovers only fetches the missing page
        h.transport.heal();
        let calls_before = h.transport.calls();
        h.downloader
            .append("/abc", "tok", r#"{"task":"download","chapters":[0]}"#)
            .await
            .unwrap();
        h.downloader.wait_idle("/abc").await;

        assert_eq!(h.transport.calls() - calls_before, 1);
        assert_eq!(h.status("/abc", 0).await, Some(ChapterStatus::Downloaded));
    }

    #[tokio::test]
    async fn test_same_title_requests_do_not_interleave() {
        let mut source = FakeSource::new(&[("/abc", 4)]);
        source.delay = Duration::from_millis(10);
        let mut h = Harness::new(source, FakeTransport::default());

        let first = h.downloader.append("/abc", "a", DOWNLOAD_0_1).await.unwrap();
        let second = h
            .downloader
            .append("/abc", "b", r#"{"task":"download","chapters":[2,3]}"#)
            .await
            .unwrap();
        assert_eq!(first, Enqueued::Started);
        assert_eq!(second, Enqueued::Waiting);

        h.downloader.wait_idle("/abc").await;

        let indices: Vec<usize> = h.events().into_iter().map(|(index, _, _)| index).collect();
        assert_eq!(indices, vec![0, 0, 1, 1, 2, 2, 3, 3]);
        assert_eq!(h.source.detail_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_different_titles_run_independently() {
        let gate = Arc::new(Semaphore::new(0));
        let mut source = FakeSource::new(&[("/slow", 1), ("/fast", 1)]);
        source.gate = Some(("/slow".to_string(), gate.clone()));
        let h = Harness::new(source, FakeTransport::default());
        let one = r#"{"task":"download","chapters":[0]}"#;

        h.downloader.append("/slow", "s", one).await.unwrap();
        h.downloader.append("/fast", "f", one).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), h.downloader.wait_idle("/fast"))
            .await
            .expect("fast title blocked by slow title");
        assert!(h.downloader.is_running("/slow").await);
        assert_eq!(h.status("/fast", 0).await, Some(ChapterStatus::Downloaded));

        gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(5), h.downloader.wait_idle("/slow"))
            .await
            .expect("slow title never finished");
        assert_eq!(h.status("/slow", 0).await, Some(ChapterStatus::Downloaded));
    }

    #[tokio::test]
    async fn test_translate_hands_off_downloaded_chapters() {
        let mut source = FakeSource::new(&[("/abc", 3)]);
        source
            .overrides
            .insert(FakeSource::chapter_id("/abc", 1), PageBehavior::MissingMarker);
        let mut h = Harness::new(source, FakeTransport::default());

        h.downloader
            .append("/abc", "tok", r#"{"task":"download_and_translate","chapters":[0,1,2]}"#)
            .await
            .unwrap();
        h.downloader.wait_idle("/abc").await;

        let mut handed = Vec::new();
        while let Ok(request) = h.handoffs.try_recv() {
            assert_eq!(request.comic_id, "/abc");
            handed.push(request.index);
        }
        assert_eq!(handed, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_downloaded_chapter_is_not_refetched() {
        let mut h = Harness::new(FakeSource::new(&[("/abc", 2)]), FakeTransport::default());
        h.store.upsert("/abc", 0, ChapterStatus::Translated).await.unwrap();

        h.downloader.append("/abc", "tok", DOWNLOAD_0_1).await.unwrap();
        h.downloader.wait_idle("/abc").await;

        assert_eq!(h.source.page_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.events()[0], (0, ChapterStatus::Translated, false));
        assert_eq!(h.status("/abc", 0).await, Some(ChapterStatus::Translated));
    }

    #[tokio::test]
    async fn test_unknown_chapter_and_rescrape() {
        let mut h = Harness::new(FakeSource::new(&[("/abc", 2)]), FakeTransport::default());

        h.downloader
            .append("/abc", "tok", r#"{"task":"download","chapters":[0]}"#)
            .await
            .unwrap();
        h.downloader.wait_idle("/abc").await;
        assert_eq!(h.source.detail_calls.load(Ordering::SeqCst), 1);
        h.events();

        // index 5 is not cached, so details are scraped again
        h.downloader
            .append("/abc", "tok", r#"{"task":"download","chapters":[5]}"#)
            .await
            .unwrap();
        h.downloader.wait_idle("/abc").await;

        assert_eq!(h.source.detail_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.events(), vec![(5, ChapterStatus::OnSite, true)]);
    }

    #[tokio::test]
    async fn test_scrape_failure_reports_every_chapter() {
        let mut h = Harness::new(FakeSource::new(&[]), FakeTransport::default());

        h.downloader.append("/missing", "tok", DOWNLOAD_0_1).await.unwrap();
        h.downloader.wait_idle("/missing").await;

        assert_eq!(
            h.events(),
            vec![(0, ChapterStatus::OnSite, true), (1, ChapterStatus::OnSite, true)]
        );
        assert!(!h.downloader.is_running("/missing").await);
    }

    #[tokio::test]
    async fn test_mark_translated() {
        let mut h = Harness::new(FakeSource::new(&[("/abc", 1)]), FakeTransport::default());
        h.store.upsert("/abc", 0, ChapterStatus::Downloaded).await.unwrap();

        h.downloader.mark_translated("/abc", 0, 0.75).await.unwrap();

        assert_eq!(h.status("/abc", 0).await, Some(ChapterStatus::Translated));
        let (topic, event) = h.events.try_recv().unwrap();
        assert_eq!(topic, progress_topic("/abc"));
        assert_eq!(event.progress, 0.75);
        assert_eq!(event.chapters, vec![ChapterProgress::new(0, ChapterStatus::Translated)]);
    }

    #[tokio::test]
    async fn test_mark_translated_rejects_unrecorded_chapter() {
        let mut h = Harness::new(FakeSource::new(&[("/abc", 1)]), FakeTransport::default());

        let err = h.downloader.mark_translated("/abc", 3, 1.0).await.unwrap_err();
        assert!(matches!(err, JobError::UnknownChapter { index: 3, .. }));
        assert_eq!(h.status("/abc", 3).await, None);
        assert!(h.events().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_translated_signal_during_fetch_is_kept() {
        for missing_marker in [false, true] {
            let gate = Arc::new(Semaphore::new(0));
            let mut source = FakeSource::new(&[("/abc", 1)]);
            source.gate = Some(("/abc".to_string(), gate.clone()));
            if missing_marker {
                source
                    .overrides
                    .insert(FakeSource::chapter_id("/abc", 0), PageBehavior::MissingMarker);
            }
            let mut h = Harness::new(source, FakeTransport::default());

            h.downloader
                .append("/abc", "tok", r#"{"task":"download","chapters":[0]}"#)
                .await
                .unwrap();
            tokio::time::timeout(Duration::from_secs(5), async {
                while h.source.page_calls.load(Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("chapter never reached the page list");

            h.downloader.mark_translated("/abc", 0, 1.0).await.unwrap();
            gate.add_permits(1);
            tokio::time::timeout(Duration::from_secs(5), h.downloader.wait_idle("/abc"))
                .await
                .expect("drain never finished");

            assert_eq!(h.status("/abc", 0).await, Some(ChapterStatus::Translated));
            assert_eq!(
                h.events().last().copied(),
                Some((0, ChapterStatus::Translated, missing_marker))
            );
        }
    }

    #[tokio::test]
    async fn test_stale_queued_is_restored_to_on_site() {
        let mut source = FakeSource::new(&[("/abc", 1)]);
        source
            .overrides
            .insert(FakeSource::chapter_id("/abc", 0), PageBehavior::MissingMarker);
        let mut h = Harness::new(source, FakeTransport::default());
        h.store.upsert("/abc", 0, ChapterStatus::Queued).await.unwrap();

        h.downloader
            .append("/abc", "tok", r#"{"task":"download","chapters":[0]}"#)
            .await
            .unwrap();
        h.downloader.wait_idle("/abc").await;

        assert_eq!(h.status("/abc", 0).await, Some(ChapterStatus::OnSite));
        assert_eq!(h.events().last().copied(), Some((0, ChapterStatus::OnSite, true)));
    }

    #[tokio::test]
    async fn test_wait_idle_on_unknown_title_returns() {
        let h = Harness::new(FakeSource::new(&[]), FakeTransport::default());
        h.downloader.wait_idle("/never").await;
    }
}
