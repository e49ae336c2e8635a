//! Concurrent resource fetching to disk.
//!
//! Each target is written to `<destination>.part` and renamed into place
//! only after the transfer completes, so an interrupted fetch never leaves
//! a file that looks complete. Existing destinations are skipped.

use crate::client::Transport;
use crate::error::FetchError;
use crate::pool::WorkerPool;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One resource to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub destination: PathBuf,
    pub url: String,
}

impl FetchTarget {
    pub fn new(destination: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            url: url.into(),
        }
    }
}

/// Result of a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Downloaded in this run; carries the byte count.
    Fetched(u64),
    /// Destination already existed; nothing was requested.
    AlreadyPresent,
    /// Transfer failed; carries the reason.
    Failed(String),
}

impl FetchOutcome {
    /// Returns true if the destination is on disk after the run.
    pub fn is_satisfied(&self) -> bool {
        !matches!(self, FetchOutcome::Failed(_))
    }
}

/// Per-destination outcomes of a [`FetchExecutor::fetch_many`] run.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    outcomes: BTreeMap<PathBuf, FetchOutcome>,
}

impl FetchReport {
    pub fn get(&self, destination: &Path) -> Option<&FetchOutcome> {
        self.outcomes.get(destination)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Returns true if every target is on disk.
    pub fn is_complete(&self) -> bool {
        self.outcomes.values().all(FetchOutcome::is_satisfied)
    }

    /// Destinations whose transfer failed.
    pub fn failed(&self) -> Vec<&Path> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_satisfied())
            .map(|(path, _)| path.as_path())
            .collect()
    }

    /// Number of targets downloaded in this run.
    pub fn fetched_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| matches!(outcome, FetchOutcome::Fetched(_)))
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &FetchOutcome)> {
        self.outcomes.iter().map(|(path, outcome)| (path.as_path(), outcome))
    }
}

/// Downloads resources through a bounded worker pool.
#[derive(Clone)]
pub struct FetchExecutor {
    transport: Arc<dyn Transport>,
    pool: WorkerPool,
    timeout: Duration,
}

impl FetchExecutor {
    pub fn new(transport: Arc<dyn Transport>, pool: WorkerPool, timeout: Duration) -> Self {
        Self {
            transport,
            pool,
            timeout,
        }
    }

    /// Fetches every target, isolating failures per target.
    ///
    /// Returns once all targets have resolved.
    pub async fn fetch_many(&self, targets: Vec<FetchTarget>) -> FetchReport {
        let results = self
            .pool
            .run(targets, |target| async move {
                let outcome = match self.fetch_one(&target).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(url = %target.url, error = %e, "fetch failed");
                        FetchOutcome::Failed(e.to_string())
                    }
                };
                (target.destination, outcome)
            })
            .await;

        FetchReport {
            outcomes: results.into_iter().collect(),
        }
    }

    /// Fetches a single target.
    pub async fn fetch_one(&self, target: &FetchTarget) -> Result<FetchOutcome, FetchError> {
        if tokio::fs::try_exists(&target.destination).await? {
            return Ok(FetchOutcome::AlreadyPresent);
        }

        if let Some(parent) = target.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = partial_path(&target.destination);
        let written = match self.transfer(&target.url, &partial).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &target.destination).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        tracing::debug!(url = %target.url, bytes = written, "fetched");
        Ok(FetchOutcome::Fetched(written))
    }

    async fn transfer(&self, url: &str, partial: &Path) -> Result<u64, FetchError> {
        let mut file = tokio::fs::File::create(partial).await?;
        tokio::time::timeout(self.timeout, self.transport.download(url, &mut file))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
    }
}

/// Temporary sibling used while a destination is being written.
fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}
