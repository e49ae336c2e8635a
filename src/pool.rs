//! Bounded worker pool for fan-out work.
//!
//! Shared by the fetch executor and the multi-title search merge. The pool
//! runs at most `size` futures at once and yields results in input order.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Bounded-concurrency executor.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    /// Creates a pool running at most `size` jobs concurrently (minimum 1).
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `job` for every item and collects the results in input order.
    ///
    /// Completes only once every job has finished.
    pub async fn run<I, T, F, Fut>(&self, items: I, job: F) -> Vec<T>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = T>,
    {
        stream::iter(items)
            .map(job)
            .buffered(self.size)
            .collect()
            .await
    }
}
