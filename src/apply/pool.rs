//! Bounded fan-out over independent units of work.
//!
//! Each batch runs at most `limit` units at a time and keys its results by
//! identity, so callers never depend on completion order. Two variants
//! exist: [`WorkerPool::collect_all`] lets every unit finish and reports
//! each outcome, [`WorkerPool::fail_fast`] stops at the first error.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ApplyError, Result};

/// Default number of concurrent units per batch.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Outcome of a collect-all batch.
#[derive(Debug)]
pub struct Batch<T> {
    /// Result per identity.
    pub results: BTreeMap<String, Result<T>>,
    /// Whether the batch was cancelled before it drained.
    pub cancelled: bool,
}

impl<T> Batch<T> {
    /// Number of failed units.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.values().filter(|r| r.is_err()).count()
    }
}

/// Bounded worker pool for one phase.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    limit: usize,
    cancel: CancellationToken,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY, CancellationToken::new())
    }
}

impl WorkerPool {
    /// Creates a pool running at most `limit` units at once.
    #[must_use]
    pub fn new(limit: usize, cancel: CancellationToken) -> Self {
        Self {
            limit: limit.max(1),
            cancel,
        }
    }

    /// Concurrency limit.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Token cancelling every batch of this pool.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs every unit and collects each result.
    ///
    /// A failing unit does not affect its siblings. Units still running or
    /// not yet started when the pool is cancelled report
    /// [`ApplyError::Cancelled`].
    pub async fn collect_all<T, Fut>(&self, units: impl IntoIterator<Item = (String, Fut)>) -> Batch<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let units: Vec<_> = units
            .into_iter()
            .map(|(identity, unit)| {
                let cancel = self.cancel.clone();
                async move {
                    let result = tokio::select! {
                        biased;
                        () = cancel.cancelled() => Err(ApplyError::Cancelled.into()),
                        result = unit => result,
                    };
                    (identity, result)
                }
            })
            .collect();
        let results = stream::iter(units)
        .buffer_unordered(self.limit)
        .collect::<BTreeMap<_, _>>()
        .await;

        let batch = Batch {
            results,
            cancelled: self.cancel.is_cancelled(),
        };
        debug!(
            "Batch drained: {} units, {} failed, cancelled: {}",
            batch.results.len(),
            batch.failed(),
            batch.cancelled
        );
        batch
    }

    /// Runs units until the first failure.
    ///
    /// In-flight siblings are cancelled and units not yet started never run.
    ///
    /// # Errors
    ///
    /// Returns the first error any unit produced, or
    /// [`ApplyError::Cancelled`] when the pool itself is cancelled.
    pub async fn fail_fast<T, Fut>(
        &self,
        units: impl IntoIterator<Item = (String, Fut)>,
    ) -> Result<BTreeMap<String, T>>
    where
        Fut: Future<Output = Result<T>>,
    {
        let group = self.cancel.child_token();
        let mut stream = stream::iter(units.into_iter().map(|(identity, unit)| {
            let cancel = group.clone();
            async move {
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(ApplyError::Cancelled.into()),
                    result = unit => result,
                };
                (identity, result)
            }
        }))
        .buffer_unordered(self.limit);

        let mut results = BTreeMap::new();
        while let Some((identity, result)) = stream.next().await {
            match result {
                Ok(value) => {
                    results.insert(identity, value);
                }
                Err(e) => {
                    debug!("{identity} failed, cancelling the rest of the batch");
                    group.cancel();
                    return Err(e);
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeckhandError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fail(identity: &str) -> DeckhandError {
        ApplyError::ResourceFailed {
            identity: identity.to_string(),
            reason: String::from("boom"),
        }
        .into()
    }

    #[tokio::test]
    async fn test_collect_all_keeps_siblings_running() {
        let pool = WorkerPool::new(2, CancellationToken::new());
        let batch = pool
            .collect_all((0..5).map(|i| {
                let identity = format!("jobs.j{i}");
                let unit_id = identity.clone();
                (identity, async move {
                    if i == 1 { Err(fail(&unit_id)) } else { Ok(i) }
                })
            }))
            .await;

        assert_eq!(batch.results.len(), 5);
        assert_eq!(batch.failed(), 1);
        assert!(batch.results["jobs.j1"].is_err());
        assert_eq!(batch.results["jobs.j4"].as_ref().ok(), Some(&4));
        assert!(!batch.cancelled);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(3, CancellationToken::new());

        let batch = pool
            .collect_all((0..12).map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                (format!("apps.a{i:02}"), async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            }))
            .await;

        assert_eq!(batch.failed(), 0);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_error() {
        let started = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(1, CancellationToken::new());

        let result = pool
            .fail_fast((0..4).map(|i| {
                let started = Arc::clone(&started);
                (format!("jobs.j{i}"), async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if i == 1 { Err(fail("jobs.j1")) } else { Ok(()) }
                })
            }))
            .await;

        assert!(matches!(
            result,
            Err(DeckhandError::Apply(ApplyError::ResourceFailed { .. }))
        ));
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_pool_reports_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pool = WorkerPool::new(4, cancel);

        let batch = pool
            .collect_all([(String::from("jobs.a"), async { Ok(1) })])
            .await;
        assert!(batch.cancelled);
        assert!(matches!(
            batch.results["jobs.a"],
            Err(DeckhandError::Apply(ApplyError::Cancelled))
        ));
    }
}
