//! Results that may be followed by a background refresh, and the tracker
//! that lets a host wait for those refreshes before it exits.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{self, BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

/// Where the returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The local database; a background refresh may be running.
    Local,
    /// A network fetch made while the caller waited.
    Network,
    /// Neither store nor network had anything; synthetic stand-in data.
    Placeholder,
}

/// A spawned refresh that any number of parties can await.
pub(crate) type Refresh = Shared<BoxFuture<'static, ()>>;

/// Background refreshes started on behalf of callers.
///
/// Refresh tasks outlive the call that started them. A short-lived host
/// calls [`Refreshes::drain`] before returning so no refresh is cut off
/// while it rewrites the store. Clones share one tracker.
#[derive(Clone, Default)]
pub struct Refreshes {
    pending: Arc<Mutex<Vec<Refresh>>>,
}

impl Refreshes {
    fn lock(&self) -> MutexGuard<'_, Vec<Refresh>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `task` on the runtime and track it.
    pub(crate) fn spawn<F>(&self, task: F) -> Refresh
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let refresh = async move {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background refresh task failed");
            }
        }
        .boxed()
        .shared();

        let mut pending = self.lock();
        pending.retain(|r| r.peek().is_none());
        pending.push(refresh.clone());
        refresh
    }

    /// Number of refreshes not known to be finished.
    pub fn pending(&self) -> usize {
        self.lock().iter().filter(|r| r.peek().is_none()).count()
    }

    /// Wait until every tracked refresh, including ones started meanwhile,
    /// has finished.
    pub async fn drain(&self) {
        loop {
            let batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return;
            }
            debug!(count = batch.len(), "Waiting for background refreshes");
            future::join_all(batch).await;
        }
    }
}

/// Data handed back to a caller, plus the refresh it triggered, if any.
///
/// `data` is an owned snapshot: a refresh rewriting the store afterwards
/// never changes it. Dropping a `Fetched` leaves the refresh running; it is
/// still tracked by the [`Refreshes`] that spawned it.
pub struct Fetched<T> {
    pub data: T,
    pub source: Source,
    refresh: Option<Refresh>,
}

impl<T: fmt::Debug> fmt::Debug for Fetched<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetched")
            .field("data", &self.data)
            .field("source", &self.source)
            .field("refreshing", &self.refresh.is_some())
            .finish()
    }
}

impl<T> Fetched<T> {
    pub(crate) fn local(data: T, refresh: Refresh) -> Self {
        Self {
            data,
            source: Source::Local,
            refresh: Some(refresh),
        }
    }

    pub(crate) fn network(data: T) -> Self {
        Self {
            data,
            source: Source::Network,
            refresh: None,
        }
    }

    pub(crate) fn placeholder(data: T) -> Self {
        Self {
            data,
            source: Source::Placeholder,
            refresh: None,
        }
    }

    /// The data, leaving any refresh to run on its own.
    pub fn into_data(self) -> T {
        self.data
    }

    /// Wait for the background refresh (if any) to finish, then return the
    /// snapshot that was originally handed back.
    pub async fn settle(self) -> T {
        if let Some(refresh) = self.refresh {
            refresh.await;
        }
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_waits_for_detached_refreshes() {
        let refreshes = Refreshes::default();
        let done = Arc::new(AtomicUsize::new(0));

        for delay in [30, 10] {
            let done = done.clone();
            let fetched = Fetched::local(
                delay,
                refreshes.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                }),
            );
            // Caller keeps only the data.
            let _ = fetched.into_data();
        }

        refreshes.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(refreshes.pending(), 0);
    }

    #[tokio::test]
    async fn test_settle_and_drain_share_one_refresh() {
        let refreshes = Refreshes::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let fetched = Fetched::local(
            "snapshot",
            refreshes.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(fetched.settle().await, "snapshot");
        refreshes.drain().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
