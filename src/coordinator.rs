//! Request coalescing on top of [`TimedCache`].
//!
//! A fetch for a key is spawned once and registered before it can settle.
//! Callers arriving while it is in flight wait on the same shared outcome;
//! a success lands in the cache, a failure is handed to every waiter and
//! forgotten.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{cache::TimedCache, cache_keys::in_namespace, error::Error};

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, Arc<Error>>>>;

/// How a single caller's wait ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    /// The caller's token fired first. Not a failure; nothing to report.
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(data) => Some(data),
            Outcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

struct Pending<T> {
    id: u64,
    outcome: SharedOutcome<T>,
    waiters: usize,
    abort: AbortHandle,
}

struct Inner<T> {
    name: &'static str,
    cache: TimedCache<T>,
    pending: Mutex<HashMap<String, Pending<T>>>,
    next_id: AtomicU64,
}

enum Begin<T> {
    Hit(T),
    Wait { id: u64, outcome: SharedOutcome<T> },
}

/// Deduplicating front for one cache namespace.
pub struct RequestCoordinator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RequestCoordinator<T> {
    fn clone(&self) -> Self {
        RequestCoordinator {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        RequestCoordinator {
            inner: Arc::new(Inner {
                name,
                cache: TimedCache::new(ttl),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn cache(&self) -> &TimedCache<T> {
        &self.inner.cache
    }

    /// Number of requests currently in flight.
    pub fn pending_len(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// Returns the cached value for `key`, joins the request already in
    /// flight for it, or starts `fetch_fn`. Failures reach every waiter as
    /// the same `Error::Shared`.
    pub async fn fetch<F, Fut>(
        &self,
        key: &str,
        fetch_fn: F,
    ) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let (id, outcome) = match self.begin(key, fetch_fn) {
            Begin::Hit(data) => return Ok(data),
            Begin::Wait { id, outcome } => (id, outcome),
        };
        let _waiter = Waiter::new(&self.inner, key, id);

        outcome.await.map_err(Error::Shared)
    }

    /// Like [`fetch`](Self::fetch), but stops waiting once `token` fires.
    /// The request keeps running for other waiters; it is aborted only when
    /// this caller was the last one.
    pub async fn fetch_cancellable<F, Fut>(
        &self,
        key: &str,
        fetch_fn: F,
        token: &CancellationToken,
    ) -> Result<Outcome<T>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        if token.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let (id, outcome) = match self.begin(key, fetch_fn) {
            Begin::Hit(data) => return Ok(Outcome::Completed(data)),
            Begin::Wait { id, outcome } => (id, outcome),
        };
        let _waiter = Waiter::new(&self.inner, key, id);

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(cache = self.inner.name, key, "caller cancelled");
                Ok(Outcome::Cancelled)
            },
            result = outcome => {
                result.map(Outcome::Completed).map_err(Error::Shared)
            },
        }
    }

    /// Drops cached values and in-flight registrations under `prefix`.
    /// Requests already running still answer their waiters but no longer
    /// write to the cache. An orphaned request is never aborted, not even
    /// when all of its waiters cancel, and a new call for the same key
    /// starts a second request alongside it.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut pending = self.inner.lock_pending();
        pending.retain(|key, _| !in_namespace(key, prefix));
        let evicted = self.inner.cache.invalidate_prefix(prefix);
        debug!(cache = self.inner.name, prefix, evicted, "invalidated");
    }

    /// Evicts expired entries that were never read again.
    pub fn cleanup_expired(&self) -> usize {
        let evicted = self.inner.cache.cleanup_expired();
        if evicted > 0 {
            debug!(cache = self.inner.name, evicted, "expired entries swept");
        }
        evicted
    }

    /// Forget everything: cached values and in-flight registrations.
    /// Orphaned requests are left to finish, as with `invalidate_prefix`.
    pub fn clear(&self) {
        let mut pending = self.inner.lock_pending();
        pending.clear();
        self.inner.cache.clear();
    }

    fn begin<F, Fut>(&self, key: &str, fetch_fn: F) -> Begin<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let name = self.inner.name;
        let mut pending = self.inner.lock_pending();

        if let Some(data) = self.inner.cache.get(key) {
            debug!(cache = name, key, "cache hit");
            return Begin::Hit(data);
        }

        if let Some(entry) = pending.get_mut(key) {
            entry.waiters += 1;
            debug!(
                cache = name,
                key,
                waiters = entry.waiters,
                "joined in-flight request"
            );
            return Begin::Wait {
                id: entry.id,
                outcome: entry.outcome.clone(),
            };
        }

        debug!(cache = name, key, "cache miss, fetching");
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let request = fetch_fn();

        let handle = tokio::spawn(async move {
            let result = request.await;
            inner.settle(&owned_key, id, &result);
            result.map_err(Arc::new)
        });
        let abort = handle.abort_handle();
        let outcome = handle
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(Arc::new(Error::TokioJoinError(e)))
                })
            })
            .boxed()
            .shared();

        pending.insert(
            key.to_string(),
            Pending {
                id,
                outcome: outcome.clone(),
                waiters: 1,
                abort,
            },
        );

        Begin::Wait { id, outcome }
    }
}

impl<T: Clone> Inner<T> {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, Pending<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, key: &str, id: u64, result: &Result<T, Error>) {
        let mut pending = self.lock_pending();

        if !matches!(pending.get(key), Some(entry) if entry.id == id) {
            debug!(
                cache = self.name,
                key,
                "settled after invalidation, not cached"
            );
            return;
        }
        pending.remove(key);

        match result {
            Ok(data) => self.cache.set(key, data.clone()),
            Err(e) => debug!(
                cache = self.name,
                key,
                error = %e,
                "request failed, not cached"
            ),
        }
    }

    fn leave(&self, key: &str, id: u64) {
        let mut pending = self.lock_pending();

        let Some(entry) = pending.get_mut(key) else {
            return;
        };
        if entry.id != id {
            return;
        }

        entry.waiters = entry.waiters.saturating_sub(1);
        if entry.waiters == 0 {
            entry.abort.abort();
            pending.remove(key);
            debug!(cache = self.name, key, "last waiter left, request aborted");
        }
    }
}

/// Counts one caller against a pending request for as long as it waits.
struct Waiter<'a, T: Clone> {
    inner: &'a Inner<T>,
    key: &'a str,
    id: u64,
}

impl<'a, T: Clone> Waiter<'a, T> {
    fn new(inner: &'a Inner<T>, key: &'a str, id: u64) -> Self {
        Waiter { inner, key, id }
    }
}

impl<T: Clone> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        self.inner.leave(self.key, self.id);
    }
}

impl<T> std::fmt::Debug for RequestCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("name", &self.inner.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32};

    const TTL: Duration = Duration::from_secs(30);

    fn coordinator() -> RequestCoordinator<u32> {
        RequestCoordinator::new("test", TTL)
    }

    fn slow_fetch(
        counter: Arc<AtomicU32>,
        value: u32,
    ) -> impl Future<Output = Result<u32, Error>> + Send + 'static {
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_miss_then_hit() {
        let coordinator = coordinator();

        let fetch_count = Arc::new(AtomicU32::new(0));

        let result = coordinator
            .fetch("key1", || slow_fetch(fetch_count.clone(), 42))
            .await;
        assert_eq!(result.unwrap(), 42);

        let result = coordinator
            .fetch("key1", || slow_fetch(fetch_count.clone(), 43))
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(fetch_count.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_fetch() {
        let coordinator = coordinator();
        let fetch_count = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..10 {
            let coordinator = coordinator.clone();
            let fetch_count = fetch_count.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .fetch("stampede_key", || slow_fetch(fetch_count, 7))
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }

        assert_eq!(fetch_count.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.cache().get("stampede_key"), Some(7));
        assert_eq!(coordinator.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_every_waiter_and_is_not_cached() {
        let coordinator = coordinator();
        let fetch_count = Arc::new(AtomicU32::new(0));

        let failing = |count: Arc<AtomicU32>| {
            move || async move {
                count.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u32, _>(Error::Backend {
                    status: 503,
                    body: "collector offline".to_string(),
                })
            }
        };

        let (a, b) = tokio::join!(
            coordinator.fetch("k", failing(fetch_count.clone())),
            coordinator.fetch("k", failing(fetch_count.clone())),
        );

        let (a, b) = (a.unwrap_err(), b.unwrap_err());
        assert_eq!(
            a.to_string(),
            "Backend responded with 503: collector offline"
        );
        assert_eq!(a.to_string(), b.to_string());
        assert!(matches!(a.root(), Error::Backend { status: 503, .. }));
        assert_eq!(fetch_count.load(Ordering::SeqCst), 1);
        assert!(coordinator.cache().is_empty());
        assert_eq!(coordinator.pending_len(), 0);

        let retried = coordinator
            .fetch("k", || slow_fetch(fetch_count.clone(), 3))
            .await;
        assert_eq!(retried.unwrap(), 3);
        assert_eq!(fetch_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_one_of_two_waiters() {
        let coordinator = coordinator();
        let fetch_count = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let cancelled = {
            let coordinator = coordinator.clone();
            let token = token.clone();
            let fetch_count = fetch_count.clone();
            tokio::spawn(async move {
                coordinator
                    .fetch_cancellable(
                        "k",
                        || slow_fetch(fetch_count, 9),
                        &token,
                    )
                    .await
            })
        };
        let waiting = {
            let coordinator = coordinator.clone();
            let fetch_count = fetch_count.clone();
            tokio::spawn(async move {
                coordinator.fetch("k", || slow_fetch(fetch_count, 9)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        assert_eq!(cancelled.await.unwrap().unwrap(), Outcome::Cancelled);
        assert_eq!(waiting.await.unwrap().unwrap(), 9);
        assert_eq!(fetch_count.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.cache().get("k"), Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sole_waiter_cancel_aborts_request() {
        let coordinator = coordinator();
        let finished = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();

        let task = {
            let coordinator = coordinator.clone();
            let token = token.clone();
            let finished = finished.clone();
            tokio::spawn(async move {
                coordinator
                    .fetch_cancellable(
                        "k",
                        || async move {
                            let delay = Duration::from_millis(100);
                            tokio::time::sleep(delay).await;
                            finished.store(true, Ordering::SeqCst);
                            Ok::<u32, Error>(1)
                        },
                        &token,
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.pending_len(), 1);
        token.cancel();

        assert!(task.await.unwrap().unwrap().is_cancelled());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(coordinator.pending_len(), 0);
        assert!(coordinator.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_token_skips_fetch() {
        let coordinator = coordinator();
        let fetch_count = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = coordinator
            .fetch_cancellable(
                "k",
                || slow_fetch(fetch_count.clone(), 1),
                &token,
            )
            .await
            .unwrap();

        assert!(outcome.is_cancelled());
        assert_eq!(fetch_count.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_pending_and_late_result() {
        let coordinator = coordinator();
        let fetch_count = Arc::new(AtomicU32::new(0));

        let task = {
            let coordinator = coordinator.clone();
            let fetch_count = fetch_count.clone();
            tokio::spawn(async move {
                coordinator.fetch("k", || slow_fetch(fetch_count, 5)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        coordinator.clear();
        assert_eq!(coordinator.pending_len(), 0);
        coordinator.clear();
        assert_eq!(coordinator.pending_len(), 0);

        // the running request still answers its waiter
        assert_eq!(task.await.unwrap().unwrap(), 5);
        assert!(coordinator.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_prefix_forces_refetch() {
        let coordinator = coordinator();
        let fetch_count = Arc::new(AtomicU32::new(0));

        for key in ["farmers/7/sensors/dashboard?range=24h", "farmers/70"] {
            coordinator
                .fetch(key, || slow_fetch(fetch_count.clone(), 1))
                .await
                .unwrap();
        }
        coordinator.invalidate_prefix("farmers/7");

        assert_eq!(coordinator.cache().get("farmers/70"), Some(1));
        coordinator
            .fetch("farmers/7/sensors/dashboard?range=24h", || {
                slow_fetch(fetch_count.clone(), 2)
            })
            .await
            .unwrap();
        assert_eq!(fetch_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidated_request_is_not_aborted() {
        let coordinator = coordinator();
        let fetch_count = Arc::new(AtomicU32::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();

        let orphan = {
            let coordinator = coordinator.clone();
            let token = token.clone();
            let finished = finished.clone();
            tokio::spawn(async move {
                let request = || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok::<u32, Error>(1)
                };
                coordinator.fetch_cancellable("k", request, &token).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        coordinator.invalidate_prefix("k");
        token.cancel();
        assert!(orphan.await.unwrap().unwrap().is_cancelled());

        let fresh = coordinator
            .fetch("k", || slow_fetch(fetch_count.clone(), 2))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fresh, 2);
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(fetch_count.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.cache().get("k"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired_sweeps_unread_keys() {
        let coordinator = coordinator();
        let fetch_count = Arc::new(AtomicU32::new(0));

        for key in ["a", "b"] {
            coordinator
                .fetch(key, || slow_fetch(fetch_count.clone(), 1))
                .await
                .unwrap();
        }
        assert_eq!(coordinator.cleanup_expired(), 0);

        tokio::time::advance(TTL).await;

        assert_eq!(coordinator.cleanup_expired(), 2);
        assert!(coordinator.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_refetched() {
        let coordinator = coordinator();
        let fetch_count = Arc::new(AtomicU32::new(0));

        coordinator
            .fetch("k", || slow_fetch(fetch_count.clone(), 1))
            .await
            .unwrap();
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        let value = coordinator
            .fetch("k", || slow_fetch(fetch_count.clone(), 2))
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(fetch_count.load(Ordering::SeqCst), 2);
    }
}
