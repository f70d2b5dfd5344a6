//! A keyed cache that runs each computation at most once at a time.
//!
//! Every key maps to a slot holding a shared future. The computation behind
//! it runs as its own tokio task, so it finishes even when every caller
//! stops waiting. Callers that arrive while it runs await the same result.
//!
//! Completed slots are reused according to the value they hold: final values
//! until invalidated, other values for at most the in-progress TTL. Failed
//! computations are dropped as soon as they resolve.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::{Result, StageViewError};
use crate::utils::Clock;

/// A value whose cache lifetime depends on whether it can still change.
pub trait CacheValue: Send + Sync + 'static {
    /// Returns true if the value will never change again.
    fn is_final(&self) -> bool;
}

/// Counters of a cache, as a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Lookups served from a completed entry.
    pub hits: u64,
    /// Lookups that joined a computation already in flight.
    pub joins: u64,
    /// Computations started.
    pub computations: u64,
    /// Computations that ended in an error.
    pub failures: u64,
    /// Invalidation calls.
    pub invalidations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    joins: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

type Flight<V> = Shared<BoxFuture<'static, Result<Arc<V>>>>;

#[derive(Debug, Clone, Copy)]
struct Completion {
    at_millis: i64,
    ok: bool,
    is_final: bool,
}

struct Slot<V> {
    id: u64,
    flight: Flight<V>,
    completion: Arc<Mutex<Option<Completion>>>,
}

enum Freshness {
    Pending,
    Fresh,
    Stale,
}

/// Single-flight cache from `K` to shared `V`.
pub struct SingleFlightCache<K, V> {
    name: &'static str,
    entries: DashMap<K, Slot<V>>,
    next_id: AtomicU64,
    in_progress_ttl_millis: i64,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl<K: Eq + Hash, V> fmt::Debug for SingleFlightCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlightCache")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("in_progress_ttl_millis", &self.in_progress_ttl_millis)
            .field("stats", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: CacheValue,
{
    /// Creates an empty cache. `name` labels its log lines.
    #[must_use]
    pub fn new(name: &'static str, in_progress_ttl_millis: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
            in_progress_ttl_millis: i64::try_from(in_progress_ttl_millis).unwrap_or(i64::MAX),
            clock,
            counters: Counters::default(),
        }
    }

    /// Label used in log lines.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the cached value for `key`, or computes it.
    ///
    /// At most one computation per key runs at a time. `compute` is only
    /// called when no usable entry exists.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (id, flight) = self.join_or_start(&key, compute);
        let result = flight.await;
        self.settle(&key, id, &result);
        result
    }

    fn join_or_start<F, Fut>(&self, key: &K, compute: F) -> (u64, Flight<V>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get();
                match self.freshness(slot) {
                    Freshness::Pending => {
                        Counters::bump(&self.counters.joins);
                        debug!(cache = self.name, key = %key, "Joining computation in flight");
                        return (slot.id, slot.flight.clone());
                    }
                    Freshness::Fresh => {
                        Counters::bump(&self.counters.hits);
                        debug!(cache = self.name, key = %key, "Cache hit");
                        return (slot.id, slot.flight.clone());
                    }
                    Freshness::Stale => {}
                }
                let slot = self.start(key, compute);
                let handle = (slot.id, slot.flight.clone());
                occupied.insert(slot);
                handle
            }
            Entry::Vacant(vacant) => {
                let slot = self.start(key, compute);
                let handle = (slot.id, slot.flight.clone());
                vacant.insert(slot);
                handle
            }
        }
    }

    fn freshness(&self, slot: &Slot<V>) -> Freshness {
        match *slot.completion.lock() {
            None => Freshness::Pending,
            Some(c) if !c.ok => Freshness::Stale,
            Some(c) if c.is_final => Freshness::Fresh,
            Some(c)
                if self.clock.now_millis().saturating_sub(c.at_millis)
                    < self.in_progress_ttl_millis =>
            {
                Freshness::Fresh
            }
            Some(_) => Freshness::Stale,
        }
    }

    fn start<F, Fut>(&self, key: &K, compute: F) -> Slot<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Counters::bump(&self.counters.computations);
        debug!(cache = self.name, key = %key, "Starting computation");

        let completion = Arc::new(Mutex::new(None));
        let done = Arc::clone(&completion);
        let clock = Arc::clone(&self.clock);
        let work = compute();
        let task = tokio::spawn(async move {
            let result = work.await.map(Arc::new);
            *done.lock() = Some(Completion {
                at_millis: clock.now_millis(),
                ok: result.is_ok(),
                is_final: result.as_ref().is_ok_and(|v| v.is_final()),
            });
            result
        });

        let flight: Flight<V> = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(StageViewError::from(err)),
            }
        }
        .boxed()
        .shared();

        Slot {
            id,
            flight,
            completion,
        }
    }

    /// Drops the slot of a finished flight when it must not be reused.
    fn settle(&self, key: &K, id: u64, result: &Result<Arc<V>>) {
        let discard = match result {
            Err(_) => true,
            Ok(value) => !value.is_final() && self.in_progress_ttl_millis <= 0,
        };
        if !discard {
            return;
        }

        let removed = self.entries.remove_if(key, |_, slot| slot.id == id);
        if removed.is_some() {
            if let Err(err) = result {
                Counters::bump(&self.counters.failures);
                debug!(cache = self.name, key = %key, error = %err, "Computation failed, not cached");
            }
        }
    }

    /// Drops the entry for `key`. Returns true if one existed.
    ///
    /// Waiters of a computation already in flight still receive its result,
    /// but later lookups start afresh.
    pub fn invalidate(&self, key: &K) -> bool {
        Counters::bump(&self.counters.invalidations);
        let removed = self.entries.remove(key).is_some();
        if removed {
            info!(cache = self.name, key = %key, "Cache entry invalidated");
        }
        removed
    }

    /// Drops every entry and returns how many there were.
    pub fn invalidate_all(&self) -> usize {
        Counters::bump(&self.counters.invalidations);
        let count = self.entries.len();
        self.entries.clear();
        info!(cache = self.name, entries = count, "Cache cleared");
        count
    }

    /// Returns true if an entry for `key` exists, in flight or completed.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Debug, PartialEq, Eq)]
    struct Snapshot {
        value: usize,
        done: bool,
    }

    impl CacheValue for Snapshot {
        fn is_final(&self) -> bool {
            self.done
        }
    }

    fn cache(ttl: u64, clock: Arc<ManualClock>) -> SingleFlightCache<String, Snapshot> {
        SingleFlightCache::new("test", ttl, clock)
    }

    fn counting(
        calls: &Arc<AtomicUsize>,
        done: bool,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Snapshot>> {
        let calls = Arc::clone(calls);
        move || {
            async move {
                let value = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Snapshot { value, done })
            }
            .boxed()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = Arc::new(cache(0, Arc::new(ManualClock::new(0))));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("k".to_string(), move || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Snapshot {
                            value: 7,
                            done: true,
                        })
                    })
                    .await
            }));
        }

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
        let stats = cache.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.joins + stats.hits, 15);
    }

    #[tokio::test]
    async fn test_final_values_stay_until_invalidated() {
        let cache = cache(0, Arc::new(ManualClock::new(0)));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_compute("k".into(), counting(&calls, true))
            .await
            .unwrap();
        let second = cache
            .get_or_compute("k".into(), counting(&calls, true))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().hits, 1);

        assert!(cache.invalidate(&"k".to_string()));
        let third = cache
            .get_or_compute("k".into(), counting(&calls, true))
            .await
            .unwrap();
        assert_eq!(third.value, 2);
        assert!(!cache.invalidate(&"missing".to_string()));
    }

    #[tokio::test]
    async fn test_non_final_values_are_not_reused_without_ttl() {
        let cache = cache(0, Arc::new(ManualClock::new(0)));
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_compute("k".into(), counting(&calls, false))
            .await
            .unwrap();
        assert!(cache.is_empty());
        let second = cache
            .get_or_compute("k".into(), counting(&calls, false))
            .await
            .unwrap();

        assert_eq!((first.value, second.value), (1, 2));
    }

    #[tokio::test]
    async fn test_non_final_values_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = cache(500, Arc::clone(&clock));
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_compute("k".into(), counting(&calls, false))
            .await
            .unwrap();
        clock.advance(499);
        let reused = cache
            .get_or_compute("k".into(), counting(&calls, false))
            .await
            .unwrap();
        assert_eq!(reused.value, 1);

        clock.advance(1);
        let fresh = cache
            .get_or_compute("k".into(), counting(&calls, false))
            .await
            .unwrap();
        assert_eq!(fresh.value, 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = cache(0, Arc::new(ManualClock::new(0)));
        let calls = Arc::new(AtomicUsize::new(0));

        let err = cache
            .get_or_compute("k".into(), || async {
                Err::<Snapshot, _>(StageViewError::Source("down".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err, StageViewError::Source("down".into()));
        assert!(!cache.contains_key(&"k".to_string()));
        assert_eq!(cache.stats().failures, 1);

        let value = cache
            .get_or_compute("k".into(), counting(&calls, true))
            .await
            .unwrap();
        assert_eq!(value.value, 1);
    }

    #[tokio::test]
    async fn test_panicking_computation_surfaces_as_internal_error() {
        let cache = cache(0, Arc::new(ManualClock::new(0)));
        let err = cache
            .get_or_compute("k".into(), || async {
                if true {
                    panic!("walk exploded");
                }
                Ok(Snapshot {
                    value: 0,
                    done: true,
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StageViewError::Internal(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_stays_pending_until_computation_finishes() {
        let cache = Arc::new(cache(0, Arc::new(ManualClock::new(0))));
        let gate = Arc::new(Notify::new());

        let release = Arc::clone(&gate);
        let mut waiter = tokio_test::task::spawn(cache.get_or_compute("k".into(), move || {
            async move {
                release.notified().await;
                Ok(Snapshot {
                    value: 1,
                    done: true,
                })
            }
        }));
        tokio_test::assert_pending!(waiter.poll());
        assert!(cache.contains_key(&"k".to_string()));

        gate.notify_one();
        let value = waiter.await.unwrap();
        assert_eq!(value.value, 1);
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_cancel_computation() {
        let cache = Arc::new(cache(0, Arc::new(ManualClock::new(0))));
        let calls = Arc::new(AtomicUsize::new(0));

        let slow_calls = Arc::clone(&calls);
        let slow = cache.get_or_compute("k".into(), move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            slow_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Snapshot {
                value: 1,
                done: true,
            })
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(5), slow).await;
        assert!(timed_out.is_err());

        let value = cache
            .get_or_compute("k".into(), counting(&calls, true))
            .await
            .unwrap();
        assert_eq!(value.value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().computations, 1);
    }

    fn gated(
        gate: &Arc<Notify>,
        value: usize,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Snapshot>> {
        let gate = Arc::clone(gate);
        move || {
            async move {
                gate.notified().await;
                Ok(Snapshot { value, done: true })
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_invalidate_during_computation_starts_fresh() {
        let cache = Arc::new(cache(0, Arc::new(ManualClock::new(0))));
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut stale =
            tokio_test::task::spawn(cache.get_or_compute("k".into(), gated(&gate, 100)));
        tokio_test::assert_pending!(stale.poll());

        assert!(cache.invalidate(&"k".to_string()));
        let fresh = cache
            .get_or_compute("k".into(), counting(&calls, true))
            .await
            .unwrap();
        assert_eq!(fresh.value, 1);

        gate.notify_one();
        assert_eq!(stale.await.unwrap().value, 100);

        // The older computation finishing does not displace the fresh entry.
        let again = cache
            .get_or_compute("k".into(), counting(&calls, true))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&again, &fresh));
        assert_eq!(cache.stats().computations, 2);
    }

    #[tokio::test]
    async fn test_invalidate_all_during_computation_starts_fresh() {
        let cache = Arc::new(cache(0, Arc::new(ManualClock::new(0))));
        let old_gate = Arc::new(Notify::new());
        let new_gate = Arc::new(Notify::new());

        let mut stale =
            tokio_test::task::spawn(cache.get_or_compute("k".into(), gated(&old_gate, 100)));
        tokio_test::assert_pending!(stale.poll());

        assert_eq!(cache.invalidate_all(), 1);
        let mut fresh =
            tokio_test::task::spawn(cache.get_or_compute("k".into(), gated(&new_gate, 200)));
        tokio_test::assert_pending!(fresh.poll());

        new_gate.notify_one();
        old_gate.notify_one();
        assert_eq!(fresh.await.unwrap().value, 200);
        assert_eq!(stale.await.unwrap().value, 100);
        assert_eq!(cache.stats().computations, 2);
        assert_eq!(cache.stats().joins, 0);
    }

    #[tokio::test]
    async fn test_invalidate_all_forces_fresh_values() {
        let cache = cache(0, Arc::new(ManualClock::new(0)));
        let calls = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            cache
                .get_or_compute(key.into(), counting(&calls, true))
                .await
                .unwrap();
        }
        assert_eq!(cache.invalidate_all(), 2);
        assert!(cache.is_empty());

        let value = cache
            .get_or_compute("a".into(), counting(&calls, true))
            .await
            .unwrap();
        assert_eq!(value.value, 3);
        assert_eq!(cache.stats().invalidations, 1);
    }
}
