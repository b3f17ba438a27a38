//! Process-local request deduplication: concurrent callers asking for the
//! same key while a computation is already underway all await the single
//! in-flight result rather than recomputing it (spec.md §5's singleflight
//! requirement for tile computation under a cache miss).
//!
//! This is purely in-process — it does not coordinate across machines,
//! that's what the Redis lease in [`crate::cache`] is for — grounded on the
//! teacher's preference for `dashmap` as the concurrent map of choice (it
//! appears, unused, in the teacher's own `Cargo.toml`) paired with a
//! `tokio::sync::watch` channel per in-flight key.

use std::future::Future;
use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

pub struct SingleFlight<K, V> {
    inflight: DashMap<K, watch::Receiver<Option<V>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` for `key` if no computation for it is already in flight;
    /// otherwise awaits the in-flight result. `f` is only ever invoked by
    /// whichever caller first observes the key as absent.
    pub async fn work<F, Fut>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let (is_leader, mut rx, tx) = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => (false, entry.get().clone(), None),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx.clone());
                (true, rx, Some(tx))
            }
        };

        if is_leader {
            let value = f().await;
            self.inflight.remove(&key);
            if let Some(tx) = tx {
                let _ = tx.send(Some(value.clone()));
            }
            return value;
        }

        loop {
            if let Some(value) = rx.borrow().clone() {
                return value;
            }
            if rx.changed().await.is_err() {
                // The leader's sender was dropped without completing
                // (panicked mid-computation); fall back to computing it
                // ourselves rather than hanging forever.
                return f().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_for_same_key_share_one_computation() {
        let sf: Arc<SingleFlight<u32, u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let sf = sf.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                sf.work(1, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    42
                })
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_each_compute() {
        let sf: SingleFlight<u32, u32> = SingleFlight::new();
        assert_eq!(sf.work(1, || async { 10 }).await, 10);
        assert_eq!(sf.work(2, || async { 20 }).await, 20);
    }

    #[tokio::test]
    async fn key_can_be_recomputed_after_completion() {
        let sf: SingleFlight<u32, u32> = SingleFlight::new();
        assert_eq!(sf.work(1, || async { 1 }).await, 1);
        assert_eq!(sf.work(1, || async { 2 }).await, 2);
    }
}
