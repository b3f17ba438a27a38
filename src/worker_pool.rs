//! Bounded pool for the CPU-bound clustering work (component of spec.md
//! §5's concurrency model): caps how many clustering computations run at
//! once regardless of how many requests or precompute tasks fan out,
//! keeping the async runtime's executor threads free while the blocking
//! work happens on tokio's blocking pool.

use std::sync::Arc;

use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits.max(1))),
        }
    }

    /// Runs `f` on the blocking thread pool once a permit is free. The
    /// permit is held for the task's lifetime and released when it
    /// completes or panics.
    pub async fn run<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore is never closed");

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .expect("clustering task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_work_and_returns_result() {
        let pool = WorkerPool::new(4);
        let result = pool.run(|| 2 + 2).await;
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn caps_concurrency_at_configured_permits() {
        let pool = WorkerPool::new(2);
        let inflight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let inflight = inflight.clone();
            let max_observed = max_observed.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let current = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(current, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    inflight.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }
}
