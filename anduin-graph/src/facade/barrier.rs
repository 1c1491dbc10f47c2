//! # Hot-swap barrier
//!
//! Coordinates dataset writers and in-flight queries over one shared
//! region. The protocol is the classic two-mutex dance: a query briefly
//! takes the pending-update lock, then the query lock to bump the running
//! counter, then releases the pending lock. A writer holds the pending lock
//! for the whole flip and waits on the condition variable until the counter
//! drains to zero. A writer therefore never starves (new queries block on
//! the pending lock), and never flips under a running query.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};

pub struct SwapBarrier {
    pending_update: Mutex<()>,
    query_count: Mutex<u32>,
    no_running_queries: Condvar,
}

/// Held by a query for its full duration; dropping it decrements the
/// running-query counter and wakes any waiting writer.
pub struct QueryGuard<'a> {
    barrier: &'a SwapBarrier,
}

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        let mut count = self
            .barrier
            .query_count
            .lock()
            .expect("poisoned query count");
        *count -= 1;
        if *count == 0 {
            self.barrier.no_running_queries.notify_all();
        }
    }
}

/// Held by a writer across the generation flip. While it exists, no query
/// can enter and none are running.
pub struct UpdateGuard<'a> {
    _pending: MutexGuard<'a, ()>,
    _query_count: MutexGuard<'a, u32>,
}

impl SwapBarrier {
    fn new() -> Self {
        Self {
            pending_update: Mutex::new(()),
            query_count: Mutex::new(0),
            no_running_queries: Condvar::new(),
        }
    }

    /// The process-wide barrier for a region path. Explicit singleton
    /// registry; the same path always yields the same barrier.
    pub fn for_region(path: &Path) -> Arc<SwapBarrier> {
        static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<SwapBarrier>>>> = OnceLock::new();
        let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
        let mut map = registry.lock().expect("poisoned barrier registry");
        Arc::clone(
            map.entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(SwapBarrier::new())),
        )
    }

    /// Registers a running query. Blocks only while a writer is mid-flip.
    pub fn begin_query(&self) -> QueryGuard<'_> {
        let pending = self.pending_update.lock().expect("poisoned pending lock");
        {
            let mut count = self.query_count.lock().expect("poisoned query count");
            *count += 1;
        }
        drop(pending);
        QueryGuard { barrier: self }
    }

    /// Blocks new queries and waits for running ones to finish. The flip
    /// itself must happen while the returned guard is held; preparation of
    /// the new generation must happen before calling this.
    pub fn lock_for_update(&self) -> UpdateGuard<'_> {
        let pending = self.pending_update.lock().expect("poisoned pending lock");
        let mut count = self.query_count.lock().expect("poisoned query count");
        while *count > 0 {
            count = self
                .no_running_queries
                .wait(count)
                .expect("poisoned query count");
        }
        UpdateGuard {
            _pending: pending,
            _query_count: count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn registry_returns_the_same_barrier_per_path() {
        let a = SwapBarrier::for_region(Path::new("/tmp/region-a"));
        let b = SwapBarrier::for_region(Path::new("/tmp/region-a"));
        let c = SwapBarrier::for_region(Path::new("/tmp/region-b"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn writer_waits_for_queries_and_queries_wait_for_writer() {
        let barrier = Arc::new(SwapBarrier::new());
        let generation = Arc::new(AtomicU32::new(0));

        let observed_mid_query_flip = Arc::new(AtomicU32::new(0));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let barrier = Arc::clone(&barrier);
                let generation = Arc::clone(&generation);
                let observed = Arc::clone(&observed_mid_query_flip);
                scope.spawn(move || {
                    for _ in 0..200 {
                        let guard = barrier.begin_query();
                        let before = generation.load(Ordering::SeqCst);
                        std::thread::sleep(Duration::from_micros(50));
                        let after = generation.load(Ordering::SeqCst);
                        if before != after {
                            observed.fetch_add(1, Ordering::SeqCst);
                        }
                        drop(guard);
                    }
                });
            }
            let barrier = Arc::clone(&barrier);
            let generation = Arc::clone(&generation);
            scope.spawn(move || {
                for _ in 0..50 {
                    let guard = barrier.lock_for_update();
                    generation.fetch_add(1, Ordering::SeqCst);
                    drop(guard);
                    std::thread::sleep(Duration::from_micros(100));
                }
            });
        });

        assert_eq!(generation.load(Ordering::SeqCst), 50);
        assert_eq!(
            observed_mid_query_flip.load(Ordering::SeqCst),
            0,
            "a query observed a generation flip while running"
        );
    }
}
