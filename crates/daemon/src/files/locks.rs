//! Per-file transfer locks.
//!
//! Concurrent sessions touching the same file must not interleave: a
//! download observing a half-written upload, or two uploads braiding
//! their chunks, would corrupt data. The registry maps each canonical
//! path to one async mutex; whoever holds the guard owns the file for
//! the duration of the operation.
//!
//! Entry creation happens under the map's short-lived shard lock only.
//! The per-file lock itself is acquired after that lock is released, so
//! the registry never blocks unrelated paths while a transfer runs.
//! Entries are never evicted; the map grows with the set of distinct
//! paths ever touched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-file mutual-exclusion locks.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl LockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `path`, creating the entry on first use.
    ///
    /// The returned guard releases the lock when dropped, on every exit
    /// path of the caller.
    pub async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Number of paths the registry has handed out locks for.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock has ever been requested.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_creates_entry_once() {
        let registry = LockRegistry::new();
        assert!(registry.is_empty());

        {
            let _guard = registry.acquire(Path::new("/data/a.txt")).await;
        }
        {
            let _guard = registry.acquire(Path::new("/data/a.txt")).await;
        }

        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_same_path_is_exclusive() {
        let registry = Arc::new(LockRegistry::new());
        let in_critical = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let in_critical = Arc::clone(&in_critical);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                let _guard = registry.acquire(Path::new("/data/contended.txt")).await;
                let now = in_critical.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_critical.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_paths_run_in_parallel() {
        let registry = Arc::new(LockRegistry::new());

        let guard_a = registry.acquire(Path::new("/data/a.txt")).await;

        // A different path must not block behind the held guard.
        let registry_b = Arc::clone(&registry);
        let other = tokio::time::timeout(Duration::from_secs(1), async move {
            registry_b.acquire(Path::new("/data/b.txt")).await
        })
        .await;
        assert!(other.is_ok());

        drop(guard_a);
    }

    #[tokio::test]
    async fn test_guard_release_unblocks_waiter() {
        let registry = Arc::new(LockRegistry::new());
        let path = Path::new("/data/queued.txt");

        let guard = registry.acquire(path).await;

        let registry_two = Arc::clone(&registry);
        let waiter = tokio::spawn(async move {
            let _guard = registry_two.acquire(Path::new("/data/queued.txt")).await;
        });

        // The waiter cannot finish while the guard is held.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
