//! Async mutual exclusion keyed by string

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// A set of async locks, one per key, created on demand.
///
/// Acquiring several keys at once always happens in sorted order, so two
/// callers holding overlapping key sets cannot deadlock. A key's entry is
/// dropped once no guard holds it and nobody is waiting on it.
#[derive(Debug, Default, Clone)]
pub struct KeyedLock {
    locks: LockMap,
}

/// Guards held for a set of keys; released on drop
#[derive(Debug)]
pub struct KeyedGuard {
    locks: LockMap,
    held: Vec<(String, OwnedMutexGuard<()>)>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        let keys: Vec<String> = std::mem::take(&mut self.held)
            .into_iter()
            .map(|(key, guard)| {
                drop(guard);
                key
            })
            .collect();

        // Waiters hold a clone of the entry, so a count of one means idle
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            if locks.get(&key).is_some_and(|m| Arc::strong_count(m) == 1) {
                locks.remove(&key);
            }
        }
    }
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire the lock for a single key
    pub async fn acquire(&self, key: &str) -> KeyedGuard {
        self.acquire_many([key]).await
    }

    /// Acquire the locks for all given keys
    pub async fn acquire_many<I, S>(&self, keys: I) -> KeyedGuard
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        keys.sort();
        keys.dedup();

        let mut guard = KeyedGuard {
            locks: self.locks.clone(),
            held: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let held = self.entry(&key).lock_owned().await;
            guard.held.push((key, held));
        }
        guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let lock = KeyedLock::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire("build.a").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    fn entries(lock: &KeyedLock) -> usize {
        lock.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_released_keys_are_evicted() {
        let lock = KeyedLock::new();
        let guard = lock.acquire_many(["build.a", "build.b"]).await;
        assert_eq!(entries(&lock), 2);

        drop(guard);
        assert_eq!(entries(&lock), 0);
    }

    #[tokio::test]
    async fn test_waiter_keeps_entry_alive() {
        let lock = KeyedLock::new();
        let guard = lock.acquire("build.a").await;

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _guard = lock.acquire("build.a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        assert_eq!(entries(&lock), 1);
        waiter.await.unwrap();
        assert_eq!(entries(&lock), 0);
    }

    #[tokio::test]
    async fn test_disjoint_keys_do_not_block() {
        let lock = KeyedLock::new();
        let _a = lock.acquire_many(["build.a", "deploy.a"]).await;
        let b = tokio::time::timeout(Duration::from_millis(100), lock.acquire("build.b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_overlapping_keys_wait() {
        let lock = KeyedLock::new();
        let guard = lock.acquire_many(["build.a", "build.b"]).await;
        let blocked =
            tokio::time::timeout(Duration::from_millis(20), lock.acquire_many(["build.b"])).await;
        assert!(blocked.is_err());

        drop(guard);
        let acquired =
            tokio::time::timeout(Duration::from_millis(100), lock.acquire_many(["build.b"])).await;
        assert!(acquired.is_ok());
    }
}
