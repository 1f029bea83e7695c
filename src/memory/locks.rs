//! Per-key lock registry.
//!
//! Every key gets its own mutex, created the first time anything touches the
//! key and kept for the life of the registry. A transaction locks all of its
//! keys in sorted order, so two transactions with overlapping key sets can
//! never wait on each other in a cycle.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use thiserror::Error;

/// Lock acquisition gave up before the deadline.
#[derive(Debug, Clone, Error)]
#[error("timed out after {waited:?} waiting for the lock on key '{key}'")]
pub struct LockTimeout {
    pub key: String,
    pub waited: Duration,
}

/// Lazily populated map from key to mutex.
///
/// Never shrinks: fine for bounded key spaces, a known cost for unbounded ones.
#[derive(Debug, Default)]
pub struct KeyLockRegistry {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys that have a lock.
    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    /// Check if no key has been locked yet.
    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }

    /// Get the mutex for a key, creating it on first use.
    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().get(key) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write();
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Lock every key in the set.
    ///
    /// Keys are deduplicated and acquired in sorted order whatever order the
    /// caller supplies them in. With a timeout, the whole set must be
    /// acquired before the deadline; locks taken so far are released on
    /// failure.
    pub fn acquire<'a, I>(&self, keys: I, timeout: Option<Duration>) -> Result<KeyLockSet, LockTimeout>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ordered: BTreeSet<&str> = keys.into_iter().collect();
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);

        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            let lock = self.lock_for(key);
            let guard = match deadline {
                None => lock.lock_arc(),
                Some(deadline) => lock.try_lock_arc_until(deadline).ok_or_else(|| LockTimeout {
                    key: key.to_string(),
                    waited: started.elapsed(),
                })?,
            };
            guards.push(guard);
        }

        Ok(KeyLockSet { guards })
    }

    /// Lock a single key.
    pub fn acquire_one(&self, key: &str, timeout: Option<Duration>) -> Result<KeyLockSet, LockTimeout> {
        self.acquire(std::iter::once(key), timeout)
    }
}

/// Locks held by one operation. Dropping the set releases them all.
pub struct KeyLockSet {
    guards: Vec<ArcMutexGuard<RawMutex, ()>>,
}

impl KeyLockSet {
    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl Drop for KeyLockSet {
    fn drop(&mut self) {
        // release in reverse acquisition order
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

impl std::fmt::Debug for KeyLockSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLockSet").field("held", &self.guards.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_locks_created_lazily() {
        let registry = KeyLockRegistry::new();
        assert!(registry.is_empty());

        {
            let held = registry.acquire(["b", "a", "b"], None).unwrap();
            assert_eq!(held.len(), 2);
        }
        assert_eq!(registry.len(), 2);

        // re-locking the same keys reuses their mutexes
        let _held = registry.acquire(["a", "b"], None).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_release_on_drop() {
        let registry = KeyLockRegistry::new();
        let held = registry.acquire_one("k", None).unwrap();
        drop(held);

        let again = registry.acquire_one("k", Some(Duration::from_millis(10)));
        assert!(again.is_ok());
    }

    #[test]
    fn test_timeout_when_held() {
        let registry = Arc::new(KeyLockRegistry::new());
        let _held = registry.acquire(["a", "b"], None).unwrap();

        let other = Arc::clone(&registry);
        let result = thread::spawn(move || {
            other
                .acquire(["c", "b"], Some(Duration::from_millis(20)))
                .map(|set| set.len())
        })
        .join()
        .unwrap();

        let err = result.unwrap_err();
        assert_eq!(err.key, "b");

        // "c" was released again when acquisition failed
        assert!(registry.acquire_one("c", Some(Duration::from_millis(10))).is_ok());
    }

    #[test]
    fn test_opposite_orders_do_not_deadlock() {
        let registry = Arc::new(KeyLockRegistry::new());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [["x", "y"], ["y", "x"]]
            .into_iter()
            .map(|keys| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..2_000 {
                        let held = registry.acquire(keys, Some(Duration::from_secs(5))).unwrap();
                        assert_eq!(held.len(), 2);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
