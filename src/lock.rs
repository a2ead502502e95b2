//! Per-key mutual exclusion for cache population.
//!
//! [`KeyedLocks`] grants exclusive access per opaque string key: tasks
//! contending on the same key are serialized, tasks on different keys never
//! block each other. Entries are created on first use and removed once no
//! task holds or awaits them, so the table stays bounded by the number of
//! in-flight keys.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Entry {
    lock: Arc<AsyncMutex<()>>,
    /// Tasks currently holding or awaiting this key's lock.
    interested: usize,
}

/// Keyed async mutex with unbounded dynamic keys.
pub struct KeyedLocks {
    entries: Mutex<HashMap<String, Entry>>,
}

impl KeyedLocks {
    /// Create an empty lock table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Acquire the lock for `key`, waiting until no other task holds it.
    ///
    /// The returned guard releases the key when dropped, on every exit path.
    /// Dropping the future mid-acquisition (client disconnect, timeout)
    /// withdraws the task's interest the same way.
    pub async fn lock(self: &Arc<Self>, key: &str) -> KeyGuard {
        let lock = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                lock: Arc::new(AsyncMutex::new(())),
                interested: 0,
            });
            entry.interested += 1;
            Arc::clone(&entry.lock)
        };

        // Registered before the await so a cancelled waiter still gets
        // deducted from the table; carried into the guard on success.
        let interest = Interest {
            locks: Arc::clone(self),
            key: key.to_string(),
        };

        let permit = lock.lock_owned().await;
        KeyGuard {
            _permit: permit,
            _interest: interest,
        }
    }

    fn release(&self, key: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.interested -= 1;
            if entry.interested == 0 {
                entries.remove(key);
            }
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        self.entries.lock().len()
    }
}

/// One task's stake in a table entry. Dropping it deducts the task,
/// removing the entry once nobody holds or awaits the key.
struct Interest {
    locks: Arc<KeyedLocks>,
    key: String,
}

impl Drop for Interest {
    fn drop(&mut self) {
        // The entry can only disappear when no holder or waiter remains,
        // so waiters never see a stale mutex.
        self.locks.release(&self.key);
    }
}

/// Exclusive hold on one key. Dropping the guard releases the key and
/// removes the table entry once no other task is interested in it.
pub struct KeyGuard {
    _permit: OwnedMutexGuard<()>,
    _interest: Interest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("/pkg-1.2.tar.gz").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("/pkg-1.2.tar.gz").await;
            })
        };

        // The contender must not finish while the first guard is held.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("/a").await;
        timeout(Duration::from_millis(100), locks.lock("/b"))
            .await
            .expect("different key must be acquirable immediately");
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_no_entry_behind() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("/pkg-1.2.tar.gz").await;

        // A waiter abandoned mid-acquisition: the handler future is dropped
        // when the client disconnects, or a timeout wrapper gives up.
        let waiter = timeout(Duration::from_millis(50), locks.lock("/pkg-1.2.tar.gz")).await;
        assert!(waiter.is_err());

        drop(guard);
        assert_eq!(locks.active_keys(), 0);

        // The key stays immediately acquirable afterwards.
        timeout(Duration::from_millis(100), locks.lock("/pkg-1.2.tar.gz"))
            .await
            .expect("key must be acquirable after a cancelled waiter");
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn entries_are_removed_when_unreferenced() {
        let locks = KeyedLocks::new();
        {
            let _a = locks.lock("/a").await;
            let _b = locks.lock("/b").await;
            assert_eq!(locks.active_keys(), 2);
        }
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn contended_key_serializes_critical_sections() {
        let locks = KeyedLocks::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let locks = Arc::clone(&locks);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("/contended").await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active_keys(), 0);
    }
}
