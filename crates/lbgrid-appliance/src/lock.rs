//! Per-network exclusive locks.
//!
//! Deployment holds the network's lock while it discovers or creates the
//! appliance. Acquisition waits at most a configured duration (zero means
//! fail fast); release happens when the [`NetworkLockGuard`] drops, on
//! every exit path.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use lbgrid_core::NetworkId;

/// Lock table capability: acquire with a bounded wait, release by id.
pub trait NetworkLocks: Send + Sync {
    /// Try to take the lock for `network_id`, waiting up to `wait`.
    /// Returns `false` if another holder kept it for the whole wait.
    fn try_acquire(&self, network_id: NetworkId, wait: Duration) -> bool;

    /// Release a lock taken with [`try_acquire`](Self::try_acquire).
    fn release(&self, network_id: NetworkId);
}

/// Held lock; releases on drop.
pub struct NetworkLockGuard<'a> {
    locks: &'a dyn NetworkLocks,
    network_id: NetworkId,
}

impl<'a> NetworkLockGuard<'a> {
    /// Acquire the lock for `network_id`, or `None` if it stayed held.
    pub fn acquire(
        locks: &'a dyn NetworkLocks,
        network_id: NetworkId,
        wait: Duration,
    ) -> Option<Self> {
        locks
            .try_acquire(network_id, wait)
            .then_some(Self { locks, network_id })
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }
}

impl Drop for NetworkLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(self.network_id);
        debug!(network_id = self.network_id, "network lock released");
    }
}

/// Process-local lock table.
#[derive(Default)]
pub struct InMemoryLockTable {
    held: Mutex<HashSet<NetworkId>>,
    released: Condvar,
}

impl InMemoryLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, network_id: NetworkId) -> bool {
        self.held
            .lock()
            .expect("lock table poisoned")
            .contains(&network_id)
    }
}

impl NetworkLocks for InMemoryLockTable {
    fn try_acquire(&self, network_id: NetworkId, wait: Duration) -> bool {
        // A wait too long to represent as an instant has no deadline.
        let deadline = Instant::now().checked_add(wait);
        let mut held = self.held.lock().expect("lock table poisoned");
        loop {
            if held.insert(network_id) {
                return true;
            }
            held = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(network_id, ?wait, "network lock busy");
                        return false;
                    }
                    self.released
                        .wait_timeout(held, deadline - now)
                        .expect("lock table poisoned")
                        .0
                }
                None => self.released.wait(held).expect("lock table poisoned"),
            };
        }
    }

    fn release(&self, network_id: NetworkId) {
        let mut held = self.held.lock().expect("lock table poisoned");
        if held.remove(&network_id) {
            self.released.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn second_acquire_fails_fast() {
        let table = InMemoryLockTable::new();
        assert!(table.try_acquire(1, Duration::ZERO));
        assert!(!table.try_acquire(1, Duration::ZERO));
        assert!(table.try_acquire(2, Duration::ZERO));
    }

    #[test]
    fn release_allows_reacquire() {
        let table = InMemoryLockTable::new();
        assert!(table.try_acquire(1, Duration::ZERO));
        table.release(1);
        assert!(!table.is_held(1));
        assert!(table.try_acquire(1, Duration::ZERO));
    }

    #[test]
    fn guard_releases_on_drop() {
        let table = InMemoryLockTable::new();
        {
            let guard = NetworkLockGuard::acquire(&table, 5, Duration::ZERO).unwrap();
            assert_eq!(guard.network_id(), 5);
            assert!(table.is_held(5));
            assert!(NetworkLockGuard::acquire(&table, 5, Duration::ZERO).is_none());
        }
        assert!(!table.is_held(5));
    }

    #[test]
    fn waiting_acquire_succeeds_after_release() {
        let table = Arc::new(InMemoryLockTable::new());
        assert!(table.try_acquire(1, Duration::ZERO));

        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || table.try_acquire(1, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        table.release(1);

        assert!(waiter.join().unwrap());
        assert!(table.is_held(1));
    }

    #[test]
    fn bounded_wait_times_out() {
        let table = InMemoryLockTable::new();
        assert!(table.try_acquire(1, Duration::ZERO));
        let start = Instant::now();
        assert!(!table.try_acquire(1, Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn unbounded_wait_succeeds_after_release() {
        let table = Arc::new(InMemoryLockTable::new());
        assert!(table.try_acquire(1, Duration::ZERO));

        let releaser = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                table.release(1);
            })
        };
        assert!(table.try_acquire(1, Duration::MAX));
        releaser.join().unwrap();
        assert!(table.is_held(1));
    }
}
