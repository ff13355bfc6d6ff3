use std::{hash::Hash as StdHash, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use strongroom_core::{dashmap, tokio};

/// One async lock per key, created on first use. An entry is removed as soon
/// as nobody holds or waits on it, so the map tracks only keys in flight.
pub(crate) struct KeyedLocks<K: Eq + StdHash> {
    locks: DashMap<K, Arc<RwLock<()>>>,
}

struct Prune<'a, K: Eq + StdHash> {
    locks: &'a DashMap<K, Arc<RwLock<()>>>,
    key: K,
}

impl<K: Eq + StdHash> Drop for Prune<'_, K> {
    fn drop(&mut self) {
        // a clone outside the map means another holder or waiter
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Releases the lock, then prunes the map entry. Field order matters.
pub(crate) struct KeyedGuard<'a, K: Eq + StdHash> {
    _read: Option<OwnedRwLockReadGuard<()>>,
    _write: Option<OwnedRwLockWriteGuard<()>>,
    _prune: Prune<'a, K>,
}

impl<K: Eq + StdHash + Copy> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        KeyedLocks {
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: K) -> (Prune<'_, K>, Arc<RwLock<()>>) {
        let prune = Prune {
            locks: &self.locks,
            key,
        };
        let lock = self.locks.entry(key).or_default().clone();
        (prune, lock)
    }

    pub(crate) async fn read(&self, key: K) -> KeyedGuard<'_, K> {
        let (prune, lock) = self.lock_for(key);
        let guard = lock.read_owned().await;
        KeyedGuard {
            _read: Some(guard),
            _write: None,
            _prune: prune,
        }
    }

    pub(crate) async fn write(&self, key: K) -> KeyedGuard<'_, K> {
        let (prune, lock) = self.lock_for(key);
        let guard = lock.write_owned().await;
        KeyedGuard {
            _read: None,
            _write: Some(guard),
            _prune: prune,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
