//! Serializes transactions sharing a key while letting distinct keys run in parallel.

use std::{collections::HashMap, fmt::Display, hash::Hash, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

#[derive(Debug, Default)]
struct KeyHolder {
    lock: Arc<tokio::sync::Mutex<()>>,
}

/// A registry of asynchronous locks, one per key.
///
/// Holders are created on first use and live as long as the registry. Acquiring the lock of one key
/// never waits on transactions holding another key.
///
/// See: [`KeyedLocks::lock`]
#[derive(Debug)]
pub struct KeyedLocks<K>
where
    K: Eq + Hash,
{
    holders: Mutex<HashMap<K, KeyHolder>>,
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash,
{
    /// Creates an empty [`KeyedLocks`].
    pub fn new() -> Self {
        Self {
            holders: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for the lock of `key`. The critical section lasts until the returned guard is dropped.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()>
    where
        K: Display,
    {
        let name = key.to_string();
        let lock = self.holders.lock().entry(key).or_default().lock.clone();

        debug!("waiting for lock {name}…");
        let guard = lock.lock_owned().await;
        debug!("acquired lock {name}");
        guard
    }

    /// Returns how many keys have been locked so far.
    pub fn len(&self) -> usize {
        self.holders.lock().len()
    }

    /// Returns `true` if no key has been locked yet.
    pub fn is_empty(&self) -> bool {
        self.holders.lock().is_empty()
    }
}
