//! Per-source-URL locking for the dedup check.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes the lookup-then-create step of conversions of the same URL.
///
/// Each URL gets its own async mutex on first use. The entry is dropped again
/// once no guard holds it and nobody is waiting, so the map only ever holds
/// URLs with a conversion currently starting.
#[derive(Debug, Default)]
pub struct UrlLocks {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UrlLocks {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for(&self, url: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.entries().entry(url.to_string()).or_default())
    }

    /// Wait for exclusive access to `url`.
    pub async fn acquire(self: &Arc<Self>, url: &str) -> UrlGuard {
        let guard = self.lock_for(url).lock_owned().await;
        UrlGuard {
            url: url.to_string(),
            locks: Arc::clone(self),
            guard: Some(guard),
        }
    }

    /// Take the lock for `url` only if nobody holds it.
    pub fn try_acquire(self: &Arc<Self>, url: &str) -> Option<UrlGuard> {
        let guard = self.lock_for(url).try_lock_owned().ok()?;
        Some(UrlGuard {
            url: url.to_string(),
            locks: Arc::clone(self),
            guard: Some(guard),
        })
    }

    /// Number of URLs currently tracked.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.entries().len()
    }
}

/// Exclusive access to one URL. Released on drop.
#[derive(Debug)]
pub struct UrlGuard {
    url: String,
    locks: Arc<UrlLocks>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UrlGuard {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let mutex = Arc::clone(OwnedMutexGuard::mutex(&guard));
        drop(guard);

        // Waiters clone the Arc under the map lock, so a count of two (map +
        // ours) checked under that same lock means nobody else wants this URL.
        let mut entries = self.locks.entries();
        if Arc::strong_count(&mutex) == 2 {
            entries.remove(&self.url);
        }
    }
}
