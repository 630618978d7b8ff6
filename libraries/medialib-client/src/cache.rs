//! Time-bounded response cache.

use crate::request::RequestIdentity;
use crate::response::RawResponse;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Expiry used when a TTL is too long to represent, roughly 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A cached response and the instant it stops being servable.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: RawResponse,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Maps request identities to successful responses for a limited time.
///
/// Expired entries are evicted lazily when looked up; [`purge_expired`]
/// can be called to sweep them eagerly. Failures are never cached.
///
/// The whole map sits behind one mutex, which is only ever held for the
/// bookkeeping itself.
///
/// [`purge_expired`]: ResponseCache::purge_expired
pub struct ResponseCache {
    entries: Mutex<LruCache<RequestIdentity, CacheEntry>>,
}

impl ResponseCache {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Create a cache holding at most `capacity` entries, evicting the least
    /// recently used one when full. A capacity of zero means unbounded.
    pub fn with_capacity(capacity: usize) -> Self {
        let entries = match NonZeroUsize::new(capacity) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };

        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Look up a fresh entry. An expired entry is removed and not returned.
    pub fn lookup(&self, identity: &RequestIdentity) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut entries = self.entries();

        match entries.get(identity) {
            None => return None,
            Some(entry) if entry.is_fresh(now) => return Some(entry.clone()),
            Some(_) => {}
        }

        entries.pop(identity);
        debug!(identity = %identity, "Evicted expired cache entry");
        None
    }

    /// Store `value` for `ttl`, replacing any previous entry. A zero TTL is a no-op.
    pub fn store(&self, identity: RequestIdentity, value: RawResponse, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let now = Instant::now();
        let Some(expires_at) = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
        else {
            return;
        };
        debug!(identity = %identity, ttl = ?ttl, "Caching response");
        self.entries().put(identity, CacheEntry { value, expires_at });
    }

    /// Remove the entry for `identity`. Returns whether one was present.
    pub fn invalidate(&self, identity: &RequestIdentity) -> bool {
        self.entries().pop(identity).is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Remove all expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();

        let expired: Vec<RequestIdentity> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now))
            .map(|(identity, _)| identity.clone())
            .collect();

        for identity in &expired {
            entries.pop(identity);
        }

        expired.len()
    }

    /// Number of stored entries, including ones that expired but were not yet evicted.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<RequestIdentity, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
