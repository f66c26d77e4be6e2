use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;

use crate::config::{DEFAULT_CAPACITY, FrameCacheOpts};
use crate::foundation::clock::{Clock, SystemClock};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{ScrubError, ScrubResult};

const DEFAULT_CAPACITY_NZ: NonZeroUsize = NonZeroUsize::new(DEFAULT_CAPACITY).unwrap();

/// Cache bookkeeping counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries stored by `put`.
    pub insertions: u64,
    /// `put` calls that replaced an existing entry for the same index.
    pub replacements: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
    /// Entries dropped because they outlived the TTL.
    pub expirations: u64,
    /// Entries dropped by `clear`.
    pub cleared: u64,
}

impl CacheStats {
    /// Total number of entries the cache has let go of, for any reason.
    pub fn released(&self) -> u64 {
        self.replacements + self.evictions + self.expirations + self.cleared
    }
}

struct CacheEntry<B> {
    bitmap: Arc<B>,
    inserted_at: Instant,
    last_accessed_at: Instant,
}

/// Bounded map from frame index to decoded bitmap with LRU eviction and absolute-age expiry.
///
/// The cache holds one `Arc` per entry and drops it at the exact site an entry leaves (replace,
/// evict, expire, clear). When no display handle is outstanding that drop is the bitmap release.
pub struct FrameCache<B> {
    entries: LruCache<FrameIndex, CacheEntry<B>>,
    opts: FrameCacheOpts,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
}

impl<B> std::fmt::Debug for FrameCache<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCache")
            .field("len", &self.entries.len())
            .field("opts", &self.opts)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<B> FrameCache<B> {
    /// Create a cache with the given limits and time source.
    pub fn new(opts: FrameCacheOpts, clock: Arc<dyn Clock>) -> ScrubResult<Self> {
        opts.validate()?;
        let cap = NonZeroUsize::new(opts.capacity)
            .ok_or_else(|| ScrubError::validation("cache capacity must be >= 1"))?;
        Ok(Self {
            entries: LruCache::new(cap),
            opts,
            clock,
            stats: CacheStats::default(),
        })
    }

    /// Create a cache with default limits (100 frames, 5 minute TTL) on the system clock.
    pub fn with_defaults() -> Self {
        Self {
            entries: LruCache::new(DEFAULT_CAPACITY_NZ),
            opts: FrameCacheOpts::default(),
            clock: Arc::new(SystemClock),
            stats: CacheStats::default(),
        }
    }

    /// Return the bitmap for `index` if present and younger than the TTL.
    ///
    /// A hit promotes the entry to most-recently-used. An expired entry is dropped before
    /// returning `None`.
    pub fn get(&mut self, index: FrameIndex) -> Option<Arc<B>> {
        let now = self.clock.now();
        let expired = match self.entries.peek(&index) {
            Some(entry) => self.is_expired(entry, now),
            None => {
                self.stats.misses += 1;
                return None;
            }
        };

        if expired {
            self.entries.pop(&index);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            tracing::debug!(frame = index.0, "frame cache entry expired");
            return None;
        }

        let entry = self.entries.get_mut(&index)?;
        entry.last_accessed_at = now;
        self.stats.hits += 1;
        Some(Arc::clone(&entry.bitmap))
    }

    /// Insert or replace the bitmap for `index`.
    ///
    /// A replaced bitmap is released before the new one is stored. When the cache is full the
    /// least-recently-used entry is released first.
    pub fn put(&mut self, index: FrameIndex, bitmap: Arc<B>) {
        let now = self.clock.now();
        if self.entries.pop(&index).is_some() {
            self.stats.replacements += 1;
        } else if self.entries.len() >= self.entries.cap().get()
            && let Some((evicted, _)) = self.entries.pop_lru()
        {
            self.stats.evictions += 1;
            tracing::debug!(frame = evicted.0, "frame cache evicted lru entry");
        }

        self.entries.put(
            index,
            CacheEntry {
                bitmap,
                inserted_at: now,
                last_accessed_at: now,
            },
        );
        self.stats.insertions += 1;
    }

    /// Release every held bitmap and empty the cache.
    pub fn clear(&mut self) {
        let n = self.entries.len();
        self.entries.clear();
        self.stats.cleared += n as u64;
        if n > 0 {
            tracing::debug!(entries = n, "frame cache cleared");
        }
    }

    /// Eagerly drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let stale: Vec<FrameIndex> = self
            .entries
            .iter()
            .filter(|(_, e)| self.is_expired(e, now))
            .map(|(k, _)| *k)
            .collect();
        for k in &stale {
            self.entries.pop(k);
        }
        self.stats.expirations += stale.len() as u64;
        stale.len()
    }

    /// Presence check that neither promotes nor expires the entry.
    pub fn contains(&self, index: FrameIndex) -> bool {
        self.entries.contains(&index)
    }

    /// Time since the entry for `index` was last returned by `get` (or inserted).
    pub fn idle_for(&self, index: FrameIndex) -> Option<std::time::Duration> {
        let now = self.clock.now();
        self.entries
            .peek(&index)
            .map(|e| now.saturating_duration_since(e.last_accessed_at))
    }

    /// Number of entries currently held, including not-yet-collected expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` when no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.opts.capacity
    }

    /// Snapshot of the bookkeeping counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn is_expired(&self, entry: &CacheEntry<B>, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) >= self.opts.ttl
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/frame_cache.rs"]
mod tests;
