//! LRU cache of decoded rasters, bounded by total pixel bytes.
//!
//! Keys are storage keys. A key names an immutable container, so an entry
//! never goes stale; re-tagging writes a new key instead.

use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::raster::GeoRaster;

/// Lower bound on the cache budget
pub const MIN_CACHE_CAPACITY_BYTES: usize = 16 * 1024 * 1024;

struct CacheEntry {
    raster: Arc<GeoRaster>,
    size_bytes: usize,
}

struct Inner {
    current_bytes: usize,
    capacity_bytes: usize,
    entries: LruCache<Arc<str>, CacheEntry>,
}

impl Inner {
    fn insert(&mut self, key: Arc<str>, raster: Arc<GeoRaster>, size_bytes: usize) {
        if size_bytes > self.capacity_bytes {
            return;
        }

        if let Some(old) = self.entries.pop(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
        }

        while self.current_bytes + size_bytes > self.capacity_bytes {
            if let Some((evicted, entry)) = self.entries.pop_lru() {
                trace!(key = %evicted, "Evicting raster from cache");
                self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
            } else {
                break;
            }
        }

        self.current_bytes = self.current_bytes.saturating_add(size_bytes);
        self.entries.put(key, CacheEntry { raster, size_bytes });
    }
}

/// Shared, thread-safe raster cache
pub struct RasterCache {
    inner: Mutex<Inner>,
}

impl RasterCache {
    /// Create a cache holding at most `capacity_bytes` of pixel data
    /// (never below [`MIN_CACHE_CAPACITY_BYTES`])
    #[must_use]
    pub fn new(capacity_bytes: usize) -> Self {
        Self::with_exact_capacity(capacity_bytes.max(MIN_CACHE_CAPACITY_BYTES))
    }

    fn with_exact_capacity(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current_bytes: 0,
                capacity_bytes,
                entries: LruCache::unbounded(),
            }),
        }
    }

    /// Look up a raster, marking it most recently used
    pub fn get(&self, key: &str) -> Option<Arc<GeoRaster>> {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|entry| Arc::clone(&entry.raster))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Insert a raster; rasters larger than the whole budget are not cached
    pub fn insert(&self, key: &str, raster: Arc<GeoRaster>) {
        let size_bytes = raster.size_bytes();
        self.inner.lock().insert(Arc::from(key), raster, size_bytes);
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.pop(key) {
            inner.current_bytes = inner.current_bytes.saturating_sub(entry.size_bytes);
        }
    }

    /// Bytes currently held
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().current_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
