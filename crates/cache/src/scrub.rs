//! Time-indexed decoded-frame cache for scrubbing.
//!
//! Keyed by `(source, quantized time)` so scrubbing back to a previously
//! visited position shows the exact frame instantly instead of waiting for
//! the decoder to catch up. Entries hold GPU textures; the cache does not
//! own the backend, so evicted entries are handed back to the caller for
//! texture destruction.

use tracing::debug;

use fl_common::gpu::TextureHandle;
use fl_common::types::SourceId;

use crate::lru::LruMap;
use crate::quantize::FrameKey;

/// A cached decoded frame resident on the GPU.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CachedGpuFrame {
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
}

/// Aggregate statistics for the scrub cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScrubCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl ScrubCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU cache of decoded frames keyed by `(source, quantized time)`.
pub struct ScrubFrameCache {
    entries: LruMap<(SourceId, FrameKey), CachedGpuFrame>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl ScrubFrameCache {
    pub fn new(max_frames: usize) -> Self {
        Self {
            entries: LruMap::new(max_frames),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Insert a frame. Returns the evicted frame (for texture destruction)
    /// when the insert pushed the cache over its bound.
    pub fn insert(
        &mut self,
        source: SourceId,
        key: FrameKey,
        frame: CachedGpuFrame,
    ) -> Option<CachedGpuFrame> {
        let evicted = self.entries.insert((source, key), frame);
        if let Some(((src, k), _)) = &evicted {
            self.evictions += 1;
            debug!(source = %src, frame = k.0, "Scrub cache evicted LRU frame");
        }
        evicted.map(|(_, v)| v)
    }

    /// Look up a frame, defensively: `is_live` reports whether the backing
    /// texture still exists, and dead entries degrade to a miss instead of
    /// surfacing a stale handle.
    pub fn get(
        &mut self,
        source: &SourceId,
        key: FrameKey,
        is_live: impl Fn(TextureHandle) -> bool,
    ) -> Option<CachedGpuFrame> {
        let k = (source.clone(), key);
        match self.entries.get(&k).copied() {
            Some(frame) if is_live(frame.texture) => {
                self.hits += 1;
                Some(frame)
            }
            Some(_) => {
                // Backing resource is gone; treat as a miss, never a crash.
                self.entries.remove(&k);
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn contains(&self, source: &SourceId, key: FrameKey) -> bool {
        self.entries.contains(&(source.clone(), key))
    }

    /// Drop all entries for one source, returning them for destruction.
    pub fn clear_source(&mut self, source: &SourceId) -> Vec<CachedGpuFrame> {
        self.entries
            .drain_filter(|(s, _)| s == source)
            .into_iter()
            .map(|(_, v)| v)
            .collect()
    }

    /// Drop everything, returning all frames for destruction.
    pub fn clear(&mut self) -> Vec<CachedGpuFrame> {
        self.entries.drain().into_iter().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ScrubCacheStats {
        ScrubCacheStats {
            entries: self.entries.len(),
            capacity: self.entries.capacity(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(name: &str) -> SourceId {
        SourceId::new(name)
    }

    fn frame(id: u64) -> CachedGpuFrame {
        CachedGpuFrame {
            texture: TextureHandle(id),
            width: 1920,
            height: 1080,
        }
    }

    #[test]
    fn hit_after_insert() {
        let mut c = ScrubFrameCache::new(4);
        c.insert(src("a"), FrameKey(10), frame(1));
        let got = c.get(&src("a"), FrameKey(10), |_| true);
        assert_eq!(got, Some(frame(1)));
        assert_eq!(c.stats().hits, 1);
    }

    #[test]
    fn miss_counts() {
        let mut c = ScrubFrameCache::new(4);
        assert!(c.get(&src("a"), FrameKey(0), |_| true).is_none());
        assert_eq!(c.stats().misses, 1);
        assert_eq!(c.stats().hit_rate(), 0.0);
    }

    #[test]
    fn eviction_returns_frame_and_respects_bound() {
        let mut c = ScrubFrameCache::new(2);
        assert!(c.insert(src("a"), FrameKey(0), frame(1)).is_none());
        assert!(c.insert(src("a"), FrameKey(1), frame(2)).is_none());
        let evicted = c.insert(src("a"), FrameKey(2), frame(3));
        assert_eq!(evicted, Some(frame(1)));
        assert_eq!(c.len(), 2);
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn dead_backing_texture_is_a_miss() {
        let mut c = ScrubFrameCache::new(4);
        c.insert(src("a"), FrameKey(0), frame(1));
        // The texture was destroyed behind the cache's back.
        let got = c.get(&src("a"), FrameKey(0), |_| false);
        assert!(got.is_none());
        assert_eq!(c.len(), 0);
        assert_eq!(c.stats().misses, 1);
    }

    #[test]
    fn clear_source_only_touches_that_source() {
        let mut c = ScrubFrameCache::new(8);
        c.insert(src("a"), FrameKey(0), frame(1));
        c.insert(src("a"), FrameKey(1), frame(2));
        c.insert(src("b"), FrameKey(0), frame(3));
        let dropped = c.clear_source(&src("a"));
        assert_eq!(dropped.len(), 2);
        assert_eq!(c.len(), 1);
        assert!(c.contains(&src("b"), FrameKey(0)));
    }

    #[test]
    fn sources_do_not_collide() {
        let mut c = ScrubFrameCache::new(8);
        c.insert(src("a"), FrameKey(5), frame(1));
        assert!(c.get(&src("b"), FrameKey(5), |_| true).is_none());
    }
}
