//! Last-good-frame cache.
//!
//! One entry per active source, keyed by source identity rather than time.
//! During a seek, or before a fresh decode completes, the collector falls
//! back to this frame instead of showing black or stale garbage. Refreshes
//! are rate-limited so opportunistic updates don't turn into a GPU copy per
//! frame.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use fl_common::gpu::TextureHandle;
use fl_common::types::SourceId;

use crate::scrub::CachedGpuFrame;

struct Entry {
    frame: CachedGpuFrame,
    updated: Instant,
}

/// Per-source fallback frames. Unbounded by count (one entry per active
/// source), bounded in practice by the number of live sources.
pub struct LastGoodFrameCache {
    entries: HashMap<SourceId, Entry>,
    refresh_interval: Duration,
}

impl LastGoodFrameCache {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            refresh_interval,
        }
    }

    /// Whether a refresh for this source is currently allowed by the rate
    /// limit. Sources with no entry can always refresh.
    pub fn refresh_allowed(&self, source: &SourceId) -> bool {
        match self.entries.get(source) {
            Some(e) => e.updated.elapsed() >= self.refresh_interval,
            None => true,
        }
    }

    /// Store a frame. Returns the replaced frame (for texture destruction)
    /// if one existed.
    pub fn put(&mut self, source: SourceId, frame: CachedGpuFrame) -> Option<CachedGpuFrame> {
        self.entries
            .insert(
                source,
                Entry {
                    frame,
                    updated: Instant::now(),
                },
            )
            .map(|e| e.frame)
    }

    /// Defensive lookup: dead backing textures degrade to a miss.
    pub fn get(
        &mut self,
        source: &SourceId,
        is_live: impl Fn(TextureHandle) -> bool,
    ) -> Option<CachedGpuFrame> {
        match self.entries.get(source) {
            Some(e) if is_live(e.frame.texture) => Some(e.frame),
            Some(_) => {
                self.entries.remove(source);
                None
            }
            None => None,
        }
    }

    /// Drop one source's entry, returning the frame for destruction.
    pub fn clear_source(&mut self, source: &SourceId) -> Option<CachedGpuFrame> {
        self.entries.remove(source).map(|e| e.frame)
    }

    /// Drop everything, returning the frames for destruction.
    pub fn clear(&mut self) -> Vec<CachedGpuFrame> {
        self.entries.drain().map(|(_, e)| e.frame).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
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
            width: 640,
            height: 360,
        }
    }

    #[test]
    fn put_then_get() {
        let mut c = LastGoodFrameCache::new(Duration::from_millis(100));
        c.put(src("a"), frame(1));
        assert_eq!(c.get(&src("a"), |_| true), Some(frame(1)));
        assert!(c.get(&src("b"), |_| true).is_none());
    }

    #[test]
    fn put_replaces_and_returns_old() {
        let mut c = LastGoodFrameCache::new(Duration::from_millis(100));
        assert!(c.put(src("a"), frame(1)).is_none());
        assert_eq!(c.put(src("a"), frame(2)), Some(frame(1)));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn refresh_rate_limited() {
        let mut c = LastGoodFrameCache::new(Duration::from_secs(60));
        assert!(c.refresh_allowed(&src("a")));
        c.put(src("a"), frame(1));
        // Just written; the rate limit blocks an immediate refresh.
        assert!(!c.refresh_allowed(&src("a")));
        // Other sources are unaffected.
        assert!(c.refresh_allowed(&src("b")));
    }

    #[test]
    fn zero_interval_always_allows() {
        let mut c = LastGoodFrameCache::new(Duration::ZERO);
        c.put(src("a"), frame(1));
        assert!(c.refresh_allowed(&src("a")));
    }

    #[test]
    fn dead_texture_is_a_miss() {
        let mut c = LastGoodFrameCache::new(Duration::ZERO);
        c.put(src("a"), frame(1));
        assert!(c.get(&src("a"), |_| false).is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn clear_source_returns_frame() {
        let mut c = LastGoodFrameCache::new(Duration::ZERO);
        c.put(src("a"), frame(1));
        c.put(src("b"), frame(2));
        assert_eq!(c.clear_source(&src("a")), Some(frame(1)));
        assert_eq!(c.len(), 1);
        assert_eq!(c.clear().len(), 1);
    }
}
