//! Composited-frame cache for RAM-preview playback.
//!
//! Fully composited frames are kept as CPU bitmaps keyed by quantized time,
//! bounded by frame count AND a byte budget; eviction runs while either
//! bound is exceeded. A much smaller GPU-resident promotion cache sits on
//! top so replaying the most recent frames doesn't re-upload every tick.

use tracing::debug;

use fl_common::gpu::TextureHandle;
use fl_common::sample::CpuFrame;

use crate::lru::LruMap;
use crate::quantize::FrameKey;
use crate::scrub::CachedGpuFrame;

/// Aggregate statistics for the composite cache tiers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompositeCacheStats {
    pub cpu_frames: usize,
    pub cpu_bytes: usize,
    pub cpu_max_frames: usize,
    pub cpu_max_bytes: usize,
    pub gpu_frames: usize,
    pub gpu_max_frames: usize,
    pub hits: u64,
    pub misses: u64,
}

/// CPU tier: composited RGBA bitmaps keyed by quantized time.
pub struct CompositeFrameCache {
    entries: LruMap<FrameKey, CpuFrame>,
    bytes: usize,
    max_bytes: usize,
    hits: u64,
    misses: u64,
}

impl CompositeFrameCache {
    pub fn new(max_frames: usize, max_bytes: usize) -> Self {
        Self {
            entries: LruMap::new(max_frames),
            bytes: 0,
            max_bytes,
            hits: 0,
            misses: 0,
        }
    }

    /// Insert a composited frame, evicting while the count bound OR the
    /// byte budget is exceeded. Both bounds hold on return.
    pub fn insert(&mut self, key: FrameKey, frame: CpuFrame) {
        let added = frame.byte_size();
        // Replacing an existing entry releases its bytes first.
        if let Some(old) = self.entries.peek(&key) {
            self.bytes -= old.byte_size();
        }
        self.bytes += added;
        if let Some((k, old)) = self.entries.insert(key, frame) {
            self.bytes -= old.byte_size();
            debug!(frame = k.0, "Composite cache evicted frame (count bound)");
        }
        while self.bytes > self.max_bytes {
            match self.entries.pop_lru() {
                Some((k, old)) => {
                    self.bytes -= old.byte_size();
                    debug!(frame = k.0, "Composite cache evicted frame (byte budget)");
                }
                None => break,
            }
        }
    }

    pub fn get(&mut self, key: FrameKey) -> Option<&CpuFrame> {
        let found = self.entries.get(&key);
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    pub fn peek(&self, key: FrameKey) -> Option<&CpuFrame> {
        self.entries.peek(&key)
    }

    pub fn contains(&self, key: FrameKey) -> bool {
        self.entries.contains(&key)
    }

    pub fn clear(&mut self) {
        let _ = self.entries.drain();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn cached_keys(&self) -> Vec<FrameKey> {
        self.entries.keys_lru_order().copied().collect()
    }

    fn stats_into(&self, stats: &mut CompositeCacheStats) {
        stats.cpu_frames = self.entries.len();
        stats.cpu_bytes = self.bytes;
        stats.cpu_max_frames = self.entries.capacity();
        stats.cpu_max_bytes = self.max_bytes;
        stats.hits = self.hits;
        stats.misses = self.misses;
    }
}

/// GPU tier: recently-played frames promoted to textures.
pub struct GpuPromotionCache {
    entries: LruMap<FrameKey, CachedGpuFrame>,
}

impl GpuPromotionCache {
    pub fn new(max_frames: usize) -> Self {
        Self {
            entries: LruMap::new(max_frames),
        }
    }

    /// Promote a frame. Returns the evicted frame for texture destruction.
    pub fn insert(&mut self, key: FrameKey, frame: CachedGpuFrame) -> Option<CachedGpuFrame> {
        self.entries.insert(key, frame).map(|(_, v)| v)
    }

    /// Defensive lookup: dead backing textures degrade to a miss.
    pub fn get(
        &mut self,
        key: FrameKey,
        is_live: impl Fn(TextureHandle) -> bool,
    ) -> Option<CachedGpuFrame> {
        match self.entries.get(&key).copied() {
            Some(frame) if is_live(frame.texture) => Some(frame),
            Some(_) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn clear(&mut self) -> Vec<CachedGpuFrame> {
        self.entries.drain().into_iter().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Combined stats across both tiers.
pub fn combined_stats(
    cpu: &CompositeFrameCache,
    gpu: &GpuPromotionCache,
) -> CompositeCacheStats {
    let mut stats = CompositeCacheStats::default();
    cpu.stats_into(&mut stats);
    stats.gpu_frames = gpu.len();
    stats.gpu_max_frames = gpu.entries.capacity();
    stats
}
