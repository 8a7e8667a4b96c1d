//! `fl-cache` — the engine's three cache tiers.
//!
//! 1. [`scrub::ScrubFrameCache`] — decoded frames keyed by
//!    `(source, quantized time)` so scrubbing back to a visited position is
//!    instant.
//! 2. [`last_good::LastGoodFrameCache`] — the most recent good frame per
//!    source, shown during seeks and decoder stalls instead of black.
//! 3. [`composite::CompositeFrameCache`] — fully composited frames (CPU
//!    bitmaps, count- and byte-bounded) for RAM-preview playback, with a
//!    small GPU-resident promotion cache on top.
//!
//! Every time-keyed tier shares one quantization grid ([`quantize`]), so
//! independently-populated caches agree on which positions are the same
//! frame. The stores are single-threaded by design: only the render thread
//! touches them.

pub mod composite;
pub mod last_good;
pub mod lru;
pub mod quantize;
pub mod scrub;

pub use composite::{combined_stats, CompositeCacheStats, CompositeFrameCache, GpuPromotionCache};
pub use last_good::LastGoodFrameCache;
pub use lru::LruMap;
pub use quantize::{FrameKey, FrameQuantizer};
pub use scrub::{CachedGpuFrame, ScrubCacheStats, ScrubFrameCache};
