//! `fl-renderer` — render orchestration for the Frameloom engine.
//!
//! Each display tick, [`RenderDispatcher::render`] turns the host's layer
//! snapshot into a composited frame on every registered output surface:
//!
//! 1. [`collector`] resolves each visible layer to a drawable through the
//!    decode-strategy cascade (hardware helper, direct frame, stream
//!    player, media element, caches),
//! 2. [`nested`] pre-renders sub-compositions into stable offscreen
//!    textures with pooled ping-pong buffers and frame-level memoization,
//! 3. `fl_compositor` runs the ping-pong blend loop,
//! 4. [`output`] maps the result onto each surface, plain or corner-pinned,
//! 5. the frame is submitted; a submission failure abandons the frame and
//!    the next tick retries once the device recovers.
//!
//! The [`dispatcher`] also owns the three cache tiers (scrub, last-good,
//! RAM preview + GPU promotion) and exposes the cached-frame fast path for
//! instant scrubbing and preview playback.

pub mod collector;
pub mod context;
pub mod dispatcher;
pub mod nested;
pub mod output;
pub mod textures;

pub use collector::{
    DecodeStrategy, DecoderTag, FrameCaches, LayerCollector, MediaElementState, ResolveCtx,
    ResolvedSource, VideoPort, VideoPorts, WarmUpTracker,
};
pub use context::GpuContext;
pub use dispatcher::{EngineCacheStats, RenderDispatcher};
pub use nested::{Composition, CompositionRegistry, NestedRenderer, PoolStats, TexturePool};
pub use output::{OutputSlice, OutputSurface};
pub use textures::{MaskProvider, MaskTextureManager, NoMasks, TextureManager};
