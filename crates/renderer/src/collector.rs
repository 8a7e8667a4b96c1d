//! Per-frame layer collection.
//!
//! Given the frame's layer snapshot, resolve every visible layer to a
//! drawable GPU resource. Video layers walk an ordered cascade of decode
//! strategies — hardware-helper bitmap, direct decoded-frame handle,
//! elementary-stream player, media-element surface, then the scrub and
//! last-good caches — and short-circuit on the first success. Still images
//! come from the by-reference texture cache; nested compositions emit a
//! placeholder the nested renderer fills in later in the same frame.
//!
//! A layer whose source produces nothing this frame is not an error: it is
//! omitted and retried next frame.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, warn};

use fl_common::config::CacheConfig;
use fl_common::gpu::{ExternalFrame, GpuBackend};
use fl_common::layer::{Drawable, Layer, LayerRenderData, LayerSource};
use fl_common::sample::{CpuFrame, DecodedFrame};
use fl_common::types::{SourceId, TimeCode};
use fl_common::PixelFormat;

use fl_cache::{CachedGpuFrame, FrameQuantizer, LastGoodFrameCache, ScrubFrameCache};

use crate::textures::TextureManager;

/// Which decode path produced the most recent video drawable. Consumed by
/// the render loop's diagnostics overlay and idle/throttle logic.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecoderTag {
    HardwareHelper,
    DirectFrame,
    StreamPlayer,
    MediaElement,
    ScrubCache,
    LastGood,
    Idle,
}

impl fmt::Display for DecoderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HardwareHelper => "hardware-helper",
            Self::DirectFrame => "direct-frame",
            Self::StreamPlayer => "stream-player",
            Self::MediaElement => "media-element",
            Self::ScrubCache => "scrub-cache",
            Self::LastGood => "last-good",
            Self::Idle => "idle",
        };
        write!(f, "{name}")
    }
}

/// Presentation-surface state of a native media element, as reported by the
/// host each frame.
#[derive(Clone, Debug, Default)]
pub struct MediaElementState {
    /// Element readiness; imports require at least 2 (current frame data
    /// available).
    pub ready_state: u8,
    pub seeking: bool,
    /// The element's current presentation surface.
    pub surface: Option<CpuFrame>,
}

/// Everything the host feeds the collector for one video source.
#[derive(Default)]
pub struct VideoPort {
    /// Latest bitmap pulled from a hardware-helper decoder.
    pub helper_bitmap: Option<CpuFrame>,
    /// Decoded frame handle from the parallel decode path.
    pub direct_frame: Option<DecodedFrame>,
    /// Current frame of the elementary-stream player.
    pub player_frame: Option<DecodedFrame>,
    /// Native media-element fallback surface.
    pub media_element: Option<MediaElementState>,
    /// A seek/scrub is in flight; fresh imports would flicker, so cached
    /// frames win until the decoder catches up.
    pub scrubbing: bool,
    /// The source's media time at the playhead, used as the cache key.
    pub last_known_time: Option<TimeCode>,
}

/// Per-source feed registry, written by the host before each frame.
#[derive(Default)]
pub struct VideoPorts {
    ports: HashMap<SourceId, VideoPort>,
}

impl VideoPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port_mut(&mut self, id: &SourceId) -> &mut VideoPort {
        self.ports.entry(id.clone()).or_default()
    }

    pub fn get(&self, id: &SourceId) -> Option<&VideoPort> {
        self.ports.get(id)
    }

    pub fn remove(&mut self, id: &SourceId) {
        self.ports.remove(id);
    }
}

/// Per-element GPU warm-up bookkeeping.
///
/// Immediately after a media element reloads, zero-copy imports can return
/// valid-looking but black frames until one play cycle has activated the
/// decode surface. Until the host confirms that cycle, the collector
/// prefers cached frames over the element's surface.
#[derive(Default)]
pub struct WarmUpTracker {
    confirmed: HashSet<SourceId>,
}

impl WarmUpTracker {
    pub fn confirm_play_cycle(&mut self, id: &SourceId) {
        self.confirmed.insert(id.clone());
    }

    /// The element reloaded; its surface is unreliable again.
    pub fn mark_reloaded(&mut self, id: &SourceId) {
        self.confirmed.remove(id);
    }

    pub fn is_confirmed(&self, id: &SourceId) -> bool {
        self.confirmed.contains(id)
    }
}

/// The two cache tiers the collector reads and writes.
pub struct FrameCaches {
    pub scrub: ScrubFrameCache,
    pub last_good: LastGoodFrameCache,
}

impl FrameCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            scrub: ScrubFrameCache::new(config.scrub_max_frames),
            last_good: LastGoodFrameCache::new(config.last_good_refresh_interval),
        }
    }
}

/// Shared state handed down the strategy cascade.
pub struct ResolveCtx<'a> {
    pub backend: &'a dyn GpuBackend,
    pub textures: &'a mut TextureManager,
    pub caches: &'a mut FrameCaches,
    pub quantizer: FrameQuantizer,
    /// Composition time of the frame being rendered.
    pub time: TimeCode,
    /// Sequential export: only frame-exact paths are acceptable, so the
    /// media-element and cache-fallback strategies stand down.
    pub export_mode: bool,
}

/// A successful resolution: the drawable plus what the collector needs for
/// bookkeeping and cache population.
pub struct ResolvedSource<'p> {
    pub drawable: Drawable,
    pub width: u32,
    pub height: u32,
    /// Content changes every frame; bypass persistent bind-group caches.
    pub dynamic: bool,
    pub tag: DecoderTag,
    /// RGBA bytes backing the frame, when available, for opportunistic
    /// scrub/last-good cache population.
    pub pixels: Option<&'p [u8]>,
}

/// One rung of the resolution cascade. Strategies are self-gating: a rung
/// that does not apply returns `None` and the walk continues.
pub trait DecodeStrategy {
    fn name(&self) -> &'static str;

    fn try_resolve<'p>(
        &self,
        ctx: &mut ResolveCtx<'_>,
        warm: &WarmUpTracker,
        source_id: &SourceId,
        port: &'p VideoPort,
    ) -> Option<ResolvedSource<'p>>;
}

fn import_decoded<'p>(
    ctx: &mut ResolveCtx<'_>,
    source_id: &SourceId,
    frame: &'p DecodedFrame,
    tag: DecoderTag,
) -> Option<ResolvedSource<'p>> {
    let external = ExternalFrame {
        width: frame.width,
        height: frame.height,
        format: frame.format,
        data: &frame.data,
    };
    match ctx.textures.import_frame(ctx.backend, &external) {
        Ok(handle) => Some(ResolvedSource {
            drawable: Drawable::External(handle),
            width: frame.width,
            height: frame.height,
            dynamic: true,
            tag,
            pixels: (frame.format == PixelFormat::Rgba8).then_some(frame.data.as_slice()),
        }),
        Err(e) => {
            warn!(source = %source_id, error = %e, "External frame import failed");
            None
        }
    }
}

/// 1. Hardware-helper decoder: latest decoded bitmap, wrapped in the
/// source's size-matched reusable texture.
struct HelperBitmapStrategy;

impl DecodeStrategy for HelperBitmapStrategy {
    fn name(&self) -> &'static str {
        "helper-bitmap"
    }

    fn try_resolve<'p>(
        &self,
        ctx: &mut ResolveCtx<'_>,
        _warm: &WarmUpTracker,
        source_id: &SourceId,
        port: &'p VideoPort,
    ) -> Option<ResolvedSource<'p>> {
        let bitmap = port.helper_bitmap.as_ref()?;
        match ctx.textures.upload_video_bitmap(ctx.backend, source_id, bitmap) {
            Ok(texture) => Some(ResolvedSource {
                drawable: Drawable::Texture(texture),
                width: bitmap.width,
                height: bitmap.height,
                dynamic: true,
                tag: DecoderTag::HardwareHelper,
                pixels: Some(&bitmap.pixels),
            }),
            Err(e) => {
                warn!(source = %source_id, error = %e, "Helper bitmap upload failed");
                None
            }
        }
    }
}

/// 2. Direct decoded-frame handle from the parallel decode path.
struct DirectFrameStrategy;

impl DecodeStrategy for DirectFrameStrategy {
    fn name(&self) -> &'static str {
        "direct-frame"
    }

    fn try_resolve<'p>(
        &self,
        ctx: &mut ResolveCtx<'_>,
        _warm: &WarmUpTracker,
        source_id: &SourceId,
        port: &'p VideoPort,
    ) -> Option<ResolvedSource<'p>> {
        if port.scrubbing {
            return None;
        }
        let frame = port.direct_frame.as_ref()?;
        import_decoded(ctx, source_id, frame, DecoderTag::DirectFrame)
    }
}

/// 3. Elementary-stream player's current frame.
struct StreamPlayerStrategy;

impl DecodeStrategy for StreamPlayerStrategy {
    fn name(&self) -> &'static str {
        "stream-player"
    }

    fn try_resolve<'p>(
        &self,
        ctx: &mut ResolveCtx<'_>,
        _warm: &WarmUpTracker,
        source_id: &SourceId,
        port: &'p VideoPort,
    ) -> Option<ResolvedSource<'p>> {
        if port.scrubbing {
            return None;
        }
        let frame = port.player_frame.as_ref()?;
        import_decoded(ctx, source_id, frame, DecoderTag::StreamPlayer)
    }
}

/// 4. Native media-element surface, gated on readiness, not seeking, and
/// the per-element warm-up guard.
struct MediaElementStrategy;

impl DecodeStrategy for MediaElementStrategy {
    fn name(&self) -> &'static str {
        "media-element"
    }

    fn try_resolve<'p>(
        &self,
        ctx: &mut ResolveCtx<'_>,
        warm: &WarmUpTracker,
        source_id: &SourceId,
        port: &'p VideoPort,
    ) -> Option<ResolvedSource<'p>> {
        if ctx.export_mode || port.scrubbing {
            return None;
        }
        let element = port.media_element.as_ref()?;
        if element.ready_state < 2 || element.seeking {
            return None;
        }
        if !warm.is_confirmed(source_id) {
            debug!(source = %source_id, "Media element not warmed up; preferring cached frame");
            return None;
        }
        let surface = element.surface.as_ref()?;
        let external = ExternalFrame {
            width: surface.width,
            height: surface.height,
            format: PixelFormat::Rgba8,
            data: &surface.pixels,
        };
        match ctx.textures.import_frame(ctx.backend, &external) {
            Ok(handle) => Some(ResolvedSource {
                drawable: Drawable::External(handle),
                width: surface.width,
                height: surface.height,
                dynamic: true,
                tag: DecoderTag::MediaElement,
                pixels: Some(&surface.pixels),
            }),
            Err(e) => {
                warn!(source = %source_id, error = %e, "Media element import failed");
                None
            }
        }
    }
}

/// 5. Scrub cache, then the last-good frame. Serves seeks in progress and
/// any frame where no fresh decode arrived; never used during export.
struct CachedFrameStrategy;

impl DecodeStrategy for CachedFrameStrategy {
    fn name(&self) -> &'static str {
        "cached-frame"
    }

    fn try_resolve<'p>(
        &self,
        ctx: &mut ResolveCtx<'_>,
        _warm: &WarmUpTracker,
        source_id: &SourceId,
        port: &'p VideoPort,
    ) -> Option<ResolvedSource<'p>> {
        if ctx.export_mode {
            return None;
        }
        let backend = ctx.backend;
        let is_live = |tex| backend.texture_desc(tex).is_some();
        let media_time = port.last_known_time.unwrap_or(ctx.time);
        let key = ctx.quantizer.key(media_time);

        if let Some(frame) = ctx.caches.scrub.get(source_id, key, is_live) {
            return Some(cached(frame, DecoderTag::ScrubCache));
        }
        ctx.caches
            .last_good
            .get(source_id, is_live)
            .map(|frame| cached(frame, DecoderTag::LastGood))
    }
}

fn cached(frame: CachedGpuFrame, tag: DecoderTag) -> ResolvedSource<'static> {
    ResolvedSource {
        drawable: Drawable::Texture(frame.texture),
        width: frame.width,
        height: frame.height,
        // Which cached texture serves a layer can change every frame, so
        // persistent bind groups must not latch onto one.
        dynamic: true,
        tag,
        pixels: None,
    }
}

fn default_strategies() -> Vec<Box<dyn DecodeStrategy>> {
    vec![
        Box::new(HelperBitmapStrategy),
        Box::new(DirectFrameStrategy),
        Box::new(StreamPlayerStrategy),
        Box::new(MediaElementStrategy),
        Box::new(CachedFrameStrategy),
    ]
}

/// Resolves the frame's layer snapshot into back-to-front render data.
pub struct LayerCollector {
    strategies: Vec<Box<dyn DecodeStrategy>>,
    warm_ups: WarmUpTracker,
    current_decoder: DecoderTag,
    active_video: bool,
}

impl Default for LayerCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerCollector {
    pub fn new() -> Self {
        Self {
            strategies: default_strategies(),
            warm_ups: WarmUpTracker::default(),
            current_decoder: DecoderTag::Idle,
            active_video: false,
        }
    }

    /// Diagnostic tag of the decode path that served the most recent video
    /// layer.
    pub fn current_decoder(&self) -> DecoderTag {
        self.current_decoder
    }

    /// Whether any video layer resolved this frame (drives the render
    /// loop's idle throttling).
    pub fn has_active_video(&self) -> bool {
        self.active_video
    }

    pub fn warm_ups(&self) -> &WarmUpTracker {
        &self.warm_ups
    }

    pub fn warm_ups_mut(&mut self) -> &mut WarmUpTracker {
        &mut self.warm_ups
    }

    /// Resolve `layers` (front-to-back, as stored) into back-to-front
    /// render data, omitting layers with nothing to draw this frame.
    pub fn collect(
        &mut self,
        ctx: &mut ResolveCtx<'_>,
        ports: &VideoPorts,
        layers: &[Layer],
    ) -> Vec<LayerRenderData> {
        self.active_video = false;
        self.current_decoder = DecoderTag::Idle;
        let mut out = Vec::with_capacity(layers.len());

        // Lower indices render on top, so walk in reverse for
        // back-to-front order.
        for layer in layers.iter().rev() {
            if !layer.is_renderable() {
                continue;
            }
            let source = layer.source.as_ref().expect("renderable implies source");
            match source {
                LayerSource::Video { source_id } => {
                    let Some(port) = ports.get(source_id) else {
                        debug!(layer = %layer.id, source = %source_id, "No video port; layer omitted");
                        continue;
                    };
                    let Some(resolved) = self.resolve_video(ctx, source_id, port) else {
                        debug!(layer = %layer.id, source = %source_id, "No drawable this frame; layer omitted");
                        continue;
                    };
                    self.current_decoder = resolved.tag;
                    self.active_video = true;
                    out.push(LayerRenderData {
                        layer: layer.clone(),
                        drawable: resolved.drawable,
                        is_video: true,
                        is_dynamic: resolved.dynamic,
                        source_width: resolved.width,
                        source_height: resolved.height,
                    });
                }
                LayerSource::Image {
                    source_id,
                    revision,
                }
                | LayerSource::TextOrSolid {
                    source_id,
                    revision,
                } => {
                    let Some((texture, width, height)) =
                        ctx.textures.still_texture(ctx.backend, source_id, *revision)
                    else {
                        debug!(layer = %layer.id, source = %source_id, "Still content not ready; layer omitted");
                        continue;
                    };
                    out.push(LayerRenderData {
                        layer: layer.clone(),
                        drawable: Drawable::Texture(texture),
                        is_video: false,
                        is_dynamic: false,
                        source_width: width,
                        source_height: height,
                    });
                }
                LayerSource::NestedComposition { width, height, .. } => {
                    out.push(LayerRenderData {
                        layer: layer.clone(),
                        drawable: Drawable::Pending,
                        is_video: false,
                        is_dynamic: true,
                        source_width: *width,
                        source_height: *height,
                    });
                }
            }
        }
        out
    }

    fn resolve_video<'p>(
        &self,
        ctx: &mut ResolveCtx<'_>,
        source_id: &SourceId,
        port: &'p VideoPort,
    ) -> Option<ResolvedSource<'p>> {
        for strategy in &self.strategies {
            if let Some(resolved) = strategy.try_resolve(ctx, &self.warm_ups, source_id, port) {
                if let Some(pixels) = resolved.pixels {
                    populate_caches(ctx, source_id, port, pixels, resolved.width, resolved.height);
                }
                return Some(resolved);
            }
        }
        None
    }
}

/// Opportunistically copy a freshly decoded frame into the scrub cache (so
/// revisiting this position is instant) and the last-good cache (bounded by
/// its refresh interval so this never becomes a copy per frame).
fn populate_caches(
    ctx: &mut ResolveCtx<'_>,
    source_id: &SourceId,
    port: &VideoPort,
    pixels: &[u8],
    width: u32,
    height: u32,
) {
    if pixels.len() != width as usize * height as usize * 4 {
        return;
    }
    let media_time = port.last_known_time.unwrap_or(ctx.time);
    let key = ctx.quantizer.key(media_time);

    if !ctx.caches.scrub.contains(source_id, key) {
        match ctx.textures.create_snapshot(ctx.backend, width, height, pixels) {
            Ok(texture) => {
                let frame = CachedGpuFrame {
                    texture,
                    width,
                    height,
                };
                if let Some(evicted) = ctx.caches.scrub.insert(source_id.clone(), key, frame) {
                    ctx.backend.destroy_texture(evicted.texture);
                }
            }
            Err(e) => warn!(source = %source_id, error = %e, "Scrub cache snapshot failed"),
        }
    }

    if ctx.caches.last_good.refresh_allowed(source_id) {
        match ctx.textures.create_snapshot(ctx.backend, width, height, pixels) {
            Ok(texture) => {
                let frame = CachedGpuFrame {
                    texture,
                    width,
                    height,
                };
                if let Some(replaced) = ctx.caches.last_good.put(source_id.clone(), frame) {
                    ctx.backend.destroy_texture(replaced.texture);
                }
            }
            Err(e) => warn!(source = %source_id, error = %e, "Last-good snapshot failed"),
        }
    }
}
