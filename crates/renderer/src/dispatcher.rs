//! The render dispatcher: one frame, start to finish.
//!
//! `render` runs the full pipeline — collect layers, pre-render nested
//! compositions, ping-pong composite, draw to every registered surface,
//! submit — and is the engine's public face together with the cached-frame
//! fast path and the cache-control calls.
//!
//! A GPU submission failure abandons the frame at the single submit site;
//! the next frame re-attempts from scratch once the device recovers. No
//! failure of any one layer's source escapes the loop as a panic.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use fl_common::config::EngineConfig;
use fl_common::error::{
    CompositeError, EngineError, EngineResult, GpuError, RenderError,
};
use fl_common::gpu::{GpuBackend, TextureDesc, TextureHandle};
use fl_common::layer::{Drawable, Layer, LayerSource};
use fl_common::sample::CpuFrame;
use fl_common::types::{Resolution, SourceId, SurfaceId, TimeCode};

use fl_cache::{
    combined_stats, CachedGpuFrame, CompositeCacheStats, CompositeFrameCache, FrameQuantizer,
    GpuPromotionCache, ScrubCacheStats,
};
use fl_compositor::{
    composite_layers, CompositeLayer, CompositeOutput, CompositorPipeline, EffectsPipeline,
    PingPongTargets,
};

use crate::collector::{DecoderTag, FrameCaches, LayerCollector, ResolveCtx, VideoPorts};
use crate::context::GpuContext;
use crate::nested::{
    Composition, CompositionRegistry, NestedCtx, NestedRenderer, PoolStats,
};
use crate::output::{draw_to_surface, OutputSlice};
use crate::textures::{MaskProvider, MaskTextureManager, NoMasks, TextureManager};

/// Aggregate statistics across every cache tier and the texture pool.
#[derive(Clone, Debug, Default)]
pub struct EngineCacheStats {
    pub scrub: ScrubCacheStats,
    pub composite: CompositeCacheStats,
    pub last_good_sources: usize,
    pub pool: PoolStats,
}

/// Drives one frame per tick across all engine components.
pub struct RenderDispatcher {
    context: GpuContext,
    quantizer: FrameQuantizer,
    caches: FrameCaches,
    composite_cache: CompositeFrameCache,
    promotion: GpuPromotionCache,
    textures: TextureManager,
    masks: MaskTextureManager,
    collector: LayerCollector,
    pipeline: CompositorPipeline,
    targets: Option<PingPongTargets>,
    nested: NestedRenderer,
    comps: CompositionRegistry,
    ports: VideoPorts,
    effects: Option<Box<dyn EffectsPipeline>>,
    mask_provider: Box<dyn MaskProvider>,
    output_resolution: Resolution,
    export_mode: bool,
}

impl std::fmt::Debug for RenderDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderDispatcher").finish_non_exhaustive()
    }
}

impl RenderDispatcher {
    /// Select a backend and build the engine.
    pub fn new(config: EngineConfig, resolution: Resolution) -> EngineResult<Self> {
        let context = GpuContext::initialize(false);
        Self::build(context, config, resolution)
    }

    /// Build the engine around an existing backend (tests, embedders).
    pub fn with_backend(
        backend: Arc<dyn GpuBackend>,
        config: EngineConfig,
        resolution: Resolution,
    ) -> EngineResult<Self> {
        Self::build(GpuContext::with_backend(backend), config, resolution)
    }

    fn build(
        context: GpuContext,
        config: EngineConfig,
        resolution: Resolution,
    ) -> EngineResult<Self> {
        config.validate()?;
        info!(
            resolution = %resolution,
            backend = context.backend().backend_name(),
            "Render dispatcher created"
        );
        Ok(Self {
            context,
            quantizer: FrameQuantizer::new(config.cache.quantize_fps),
            caches: FrameCaches::new(&config.cache),
            composite_cache: CompositeFrameCache::new(
                config.cache.composite_max_frames,
                config.cache.composite_max_bytes,
            ),
            promotion: GpuPromotionCache::new(config.cache.gpu_promotion_max_frames),
            textures: TextureManager::new(),
            masks: MaskTextureManager::new(),
            collector: LayerCollector::new(),
            pipeline: CompositorPipeline::new(),
            targets: None,
            nested: NestedRenderer::new(),
            comps: CompositionRegistry::new(),
            ports: VideoPorts::new(),
            effects: None,
            mask_provider: Box::new(NoMasks),
            output_resolution: resolution,
            export_mode: false,
        })
    }

    // -- Host wiring --

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn register_surface(&mut self, id: SurfaceId, width: u32, height: u32) -> EngineResult<()> {
        self.context.register_surface(id, width, height)?;
        Ok(())
    }

    pub fn remove_surface(&mut self, id: &SurfaceId) {
        self.context.remove_surface(id);
    }

    /// Add a corner-pin slice to a surface's output layout.
    pub fn add_output_slice(&mut self, id: &SurfaceId, slice: OutputSlice) -> EngineResult<()> {
        let surface = self
            .context
            .surface_mut(id)
            .ok_or_else(|| RenderError::UnknownSurface(id.0.clone()))?;
        surface.add_slice(slice);
        Ok(())
    }

    /// Read a surface back as packed RGBA (export capture; off the hot path).
    pub fn surface_pixels(&self, id: &SurfaceId) -> EngineResult<Vec<u8>> {
        let surface = self
            .context
            .surface(id)
            .ok_or_else(|| RenderError::UnknownSurface(id.0.clone()))?;
        Ok(self.context.backend().readback(surface.texture)?)
    }

    /// Per-source decode feeds, written by the host before each frame.
    pub fn ports_mut(&mut self) -> &mut VideoPorts {
        &mut self.ports
    }

    pub fn collector(&self) -> &LayerCollector {
        &self.collector
    }

    pub fn collector_mut(&mut self) -> &mut LayerCollector {
        &mut self.collector
    }

    /// Hand the engine a still/canvas bitmap for an image or text layer.
    pub fn register_still(&mut self, id: SourceId, revision: u64, bitmap: CpuFrame) {
        self.textures
            .register_still(self.context.backend(), id, revision, bitmap);
    }

    pub fn register_composition(&mut self, id: SourceId, comp: Composition) {
        self.nested.invalidate(&id);
        self.comps.register(id, comp);
    }

    /// Force a composition to re-render on its next request.
    pub fn invalidate_composition(&mut self, id: &SourceId) {
        self.nested.invalidate(id);
    }

    pub fn set_effects_pipeline(&mut self, effects: Box<dyn EffectsPipeline>) {
        self.effects = Some(effects);
    }

    pub fn set_mask_provider(&mut self, provider: Box<dyn MaskProvider>) {
        self.mask_provider = provider;
    }

    /// Sequential export: frame-exact decoding only, no cached fallbacks.
    pub fn set_export_mode(&mut self, export: bool) {
        self.export_mode = export;
    }

    pub fn set_resolution(&mut self, resolution: Resolution) {
        if resolution != self.output_resolution {
            self.output_resolution = resolution;
            // Cached composites are at the old size.
            self.composite_cache.clear();
            for frame in self.promotion.clear() {
                self.context.backend().destroy_texture(frame.texture);
            }
        }
    }

    pub fn current_decoder(&self) -> DecoderTag {
        self.collector.current_decoder()
    }

    pub fn has_active_video(&self) -> bool {
        self.collector.has_active_video()
    }

    // -- Frame rendering --

    /// Draw one frame to every registered output surface.
    pub fn render(&mut self, layers: &[Layer], time: TimeCode) -> EngineResult<()> {
        self.render_internal(layers, time, None)
    }

    /// Independent composite to one specific named output.
    pub fn render_to_surface(
        &mut self,
        surface: &SurfaceId,
        layers: &[Layer],
        time: TimeCode,
    ) -> EngineResult<()> {
        if self.context.surface(surface).is_none() {
            return Err(RenderError::UnknownSurface(surface.0.clone()).into());
        }
        self.render_internal(layers, time, Some(surface))
    }

    fn render_internal(
        &mut self,
        layers: &[Layer],
        time: TimeCode,
        only: Option<&SurfaceId>,
    ) -> EngineResult<()> {
        if self.context.is_lost() {
            warn!("Device lost; frame abandoned");
            return Ok(());
        }
        let out = match self.composite_frame(layers, time) {
            Ok(out) => out,
            Err(e) if is_device_loss(&e) => {
                error!(error = %e, "Device lost mid-frame; frame abandoned");
                self.context.note_lost();
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        debug!(
            time_secs = time.as_secs(),
            layers = out.layers_processed,
            decoder = %self.collector.current_decoder(),
            "Frame composited"
        );
        self.draw_and_submit(out.texture, only)
    }

    /// Collect, pre-render nested comps, and run the ping-pong loop.
    /// Everything up to (but not including) the output draw.
    fn composite_frame(
        &mut self,
        layers: &[Layer],
        time: TimeCode,
    ) -> EngineResult<CompositeOutput> {
        let backend = self.context.backend_arc();
        backend.begin_frame();
        self.pipeline.begin_frame();

        let mut collected = {
            let mut rctx = ResolveCtx {
                backend: backend.as_ref(),
                textures: &mut self.textures,
                caches: &mut self.caches,
                quantizer: self.quantizer,
                time,
                export_mode: self.export_mode,
            };
            self.collector.collect(&mut rctx, &self.ports, layers)
        };

        for data in &mut collected {
            let comp_id = match &data.layer.source {
                Some(LayerSource::NestedComposition { comp_id, .. }) => comp_id.clone(),
                _ => continue,
            };
            let mut nctx = NestedCtx {
                backend: backend.as_ref(),
                pipeline: &mut self.pipeline,
                collector: &mut self.collector,
                textures: &mut self.textures,
                masks: &mut self.masks,
                caches: &mut self.caches,
                ports: &self.ports,
                comps: &self.comps,
                mask_provider: self.mask_provider.as_mut(),
                effects: self.effects.as_deref_mut(),
                quantizer: self.quantizer,
                export_mode: self.export_mode,
            };
            match self.nested.render(&mut nctx, &comp_id, time, 0) {
                Ok(texture) => data.drawable = Drawable::Texture(texture),
                Err(RenderError::Gpu(GpuError::DeviceLost)) => {
                    return Err(GpuError::DeviceLost.into());
                }
                Err(e) => {
                    warn!(comp = %comp_id, error = %e, "Nested pre-render failed; layer omitted");
                }
            }
        }

        let mut resolved_masks = Vec::with_capacity(collected.len());
        for data in &collected {
            resolved_masks.push(self.masks.resolve(
                backend.as_ref(),
                &data.layer,
                self.mask_provider.as_mut(),
            )?);
        }
        let composite_list: Vec<CompositeLayer<'_>> = collected
            .iter()
            .zip(resolved_masks.iter())
            .map(|(data, mask)| CompositeLayer { data, mask: *mask })
            .collect();

        self.ensure_targets(backend.as_ref())?;
        let targets = self.targets.as_mut().expect("targets just ensured");
        let out = composite_layers(
            backend.as_ref(),
            &mut self.pipeline,
            targets,
            &composite_list,
            self.effects.as_deref_mut(),
            time,
        )?;
        Ok(out)
    }

    /// Draw a composited texture to the requested surfaces and submit.
    /// Submission failure is caught here, logged, and the frame abandoned.
    fn draw_and_submit(
        &mut self,
        composite: TextureHandle,
        only: Option<&SurfaceId>,
    ) -> EngineResult<()> {
        let backend = self.context.backend_arc();
        let white = self.masks.fallback(backend.as_ref())?;
        for surface in self.context.surfaces() {
            if let Some(filter) = only {
                if surface.id != *filter {
                    continue;
                }
            }
            draw_to_surface(backend.as_ref(), composite, surface, white)?;
        }
        match backend.end_frame() {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "GPU submission failed; frame abandoned");
                if matches!(e, GpuError::DeviceLost) {
                    self.context.note_lost();
                }
                Ok(())
            }
        }
    }

    fn ensure_targets(&mut self, backend: &dyn GpuBackend) -> Result<(), GpuError> {
        let width = self.output_resolution.width;
        let height = self.output_resolution.height;
        let usable = self.targets.as_ref().is_some_and(|t| {
            t.width() == width && t.height() == height && backend.texture_desc(t.front()).is_some()
        });
        if usable {
            return Ok(());
        }
        if let Some(old) = self.targets.take() {
            old.destroy(backend);
        }
        self.targets = Some(PingPongTargets::new(backend, width, height)?);
        Ok(())
    }

    // -- Composite / RAM-preview cache --

    /// Attempt an instant draw of a previously cached composite. Returns
    /// whether a cached frame was drawn.
    pub fn render_cached_frame(&mut self, time: TimeCode) -> EngineResult<bool> {
        if self.context.is_lost() {
            return Ok(false);
        }
        let backend = self.context.backend_arc();
        let key = self.quantizer.key(time);

        let is_live = |tex| backend.texture_desc(tex).is_some();
        let gpu_frame = match self.promotion.get(key, is_live) {
            Some(frame) => Some(frame),
            None => match self.composite_cache.get(key) {
                Some(cpu) => {
                    // Promote: one upload now, then GPU-resident replays.
                    let texture = backend.create_texture(&TextureDesc::rgba_sampled(
                        cpu.width,
                        cpu.height,
                        "promoted-frame",
                    ))?;
                    backend.upload_texture(texture, &cpu.pixels)?;
                    let frame = CachedGpuFrame {
                        texture,
                        width: cpu.width,
                        height: cpu.height,
                    };
                    if let Some(evicted) = self.promotion.insert(key, frame) {
                        backend.destroy_texture(evicted.texture);
                    }
                    debug!(frame = key.0, "Promoted cached composite to GPU");
                    Some(frame)
                }
                None => None,
            },
        };

        match gpu_frame {
            Some(frame) => {
                backend.begin_frame();
                self.pipeline.begin_frame();
                self.draw_and_submit(frame.texture, None)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Composite a frame and store it in the RAM-preview cache without
    /// touching the output surfaces.
    pub fn cache_frame_at_time(&mut self, layers: &[Layer], time: TimeCode) -> EngineResult<()> {
        let out = self.composite_frame(layers, time)?;
        let backend = self.context.backend_arc();
        let pixels = backend.readback(out.texture)?;
        let (width, height) = (self.output_resolution.width, self.output_resolution.height);
        let key = self.quantizer.key(time);
        self.composite_cache
            .insert(key, CpuFrame::new(width, height, pixels));
        if let Err(e) = backend.end_frame() {
            error!(error = %e, "Submission failed while caching frame");
            if matches!(e, GpuError::DeviceLost) {
                self.context.note_lost();
            }
        }
        Ok(())
    }

    /// The cached composite at a time, if any.
    pub fn get_cached_frame(&mut self, time: TimeCode) -> Option<&CpuFrame> {
        let key = self.quantizer.key(time);
        self.composite_cache.get(key)
    }

    /// Drop cached frames: for one source (scrub/last-good tiers) or, with
    /// `None`, every tier including the composite cache.
    pub fn clear_cache(&mut self, source: Option<&SourceId>) {
        let backend = self.context.backend_arc();
        match source {
            Some(id) => {
                for frame in self.caches.scrub.clear_source(id) {
                    backend.destroy_texture(frame.texture);
                }
                if let Some(frame) = self.caches.last_good.clear_source(id) {
                    backend.destroy_texture(frame.texture);
                }
                self.nested.invalidate(id);
                info!(source = %id, "Cleared per-source caches");
            }
            None => {
                for frame in self.caches.scrub.clear() {
                    backend.destroy_texture(frame.texture);
                }
                for frame in self.caches.last_good.clear() {
                    backend.destroy_texture(frame.texture);
                }
                for frame in self.promotion.clear() {
                    backend.destroy_texture(frame.texture);
                }
                self.composite_cache.clear();
                self.nested.invalidate_all();
                info!("Cleared all caches");
            }
        }
    }

    pub fn cache_stats(&self) -> EngineCacheStats {
        EngineCacheStats {
            scrub: self.caches.scrub.stats(),
            composite: combined_stats(&self.composite_cache, &self.promotion),
            last_good_sources: self.caches.last_good.len(),
            pool: self.nested.pool_stats(),
        }
    }

    // -- Lifecycle --

    /// React to a device loss: every GPU handle is dead. CPU-side state
    /// (still bitmaps, the composite cache, layer snapshots) survives and
    /// GPU state is rebuilt lazily after recovery.
    pub fn handle_device_lost(&mut self) {
        warn!("Handling device loss");
        self.context.handle_device_lost();
        self.pipeline.reset();
        self.textures.reset();
        self.masks.reset();
        self.nested.reset();
        self.targets = None;
        // Handles in the cache tiers died with the device; drop the entries
        // without destroy calls.
        let _ = self.caches.scrub.clear();
        let _ = self.caches.last_good.clear();
        let _ = self.promotion.clear();
    }

    /// Recreate surfaces against a restored device.
    pub fn recover(&mut self) -> EngineResult<()> {
        self.context.recover()?;
        Ok(())
    }

    /// Orderly teardown while the device is still alive.
    pub fn destroy(&mut self) {
        let backend = self.context.backend_arc();
        self.clear_cache(None);
        self.textures.destroy_all(backend.as_ref());
        self.masks.destroy_all(backend.as_ref());
        self.nested.destroy_all(backend.as_ref());
        if let Some(targets) = self.targets.take() {
            targets.destroy(backend.as_ref());
        }
        self.pipeline.reset();
        self.context.destroy();
        info!("Render dispatcher destroyed");
    }
}

fn is_device_loss(e: &EngineError) -> bool {
    matches!(
        e,
        EngineError::Gpu(GpuError::DeviceLost)
            | EngineError::Composite(CompositeError::Gpu(GpuError::DeviceLost))
            | EngineError::Render(RenderError::Gpu(GpuError::DeviceLost))
            | EngineError::Render(RenderError::Composite(CompositeError::Gpu(
                GpuError::DeviceLost
            )))
    )
}
