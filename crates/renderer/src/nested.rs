//! Nested composition rendering.
//!
//! A nested-composition layer is rendered like a top-level frame, but into
//! an offscreen texture at the sub-composition's own resolution, then
//! copied into a stable output texture whose identity survives across
//! frames. Ping-pong buffers come from a `(width, height)`-keyed pool and
//! are held only within one frame; a frame-level memo skips re-rendering a
//! composition already produced at the same quantized time and layer count.

use std::collections::HashMap;

use tracing::{debug, warn};

use fl_common::error::{GpuError, RenderError};
use fl_common::gpu::{GpuBackend, TextureDesc, TextureHandle};
use fl_common::layer::{Drawable, Layer, LayerSource};
use fl_common::types::{SourceId, TimeCode};

use fl_cache::{FrameKey, FrameQuantizer};
use fl_compositor::{
    composite_layers, CompositeLayer, CompositorPipeline, EffectsPipeline, PingPongTargets,
    ResolvedMask,
};

use crate::collector::{FrameCaches, LayerCollector, ResolveCtx, VideoPorts};
use crate::textures::{MaskProvider, MaskTextureManager, TextureManager};

/// Recursion limit for compositions nested inside compositions.
const MAX_NESTING_DEPTH: usize = 16;

/// A sub-composition: its own resolution and layer stack.
#[derive(Clone, Debug)]
pub struct Composition {
    pub width: u32,
    pub height: u32,
    pub layers: Vec<Layer>,
}

/// Host-registered compositions, looked up by the id a layer references.
#[derive(Default)]
pub struct CompositionRegistry {
    comps: HashMap<SourceId, Composition>,
}

impl CompositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: SourceId, comp: Composition) {
        self.comps.insert(id, comp);
    }

    pub fn remove(&mut self, id: &SourceId) -> Option<Composition> {
        self.comps.remove(id)
    }

    pub fn get(&self, id: &SourceId) -> Option<&Composition> {
        self.comps.get(id)
    }

    pub fn len(&self) -> usize {
        self.comps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comps.is_empty()
    }
}

/// Pool statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub pairs: usize,
    pub in_use: usize,
    pub acquires: u64,
    pub hits: u64,
}

struct PoolEntry {
    key: (u32, u32),
    ping: TextureHandle,
    pong: TextureHandle,
    in_use: bool,
}

/// A borrowed ping-pong pair. Must be handed back via
/// [`TexturePool::release`] within the same frame.
pub struct PooledPair {
    index: usize,
    pub ping: TextureHandle,
    pub pong: TextureHandle,
}

/// Ping-pong buffer pool keyed by `(width, height)`.
#[derive(Default)]
pub struct TexturePool {
    entries: Vec<PoolEntry>,
    acquires: u64,
    hits: u64,
}

impl TexturePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a pair of render targets of the given size, reusing a free
    /// pooled pair when one exists. A pair is never handed to two
    /// concurrent borrowers.
    pub fn acquire(
        &mut self,
        backend: &dyn GpuBackend,
        width: u32,
        height: u32,
    ) -> Result<PooledPair, GpuError> {
        self.acquires += 1;
        let found = self.entries.iter().position(|e| {
            !e.in_use && e.key == (width, height) && backend.texture_desc(e.ping).is_some()
        });
        if let Some(index) = found {
            self.hits += 1;
            let entry = &mut self.entries[index];
            entry.in_use = true;
            return Ok(PooledPair {
                index,
                ping: entry.ping,
                pong: entry.pong,
            });
        }
        let ping = backend.create_texture(&TextureDesc::rgba_target(width, height, "nested-ping"))?;
        let pong = backend.create_texture(&TextureDesc::rgba_target(width, height, "nested-pong"))?;
        debug!(width, height, "Allocated nested ping-pong pair");
        self.entries.push(PoolEntry {
            key: (width, height),
            ping,
            pong,
            in_use: true,
        });
        Ok(PooledPair {
            index: self.entries.len() - 1,
            ping,
            pong,
        })
    }

    /// Return a pair to the pool.
    pub fn release(&mut self, pair: PooledPair) {
        if let Some(entry) = self.entries.get_mut(pair.index) {
            entry.in_use = false;
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pairs: self.entries.len(),
            in_use: self.entries.iter().filter(|e| e.in_use).count(),
            acquires: self.acquires,
            hits: self.hits,
        }
    }

    /// Forget every handle after device loss.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn destroy_all(&mut self, backend: &dyn GpuBackend) {
        for entry in self.entries.drain(..) {
            backend.destroy_texture(entry.ping);
            backend.destroy_texture(entry.pong);
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
struct MemoKey {
    frame: FrameKey,
    layer_count: usize,
}

struct OutputEntry {
    texture: TextureHandle,
    width: u32,
    height: u32,
}

/// Everything a nested render borrows from the engine for one frame.
pub struct NestedCtx<'a> {
    pub backend: &'a dyn GpuBackend,
    pub pipeline: &'a mut CompositorPipeline,
    pub collector: &'a mut LayerCollector,
    pub textures: &'a mut TextureManager,
    pub masks: &'a mut MaskTextureManager,
    pub caches: &'a mut FrameCaches,
    pub ports: &'a VideoPorts,
    pub comps: &'a CompositionRegistry,
    pub mask_provider: &'a mut (dyn MaskProvider + 'static),
    pub effects: Option<&'a mut (dyn EffectsPipeline + 'static)>,
    pub quantizer: FrameQuantizer,
    pub export_mode: bool,
}

/// Recursively pre-renders sub-compositions into stable output textures.
pub struct NestedRenderer {
    pool: TexturePool,
    outputs: HashMap<SourceId, OutputEntry>,
    memo: HashMap<SourceId, MemoKey>,
}

impl Default for NestedRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl NestedRenderer {
    pub fn new() -> Self {
        Self {
            pool: TexturePool::new(),
            outputs: HashMap::new(),
            memo: HashMap::new(),
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Drop a composition's memo entry so its next request re-renders
    /// (content changed).
    pub fn invalidate(&mut self, comp_id: &SourceId) {
        self.memo.remove(comp_id);
    }

    pub fn invalidate_all(&mut self) {
        self.memo.clear();
    }

    /// Render `comp_id` at `time` and return its stable output texture.
    /// A repeat request at the same quantized time and layer count serves
    /// the memoized texture without re-rendering.
    pub fn render<'ctx>(
        &mut self,
        ctx: &mut NestedCtx<'ctx>,
        comp_id: &SourceId,
        time: TimeCode,
        depth: usize,
    ) -> Result<TextureHandle, RenderError> {
        if depth >= MAX_NESTING_DEPTH {
            return Err(RenderError::NestingTooDeep {
                max_depth: MAX_NESTING_DEPTH,
                comp_id: comp_id.0.clone(),
            });
        }
        let comp = ctx
            .comps
            .get(comp_id)
            .ok_or_else(|| RenderError::CompositionNotFound(comp_id.0.clone()))?
            .clone();

        let key = MemoKey {
            frame: ctx.quantizer.key(time),
            layer_count: comp.layers.len(),
        };
        if self.memo.get(comp_id) == Some(&key) {
            if let Some(output) = self.live_output(ctx.backend, comp_id, comp.width, comp.height) {
                debug!(comp = %comp_id, frame = key.frame.0, "Nested render memoized");
                return Ok(output);
            }
            // Memo said rendered but the texture is gone: treat as a miss.
            self.memo.remove(comp_id);
        }

        // Collect the sub-composition's own layer stack.
        let mut collected = {
            let mut rctx = ResolveCtx {
                backend: ctx.backend,
                textures: &mut *ctx.textures,
                caches: &mut *ctx.caches,
                quantizer: ctx.quantizer,
                time,
                export_mode: ctx.export_mode,
            };
            ctx.collector.collect(&mut rctx, ctx.ports, &comp.layers)
        };

        // Fill placeholders for compositions nested one level deeper.
        for data in &mut collected {
            // The pool may hand this composition a different physical pair
            // next render, so persistent bind groups (which would latch onto
            // one pair's base texture) are off-limits inside nested renders.
            data.is_dynamic = true;
            let child = match &data.layer.source {
                Some(LayerSource::NestedComposition { comp_id, .. }) => comp_id.clone(),
                _ => continue,
            };
            match self.render(ctx, &child, time, depth + 1) {
                Ok(texture) => data.drawable = Drawable::Texture(texture),
                Err(e) => {
                    warn!(comp = %child, error = %e, "Nested pre-render failed; layer omitted");
                }
            }
        }

        let mut resolved_masks = Vec::with_capacity(collected.len());
        for data in &collected {
            resolved_masks.push(ctx.masks.resolve(ctx.backend, &data.layer, ctx.mask_provider)?);
        }
        let composite_list: Vec<CompositeLayer<'_>> = collected
            .iter()
            .zip(resolved_masks.iter())
            .map(|(data, mask)| CompositeLayer { data, mask: *mask })
            .collect();

        let pair = self.pool.acquire(ctx.backend, comp.width, comp.height)?;
        let mut targets = PingPongTargets::from_existing(pair.ping, pair.pong, comp.width, comp.height);
        let composited = composite_layers(
            ctx.backend,
            ctx.pipeline,
            &mut targets,
            &composite_list,
            ctx.effects.as_deref_mut(),
            time,
        )
        .map_err(RenderError::from)
        .and_then(|out| self.copy_to_output(ctx.backend, comp_id, comp.width, comp.height, out.texture));
        self.pool.release(pair);

        let output = composited?;
        self.memo.insert(comp_id.clone(), key);
        Ok(output)
    }

    /// The stable output texture for a composition, if it is still alive
    /// and the right size.
    fn live_output(
        &self,
        backend: &dyn GpuBackend,
        comp_id: &SourceId,
        width: u32,
        height: u32,
    ) -> Option<TextureHandle> {
        self.outputs
            .get(comp_id)
            .filter(|e| e.width == width && e.height == height)
            .filter(|e| backend.texture_desc(e.texture).is_some())
            .map(|e| e.texture)
    }

    fn copy_to_output(
        &mut self,
        backend: &dyn GpuBackend,
        comp_id: &SourceId,
        width: u32,
        height: u32,
        composited: TextureHandle,
    ) -> Result<TextureHandle, RenderError> {
        let texture = match self.live_output(backend, comp_id, width, height) {
            Some(tex) => tex,
            None => {
                if let Some(old) = self.outputs.remove(comp_id) {
                    backend.destroy_texture(old.texture);
                }
                let tex = backend
                    .create_texture(&TextureDesc::rgba_target(width, height, "nested-output"))?;
                self.outputs.insert(
                    comp_id.clone(),
                    OutputEntry {
                        texture: tex,
                        width,
                        height,
                    },
                );
                tex
            }
        };
        backend.copy_texture(composited, texture)?;
        Ok(texture)
    }

    /// Forget every handle after device loss.
    pub fn reset(&mut self) {
        self.pool.reset();
        self.outputs.clear();
        self.memo.clear();
    }

    pub fn destroy_all(&mut self, backend: &dyn GpuBackend) {
        self.pool.destroy_all(backend);
        for (_, entry) in self.outputs.drain() {
            backend.destroy_texture(entry.texture);
        }
        self.memo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::textures::NoMasks;
    use fl_common::config::CacheConfig;
    use fl_common::sample::CpuFrame;
    use fl_common::types::LayerId;
    use fl_gpu_hal::SoftwareBackend;

    fn src(name: &str) -> SourceId {
        SourceId::new(name)
    }

    // ── pool ───────────────────────────────────────────────────────

    #[test]
    fn pool_reuses_released_pairs() {
        let backend = SoftwareBackend::new();
        let mut pool = TexturePool::new();
        let a = pool.acquire(&backend, 8, 8).unwrap();
        let ping = a.ping;
        pool.release(a);
        let b = pool.acquire(&backend, 8, 8).unwrap();
        assert_eq!(b.ping, ping);
        assert_eq!(pool.stats().pairs, 1);
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn pool_never_double_borrows() {
        let backend = SoftwareBackend::new();
        let mut pool = TexturePool::new();
        let a = pool.acquire(&backend, 8, 8).unwrap();
        let b = pool.acquire(&backend, 8, 8).unwrap();
        assert_ne!(a.ping, b.ping);
        assert_eq!(pool.stats().pairs, 2);
        assert_eq!(pool.stats().in_use, 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn pool_keys_by_size() {
        let backend = SoftwareBackend::new();
        let mut pool = TexturePool::new();
        let a = pool.acquire(&backend, 8, 8).unwrap();
        pool.release(a);
        let b = pool.acquire(&backend, 16, 8).unwrap();
        assert_eq!(pool.stats().pairs, 2);
        assert_eq!(pool.stats().hits, 0);
        pool.release(b);
    }

    // ── renderer ───────────────────────────────────────────────────

    struct Harness {
        backend: SoftwareBackend,
        pipeline: CompositorPipeline,
        collector: LayerCollector,
        textures: TextureManager,
        masks: MaskTextureManager,
        caches: FrameCaches,
        ports: VideoPorts,
        comps: CompositionRegistry,
        provider: NoMasks,
    }

    impl Harness {
        fn new() -> Self {
            let backend = SoftwareBackend::new();
            backend.begin_frame();
            Self {
                backend,
                pipeline: CompositorPipeline::new(),
                collector: LayerCollector::new(),
                textures: TextureManager::new(),
                masks: MaskTextureManager::new(),
                caches: FrameCaches::new(&CacheConfig::default()),
                ports: VideoPorts::new(),
                comps: CompositionRegistry::new(),
                provider: NoMasks,
            }
        }

        fn ctx(&mut self) -> NestedCtx<'_> {
            NestedCtx {
                backend: &self.backend,
                pipeline: &mut self.pipeline,
                collector: &mut self.collector,
                textures: &mut self.textures,
                masks: &mut self.masks,
                caches: &mut self.caches,
                ports: &self.ports,
                comps: &self.comps,
                mask_provider: &mut self.provider,
                effects: None,
                quantizer: FrameQuantizer::default(),
                export_mode: false,
            }
        }

        fn register_solid_comp(&mut self, id: &str, w: u32, h: u32, rgba: [u8; 4]) {
            let still = format!("{id}_fill");
            self.textures.register_still(
                &self.backend,
                src(&still),
                1,
                CpuFrame::solid(w, h, rgba),
            );
            let layer = Layer::new(
                LayerId(1000 + id.len() as u64),
                LayerSource::Image {
                    source_id: src(&still),
                    revision: 1,
                },
            );
            self.comps.register(
                src(id),
                Composition {
                    width: w,
                    height: h,
                    layers: vec![layer],
                },
            );
        }
    }

    #[test]
    fn renders_comp_into_stable_output() {
        let mut h = Harness::new();
        h.register_solid_comp("comp", 2, 2, [30, 60, 90, 255]);
        let mut nested = NestedRenderer::new();

        let mut ctx = h.ctx();
        let tex = nested.render(&mut ctx, &src("comp"), TimeCode::ZERO, 0).unwrap();
        drop(ctx);
        let px = h.backend.readback(tex).unwrap();
        assert_eq!(&px[0..4], &[30, 60, 90, 255]);

        // The output texture identity is stable across frames.
        nested.invalidate(&src("comp"));
        let mut ctx = h.ctx();
        let again = nested.render(&mut ctx, &src("comp"), TimeCode::ZERO, 0).unwrap();
        assert_eq!(tex, again);
    }

    #[test]
    fn memoization_skips_rerender_until_invalidated() {
        let mut h = Harness::new();
        h.register_solid_comp("comp", 2, 2, [1, 2, 3, 255]);
        let mut nested = NestedRenderer::new();

        let mut ctx = h.ctx();
        nested.render(&mut ctx, &src("comp"), TimeCode::ZERO, 0).unwrap();
        drop(ctx);
        assert_eq!(nested.pool_stats().acquires, 1);

        // Same quantized time and layer count: no new pool acquire.
        let mut ctx = h.ctx();
        nested
            .render(&mut ctx, &src("comp"), TimeCode::from_secs(0.004), 0)
            .unwrap();
        drop(ctx);
        assert_eq!(nested.pool_stats().acquires, 1);

        // A different frame re-renders.
        let mut ctx = h.ctx();
        nested
            .render(&mut ctx, &src("comp"), TimeCode::from_secs(0.5), 0)
            .unwrap();
        drop(ctx);
        assert_eq!(nested.pool_stats().acquires, 2);

        // Explicit invalidation forces a re-render at the same time.
        nested.invalidate(&src("comp"));
        let mut ctx = h.ctx();
        nested
            .render(&mut ctx, &src("comp"), TimeCode::from_secs(0.5), 0)
            .unwrap();
        assert_eq!(nested.pool_stats().acquires, 3);
    }

    #[test]
    fn comps_nested_in_comps_recurse() {
        let mut h = Harness::new();
        h.register_solid_comp("inner", 2, 2, [200, 0, 0, 255]);
        let outer_layer = Layer::new(
            LayerId(50),
            LayerSource::NestedComposition {
                comp_id: src("inner"),
                width: 2,
                height: 2,
            },
        );
        h.comps.register(
            src("outer"),
            Composition {
                width: 2,
                height: 2,
                layers: vec![outer_layer],
            },
        );
        let mut nested = NestedRenderer::new();

        let mut ctx = h.ctx();
        let tex = nested.render(&mut ctx, &src("outer"), TimeCode::ZERO, 0).unwrap();
        drop(ctx);
        assert_eq!(&h.backend.readback(tex).unwrap()[0..4], &[200, 0, 0, 255]);
        // Inner and outer each rendered once, reusing the pool across
        // levels where sizes match.
        assert_eq!(nested.pool_stats().acquires, 2);
        assert_eq!(nested.pool_stats().pairs, 1);
    }

    #[test]
    fn self_referencing_comp_hits_the_depth_guard() {
        let mut h = Harness::new();
        let cyclic = Layer::new(
            LayerId(1),
            LayerSource::NestedComposition {
                comp_id: src("loop"),
                width: 2,
                height: 2,
            },
        );
        h.comps.register(
            src("loop"),
            Composition {
                width: 2,
                height: 2,
                layers: vec![cyclic],
            },
        );
        let mut nested = NestedRenderer::new();

        // The cycle is cut at the depth limit; the outermost render still
        // succeeds with the cyclic layer omitted.
        let mut ctx = h.ctx();
        assert!(nested.render(&mut ctx, &src("loop"), TimeCode::ZERO, 0).is_ok());
        drop(ctx);

        let mut ctx = h.ctx();
        let err = nested
            .render(&mut ctx, &src("loop"), TimeCode::from_secs(5.0), MAX_NESTING_DEPTH)
            .unwrap_err();
        assert!(matches!(err, RenderError::NestingTooDeep { .. }));
    }

    #[test]
    fn unknown_comp_is_a_typed_error() {
        let mut h = Harness::new();
        let mut nested = NestedRenderer::new();
        let mut ctx = h.ctx();
        let err = nested
            .render(&mut ctx, &src("missing"), TimeCode::ZERO, 0)
            .unwrap_err();
        assert!(matches!(err, RenderError::CompositionNotFound(_)));
    }

    #[test]
    fn pool_pairs_are_free_after_render() {
        let mut h = Harness::new();
        h.register_solid_comp("comp", 4, 4, [9, 9, 9, 255]);
        let mut nested = NestedRenderer::new();
        let mut ctx = h.ctx();
        nested.render(&mut ctx, &src("comp"), TimeCode::ZERO, 0).unwrap();
        drop(ctx);
        assert_eq!(nested.pool_stats().in_use, 0);
    }
}
