//! Pipeline objects: ping-pong render targets, per-layer uniform buffers,
//! and the two bind-group caches.
//!
//! The ping-pong pair uses two named slots and a single `swap()`; nothing
//! ever addresses the buffers by raw index, which removes the parity bugs
//! that appear when effect pass counts decide which physical buffer is
//! "final".
//!
//! Bind groups are cached at two lifetimes:
//! - persistent, keyed `(layer, base slot)`, for static layer content;
//! - per-frame, for external-texture groups, cleared every frame because
//!   external handles are valid for one frame only.

use std::collections::HashMap;

use tracing::debug;

use fl_common::error::GpuError;
use fl_common::gpu::{
    BindGroupDesc, BindGroupHandle, GpuBackend, TextureDesc, TextureHandle,
};
use fl_common::types::LayerId;
use fl_common::uniforms::CompositeUniforms;

use crate::uniforms::Tracked;

/// Which physical ping-pong buffer a texture is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PingPongSlot {
    A,
    B,
}

impl PingPongSlot {
    fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// The two accumulation render targets.
pub struct PingPongTargets {
    a: TextureHandle,
    b: TextureHandle,
    front: PingPongSlot,
    width: u32,
    height: u32,
}

impl PingPongTargets {
    pub fn new(backend: &dyn GpuBackend, width: u32, height: u32) -> Result<Self, GpuError> {
        let a = backend.create_texture(&TextureDesc::rgba_target(width, height, "ping"))?;
        let b = backend.create_texture(&TextureDesc::rgba_target(width, height, "pong"))?;
        Ok(Self {
            a,
            b,
            front: PingPongSlot::A,
            width,
            height,
        })
    }

    /// Wrap two existing render targets (e.g. a pooled pair) as ping-pong
    /// slots. The caller keeps ownership; [`destroy`](Self::destroy) must
    /// not be called on a wrapped pair.
    pub fn from_existing(a: TextureHandle, b: TextureHandle, width: u32, height: u32) -> Self {
        Self {
            a,
            b,
            front: PingPongSlot::A,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn front_slot(&self) -> PingPongSlot {
        self.front
    }

    fn texture(&self, slot: PingPongSlot) -> TextureHandle {
        match slot {
            PingPongSlot::A => self.a,
            PingPongSlot::B => self.b,
        }
    }

    /// The buffer holding the composite so far (read side).
    pub fn front(&self) -> TextureHandle {
        self.texture(self.front)
    }

    /// The write destination for the next pass.
    pub fn back(&self) -> TextureHandle {
        self.texture(self.front.other())
    }

    /// Flip the roles after a pass.
    pub fn swap(&mut self) {
        self.front = self.front.other();
    }

    /// Zero-fill the front buffer (transparent black) to start a frame.
    pub fn clear_front(&self, backend: &dyn GpuBackend) -> Result<(), GpuError> {
        let zeros = vec![0u8; self.width as usize * self.height as usize * 4];
        backend.upload_texture(self.front(), &zeros)
    }

    /// Drop both textures (device loss / resize).
    pub fn destroy(&self, backend: &dyn GpuBackend) {
        backend.destroy_texture(self.a);
        backend.destroy_texture(self.b);
    }
}

/// Owns the composite passes' per-layer GPU state.
pub struct CompositorPipeline {
    /// Per-layer uniform buffers, lazily created and never recreated.
    uniforms: HashMap<LayerId, Tracked<CompositeUniforms>>,
    /// Persistent bind groups for static content.
    persistent: HashMap<(LayerId, PingPongSlot), BindGroupHandle>,
    /// External-texture bind groups live one frame; only the handles are
    /// tracked so the scope is explicit.
    frame_scoped: Vec<BindGroupHandle>,
    /// Last seen complex-effect pass count per layer.
    pass_counts: HashMap<LayerId, u32>,
    /// Scratch render-target pair for multi-pass effects.
    scratch: Option<(TextureHandle, TextureHandle, u32, u32)>,
}

impl Default for CompositorPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositorPipeline {
    pub fn new() -> Self {
        Self {
            uniforms: HashMap::new(),
            persistent: HashMap::new(),
            frame_scoped: Vec::new(),
            pass_counts: HashMap::new(),
            scratch: None,
        }
    }

    /// Start a frame: the external-texture bind groups from the previous
    /// frame are dead by contract.
    pub fn begin_frame(&mut self) {
        self.frame_scoped.clear();
    }

    /// Dirty-checked uniform update for one layer. Returns whether a GPU
    /// write happened.
    pub fn update_uniforms(
        &mut self,
        backend: &dyn GpuBackend,
        layer: LayerId,
        value: &CompositeUniforms,
    ) -> Result<bool, GpuError> {
        if !self.uniforms.contains_key(&layer) {
            self.uniforms.insert(layer, Tracked::new(backend)?);
        }
        let tracked = self.uniforms.get_mut(&layer).expect("just inserted");
        tracked.update(backend, value)
    }

    pub fn uniform_handle(&self, layer: LayerId) -> Option<fl_common::gpu::UniformHandle> {
        self.uniforms.get(&layer).map(|t| t.handle())
    }

    /// Fetch or create the bind group for a layer pass.
    ///
    /// Dynamic content (external textures, effect outputs, per-frame video
    /// uploads) always gets a fresh frame-scoped group; static content is
    /// cached per `(layer, base slot)`.
    pub fn bind_group(
        &mut self,
        backend: &dyn GpuBackend,
        layer: LayerId,
        base_slot: PingPongSlot,
        desc: &BindGroupDesc,
        dynamic: bool,
    ) -> Result<BindGroupHandle, GpuError> {
        if dynamic || desc.has_external() {
            let handle = backend.create_bind_group(desc)?;
            self.frame_scoped.push(handle);
            return Ok(handle);
        }
        if let Some(&cached) = self.persistent.get(&(layer, base_slot)) {
            return Ok(cached);
        }
        let handle = backend.create_bind_group(desc)?;
        self.persistent.insert((layer, base_slot), handle);
        Ok(handle)
    }

    /// Record a layer's complex-effect pass count. A change invalidates the
    /// layer's persistent bind groups, since the pass count decides which
    /// physical texture ends up as the composite source.
    pub fn note_effect_pass_count(&mut self, layer: LayerId, count: u32) {
        match self.pass_counts.insert(layer, count) {
            Some(prev) if prev != count => {
                debug!(layer = %layer, prev, count, "Effect pass count changed; invalidating bind groups");
                self.invalidate_layer(layer);
            }
            _ => {}
        }
    }

    /// Drop a layer's persistent bind groups and force its next uniform
    /// write.
    pub fn invalidate_layer(&mut self, layer: LayerId) {
        self.persistent.remove(&(layer, PingPongSlot::A));
        self.persistent.remove(&(layer, PingPongSlot::B));
        if let Some(t) = self.uniforms.get_mut(&layer) {
            t.invalidate();
        }
    }

    /// Scratch pair for multi-pass effects, recreated only on resize.
    pub fn scratch_pair(
        &mut self,
        backend: &dyn GpuBackend,
        width: u32,
        height: u32,
    ) -> Result<(TextureHandle, TextureHandle), GpuError> {
        if let Some((a, b, w, h)) = self.scratch {
            if w == width && h == height {
                return Ok((a, b));
            }
            backend.destroy_texture(a);
            backend.destroy_texture(b);
        }
        let a = backend.create_texture(&TextureDesc::rgba_target(width, height, "fx-scratch-a"))?;
        let b = backend.create_texture(&TextureDesc::rgba_target(width, height, "fx-scratch-b"))?;
        self.scratch = Some((a, b, width, height));
        Ok((a, b))
    }

    /// Forget every cached GPU object (device loss). Buffers and bind
    /// groups died with the device; per-layer state is rebuilt lazily.
    pub fn reset(&mut self) {
        self.uniforms.clear();
        self.persistent.clear();
        self.frame_scoped.clear();
        self.pass_counts.clear();
        self.scratch = None;
    }

    pub fn persistent_cache_len(&self) -> usize {
        self.persistent.len()
    }

    pub fn frame_scoped_len(&self) -> usize {
        self.frame_scoped.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fl_common::blend::BlendMode;
    use fl_common::gpu::BindGroupEntry;
    use fl_gpu_hal::SoftwareBackend;

    fn texture(backend: &SoftwareBackend) -> TextureHandle {
        backend
            .create_texture(&TextureDesc::rgba_sampled(2, 2, "t"))
            .unwrap()
    }

    #[test]
    fn swap_alternates_named_slots() {
        let backend = SoftwareBackend::new();
        let mut t = PingPongTargets::new(&backend, 4, 4).unwrap();
        let first_front = t.front();
        let first_back = t.back();
        assert_ne!(first_front, first_back);
        assert_eq!(t.front_slot(), PingPongSlot::A);

        t.swap();
        assert_eq!(t.front(), first_back);
        assert_eq!(t.back(), first_front);
        assert_eq!(t.front_slot(), PingPongSlot::B);

        t.swap();
        assert_eq!(t.front(), first_front);
    }

    #[test]
    fn clear_front_zeroes() {
        let backend = SoftwareBackend::new();
        let t = PingPongTargets::new(&backend, 2, 2).unwrap();
        t.clear_front(&backend).unwrap();
        let data = backend.readback(t.front()).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn static_bind_groups_are_cached_per_slot() {
        let backend = SoftwareBackend::new();
        let mut p = CompositorPipeline::new();
        let layer = LayerId(1);
        let tex = texture(&backend);
        let desc = BindGroupDesc::new(vec![BindGroupEntry::Texture(tex)]);

        let h1 = p
            .bind_group(&backend, layer, PingPongSlot::A, &desc, false)
            .unwrap();
        let h2 = p
            .bind_group(&backend, layer, PingPongSlot::A, &desc, false)
            .unwrap();
        assert_eq!(h1, h2);
        // The other base slot is a distinct cache entry.
        let h3 = p
            .bind_group(&backend, layer, PingPongSlot::B, &desc, false)
            .unwrap();
        assert_ne!(h1, h3);
        assert_eq!(p.persistent_cache_len(), 2);
    }

    #[test]
    fn dynamic_bind_groups_are_frame_scoped() {
        let backend = SoftwareBackend::new();
        let mut p = CompositorPipeline::new();
        let tex = texture(&backend);
        let desc = BindGroupDesc::new(vec![BindGroupEntry::Texture(tex)]);

        let h1 = p
            .bind_group(&backend, LayerId(1), PingPongSlot::A, &desc, true)
            .unwrap();
        let h2 = p
            .bind_group(&backend, LayerId(1), PingPongSlot::A, &desc, true)
            .unwrap();
        assert_ne!(h1, h2);
        assert_eq!(p.frame_scoped_len(), 2);
        assert_eq!(p.persistent_cache_len(), 0);

        p.begin_frame();
        assert_eq!(p.frame_scoped_len(), 0);
    }

    #[test]
    fn pass_count_change_invalidates() {
        let backend = SoftwareBackend::new();
        let mut p = CompositorPipeline::new();
        let layer = LayerId(7);
        let tex = texture(&backend);
        let desc = BindGroupDesc::new(vec![BindGroupEntry::Texture(tex)]);

        let h1 = p
            .bind_group(&backend, layer, PingPongSlot::A, &desc, false)
            .unwrap();
        p.note_effect_pass_count(layer, 0);
        // Same count: cache intact.
        p.note_effect_pass_count(layer, 0);
        assert_eq!(
            p.bind_group(&backend, layer, PingPongSlot::A, &desc, false)
                .unwrap(),
            h1
        );
        // Count changed: cache dropped, next request makes a new group.
        p.note_effect_pass_count(layer, 2);
        let h2 = p
            .bind_group(&backend, layer, PingPongSlot::A, &desc, false)
            .unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn uniform_updates_dirty_check() {
        let backend = SoftwareBackend::new();
        let mut p = CompositorPipeline::new();
        let layer = LayerId(3);
        let u = CompositeUniforms::new(BlendMode::Screen);
        assert!(p.update_uniforms(&backend, layer, &u).unwrap());
        assert!(!p.update_uniforms(&backend, layer, &u).unwrap());
        assert!(p.uniform_handle(layer).is_some());
        assert!(p.uniform_handle(LayerId(99)).is_none());
    }

    #[test]
    fn scratch_pair_reused_until_resize() {
        let backend = SoftwareBackend::new();
        let mut p = CompositorPipeline::new();
        let (a1, b1) = p.scratch_pair(&backend, 8, 8).unwrap();
        let (a2, b2) = p.scratch_pair(&backend, 8, 8).unwrap();
        assert_eq!((a1, b1), (a2, b2));
        let (a3, _) = p.scratch_pair(&backend, 16, 8).unwrap();
        assert_ne!(a1, a3);
    }
}
