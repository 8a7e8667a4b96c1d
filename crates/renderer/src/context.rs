//! GPU context: backend ownership, default sampler, output surfaces, and
//! the device-loss/recovery lifecycle.
//!
//! Everything GPU-resident in the engine hangs off this context. On device
//! loss every handle minted by the old device is dead; the context drops
//! its surface records and recreates them against the recovered device,
//! while the other components rebuild their own state lazily.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use fl_common::error::GpuError;
use fl_common::gpu::{GpuBackend, SamplerHandle, TextureDesc};
use fl_common::types::SurfaceId;

use fl_gpu_hal::select_backend;

use crate::output::OutputSurface;

/// Owns the graphics backend and the registered output surfaces.
pub struct GpuContext {
    backend: Arc<dyn GpuBackend>,
    sampler: SamplerHandle,
    surfaces: HashMap<SurfaceId, OutputSurface>,
    lost: bool,
}

impl GpuContext {
    /// Select a backend and build the context around it.
    pub fn initialize(prefer_software: bool) -> Self {
        let choice = select_backend(prefer_software);
        Self::with_backend(choice.backend)
    }

    /// Build the context around an already-created backend (tests, embedders
    /// that own device creation).
    pub fn with_backend(backend: Arc<dyn GpuBackend>) -> Self {
        let sampler = backend.default_sampler();
        info!(
            backend = backend.backend_name(),
            device = %backend.device_name(),
            "GPU context initialized"
        );
        Self {
            backend,
            sampler,
            surfaces: HashMap::new(),
            lost: false,
        }
    }

    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    pub fn backend_arc(&self) -> Arc<dyn GpuBackend> {
        Arc::clone(&self.backend)
    }

    pub fn sampler(&self) -> SamplerHandle {
        self.sampler
    }

    /// Whether the device is currently unusable. Checked at the top of
    /// every frame; a lost device abandons frames until [`recover`] runs.
    ///
    /// [`recover`]: Self::recover
    pub fn is_lost(&self) -> bool {
        self.lost || self.backend.is_lost()
    }

    /// Record a device loss observed at a submission site.
    pub fn note_lost(&mut self) {
        if !self.lost {
            warn!("GPU device lost; frames will be abandoned until recovery");
        }
        self.lost = true;
    }

    // -- Output surfaces --

    /// Register (or resize) a named output surface backed by a render
    /// target of the given size.
    pub fn register_surface(
        &mut self,
        id: SurfaceId,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError> {
        if let Some(existing) = self.surfaces.get(&id) {
            if existing.width == width && existing.height == height {
                return Ok(());
            }
            self.backend.destroy_texture(existing.texture);
        }
        let texture = self
            .backend
            .create_texture(&TextureDesc::rgba_target(width, height, "output-surface"))?;
        info!(surface = %id, width, height, "Registered output surface");
        self.surfaces
            .insert(id.clone(), OutputSurface::new(id, texture, width, height));
        Ok(())
    }

    pub fn remove_surface(&mut self, id: &SurfaceId) {
        if let Some(surface) = self.surfaces.remove(id) {
            self.backend.destroy_texture(surface.texture);
        }
    }

    pub fn surface(&self, id: &SurfaceId) -> Option<&OutputSurface> {
        self.surfaces.get(id)
    }

    pub fn surface_mut(&mut self, id: &SurfaceId) -> Option<&mut OutputSurface> {
        self.surfaces.get_mut(id)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &OutputSurface> {
        self.surfaces.values()
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    // -- Device loss / recovery --

    /// Handle a device loss: every surface texture died with the device, so
    /// only the records survive (sizes and slices), not the handles.
    pub fn handle_device_lost(&mut self) {
        self.note_lost();
        for surface in self.surfaces.values_mut() {
            surface.invalidate();
        }
    }

    /// Recreate surface textures against the (restored) device and clear
    /// the lost flag. Slices survive recovery; their region textures do not
    /// and must be re-registered by the host.
    pub fn recover(&mut self) -> Result<(), GpuError> {
        if self.backend.is_lost() {
            return Err(GpuError::DeviceLost);
        }
        for surface in self.surfaces.values_mut() {
            let texture = self.backend.create_texture(&TextureDesc::rgba_target(
                surface.width,
                surface.height,
                "output-surface",
            ))?;
            surface.texture = texture;
            for slice in &mut surface.slices {
                slice.region = None;
            }
        }
        self.lost = false;
        info!(surfaces = self.surfaces.len(), "GPU context recovered");
        Ok(())
    }

    /// Tear down every surface.
    pub fn destroy(&mut self) {
        for (_, surface) in self.surfaces.drain() {
            self.backend.destroy_texture(surface.texture);
        }
    }
}
