//! Output mapping: the final composite onto one or more surfaces.
//!
//! A surface with no slices receives a plain full-frame copy. A surface
//! with slices receives one corner-pinned warp pass per slice, each
//! optionally masked by a region texture; destination pixels outside every
//! slice quad keep the surface's cleared background.

use tracing::debug;

use fl_common::error::RenderError;
use fl_common::gpu::{
    BindGroupDesc, BindGroupEntry, GpuBackend, LoadOp, PassDesc, TextureHandle,
};
use fl_common::kernel::{KernelArgs, KernelId};
use fl_common::types::SurfaceId;

use fl_gpu_hal::kernels::warp::QuadCorners;

/// A corner-pinned region of an output surface.
#[derive(Clone, Debug)]
pub struct OutputSlice {
    /// Destination quad in surface UV space (top-left, top-right,
    /// bottom-right, bottom-left).
    pub corners: QuadCorners,
    /// Optional region mask sampled in surface space; `None` means the
    /// whole quad is visible.
    pub region: Option<TextureHandle>,
}

impl OutputSlice {
    pub fn full(corners: QuadCorners) -> Self {
        Self {
            corners,
            region: None,
        }
    }
}

/// One registered output: a render target plus its slice layout.
pub struct OutputSurface {
    pub id: SurfaceId,
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub slices: Vec<OutputSlice>,
}

impl OutputSurface {
    pub fn new(id: SurfaceId, texture: TextureHandle, width: u32, height: u32) -> Self {
        Self {
            id,
            texture,
            width,
            height,
            slices: Vec::new(),
        }
    }

    pub fn add_slice(&mut self, slice: OutputSlice) {
        self.slices.push(slice);
    }

    pub fn clear_slices(&mut self) {
        self.slices.clear();
    }

    /// Forget the backing texture after a device loss. The handle is dead;
    /// keeping it would only produce stale-handle errors downstream.
    pub(crate) fn invalidate(&mut self) {
        self.texture = TextureHandle(0);
        for slice in &mut self.slices {
            slice.region = None;
        }
    }
}

/// Shared fully-visible region fallback so slice dispatch never branches on
/// a missing mask.
fn region_or(fallback: TextureHandle, slice: &OutputSlice) -> TextureHandle {
    slice.region.unwrap_or(fallback)
}

/// Draw the composite onto one surface.
///
/// `white` is the shared 1x1 fully-visible texture used when a slice has no
/// region mask.
pub fn draw_to_surface(
    backend: &dyn GpuBackend,
    composite: TextureHandle,
    surface: &OutputSurface,
    white: TextureHandle,
) -> Result<(), RenderError> {
    if surface.slices.is_empty() {
        let bind = backend.create_bind_group(&BindGroupDesc::new(vec![BindGroupEntry::Texture(
            composite,
        )]))?;
        backend.dispatch(
            &KernelId::Copy,
            &PassDesc {
                target: surface.texture,
                bind_group: Some(bind),
                args: KernelArgs::new(),
                load: LoadOp::Load,
            },
        )?;
        return Ok(());
    }

    debug!(surface = %surface.id, slices = surface.slices.len(), "Drawing sliced output");
    for (i, slice) in surface.slices.iter().enumerate() {
        let bind = backend.create_bind_group(&BindGroupDesc::new(vec![
            BindGroupEntry::Texture(composite),
            BindGroupEntry::Texture(region_or(white, slice)),
        ]))?;
        let mut args = KernelArgs::new();
        for corner in slice.corners {
            args = args.push_vec2(corner);
        }
        // The first slice clears the surface so stale output never shows
        // through between layouts; later slices draw over it.
        let load = if i == 0 {
            LoadOp::Clear([0.0, 0.0, 0.0, 1.0])
        } else {
            LoadOp::Load
        };
        backend.dispatch(
            &KernelId::SliceWarp,
            &PassDesc {
                target: surface.texture,
                bind_group: Some(bind),
                args,
                load,
            },
        )?;
    }
    Ok(())
}
