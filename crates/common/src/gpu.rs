//! GPU backend abstraction.
//!
//! The render core programs against [`GpuBackend`], never a concrete device.
//! Handles are opaque `u64`s minted by the backend; the core treats them as
//! tokens. The software backend executes every kernel on the CPU and is
//! always available; hardware backends plug in behind the same trait.
//!
//! The single most important resource-lifetime rule lives here: an
//! [`ExternalTextureHandle`] (zero-copy video frame import) is valid for
//! exactly one frame. Backends stamp external handles with the frame epoch
//! at import time and must reject them after [`GpuBackend::end_frame`].

use crate::color::PixelFormat;
use crate::error::GpuError;
use crate::kernel::{KernelArgs, KernelId};

/// Opaque handle to a GPU texture.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Opaque handle to a uniform buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct UniformHandle(pub u64);

/// Opaque handle to a bind group.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BindGroupHandle(pub u64);

/// Opaque handle to a sampler.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub u64);

/// A zero-copy video frame import. Valid only for the frame epoch it was
/// imported in; must never be cached across frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExternalTextureHandle {
    pub id: u64,
    /// Frame epoch at import time; the backend rejects mismatches.
    pub epoch: u64,
}

/// Description of a texture to create.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Whether the texture will be used as a render target.
    pub render_target: bool,
    /// Human-readable tag for diagnostics.
    pub label: &'static str,
}

impl TextureDesc {
    pub fn rgba_target(width: u32, height: u32, label: &'static str) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            render_target: true,
            label,
        }
    }

    pub fn rgba_sampled(width: u32, height: u32, label: &'static str) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            render_target: false,
            label,
        }
    }
}

/// A borrowed CPU-side frame surface handed to the backend for zero-copy
/// import. On hardware backends this wraps the decoder's native surface;
/// the software backend snapshots the pixels for the current frame.
#[derive(Clone, Debug)]
pub struct ExternalFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

/// One entry in a bind group, matching the per-kernel layout convention
/// documented in [`crate::kernel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BindGroupEntry {
    Uniform(UniformHandle),
    Texture(TextureHandle),
    External(ExternalTextureHandle),
    Sampler(SamplerHandle),
}

/// Description of a bind group to create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindGroupDesc {
    pub entries: Vec<BindGroupEntry>,
}

impl BindGroupDesc {
    pub fn new(entries: Vec<BindGroupEntry>) -> Self {
        Self { entries }
    }

    /// Whether any entry references a one-frame external texture.
    pub fn has_external(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, BindGroupEntry::External(_)))
    }
}

/// How a pass treats the target's prior contents.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LoadOp {
    /// Keep existing contents.
    Load,
    /// Clear to the given RGBA before the pass.
    Clear([f32; 4]),
}

/// One full-target pass dispatch.
#[derive(Clone, Debug)]
pub struct PassDesc {
    pub target: TextureHandle,
    pub bind_group: Option<BindGroupHandle>,
    pub args: KernelArgs,
    pub load: LoadOp,
}

/// Core GPU backend abstraction.
///
/// All methods take `&self`; backends use interior locking since command
/// encoding is driven from the single render thread but decoder callbacks
/// may upload from elsewhere.
pub trait GpuBackend: Send + Sync {
    /// Short backend identifier ("software", "vulkan", ...).
    fn backend_name(&self) -> &'static str;

    /// Human-readable device name.
    fn device_name(&self) -> String;

    /// Whether the device has been lost. Once lost, every operation fails
    /// with [`GpuError::DeviceLost`] until the context is re-initialized.
    fn is_lost(&self) -> bool;

    // -- Resources --

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureHandle, GpuError>;

    /// Upload packed pixels into an existing texture (full replacement).
    fn upload_texture(&self, tex: TextureHandle, data: &[u8]) -> Result<(), GpuError>;

    fn destroy_texture(&self, tex: TextureHandle);

    /// Look up a texture's description; `None` if the handle is stale.
    fn texture_desc(&self, tex: TextureHandle) -> Option<TextureDesc>;

    /// Import a decoder frame surface as a one-frame external texture.
    fn import_external(&self, frame: &ExternalFrame<'_>)
        -> Result<ExternalTextureHandle, GpuError>;

    fn create_uniform_buffer(&self, size: usize) -> Result<UniformHandle, GpuError>;

    fn write_uniform_buffer(&self, buf: UniformHandle, data: &[u8]) -> Result<(), GpuError>;

    fn create_bind_group(&self, desc: &BindGroupDesc) -> Result<BindGroupHandle, GpuError>;

    /// The default clamp-to-edge sampler.
    fn default_sampler(&self) -> SamplerHandle;

    // -- Frame lifecycle --

    /// Begin a frame; returns the new frame epoch. External textures
    /// imported before this call become invalid.
    fn begin_frame(&self) -> u64;

    /// Current frame epoch.
    fn frame_epoch(&self) -> u64;

    /// Dispatch one full-target pass.
    fn dispatch(&self, kernel: &KernelId, pass: &PassDesc) -> Result<(), GpuError>;

    /// Copy one texture's full contents into another of identical size.
    fn copy_texture(&self, src: TextureHandle, dst: TextureHandle) -> Result<(), GpuError>;

    /// Read a texture back to packed RGBA bytes. Rare, off the hot path.
    fn readback(&self, tex: TextureHandle) -> Result<Vec<u8>, GpuError>;

    /// Submit the frame's encoded work. After this, external textures from
    /// the current epoch must no longer be referenced.
    fn end_frame(&self) -> Result<(), GpuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_desc_helpers() {
        let t = TextureDesc::rgba_target(640, 360, "ping");
        assert!(t.render_target);
        assert_eq!(t.format, PixelFormat::Rgba8);

        let s = TextureDesc::rgba_sampled(640, 360, "still");
        assert!(!s.render_target);
    }

    #[test]
    fn bind_group_external_detection() {
        let plain = BindGroupDesc::new(vec![
            BindGroupEntry::Uniform(UniformHandle(1)),
            BindGroupEntry::Texture(TextureHandle(2)),
        ]);
        assert!(!plain.has_external());

        let ext = BindGroupDesc::new(vec![BindGroupEntry::External(ExternalTextureHandle {
            id: 3,
            epoch: 0,
        })]);
        assert!(ext.has_external());
    }
}
