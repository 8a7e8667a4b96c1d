//! CPU implementation of the GPU backend.
//!
//! The software backend executes every pass immediately on CPU pixel
//! buffers through the shared [`crate::kernels`] functions. It exists for
//! three reasons:
//!
//! - it is the guaranteed fallback when no hardware backend is available,
//! - it is the reference implementation hardware shader ports are validated
//!   against,
//! - it makes the whole compositing stack testable on CI machines with no
//!   GPU.
//!
//! Sampling is nearest-texel with edge clamping, so an identity transform
//! reproduces source pixels exactly.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use fl_common::color::PixelFormat;
use fl_common::error::GpuError;
use fl_common::gpu::{
    BindGroupDesc, BindGroupEntry, BindGroupHandle, ExternalFrame, ExternalTextureHandle,
    GpuBackend, LoadOp, PassDesc, SamplerHandle, TextureDesc, TextureHandle, UniformHandle,
};
use fl_common::kernel::{KernelArgs, KernelId};
use fl_common::uniforms::CompositeUniforms;

use crate::kernels::blend::{
    apply_inline_adjustments, composite_pixel, dancing_seed, dissolve_hash,
};
use crate::kernels::mask::{mask_coverage, sample_mask_value};
use crate::kernels::transform::{project_uv, ProjectionParams};
use crate::kernels::warp::{inverse_bilinear, QuadCorners};

use fl_common::blend::BlendMode;

struct TextureData {
    width: u32,
    height: u32,
    format: PixelFormat,
    render_target: bool,
    label: &'static str,
    data: Vec<u8>,
}

struct ExternalData {
    epoch: u64,
    width: u32,
    height: u32,
    /// Always RGBA8 after import swizzling.
    data: Vec<u8>,
}

struct State {
    next_handle: u64,
    epoch: u64,
    lost: bool,
    textures: HashMap<u64, TextureData>,
    uniforms: HashMap<u64, Vec<u8>>,
    bind_groups: HashMap<u64, BindGroupDesc>,
    externals: HashMap<u64, ExternalData>,
}

impl State {
    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// The always-available CPU backend.
pub struct SoftwareBackend {
    state: Mutex<State>,
    sampler: SamplerHandle,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        debug!("Creating software backend");
        Self {
            state: Mutex::new(State {
                next_handle: 1,
                epoch: 0,
                lost: false,
                textures: HashMap::new(),
                uniforms: HashMap::new(),
                bind_groups: HashMap::new(),
                externals: HashMap::new(),
            }),
            sampler: SamplerHandle(1),
        }
    }

    /// Flip the backend into the lost state. Every subsequent operation
    /// fails with [`GpuError::DeviceLost`] until [`restore_device`] is
    /// called, mirroring a real adapter loss.
    ///
    /// [`restore_device`]: Self::restore_device
    pub fn simulate_device_loss(&self) {
        warn!("Software backend: simulating device loss");
        self.state.lock().lost = true;
    }

    /// Clear the lost state and drop all resources, as a fresh device would.
    pub fn restore_device(&self) {
        let mut s = self.state.lock();
        s.lost = false;
        s.textures.clear();
        s.uniforms.clear();
        s.bind_groups.clear();
        s.externals.clear();
    }

    /// Number of live textures (diagnostics / leak tests).
    pub fn texture_count(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// Number of live external imports in the current epoch.
    pub fn live_external_count(&self) -> usize {
        self.state.lock().externals.len()
    }

    fn guard_lost(s: &State) -> Result<(), GpuError> {
        if s.lost {
            Err(GpuError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

fn read_rgba(data: &[u8], width: u32, x: u32, y: u32) -> [f32; 4] {
    let idx = ((y * width + x) * 4) as usize;
    [
        data[idx] as f32 / 255.0,
        data[idx + 1] as f32 / 255.0,
        data[idx + 2] as f32 / 255.0,
        data[idx + 3] as f32 / 255.0,
    ]
}

fn write_rgba(data: &mut [u8], width: u32, x: u32, y: u32, px: [f32; 4]) {
    let idx = ((y * width + x) * 4) as usize;
    for c in 0..4 {
        data[idx + c] = (px[c].clamp(0.0, 1.0) * 255.0).round() as u8;
    }
}

/// Nearest-texel sample with edge clamping.
fn sample_nearest(data: &[u8], width: u32, height: u32, uv: [f32; 2]) -> [f32; 4] {
    if width == 0 || height == 0 {
        return [0.0; 4];
    }
    let x = ((uv[0] * width as f32) as i64).clamp(0, width as i64 - 1) as u32;
    let y = ((uv[1] * height as f32) as i64).clamp(0, height as i64 - 1) as u32;
    read_rgba(data, width, x, y)
}

/// A borrowed source for sampling: either a texture or an external import.
struct SampleSource<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
}

impl State {
    fn texture_source(&self, handle: TextureHandle) -> Result<SampleSource<'_>, GpuError> {
        let t = self
            .textures
            .get(&handle.0)
            .ok_or_else(|| GpuError::StaleHandle(format!("texture {}", handle.0)))?;
        Ok(SampleSource {
            data: &t.data,
            width: t.width,
            height: t.height,
        })
    }

    fn external_source(
        &self,
        handle: ExternalTextureHandle,
    ) -> Result<SampleSource<'_>, GpuError> {
        let e = self
            .externals
            .get(&handle.id)
            .ok_or_else(|| GpuError::StaleHandle(format!("external {}", handle.id)))?;
        if e.epoch != self.epoch || handle.epoch != self.epoch {
            return Err(GpuError::ExpiredExternalTexture {
                imported: handle.epoch.min(e.epoch),
                current: self.epoch,
            });
        }
        Ok(SampleSource {
            data: &e.data,
            width: e.width,
            height: e.height,
        })
    }

    fn entry_source(&self, entry: &BindGroupEntry) -> Result<SampleSource<'_>, GpuError> {
        match entry {
            BindGroupEntry::Texture(t) => self.texture_source(*t),
            BindGroupEntry::External(e) => self.external_source(*e),
            other => Err(GpuError::KernelFailed {
                kernel: "bind".to_string(),
                reason: format!("expected a texture binding, got {other:?}"),
            }),
        }
    }
}

fn parse_corners(args: &KernelArgs) -> Result<QuadCorners, GpuError> {
    let mut corners = [[0.0f32; 2]; 4];
    for (i, corner) in corners.iter_mut().enumerate() {
        *corner = args.vec2_at(i).ok_or_else(|| GpuError::KernelFailed {
            kernel: KernelId::SliceWarp.entry_point().to_string(),
            reason: format!("missing corner argument {i}"),
        })?;
    }
    Ok(corners)
}

impl GpuBackend for SoftwareBackend {
    fn backend_name(&self) -> &'static str {
        "software"
    }

    fn device_name(&self) -> String {
        "Frameloom software rasterizer".to_string()
    }

    fn is_lost(&self) -> bool {
        self.state.lock().lost
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureHandle, GpuError> {
        let mut s = self.state.lock();
        Self::guard_lost(&s)?;
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::TextureAllocFailed {
                width: desc.width,
                height: desc.height,
            });
        }
        let bpp = desc
            .format
            .bytes_per_pixel()
            .ok_or(GpuError::UnsupportedFormat {
                op: "create_texture",
                format: format!("{:?}", desc.format),
            })?;
        let bytes = desc.width as usize * desc.height as usize * bpp as usize;
        let handle = s.mint();
        s.textures.insert(
            handle,
            TextureData {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                render_target: desc.render_target,
                label: desc.label,
                data: vec![0u8; bytes],
            },
        );
        Ok(TextureHandle(handle))
    }

    fn upload_texture(&self, tex: TextureHandle, data: &[u8]) -> Result<(), GpuError> {
        let mut s = self.state.lock();
        Self::guard_lost(&s)?;
        let t = s
            .textures
            .get_mut(&tex.0)
            .ok_or_else(|| GpuError::StaleHandle(format!("texture {}", tex.0)))?;
        if data.len() != t.data.len() {
            return Err(GpuError::UploadSizeMismatch {
                expected: t.data.len(),
                got: data.len(),
            });
        }
        t.data.copy_from_slice(data);
        Ok(())
    }

    fn destroy_texture(&self, tex: TextureHandle) {
        self.state.lock().textures.remove(&tex.0);
    }

    fn texture_desc(&self, tex: TextureHandle) -> Option<TextureDesc> {
        let s = self.state.lock();
        s.textures.get(&tex.0).map(|t| TextureDesc {
            width: t.width,
            height: t.height,
            format: t.format,
            render_target: t.render_target,
            label: t.label,
        })
    }

    fn import_external(
        &self,
        frame: &ExternalFrame<'_>,
    ) -> Result<ExternalTextureHandle, GpuError> {
        let mut s = self.state.lock();
        Self::guard_lost(&s)?;
        let expected = frame.width as usize * frame.height as usize * 4;
        let data = match frame.format {
            PixelFormat::Rgba8 => {
                if frame.data.len() != expected {
                    return Err(GpuError::UploadSizeMismatch {
                        expected,
                        got: frame.data.len(),
                    });
                }
                frame.data.to_vec()
            }
            PixelFormat::Bgra8 => {
                if frame.data.len() != expected {
                    return Err(GpuError::UploadSizeMismatch {
                        expected,
                        got: frame.data.len(),
                    });
                }
                let mut out = frame.data.to_vec();
                for px in out.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
                out
            }
            PixelFormat::Nv12 => {
                return Err(GpuError::UnsupportedFormat {
                    op: "import_external",
                    format: "Nv12".to_string(),
                });
            }
        };
        let epoch = s.epoch;
        let handle = s.mint();
        s.externals.insert(
            handle,
            ExternalData {
                epoch,
                width: frame.width,
                height: frame.height,
                data,
            },
        );
        Ok(ExternalTextureHandle { id: handle, epoch })
    }

    fn create_uniform_buffer(&self, size: usize) -> Result<UniformHandle, GpuError> {
        let mut s = self.state.lock();
        Self::guard_lost(&s)?;
        let handle = s.mint();
        s.uniforms.insert(handle, vec![0u8; size]);
        Ok(UniformHandle(handle))
    }

    fn write_uniform_buffer(&self, buf: UniformHandle, data: &[u8]) -> Result<(), GpuError> {
        let mut s = self.state.lock();
        Self::guard_lost(&s)?;
        let slot = s
            .uniforms
            .get_mut(&buf.0)
            .ok_or_else(|| GpuError::StaleHandle(format!("uniform {}", buf.0)))?;
        if data.len() != slot.len() {
            return Err(GpuError::UploadSizeMismatch {
                expected: slot.len(),
                got: data.len(),
            });
        }
        slot.copy_from_slice(data);
        Ok(())
    }

    fn create_bind_group(&self, desc: &BindGroupDesc) -> Result<BindGroupHandle, GpuError> {
        let mut s = self.state.lock();
        Self::guard_lost(&s)?;
        // Validate every referenced handle now so stale bind groups fail at
        // creation, not mid-pass.
        for entry in &desc.entries {
            match entry {
                BindGroupEntry::Texture(t) => {
                    if !s.textures.contains_key(&t.0) {
                        return Err(GpuError::StaleHandle(format!("texture {}", t.0)));
                    }
                }
                BindGroupEntry::External(e) => {
                    let ext = s
                        .externals
                        .get(&e.id)
                        .ok_or_else(|| GpuError::StaleHandle(format!("external {}", e.id)))?;
                    if ext.epoch != s.epoch {
                        return Err(GpuError::ExpiredExternalTexture {
                            imported: ext.epoch,
                            current: s.epoch,
                        });
                    }
                }
                BindGroupEntry::Uniform(u) => {
                    if !s.uniforms.contains_key(&u.0) {
                        return Err(GpuError::StaleHandle(format!("uniform {}", u.0)));
                    }
                }
                BindGroupEntry::Sampler(_) => {}
            }
        }
        let handle = s.mint();
        s.bind_groups.insert(handle, desc.clone());
        Ok(BindGroupHandle(handle))
    }

    fn default_sampler(&self) -> SamplerHandle {
        self.sampler
    }

    fn begin_frame(&self) -> u64 {
        let mut s = self.state.lock();
        s.epoch += 1;
        // External imports from prior frames are dead by contract.
        let epoch = s.epoch;
        s.externals.retain(|_, e| e.epoch == epoch);
        s.epoch
    }

    fn frame_epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    fn dispatch(&self, kernel: &KernelId, pass: &PassDesc) -> Result<(), GpuError> {
        let mut s = self.state.lock();
        Self::guard_lost(&s)?;

        let (tw, th) = {
            let t = s
                .textures
                .get(&pass.target.0)
                .ok_or_else(|| GpuError::StaleHandle(format!("target {}", pass.target.0)))?;
            if !t.render_target {
                return Err(GpuError::KernelFailed {
                    kernel: kernel.entry_point().to_string(),
                    reason: format!("texture '{}' is not a render target", t.label),
                });
            }
            (t.width, t.height)
        };

        // Detach the target pixels so sources can be borrowed from the map
        // while we write.
        let mut out = {
            let t = s.textures.get_mut(&pass.target.0).expect("target exists");
            std::mem::take(&mut t.data)
        };

        if let LoadOp::Clear(color) = pass.load {
            for y in 0..th {
                for x in 0..tw {
                    write_rgba(&mut out, tw, x, y, color);
                }
            }
        }

        let result = self.run_kernel(&s, kernel, pass, tw, th, &mut out);

        // Reattach regardless of the kernel outcome.
        s.textures.get_mut(&pass.target.0).expect("target exists").data = out;
        result
    }

    fn copy_texture(&self, src: TextureHandle, dst: TextureHandle) -> Result<(), GpuError> {
        let mut s = self.state.lock();
        Self::guard_lost(&s)?;
        let (data, sw, sh) = {
            let t = s
                .textures
                .get(&src.0)
                .ok_or_else(|| GpuError::StaleHandle(format!("texture {}", src.0)))?;
            (t.data.clone(), t.width, t.height)
        };
        let d = s
            .textures
            .get_mut(&dst.0)
            .ok_or_else(|| GpuError::StaleHandle(format!("texture {}", dst.0)))?;
        if d.width != sw || d.height != sh {
            return Err(GpuError::KernelFailed {
                kernel: "copy_texture".to_string(),
                reason: format!("size mismatch: {sw}x{sh} -> {}x{}", d.width, d.height),
            });
        }
        d.data = data;
        Ok(())
    }

    fn readback(&self, tex: TextureHandle) -> Result<Vec<u8>, GpuError> {
        let s = self.state.lock();
        Self::guard_lost(&s)?;
        s.textures
            .get(&tex.0)
            .map(|t| t.data.clone())
            .ok_or_else(|| GpuError::TransferFailed(format!("texture {} gone", tex.0)))
    }

    fn end_frame(&self) -> Result<(), GpuError> {
        let s = self.state.lock();
        Self::guard_lost(&s)?;
        Ok(())
    }
}

impl SoftwareBackend {
    fn run_kernel(
        &self,
        s: &State,
        kernel: &KernelId,
        pass: &PassDesc,
        tw: u32,
        th: u32,
        out: &mut [u8],
    ) -> Result<(), GpuError> {
        let bind = match pass.bind_group {
            Some(h) => Some(s.bind_groups.get(&h.0).ok_or_else(|| {
                GpuError::StaleHandle(format!("bind group {}", h.0))
            })?),
            None => None,
        };

        match kernel {
            KernelId::Composite | KernelId::CompositeExternal => {
                let bind = bind.ok_or_else(|| GpuError::KernelFailed {
                    kernel: kernel.entry_point().to_string(),
                    reason: "composite requires a bind group".to_string(),
                })?;
                if bind.entries.len() < 4 {
                    return Err(GpuError::KernelFailed {
                        kernel: kernel.entry_point().to_string(),
                        reason: format!("expected 4 bindings, got {}", bind.entries.len()),
                    });
                }
                let uniforms = match bind.entries[0] {
                    BindGroupEntry::Uniform(u) => s
                        .uniforms
                        .get(&u.0)
                        .and_then(|b| CompositeUniforms::decode(b))
                        .ok_or_else(|| GpuError::StaleHandle(format!("uniform {}", u.0)))?,
                    other => {
                        return Err(GpuError::KernelFailed {
                            kernel: kernel.entry_point().to_string(),
                            reason: format!("binding 0 must be a uniform buffer, got {other:?}"),
                        });
                    }
                };
                let base = s.entry_source(&bind.entries[1])?;
                let layer = s.entry_source(&bind.entries[2])?;
                let mask = s.entry_source(&bind.entries[3])?;

                if base.width != tw || base.height != th {
                    return Err(GpuError::KernelFailed {
                        kernel: kernel.entry_point().to_string(),
                        reason: format!(
                            "base {}x{} does not match target {tw}x{th}",
                            base.width, base.height
                        ),
                    });
                }

                self.composite(&uniforms, &base, &layer, &mask, tw, th, out);
                Ok(())
            }
            KernelId::Copy | KernelId::CopyExternal => {
                let bind = bind.ok_or_else(|| GpuError::KernelFailed {
                    kernel: kernel.entry_point().to_string(),
                    reason: "copy requires a bind group".to_string(),
                })?;
                let src = s.entry_source(bind.entries.first().ok_or_else(|| {
                    GpuError::KernelFailed {
                        kernel: kernel.entry_point().to_string(),
                        reason: "copy requires a source binding".to_string(),
                    }
                })?)?;
                for y in 0..th {
                    for x in 0..tw {
                        let uv = [
                            (x as f32 + 0.5) / tw as f32,
                            (y as f32 + 0.5) / th as f32,
                        ];
                        let px = sample_nearest(src.data, src.width, src.height, uv);
                        write_rgba(out, tw, x, y, px);
                    }
                }
                Ok(())
            }
            KernelId::SliceWarp => {
                let bind = bind.ok_or_else(|| GpuError::KernelFailed {
                    kernel: kernel.entry_point().to_string(),
                    reason: "warp requires a bind group".to_string(),
                })?;
                if bind.entries.len() < 2 {
                    return Err(GpuError::KernelFailed {
                        kernel: kernel.entry_point().to_string(),
                        reason: "warp requires source and region bindings".to_string(),
                    });
                }
                let src = s.entry_source(&bind.entries[0])?;
                let region = s.entry_source(&bind.entries[1])?;
                let corners = parse_corners(&pass.args)?;
                for y in 0..th {
                    for x in 0..tw {
                        let p = [
                            (x as f32 + 0.5) / tw as f32,
                            (y as f32 + 0.5) / th as f32,
                        ];
                        if let Some(uv) = inverse_bilinear(p, &corners) {
                            let mut px = sample_nearest(src.data, src.width, src.height, uv);
                            let m = sample_mask_value(region.data, region.width, region.height, p);
                            px[3] *= m;
                            write_rgba(out, tw, x, y, px);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn composite(
        &self,
        u: &CompositeUniforms,
        base: &SampleSource<'_>,
        layer: &SampleSource<'_>,
        mask: &SampleSource<'_>,
        tw: u32,
        th: u32,
        out: &mut [u8],
    ) {
        let params = ProjectionParams::from_uniforms(u);
        let seed = if u.blend_mode == BlendMode::DancingDissolve.kernel_index() {
            dancing_seed(u.dissolve_seed, u.time)
        } else {
            u.dissolve_seed
        };
        let opacity = u.opacity.clamp(0.0, 1.0);
        let inverted = u.mask_inverted();

        for y in 0..th {
            for x in 0..tw {
                let out_uv = [
                    (x as f32 + 0.5) / tw as f32,
                    (y as f32 + 0.5) / th as f32,
                ];
                let base_px = read_rgba(base.data, base.width, x, y);
                let result = match project_uv(out_uv, u, &params) {
                    // Outside the transformed layer: the layer contributes
                    // nothing at this pixel, regardless of blend mode.
                    None => base_px,
                    Some(src_uv) => {
                        let mut src = sample_nearest(layer.data, layer.width, layer.height, src_uv);
                        let rgb = apply_inline_adjustments([src[0], src[1], src[2]], u);
                        src[0] = rgb[0];
                        src[1] = rgb[1];
                        src[2] = rgb[2];
                        let m = mask_coverage(
                            sample_mask_value(mask.data, mask.width, mask.height, out_uv),
                            inverted,
                        );
                        let hash = dissolve_hash(x, y, seed);
                        composite_pixel(u.blend_mode, base_px, src, opacity * m, hash)
                    }
                };
                write_rgba(out, tw, x, y, result);
            }
        }
    }
}
