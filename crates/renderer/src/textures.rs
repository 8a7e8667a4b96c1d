//! Texture managers: still-image caching, size-matched video upload
//! textures, zero-copy frame import, and per-layer mask textures.
//!
//! Stills are cached by (source, revision) and reused until the host bumps
//! the revision. Video bitmaps from helper decoders reuse one size-matched
//! texture per source so steady-state playback allocates nothing. External
//! imports are one-frame handles and are never stored here.

use std::collections::HashMap;

use tracing::{debug, warn};

use fl_common::error::GpuError;
use fl_common::gpu::{ExternalFrame, ExternalTextureHandle, GpuBackend, TextureDesc, TextureHandle};
use fl_common::layer::{Layer, LayerMask};
use fl_common::sample::CpuFrame;
use fl_common::types::{LayerId, SourceId};

use fl_compositor::ResolvedMask;

struct StillEntry {
    revision: u64,
    bitmap: CpuFrame,
    texture: Option<TextureHandle>,
}

struct VideoUpload {
    texture: TextureHandle,
    width: u32,
    height: u32,
}

/// Creates and caches GPU textures for layer content.
#[derive(Default)]
pub struct TextureManager {
    stills: HashMap<SourceId, StillEntry>,
    video_uploads: HashMap<SourceId, VideoUpload>,
}

impl TextureManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand the manager a still/canvas bitmap. Bumping `revision` with new
    /// content invalidates the cached texture; re-registering the same
    /// revision is a no-op.
    pub fn register_still(&mut self, backend: &dyn GpuBackend, id: SourceId, revision: u64, bitmap: CpuFrame) {
        match self.stills.get_mut(&id) {
            Some(entry) if entry.revision == revision => {}
            Some(entry) => {
                if let Some(tex) = entry.texture.take() {
                    backend.destroy_texture(tex);
                }
                entry.revision = revision;
                entry.bitmap = bitmap;
            }
            None => {
                self.stills.insert(
                    id,
                    StillEntry {
                        revision,
                        bitmap,
                        texture: None,
                    },
                );
            }
        }
    }

    /// The cached GPU texture for a still, created on first use. `None`
    /// when no content is registered or the registered revision does not
    /// match (stale content is never shown; the layer is retried next
    /// frame once the host re-registers).
    pub fn still_texture(
        &mut self,
        backend: &dyn GpuBackend,
        id: &SourceId,
        revision: u64,
    ) -> Option<(TextureHandle, u32, u32)> {
        let entry = self.stills.get_mut(id)?;
        if entry.revision != revision {
            return None;
        }
        // A handle may be stale after device loss; recreate on demand.
        if let Some(tex) = entry.texture {
            if backend.texture_desc(tex).is_some() {
                return Some((tex, entry.bitmap.width, entry.bitmap.height));
            }
            entry.texture = None;
        }
        let desc = TextureDesc::rgba_sampled(entry.bitmap.width, entry.bitmap.height, "still");
        let tex = match backend.create_texture(&desc) {
            Ok(t) => t,
            Err(e) => {
                warn!(source = %id, error = %e, "Still texture creation failed");
                return None;
            }
        };
        if let Err(e) = backend.upload_texture(tex, &entry.bitmap.pixels) {
            warn!(source = %id, error = %e, "Still texture upload failed");
            backend.destroy_texture(tex);
            return None;
        }
        debug!(source = %id, revision, "Created still texture");
        entry.texture = Some(tex);
        Some((tex, entry.bitmap.width, entry.bitmap.height))
    }

    /// Upload a helper-decoder bitmap into the source's reusable texture,
    /// recreating it only when the frame size changes.
    pub fn upload_video_bitmap(
        &mut self,
        backend: &dyn GpuBackend,
        id: &SourceId,
        frame: &CpuFrame,
    ) -> Result<TextureHandle, GpuError> {
        let reusable = match self.video_uploads.get(id) {
            Some(u)
                if u.width == frame.width
                    && u.height == frame.height
                    && backend.texture_desc(u.texture).is_some() =>
            {
                Some(u.texture)
            }
            _ => None,
        };
        let texture = match reusable {
            Some(t) => t,
            None => {
                if let Some(old) = self.video_uploads.remove(id) {
                    backend.destroy_texture(old.texture);
                }
                let tex = backend.create_texture(&TextureDesc::rgba_sampled(
                    frame.width,
                    frame.height,
                    "video-upload",
                ))?;
                debug!(source = %id, width = frame.width, height = frame.height, "Created video upload texture");
                self.video_uploads.insert(
                    id.clone(),
                    VideoUpload {
                        texture: tex,
                        width: frame.width,
                        height: frame.height,
                    },
                );
                tex
            }
        };
        backend.upload_texture(texture, &frame.pixels)?;
        Ok(texture)
    }

    /// Zero-copy import of a decoded frame for this frame only.
    pub fn import_frame(
        &self,
        backend: &dyn GpuBackend,
        frame: &ExternalFrame<'_>,
    ) -> Result<ExternalTextureHandle, GpuError> {
        backend.import_external(frame)
    }

    /// Copy pixel data into a fresh persistent texture (cache population).
    pub fn create_snapshot(
        &self,
        backend: &dyn GpuBackend,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<TextureHandle, GpuError> {
        let tex =
            backend.create_texture(&TextureDesc::rgba_sampled(width, height, "frame-snapshot"))?;
        backend.upload_texture(tex, pixels)?;
        Ok(tex)
    }

    /// Forget every handle after device loss. Bitmaps survive so textures
    /// can be rebuilt lazily against the new device.
    pub fn reset(&mut self) {
        for entry in self.stills.values_mut() {
            entry.texture = None;
        }
        self.video_uploads.clear();
    }

    /// Destroy all owned textures (orderly teardown, device still alive).
    pub fn destroy_all(&mut self, backend: &dyn GpuBackend) {
        for entry in self.stills.values_mut() {
            if let Some(tex) = entry.texture.take() {
                backend.destroy_texture(tex);
            }
        }
        for (_, upload) in self.video_uploads.drain() {
            backend.destroy_texture(upload.texture);
        }
    }

    pub fn drop_source(&mut self, backend: &dyn GpuBackend, id: &SourceId) {
        if let Some(mut entry) = self.stills.remove(id) {
            if let Some(tex) = entry.texture.take() {
                backend.destroy_texture(tex);
            }
        }
        if let Some(upload) = self.video_uploads.remove(id) {
            backend.destroy_texture(upload.texture);
        }
    }
}

/// Supplies mask bitmaps for layers (feather/blur already applied by the
/// segmentation side).
pub trait MaskProvider {
    fn mask_bitmap(&mut self, clip_id: &SourceId) -> Option<CpuFrame>;
}

/// Provider used when no mask subsystem is attached.
pub struct NoMasks;

impl MaskProvider for NoMasks {
    fn mask_bitmap(&mut self, _clip_id: &SourceId) -> Option<CpuFrame> {
        None
    }
}

struct MaskEntry {
    clip_id: SourceId,
    texture: TextureHandle,
    width: u32,
    height: u32,
}

/// Per-layer mask textures plus the shared fully-visible fallback, so the
/// composite pass always has a mask to sample and never branches.
#[derive(Default)]
pub struct MaskTextureManager {
    fallback: Option<TextureHandle>,
    masks: HashMap<LayerId, MaskEntry>,
}

impl MaskTextureManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared 1x1 white texture, created lazily.
    pub fn fallback(&mut self, backend: &dyn GpuBackend) -> Result<TextureHandle, GpuError> {
        if let Some(tex) = self.fallback {
            if backend.texture_desc(tex).is_some() {
                return Ok(tex);
            }
        }
        let tex = backend.create_texture(&TextureDesc::rgba_sampled(1, 1, "mask-fallback"))?;
        backend.upload_texture(tex, &[255, 255, 255, 255])?;
        self.fallback = Some(tex);
        Ok(tex)
    }

    /// Resolve a layer's mask to a texture plus the inversion flag. With no
    /// mask assigned (or no content available yet) the white fallback is
    /// used, which composites as fully visible.
    pub fn resolve(
        &mut self,
        backend: &dyn GpuBackend,
        layer: &Layer,
        provider: &mut dyn MaskProvider,
    ) -> Result<ResolvedMask, GpuError> {
        let mask: &LayerMask = match &layer.mask {
            Some(m) => m,
            None => {
                return Ok(ResolvedMask {
                    texture: self.fallback(backend)?,
                    inverted: false,
                });
            }
        };

        if let Some(bitmap) = provider.mask_bitmap(&mask.clip_id) {
            self.upload(backend, layer.id, &mask.clip_id, &bitmap)?;
        }

        let texture = match self.masks.get(&layer.id) {
            Some(entry)
                if entry.clip_id == mask.clip_id && backend.texture_desc(entry.texture).is_some() =>
            {
                entry.texture
            }
            _ => self.fallback(backend)?,
        };
        Ok(ResolvedMask {
            texture,
            inverted: mask.invert,
        })
    }

    fn upload(
        &mut self,
        backend: &dyn GpuBackend,
        layer: LayerId,
        clip_id: &SourceId,
        bitmap: &CpuFrame,
    ) -> Result<(), GpuError> {
        let reusable = match self.masks.get(&layer) {
            Some(e)
                if e.clip_id == *clip_id
                    && e.width == bitmap.width
                    && e.height == bitmap.height
                    && backend.texture_desc(e.texture).is_some() =>
            {
                Some(e.texture)
            }
            _ => None,
        };
        let texture = match reusable {
            Some(t) => t,
            None => {
                if let Some(old) = self.masks.remove(&layer) {
                    backend.destroy_texture(old.texture);
                }
                let tex = backend.create_texture(&TextureDesc::rgba_sampled(
                    bitmap.width,
                    bitmap.height,
                    "layer-mask",
                ))?;
                self.masks.insert(
                    layer,
                    MaskEntry {
                        clip_id: clip_id.clone(),
                        texture: tex,
                        width: bitmap.width,
                        height: bitmap.height,
                    },
                );
                tex
            }
        };
        backend.upload_texture(texture, &bitmap.pixels)
    }

    /// Forget every handle after device loss.
    pub fn reset(&mut self) {
        self.fallback = None;
        self.masks.clear();
    }

    pub fn destroy_all(&mut self, backend: &dyn GpuBackend) {
        if let Some(tex) = self.fallback.take() {
            backend.destroy_texture(tex);
        }
        for (_, entry) in self.masks.drain() {
            backend.destroy_texture(entry.texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fl_common::layer::LayerSource;
    use fl_gpu_hal::SoftwareBackend;

    fn src(name: &str) -> SourceId {
        SourceId::new(name)
    }

    #[test]
    fn still_cached_until_revision_changes() {
        let backend = SoftwareBackend::new();
        let mut tm = TextureManager::new();
        tm.register_still(&backend, src("img"), 1, CpuFrame::solid(2, 2, [9, 9, 9, 255]));

        let (t1, w, h) = tm.still_texture(&backend, &src("img"), 1).unwrap();
        assert_eq!((w, h), (2, 2));
        let (t2, ..) = tm.still_texture(&backend, &src("img"), 1).unwrap();
        assert_eq!(t1, t2);

        // Revision bump replaces the texture.
        tm.register_still(&backend, src("img"), 2, CpuFrame::solid(2, 2, [1, 1, 1, 255]));
        let (t3, ..) = tm.still_texture(&backend, &src("img"), 2).unwrap();
        assert_ne!(t1, t3);
        assert_eq!(&backend.readback(t3).unwrap()[0..4], &[1, 1, 1, 255]);
    }

    #[test]
    fn still_revision_mismatch_is_none() {
        let backend = SoftwareBackend::new();
        let mut tm = TextureManager::new();
        tm.register_still(&backend, src("img"), 1, CpuFrame::solid(1, 1, [0, 0, 0, 255]));
        assert!(tm.still_texture(&backend, &src("img"), 2).is_none());
        assert!(tm.still_texture(&backend, &src("missing"), 1).is_none());
    }

    #[test]
    fn video_upload_reuses_size_matched_texture() {
        let backend = SoftwareBackend::new();
        let mut tm = TextureManager::new();
        let a = tm
            .upload_video_bitmap(&backend, &src("v"), &CpuFrame::solid(4, 2, [1, 0, 0, 255]))
            .unwrap();
        let b = tm
            .upload_video_bitmap(&backend, &src("v"), &CpuFrame::solid(4, 2, [2, 0, 0, 255]))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(&backend.readback(b).unwrap()[0..4], &[2, 0, 0, 255]);

        // Size change allocates a fresh texture and frees the old one.
        let c = tm
            .upload_video_bitmap(&backend, &src("v"), &CpuFrame::solid(2, 2, [3, 0, 0, 255]))
            .unwrap();
        assert_ne!(a, c);
        assert!(backend.texture_desc(a).is_none());
    }

    #[test]
    fn reset_rebuilds_stills_lazily() {
        let backend = SoftwareBackend::new();
        let mut tm = TextureManager::new();
        tm.register_still(&backend, src("img"), 1, CpuFrame::solid(1, 1, [5, 5, 5, 255]));
        tm.still_texture(&backend, &src("img"), 1).unwrap();

        tm.reset();
        // The bitmap survived; a new texture is created on demand.
        let (tex, ..) = tm.still_texture(&backend, &src("img"), 1).unwrap();
        assert_eq!(&backend.readback(tex).unwrap()[0..4], &[5, 5, 5, 255]);
    }

    #[test]
    fn drop_source_frees_textures() {
        let backend = SoftwareBackend::new();
        let mut tm = TextureManager::new();
        tm.register_still(&backend, src("img"), 1, CpuFrame::solid(1, 1, [0; 4]));
        let (tex, ..) = tm.still_texture(&backend, &src("img"), 1).unwrap();
        tm.drop_source(&backend, &src("img"));
        assert!(backend.texture_desc(tex).is_none());
        assert!(tm.still_texture(&backend, &src("img"), 1).is_none());
    }

    // ── masks ──────────────────────────────────────────────────────

    fn masked_layer(id: u64, clip: &str, invert: bool) -> Layer {
        let mut layer = Layer::new(
            LayerId(id),
            LayerSource::Video {
                source_id: src("v"),
            },
        );
        layer.mask = Some(LayerMask {
            clip_id: src(clip),
            invert,
            feather: 0.0,
        });
        layer
    }

    struct FixedMask(CpuFrame);

    impl MaskProvider for FixedMask {
        fn mask_bitmap(&mut self, _clip_id: &SourceId) -> Option<CpuFrame> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn no_mask_resolves_to_white_fallback() {
        let backend = SoftwareBackend::new();
        let mut mm = MaskTextureManager::new();
        let layer = Layer::new(
            LayerId(1),
            LayerSource::Video {
                source_id: src("v"),
            },
        );
        let resolved = mm.resolve(&backend, &layer, &mut NoMasks).unwrap();
        assert!(!resolved.inverted);
        assert_eq!(
            backend.readback(resolved.texture).unwrap(),
            vec![255, 255, 255, 255]
        );
        // The fallback is shared.
        let again = mm.resolve(&backend, &layer, &mut NoMasks).unwrap();
        assert_eq!(resolved.texture, again.texture);
    }

    #[test]
    fn provider_content_is_uploaded_and_reused() {
        let backend = SoftwareBackend::new();
        let mut mm = MaskTextureManager::new();
        let layer = masked_layer(1, "m", true);
        let mut provider = FixedMask(CpuFrame::solid(2, 2, [128, 128, 128, 255]));

        let first = mm.resolve(&backend, &layer, &mut provider).unwrap();
        assert!(first.inverted);
        assert_eq!(&backend.readback(first.texture).unwrap()[0..4], &[128, 128, 128, 255]);

        let second = mm.resolve(&backend, &layer, &mut provider).unwrap();
        assert_eq!(first.texture, second.texture);
    }

    #[test]
    fn missing_content_keeps_last_upload() {
        let backend = SoftwareBackend::new();
        let mut mm = MaskTextureManager::new();
        let layer = masked_layer(1, "m", false);
        let mut provider = FixedMask(CpuFrame::solid(1, 1, [10, 10, 10, 255]));
        let first = mm.resolve(&backend, &layer, &mut provider).unwrap();

        // Provider goes quiet; the previous mask texture keeps serving.
        let second = mm.resolve(&backend, &layer, &mut NoMasks).unwrap();
        assert_eq!(first.texture, second.texture);
    }

    #[test]
    fn mask_with_no_content_ever_uses_fallback() {
        let backend = SoftwareBackend::new();
        let mut mm = MaskTextureManager::new();
        let layer = masked_layer(1, "m", true);
        let resolved = mm.resolve(&backend, &layer, &mut NoMasks).unwrap();
        assert!(resolved.inverted);
        assert_eq!(
            backend.readback(resolved.texture).unwrap(),
            vec![255, 255, 255, 255]
        );
    }
}
