//! Layer description — interface between the host application's store and
//! the render core.
//!
//! The core never owns layers: the caller hands it a read-only snapshot of
//! the layer stack every frame. Lower indices render on top, so the
//! collector walks the list in reverse to produce back-to-front order.

use serde::{Deserialize, Serialize};

use crate::blend::BlendMode;
use crate::effect::EffectInstance;
use crate::gpu::{ExternalTextureHandle, TextureHandle};
use crate::types::{LayerId, SourceId};

/// What a layer draws. Modeled as a tagged union; the collector dispatches
/// with an exhaustive match rather than property probing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LayerSource {
    /// A video clip; frames are resolved through the decode-strategy cascade.
    Video { source_id: SourceId },
    /// A still image, cached by content reference.
    Image {
        source_id: SourceId,
        /// Bumped by the host whenever the image content changes.
        revision: u64,
    },
    /// Rasterized text or a solid fill, delivered as a canvas bitmap.
    TextOrSolid {
        source_id: SourceId,
        revision: u64,
    },
    /// A nested sub-composition rendered recursively at its own resolution.
    NestedComposition {
        comp_id: SourceId,
        width: u32,
        height: u32,
    },
}

impl LayerSource {
    /// The identity the caches key on for this source.
    pub fn source_id(&self) -> &SourceId {
        match self {
            Self::Video { source_id }
            | Self::Image { source_id, .. }
            | Self::TextOrSolid { source_id, .. } => source_id,
            Self::NestedComposition { comp_id, .. } => comp_id,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video { .. })
    }
}

/// Mask assignment for a layer. Feather/blur is baked into the mask bitmap
/// by the mask-content provider; the core only samples and inverts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerMask {
    /// Identity of the clip providing mask content.
    pub clip_id: SourceId,
    /// Invert the sampled mask value.
    pub invert: bool,
    /// Feather radius in pixels, carried for the provider's benefit.
    pub feather: f32,
}

/// A compositing unit: one entry in the per-frame layer snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    /// Layer opacity (0..1).
    pub opacity: f32,
    pub blend_mode: BlendMode,
    /// Position offset in output pixels; z feeds the perspective divide.
    pub position: [f32; 3],
    /// Scale factors (1.0 = original size).
    pub scale: [f32; 2],
    /// Rotation per axis in degrees, applied X, then Y, then Z.
    pub rotation: [f32; 3],
    pub mask: Option<LayerMask>,
    /// Applied effects (in order).
    pub effects: Vec<EffectInstance>,
    pub source: Option<LayerSource>,
}

impl Layer {
    pub fn new(id: LayerId, source: LayerSource) -> Self {
        Self {
            id,
            name: String::new(),
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::default(),
            position: [0.0, 0.0, 0.0],
            scale: [1.0, 1.0],
            rotation: [0.0, 0.0, 0.0],
            mask: None,
            effects: Vec::new(),
            source: Some(source),
        }
    }

    /// Whether the collector should consider this layer at all.
    pub fn is_renderable(&self) -> bool {
        self.visible && self.opacity > 0.0 && self.source.is_some()
    }
}

/// The resolved drawable for one layer in one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Drawable {
    /// A persistent GPU texture (still image, cached frame, upload target).
    Texture(TextureHandle),
    /// A zero-copy video frame import, valid for this frame only.
    External(ExternalTextureHandle),
    /// Placeholder for a nested composition; the nested renderer fills in
    /// the texture later in the same frame.
    Pending,
}

/// Ephemeral per-layer render data, produced by the collector and consumed
/// by the compositor. Lifetime is one frame; never persisted.
#[derive(Clone, Debug)]
pub struct LayerRenderData {
    pub layer: Layer,
    pub drawable: Drawable,
    pub is_video: bool,
    /// Texture content changes every frame, so persistent bind-group caches
    /// must be bypassed for this layer.
    pub is_dynamic: bool,
    pub source_width: u32,
    pub source_height: u32,
}
