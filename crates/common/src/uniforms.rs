//! The composite pass's uniform block.
//!
//! [`CompositeUniforms`] is the shared contract between the compositor
//! (which fills and dirty-checks it) and the backends (which read it during
//! the composite kernels). The byte layout is fixed: 32-bit fields in
//! declaration order, little-endian, no padding.

use crate::blend::BlendMode;

/// Inline per-pixel adjustments folded directly into the composite pass.
///
/// These four effects never cost an extra render pass; everything else goes
/// through the external effects collaborator.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct InlineAdjustments {
    /// Additive brightness in [-1, 1]. 0 = identity.
    pub brightness: f32,
    /// Contrast multiplier around mid-gray. 1 = identity.
    pub contrast: f32,
    /// Saturation multiplier. 1 = identity.
    pub saturation: f32,
    /// Invert RGB.
    pub invert: bool,
}

impl Default for InlineAdjustments {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: 1.0,
            saturation: 1.0,
            invert: false,
        }
    }
}

impl InlineAdjustments {
    pub fn is_identity(&self) -> bool {
        self.brightness.abs() < f32::EPSILON
            && (self.contrast - 1.0).abs() < f32::EPSILON
            && (self.saturation - 1.0).abs() < f32::EPSILON
            && !self.invert
    }
}

/// Uniform flag bits.
pub const UNIFORM_FLAG_INVERT_MASK: u32 = 1 << 0;

/// Per-layer uniforms consumed by the composite kernels.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CompositeUniforms {
    /// Layer opacity in [0, 1].
    pub opacity: f32,
    /// [`BlendMode::kernel_index`] value.
    pub blend_mode: u32,
    /// Bitfield, see `UNIFORM_FLAG_*`.
    pub flags: u32,
    /// Composition time in seconds (drives the dancing-dissolve hash).
    pub time: f32,
    /// Per-layer dissolve seed so stacked dissolve layers decorrelate.
    pub dissolve_seed: u32,
    /// Position offset in output pixels; z feeds the perspective divide.
    pub position: [f32; 3],
    pub scale: [f32; 2],
    /// Rotation per axis in degrees, applied X, then Y, then Z.
    pub rotation: [f32; 3],
    /// Perspective distance; the divide clamps it to at least 0.5.
    pub perspective: f32,
    pub src_width: f32,
    pub src_height: f32,
    pub out_width: f32,
    pub out_height: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    /// 1.0 = invert RGB, 0.0 = identity.
    pub invert: f32,
}

/// Absolute tolerance for float-field dirty checking.
pub const UNIFORM_EPSILON: f32 = 1e-4;

impl CompositeUniforms {
    /// Encoded byte size: 22 32-bit fields.
    pub const BYTE_SIZE: usize = 22 * 4;

    pub fn new(blend_mode: BlendMode) -> Self {
        Self {
            opacity: 1.0,
            blend_mode: blend_mode.kernel_index(),
            flags: 0,
            time: 0.0,
            dissolve_seed: 0,
            position: [0.0, 0.0, 0.0],
            scale: [1.0, 1.0],
            rotation: [0.0, 0.0, 0.0],
            perspective: 1000.0,
            src_width: 0.0,
            src_height: 0.0,
            out_width: 0.0,
            out_height: 0.0,
            brightness: 0.0,
            contrast: 1.0,
            saturation: 1.0,
            invert: 0.0,
        }
    }

    pub fn with_inline(mut self, inline: InlineAdjustments) -> Self {
        self.brightness = inline.brightness;
        self.contrast = inline.contrast;
        self.saturation = inline.saturation;
        self.invert = if inline.invert { 1.0 } else { 0.0 };
        self
    }

    pub fn inline(&self) -> InlineAdjustments {
        InlineAdjustments {
            brightness: self.brightness,
            contrast: self.contrast,
            saturation: self.saturation,
            invert: self.invert > 0.5,
        }
    }

    pub fn mask_inverted(&self) -> bool {
        self.flags & UNIFORM_FLAG_INVERT_MASK != 0
    }

    pub fn set_mask_inverted(&mut self, inverted: bool) {
        if inverted {
            self.flags |= UNIFORM_FLAG_INVERT_MASK;
        } else {
            self.flags &= !UNIFORM_FLAG_INVERT_MASK;
        }
    }

    /// Field-by-field comparison: floats within [`UNIFORM_EPSILON`],
    /// integer-coded fields exactly. Used to skip redundant GPU writes.
    pub fn approx_eq(&self, other: &Self) -> bool {
        fn feq(a: f32, b: f32) -> bool {
            (a - b).abs() <= UNIFORM_EPSILON
        }
        self.blend_mode == other.blend_mode
            && self.flags == other.flags
            && self.dissolve_seed == other.dissolve_seed
            && feq(self.opacity, other.opacity)
            && feq(self.time, other.time)
            && self
                .position
                .iter()
                .zip(other.position.iter())
                .all(|(a, b)| feq(*a, *b))
            && self
                .scale
                .iter()
                .zip(other.scale.iter())
                .all(|(a, b)| feq(*a, *b))
            && self
                .rotation
                .iter()
                .zip(other.rotation.iter())
                .all(|(a, b)| feq(*a, *b))
            && feq(self.perspective, other.perspective)
            && feq(self.src_width, other.src_width)
            && feq(self.src_height, other.src_height)
            && feq(self.out_width, other.out_width)
            && feq(self.out_height, other.out_height)
            && feq(self.brightness, other.brightness)
            && feq(self.contrast, other.contrast)
            && feq(self.saturation, other.saturation)
            && feq(self.invert, other.invert)
    }

    /// Serialize to the fixed little-endian layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::BYTE_SIZE);
        out.extend_from_slice(&self.opacity.to_le_bytes());
        out.extend_from_slice(&self.blend_mode.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.dissolve_seed.to_le_bytes());
        for v in self.position {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.scale {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.rotation {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.perspective.to_le_bytes());
        out.extend_from_slice(&self.src_width.to_le_bytes());
        out.extend_from_slice(&self.src_height.to_le_bytes());
        out.extend_from_slice(&self.out_width.to_le_bytes());
        out.extend_from_slice(&self.out_height.to_le_bytes());
        out.extend_from_slice(&self.brightness.to_le_bytes());
        out.extend_from_slice(&self.contrast.to_le_bytes());
        out.extend_from_slice(&self.saturation.to_le_bytes());
        out.extend_from_slice(&self.invert.to_le_bytes());
        debug_assert_eq!(out.len(), Self::BYTE_SIZE);
        out
    }

    /// Deserialize from the fixed layout. `None` if `data` is too short.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::BYTE_SIZE {
            return None;
        }
        let f = |i: usize| -> f32 {
            f32::from_le_bytes([data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]])
        };
        let u = |i: usize| -> u32 {
            u32::from_le_bytes([data[i * 4], data[i * 4 + 1], data[i * 4 + 2], data[i * 4 + 3]])
        };
        Some(Self {
            opacity: f(0),
            blend_mode: u(1),
            flags: u(2),
            time: f(3),
            dissolve_seed: u(4),
            position: [f(5), f(6), f(7)],
            scale: [f(8), f(9)],
            rotation: [f(10), f(11), f(12)],
            perspective: f(13),
            src_width: f(14),
            src_height: f(15),
            out_width: f(16),
            out_height: f(17),
            brightness: f(18),
            contrast: f(19),
            saturation: f(20),
            invert: f(21),
        })
    }
}
