//! Blend mode definitions for layer compositing.
//!
//! The table covers the full editor menu: the normal/dissolve pair, the
//! darken and lighten families, the contrast family, the inversion family,
//! the HSL-component family, and the alpha-semantic modes
//! (stencil/silhouette/alpha-add) that reinterpret the alpha channel instead
//! of blending color. The exact per-mode formulas are implemented by the
//! composite kernels and are a visual-parity contract.

use serde::{Deserialize, Serialize};

/// Blend modes for compositing layers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    /// Stochastic per-pixel threshold on a fixed UV hash.
    Dissolve,
    /// Dissolve with a time-varying hash seed (re-rolls every frame).
    DancingDissolve,
    Darken,
    Multiply,
    ColorBurn,
    /// Legacy color burn (different handling of the s=0 singularity).
    ClassicColorBurn,
    LinearBurn,
    DarkerColor,
    Add,
    Lighten,
    Screen,
    ColorDodge,
    /// Legacy color dodge (different handling of the s=1 singularity).
    ClassicColorDodge,
    LinearDodge,
    LighterColor,
    Overlay,
    SoftLight,
    HardLight,
    LinearLight,
    VividLight,
    PinLight,
    HardMix,
    Difference,
    /// Legacy difference (identical per-channel math; kept as a distinct
    /// mode for project compatibility).
    ClassicDifference,
    Exclusion,
    Subtract,
    Divide,
    Hue,
    Saturation,
    Color,
    Luminosity,
    /// Keep base color, multiply base alpha by source alpha.
    StencilAlpha,
    /// Keep base color, multiply base alpha by source luma.
    StencilLuma,
    /// Keep base color, multiply base alpha by inverse source alpha.
    SilhouetteAlpha,
    /// Keep base color, multiply base alpha by inverse source luma.
    SilhouetteLuma,
    /// Normal color blend with additive alpha accumulation.
    AlphaAdd,
}

impl BlendMode {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Dissolve => "Dissolve",
            Self::DancingDissolve => "Dancing Dissolve",
            Self::Darken => "Darken",
            Self::Multiply => "Multiply",
            Self::ColorBurn => "Color Burn",
            Self::ClassicColorBurn => "Classic Color Burn",
            Self::LinearBurn => "Linear Burn",
            Self::DarkerColor => "Darker Color",
            Self::Add => "Add",
            Self::Lighten => "Lighten",
            Self::Screen => "Screen",
            Self::ColorDodge => "Color Dodge",
            Self::ClassicColorDodge => "Classic Color Dodge",
            Self::LinearDodge => "Linear Dodge",
            Self::LighterColor => "Lighter Color",
            Self::Overlay => "Overlay",
            Self::SoftLight => "Soft Light",
            Self::HardLight => "Hard Light",
            Self::LinearLight => "Linear Light",
            Self::VividLight => "Vivid Light",
            Self::PinLight => "Pin Light",
            Self::HardMix => "Hard Mix",
            Self::Difference => "Difference",
            Self::ClassicDifference => "Classic Difference",
            Self::Exclusion => "Exclusion",
            Self::Subtract => "Subtract",
            Self::Divide => "Divide",
            Self::Hue => "Hue",
            Self::Saturation => "Saturation",
            Self::Color => "Color",
            Self::Luminosity => "Luminosity",
            Self::StencilAlpha => "Stencil Alpha",
            Self::StencilLuma => "Stencil Luma",
            Self::SilhouetteAlpha => "Silhouette Alpha",
            Self::SilhouetteLuma => "Silhouette Luma",
            Self::AlphaAdd => "Alpha Add",
        }
    }

    /// All blend modes in display order.
    pub fn all() -> &'static [BlendMode] {
        &[
            Self::Normal,
            Self::Dissolve,
            Self::DancingDissolve,
            Self::Darken,
            Self::Multiply,
            Self::ColorBurn,
            Self::ClassicColorBurn,
            Self::LinearBurn,
            Self::DarkerColor,
            Self::Add,
            Self::Lighten,
            Self::Screen,
            Self::ColorDodge,
            Self::ClassicColorDodge,
            Self::LinearDodge,
            Self::LighterColor,
            Self::Overlay,
            Self::SoftLight,
            Self::HardLight,
            Self::LinearLight,
            Self::VividLight,
            Self::PinLight,
            Self::HardMix,
            Self::Difference,
            Self::ClassicDifference,
            Self::Exclusion,
            Self::Subtract,
            Self::Divide,
            Self::Hue,
            Self::Saturation,
            Self::Color,
            Self::Luminosity,
            Self::StencilAlpha,
            Self::StencilLuma,
            Self::SilhouetteAlpha,
            Self::SilhouetteLuma,
            Self::AlphaAdd,
        ]
    }

    /// The integer constant the composite kernels switch on.
    ///
    /// The mapping is stable: it is written into uniform buffers and must
    /// match the kernel switch on every backend.
    pub fn kernel_index(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::Dissolve => 1,
            Self::DancingDissolve => 2,
            Self::Darken => 3,
            Self::Multiply => 4,
            Self::ColorBurn => 5,
            Self::ClassicColorBurn => 6,
            Self::LinearBurn => 7,
            Self::DarkerColor => 8,
            Self::Add => 9,
            Self::Lighten => 10,
            Self::Screen => 11,
            Self::ColorDodge => 12,
            Self::ClassicColorDodge => 13,
            Self::LinearDodge => 14,
            Self::LighterColor => 15,
            Self::Overlay => 16,
            Self::SoftLight => 17,
            Self::HardLight => 18,
            Self::LinearLight => 19,
            Self::VividLight => 20,
            Self::PinLight => 21,
            Self::HardMix => 22,
            Self::Difference => 23,
            Self::ClassicDifference => 24,
            Self::Exclusion => 25,
            Self::Subtract => 26,
            Self::Divide => 27,
            Self::Hue => 28,
            Self::Saturation => 29,
            Self::Color => 30,
            Self::Luminosity => 31,
            Self::StencilAlpha => 32,
            Self::StencilLuma => 33,
            Self::SilhouetteAlpha => 34,
            Self::SilhouetteLuma => 35,
            Self::AlphaAdd => 36,
        }
    }

    /// Inverse of [`kernel_index`](Self::kernel_index).
    pub fn from_kernel_index(index: u32) -> Option<Self> {
        Self::all().iter().copied().find(|m| m.kernel_index() == index)
    }

    /// Modes that reinterpret alpha semantics instead of blending colors.
    pub fn is_alpha_semantic(self) -> bool {
        matches!(
            self,
            Self::StencilAlpha
                | Self::StencilLuma
                | Self::SilhouetteAlpha
                | Self::SilhouetteLuma
                | Self::AlphaAdd
        )
    }

    /// Modes whose result depends on the per-pixel dissolve hash.
    pub fn uses_dissolve_hash(self) -> bool {
        matches!(self, Self::Dissolve | Self::DancingDissolve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn table_has_thirty_seven_modes() {
        assert_eq!(BlendMode::all().len(), 37);
    }

    #[test]
    fn kernel_indices_are_unique_and_dense() {
        let indices: HashSet<u32> = BlendMode::all().iter().map(|m| m.kernel_index()).collect();
        assert_eq!(indices.len(), BlendMode::all().len());
        for i in 0..BlendMode::all().len() as u32 {
            assert!(indices.contains(&i), "missing kernel index {i}");
        }
    }

    #[test]
    fn kernel_index_roundtrip() {
        for &mode in BlendMode::all() {
            assert_eq!(BlendMode::from_kernel_index(mode.kernel_index()), Some(mode));
        }
        assert_eq!(BlendMode::from_kernel_index(999), None);
    }

    #[test]
    fn alpha_semantic_classification() {
        assert!(BlendMode::StencilAlpha.is_alpha_semantic());
        assert!(BlendMode::AlphaAdd.is_alpha_semantic());
        assert!(!BlendMode::Normal.is_alpha_semantic());
        assert!(!BlendMode::Multiply.is_alpha_semantic());
    }

    #[test]
    fn dissolve_classification() {
        assert!(BlendMode::Dissolve.uses_dissolve_hash());
        assert!(BlendMode::DancingDissolve.uses_dissolve_hash());
        assert!(!BlendMode::Screen.uses_dissolve_hash());
    }

    #[test]
    fn serde_roundtrip() {
        let json = serde_json::to_string(&BlendMode::VividLight).unwrap();
        let back: BlendMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BlendMode::VividLight);
    }
}
