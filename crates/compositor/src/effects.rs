//! Effect partitioning and the effects-collaborator seam.
//!
//! Brightness, contrast, saturation, and invert fold directly into the
//! composite pass's uniforms (zero extra passes). Everything else is a
//! complex effect and runs through the external [`EffectsPipeline`]
//! collaborator against a scratch texture pair; the collaborator reports
//! whether an odd or even number of passes ran, since parity determines
//! which scratch buffer holds the result.

use fl_common::effect::{EffectInstance, ParamValue};
use fl_common::error::CompositeError;
use fl_common::gpu::{GpuBackend, TextureHandle};
use fl_common::uniforms::InlineAdjustments;

/// Result of running the external effects chain.
#[derive(Copy, Clone, Debug)]
pub struct EffectsOutput {
    /// The texture holding the final effect output.
    pub output: TextureHandle,
    /// Whether an odd number of passes ran.
    pub odd_pass_count: bool,
}

/// External effects collaborator.
pub trait EffectsPipeline {
    /// Run `effects` (already filtered to enabled, non-inlineable ones)
    /// over `source`, using `scratch` as the ping-pong pair. Returns the
    /// output texture and the pass parity.
    fn run(
        &mut self,
        backend: &dyn GpuBackend,
        effects: &[EffectInstance],
        source: TextureHandle,
        scratch: (TextureHandle, TextureHandle),
    ) -> Result<EffectsOutput, CompositeError>;
}

fn float_param(fx: &EffectInstance, name: &str, default: f32) -> f32 {
    fx.get_param(name)
        .and_then(ParamValue::as_float)
        .unwrap_or(default)
}

/// Split a layer's enabled effects into inline adjustments and the complex
/// remainder (order preserved).
pub fn partition_effects(effects: &[EffectInstance]) -> (InlineAdjustments, Vec<EffectInstance>) {
    let mut inline = InlineAdjustments::default();
    let mut complex = Vec::new();
    for fx in effects.iter().filter(|fx| fx.enabled) {
        match fx.effect_id.0.as_str() {
            "brightness" => inline.brightness += float_param(fx, "amount", 0.0),
            "contrast" => inline.contrast *= float_param(fx, "amount", 1.0),
            "saturation" => inline.saturation *= float_param(fx, "amount", 1.0),
            "invert" => inline.invert = !inline.invert,
            _ => complex.push(fx.clone()),
        }
    }
    (inline, complex)
}
