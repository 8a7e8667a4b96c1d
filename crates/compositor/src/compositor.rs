//! The per-frame ping-pong accumulation loop.
//!
//! Layers arrive in back-to-front order with their drawables already
//! resolved. For each layer: resolve uniforms (dirty-checked), fold inline
//! effects, route complex effects through the collaborator against the
//! scratch pair, bind base/layer/mask, dispatch the composite kernel onto
//! the back buffer, and swap. After the last layer the front buffer holds
//! the final composite.

use tracing::{debug, warn};

use fl_common::error::CompositeError;
use fl_common::gpu::{
    BindGroupDesc, BindGroupEntry, GpuBackend, LoadOp, PassDesc, TextureHandle,
};
use fl_common::kernel::{KernelArgs, KernelId};
use fl_common::layer::{Drawable, LayerRenderData};
use fl_common::types::TimeCode;
use fl_common::uniforms::CompositeUniforms;

use crate::effects::{partition_effects, EffectsPipeline};
use crate::pipeline::{CompositorPipeline, PingPongSlot, PingPongTargets};

/// A mask resolved to a texture (the shared white fallback when the layer
/// has none) plus the inversion flag.
#[derive(Copy, Clone, Debug)]
pub struct ResolvedMask {
    pub texture: TextureHandle,
    pub inverted: bool,
}

/// One layer ready for compositing.
pub struct CompositeLayer<'a> {
    pub data: &'a LayerRenderData,
    pub mask: ResolvedMask,
}

/// Terminal state of the loop: which texture (and physical slot) holds the
/// composite, and how many layers actually rendered.
#[derive(Copy, Clone, Debug)]
pub struct CompositeOutput {
    pub texture: TextureHandle,
    pub slot: PingPongSlot,
    pub layers_processed: usize,
}

/// Build the uniform block for one layer.
fn layer_uniforms(
    cl: &CompositeLayer<'_>,
    out_width: u32,
    out_height: u32,
    time: TimeCode,
) -> CompositeUniforms {
    let layer = &cl.data.layer;
    let (inline, _) = partition_effects(&layer.effects);
    let mut u = CompositeUniforms::new(layer.blend_mode).with_inline(inline);
    u.opacity = layer.opacity.clamp(0.0, 1.0);
    u.time = time.as_secs() as f32;
    u.dissolve_seed = layer.id.0 as u32;
    u.position = layer.position;
    u.scale = layer.scale;
    u.rotation = layer.rotation;
    u.src_width = cl.data.source_width as f32;
    u.src_height = cl.data.source_height as f32;
    u.out_width = out_width as f32;
    u.out_height = out_height as f32;
    u.set_mask_inverted(cl.mask.inverted);
    u
}

/// Composite `layers` (back-to-front) into the ping-pong targets.
pub fn composite_layers(
    backend: &dyn GpuBackend,
    pipeline: &mut CompositorPipeline,
    targets: &mut PingPongTargets,
    layers: &[CompositeLayer<'_>],
    mut effects: Option<&mut (dyn EffectsPipeline + 'static)>,
    time: TimeCode,
) -> Result<CompositeOutput, CompositeError> {
    targets.clear_front(backend)?;
    let out_width = targets.width();
    let out_height = targets.height();
    let mut processed = 0usize;

    for cl in layers {
        let layer = &cl.data.layer;

        // Resolve the drawable; a leftover placeholder means the nested
        // pre-render never filled it in. That layer is simply omitted.
        let mut source = match cl.data.drawable {
            Drawable::Texture(t) => SourceBinding::Texture(t),
            Drawable::External(e) => SourceBinding::External(e),
            Drawable::Pending => {
                warn!(layer = %layer.id, "Layer drawable still pending; skipping");
                continue;
            }
        };
        let mut dynamic = cl.data.is_dynamic;

        // Complex effects run through the collaborator; the output texture
        // replaces the layer source for the composite pass.
        let (_, complex) = partition_effects(&layer.effects);
        pipeline.note_effect_pass_count(layer.id, complex.len() as u32);
        if !complex.is_empty() {
            match effects.as_deref_mut() {
                Some(fx) => {
                    let (scratch_a, scratch_b) =
                        pipeline.scratch_pair(backend, out_width, out_height)?;
                    // Different copy path for external vs regular sources.
                    let (copy_kernel, copy_entry) = match source {
                        SourceBinding::Texture(t) => {
                            (KernelId::Copy, BindGroupEntry::Texture(t))
                        }
                        SourceBinding::External(e) => {
                            (KernelId::CopyExternal, BindGroupEntry::External(e))
                        }
                    };
                    let copy_group = pipeline.bind_group(
                        backend,
                        layer.id,
                        targets.front_slot(),
                        &BindGroupDesc::new(vec![copy_entry]),
                        true,
                    )?;
                    backend.dispatch(
                        &copy_kernel,
                        &PassDesc {
                            target: scratch_a,
                            bind_group: Some(copy_group),
                            args: KernelArgs::new(),
                            load: LoadOp::Load,
                        },
                    )?;

                    let out = fx.run(backend, &complex, scratch_a, (scratch_a, scratch_b))?;
                    debug!(
                        layer = %layer.id,
                        passes = complex.len(),
                        odd = out.odd_pass_count,
                        "Complex effects applied"
                    );
                    // The effect output's identity can change between
                    // frames, so this layer cannot use cached bind groups.
                    source = SourceBinding::Texture(out.output);
                    dynamic = true;
                }
                None => {
                    warn!(
                        layer = %layer.id,
                        count = complex.len(),
                        "No effects pipeline attached; complex effects skipped"
                    );
                }
            }
        }

        let uniforms = layer_uniforms(cl, out_width, out_height, time);
        pipeline.update_uniforms(backend, layer.id, &uniforms)?;
        let uniform = pipeline
            .uniform_handle(layer.id)
            .expect("uniform just updated");

        let (kernel, source_entry) = match source {
            SourceBinding::Texture(t) => (KernelId::Composite, BindGroupEntry::Texture(t)),
            SourceBinding::External(e) => {
                (KernelId::CompositeExternal, BindGroupEntry::External(e))
            }
        };
        let desc = BindGroupDesc::new(vec![
            BindGroupEntry::Uniform(uniform),
            BindGroupEntry::Texture(targets.front()),
            source_entry,
            BindGroupEntry::Texture(cl.mask.texture),
        ]);
        let bind_group =
            pipeline.bind_group(backend, layer.id, targets.front_slot(), &desc, dynamic)?;

        backend.dispatch(
            &kernel,
            &PassDesc {
                target: targets.back(),
                bind_group: Some(bind_group),
                args: KernelArgs::new(),
                load: LoadOp::Load,
            },
        )?;
        targets.swap();
        processed += 1;
    }

    Ok(CompositeOutput {
        texture: targets.front(),
        slot: targets.front_slot(),
        layers_processed: processed,
    })
}

enum SourceBinding {
    Texture(TextureHandle),
    External(fl_common::gpu::ExternalTextureHandle),
}
