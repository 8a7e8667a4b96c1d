//! `fl-compositor` — GPU layer compositing for the Frameloom engine.
//!
//! The compositor drives one frame's ping-pong accumulation loop over an
//! ordered (back-to-front) list of resolved layers:
//!
//! 1. resolve per-layer uniforms with snapshot-compare dirty checking
//!    ([`uniforms::Tracked`]),
//! 2. fold inline effects into the composite pass and route complex
//!    effects through the external [`effects::EffectsPipeline`]
//!    collaborator,
//! 3. dispatch the composite kernel onto the back buffer and swap
//!    ([`pipeline::PingPongTargets`]).
//!
//! All GPU resources flow through [`fl_common::GpuBackend`]; the pipeline
//! owns per-layer uniform buffers and two bind-group caches (persistent for
//! static content, per-frame for one-frame external textures).

pub mod compositor;
pub mod effects;
pub mod pipeline;
pub mod uniforms;

pub use compositor::{composite_layers, CompositeLayer, CompositeOutput, ResolvedMask};
pub use effects::{partition_effects, EffectsOutput, EffectsPipeline};
pub use pipeline::{CompositorPipeline, PingPongSlot, PingPongTargets};
pub use uniforms::{Tracked, UniformBlock};
