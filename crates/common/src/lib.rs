//! `fl-common` — shared types and traits for the Frameloom render core.
//!
//! This crate is the interface layer between the engine's crates: the layer
//! data model consumed by the collector and compositor, the blend-mode table,
//! the elementary-stream sample types consumed by the video source, and the
//! backend-agnostic [`GpuBackend`] trait that the compositor and renderer
//! program against.
//!
//! No GPU-dependent crate talks to a concrete backend directly — everything
//! goes through [`GpuBackend`] and the [`KernelId`]/[`KernelArgs`] dispatch
//! surface defined here.

pub mod blend;
pub mod color;
pub mod config;
pub mod effect;
pub mod error;
pub mod gpu;
pub mod kernel;
pub mod layer;
pub mod sample;
pub mod types;
pub mod uniforms;

// Re-export the primary interface types.
pub use blend::BlendMode;
pub use color::PixelFormat;
pub use config::{CacheConfig, EngineConfig, SourceTimeouts};
pub use effect::{EffectId, EffectInstance, ParamValue};
pub use error::{
    CacheError, CompositeError, DecodeError, EngineError, EngineResult, GpuError, RenderError,
    StreamError,
};
pub use gpu::{
    BindGroupDesc, BindGroupEntry, BindGroupHandle, ExternalFrame, ExternalTextureHandle,
    GpuBackend, LoadOp, PassDesc, SamplerHandle, TextureDesc, TextureHandle, UniformHandle,
};
pub use kernel::{KernelArg, KernelArgs, KernelId};
pub use layer::{Drawable, Layer, LayerMask, LayerRenderData, LayerSource};
pub use sample::{CpuFrame, DecodedFrame, Sample, VideoStreamInfo};
pub use types::{FrameNumber, LayerId, Rational, Resolution, SourceId, SurfaceId, TimeCode};
pub use uniforms::{CompositeUniforms, InlineAdjustments};
