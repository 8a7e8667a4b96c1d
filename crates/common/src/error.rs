//! Central error types for the engine (thiserror-based).
//!
//! The taxonomy follows how failures are handled, not where they occur:
//! configuration errors fail fast, transient decode errors are swallowed
//! per-sample, resource-unavailable is not an error at all (the collector
//! omits the layer), GPU submission failures abandon the frame, cache
//! inconsistencies degrade to misses, and every timeout degrades to a
//! best-effort fallback. Nothing here is allowed to escape the render loop
//! as a panic.

use thiserror::Error;

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Composite error: {0}")]
    Composite(#[from] CompositeError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

/// GPU backend errors.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("No GPU backend available")]
    NoBackend,

    #[error("GPU device initialization failed: {0}")]
    DeviceInit(String),

    #[error("GPU device lost")]
    DeviceLost,

    #[error("Texture allocation failed: {width}x{height}")]
    TextureAllocFailed { width: u32, height: u32 },

    #[error("Stale resource handle: {0}")]
    StaleHandle(String),

    #[error("External texture used outside its frame: imported at epoch {imported}, current epoch {current}")]
    ExpiredExternalTexture { imported: u64, current: u64 },

    #[error("Kernel dispatch failed: {kernel}: {reason}")]
    KernelFailed { kernel: String, reason: String },

    #[error("Upload size mismatch: expected {expected} bytes, got {got}")]
    UploadSizeMismatch { expected: usize, got: usize },

    #[error("Unsupported pixel format for {op}: {format}")]
    UnsupportedFormat { op: &'static str, format: String },

    #[error("GPU-to-host transfer failed: {0}")]
    TransferFailed(String),
}

/// Elementary-stream / metadata errors.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream has no samples")]
    EmptyStream,

    #[error("Timed out waiting for stream metadata")]
    MetadataTimeout,

    #[error("Invalid sample table: {0}")]
    InvalidSampleTable(String),
}

/// Decoder errors.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported codec: {codec}")]
    UnsupportedCodec { codec: String },

    #[error("Decoder configuration failed for {codec}: {reason}")]
    ConfigureFailed { codec: String, reason: String },

    #[error("Decode failed at sample {sample}: {reason}")]
    SampleFailed { sample: usize, reason: String },

    #[error("Decoder is not configured")]
    NotConfigured,

    #[error("Timed out waiting for decoder flush ({waited_ms}ms)")]
    FlushTimeout { waited_ms: u64 },

    #[error("Export was cancelled")]
    Cancelled,

    #[error("Source was destroyed")]
    Destroyed,
}

/// Compositing errors.
#[derive(Error, Debug)]
pub enum CompositeError {
    #[error("Layer {0} has no drawable")]
    MissingDrawable(String),

    #[error("Effects pipeline failed: {0}")]
    EffectsFailed(String),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}

/// Cache errors. Lookups never surface these to the render loop; a backing
/// resource gone missing is downgraded to a miss at the call site.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cached entry's backing texture was destroyed: {0}")]
    BackingResourceGone(String),
}

/// Render-loop orchestration errors.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Unknown output surface: {0}")]
    UnknownSurface(String),

    #[error("Nested composition recursion exceeded depth {max_depth}: {comp_id}")]
    NestingTooDeep { max_depth: usize, comp_id: String },

    #[error("Composition not found: {0}")]
    CompositionNotFound(String),

    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    #[error("Composite error: {0}")]
    Composite(#[from] CompositeError),
}

/// Convenience Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
