//! `fl-source` — the frame-accurate video source.
//!
//! Wraps a single elementary video stream and exposes "current frame",
//! synchronous and asynchronous seek, and a sequential-export mode that
//! buffers decoded output ordered by presentation time despite the
//! decode/presentation order divergence B-frames introduce.
//!
//! The demuxer is an external collaborator: samples arrive already parsed
//! through [`StreamProvider`]. Decoding goes through the [`VideoDecoder`]
//! trait; [`RawFrameDecoder`] ships in-tree for uncompressed streams (RGBA
//! and NV12 payloads) and doubles as the reference for the reorder
//! semantics hardware decoders exhibit.

pub mod decoder;
pub mod export;
pub mod sample_table;
pub mod state;

pub use decoder::{RawFrameDecoder, VideoDecoder};
pub use export::{ExportConfig, ExportProgress, ExportSession};
pub use sample_table::SampleTable;
pub use state::{SourceState, StreamProvider, VideoSource};
