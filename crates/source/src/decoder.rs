//! The decoder seam and the in-tree raw-frame decoder.
//!
//! Hardware and platform decoders live outside this repo and plug in
//! through [`VideoDecoder`]. The trait bakes in the two facts the state
//! machine must survive: samples are fed in decode order while frames come
//! out in presentation order, and output is asynchronous — a submitted
//! sample may not produce a frame until later samples (or a flush) arrive.
//!
//! [`RawFrameDecoder`] decodes uncompressed streams (RGBA or NV12 sample
//! payloads, e.g. image sequences and capture dumps) and models the
//! reorder window real decoders exhibit, which makes it the reference
//! decoder for seek and export tests.

use std::collections::VecDeque;

use tracing::debug;

use fl_common::color::PixelFormat;
use fl_common::error::DecodeError;
use fl_common::sample::{DecodedFrame, Sample, VideoStreamInfo};
use fl_common::types::Resolution;

/// A video decoder: decode-order in, presentation-order out.
pub trait VideoDecoder: Send {
    /// Configure for a stream. Unsupported codecs fail fast with a typed
    /// error and are not retried.
    fn configure(&mut self, info: &VideoStreamInfo) -> Result<(), DecodeError>;

    /// Feed one sample in decode order.
    fn submit(&mut self, sample: &Sample) -> Result<(), DecodeError>;

    /// Ask the decoder to drain its reorder window.
    fn flush(&mut self) -> Result<(), DecodeError>;

    /// Pull the next decoded frame in presentation order, if one is ready.
    fn poll_frame(&mut self) -> Option<DecodedFrame>;

    /// Samples submitted but not yet emitted (the reorder window depth).
    fn queue_depth(&self) -> usize;

    /// Drop all pending state. The decoder must be reconfigured afterwards.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// BT.709 fixed-point conversion constants
// ---------------------------------------------------------------------------

// Fixed-point arithmetic with 10 bits of fractional precision (multiply by
// 1024) keeps floating point out of the inner loop.
//
//   R = 1.164 * (Y - 16) + 1.793 * (V - 128)
//   G = 1.164 * (Y - 16) - 0.213 * (U - 128) - 0.533 * (V - 128)
//   B = 1.164 * (Y - 16) + 2.112 * (U - 128)
const Y_SCALE: i32 = 1192; // 1.164 * 1024
const V_TO_R: i32 = 1836; // 1.793 * 1024
const U_TO_G: i32 = 218; // 0.213 * 1024
const V_TO_G: i32 = 546; // 0.533 * 1024
const U_TO_B: i32 = 2163; // 2.112 * 1024

#[inline(always)]
fn clamp_u8(val: i32) -> u8 {
    val.clamp(0, 255) as u8
}

/// Convert a packed NV12 payload (Y plane then interleaved UV) to RGBA8
/// using the BT.709 matrix.
pub fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, DecodeError> {
    let w = width as usize;
    let h = height as usize;
    let y_size = w * h;
    let needed = Resolution::new(width, height).nv12_byte_size();
    if width == 0 || height == 0 || height % 2 != 0 || data.len() < needed {
        return Err(DecodeError::SampleFailed {
            sample: 0,
            reason: format!(
                "bad NV12 payload: {}x{} needs {needed} bytes, got {}",
                width,
                height,
                data.len()
            ),
        });
    }
    let (y_plane, uv_plane) = data.split_at(y_size);
    let mut out = vec![0u8; w * h * 4];
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * w + col] as i32;
            let uv_idx = (row / 2) * w + (col / 2) * 2;
            let u = uv_plane[uv_idx] as i32 - 128;
            let v = uv_plane[uv_idx + 1] as i32 - 128;
            let y_term = Y_SCALE * (y - 16);
            let r = clamp_u8((y_term + V_TO_R * v) >> 10);
            let g = clamp_u8((y_term - U_TO_G * u - V_TO_G * v) >> 10);
            let b = clamp_u8((y_term + U_TO_B * u) >> 10);
            let idx = (row * w + col) * 4;
            out[idx] = r;
            out[idx + 1] = g;
            out[idx + 2] = b;
            out[idx + 3] = 255;
        }
    }
    Ok(out)
}

/// Decoder for uncompressed elementary streams.
///
/// Payloads are full frames (RGBA8 or NV12 per the stream's pixel format).
/// Decoded frames are held in a reorder window of `reorder_delay` frames
/// and released in presentation order, the way hardware decoders hold
/// frames until their forward references resolve.
pub struct RawFrameDecoder {
    info: Option<VideoStreamInfo>,
    /// Frames held for reordering, kept sorted by pts ascending.
    pending: Vec<DecodedFrame>,
    /// Frames released in presentation order, awaiting poll.
    output: VecDeque<DecodedFrame>,
    reorder_delay: usize,
}

/// Default reorder window, matching the display delay hardware decoders
/// are typically configured with.
pub const DEFAULT_REORDER_DELAY: usize = 4;

impl RawFrameDecoder {
    pub fn new() -> Self {
        Self::with_reorder_delay(DEFAULT_REORDER_DELAY)
    }

    pub fn with_reorder_delay(reorder_delay: usize) -> Self {
        Self {
            info: None,
            pending: Vec::new(),
            output: VecDeque::new(),
            reorder_delay,
        }
    }

    fn release_ready(&mut self) {
        while self.pending.len() > self.reorder_delay {
            self.output.push_back(self.pending.remove(0));
        }
    }
}

impl Default for RawFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDecoder for RawFrameDecoder {
    fn configure(&mut self, info: &VideoStreamInfo) -> Result<(), DecodeError> {
        match info.codec.as_str() {
            "rgba" | "nv12" => {}
            other => {
                return Err(DecodeError::UnsupportedCodec {
                    codec: other.to_string(),
                });
            }
        }
        debug!(
            codec = %info.codec,
            resolution = %info.resolution,
            "Configured raw-frame decoder"
        );
        self.pending.clear();
        self.output.clear();
        self.info = Some(info.clone());
        Ok(())
    }

    fn submit(&mut self, sample: &Sample) -> Result<(), DecodeError> {
        let info = self.info.as_ref().ok_or(DecodeError::NotConfigured)?;
        let width = info.resolution.width;
        let height = info.resolution.height;
        let data = match info.codec.as_str() {
            "rgba" => {
                let expected = info.resolution.rgba_byte_size();
                if sample.data.len() != expected {
                    return Err(DecodeError::SampleFailed {
                        sample: sample.decode_index,
                        reason: format!(
                            "RGBA payload is {} bytes, expected {expected}",
                            sample.data.len()
                        ),
                    });
                }
                sample.data.clone()
            }
            _ => nv12_to_rgba(&sample.data, width, height).map_err(|e| match e {
                DecodeError::SampleFailed { reason, .. } => DecodeError::SampleFailed {
                    sample: sample.decode_index,
                    reason,
                },
                other => other,
            })?,
        };
        let frame = DecodedFrame {
            pts_us: info.ticks_to_micros(sample.pts),
            width,
            height,
            format: PixelFormat::Rgba8,
            data,
        };
        let pos = self
            .pending
            .partition_point(|f| f.pts_us <= frame.pts_us);
        self.pending.insert(pos, frame);
        self.release_ready();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        if self.info.is_none() {
            return Err(DecodeError::NotConfigured);
        }
        while !self.pending.is_empty() {
            self.output.push_back(self.pending.remove(0));
        }
        Ok(())
    }

    fn poll_frame(&mut self) -> Option<DecodedFrame> {
        self.output.pop_front()
    }

    fn queue_depth(&self) -> usize {
        self.pending.len()
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.output.clear();
        self.info = None;
    }
}
