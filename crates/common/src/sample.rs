//! Elementary-stream samples and decoded frames — output of the (external)
//! demuxer, input to the video source's decode state machine.

use crate::color::PixelFormat;
use crate::types::{Rational, Resolution, TimeCode};

/// One elementary-stream sample in decode order.
///
/// Samples are stored in decode order; presentation order is a permutation
/// of decode order when forward-referencing (B-)frames are present.
#[derive(Clone, Debug)]
pub struct Sample {
    /// Position in the stream's decode sequence.
    pub decode_index: usize,
    /// Presentation timestamp in stream ticks.
    pub pts: i64,
    /// Duration in stream ticks.
    pub duration: u32,
    /// Whether this sample is decodable without reference to any other
    /// sample (IDR/keyframe). Seeks always start from one of these.
    pub is_sync: bool,
    /// Raw sample payload.
    pub data: Vec<u8>,
}

/// A decoded frame emitted by a video decoder, in CPU memory.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    /// Presentation time in microseconds.
    pub pts_us: i64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Packed pixel data (`width * height * 4` bytes for RGBA).
    pub data: Vec<u8>,
}

impl DecodedFrame {
    pub fn pts(&self) -> TimeCode {
        TimeCode::from_micros(self.pts_us)
    }
}

/// A CPU-side RGBA bitmap, as produced by hardware-helper decoders, canvas
/// rasterization, and cache readback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA8, straight alpha, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

impl CpuFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// A frame filled with one RGBA color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width as usize * height as usize {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// Stream info extracted by the external demuxer during metadata parsing.
#[derive(Clone, Debug)]
pub struct VideoStreamInfo {
    /// FourCC-style codec tag (e.g. "avc1", "hvc1", "raw ").
    pub codec: String,
    pub resolution: Resolution,
    pub fps: Rational,
    pub duration: TimeCode,
    /// Ticks per second for sample timestamps.
    pub timescale: u32,
    /// Pixel format the decoder emits.
    pub pixel_format: PixelFormat,
    /// Codec-specific configuration data (SPS/PPS etc.).
    pub extra_data: Vec<u8>,
}

impl VideoStreamInfo {
    /// Convert a timestamp in stream ticks to seconds.
    pub fn ticks_to_secs(&self, ticks: i64) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        ticks as f64 / self.timescale as f64
    }

    /// Convert seconds to stream ticks.
    pub fn secs_to_ticks(&self, secs: f64) -> i64 {
        (secs * self.timescale as f64).round() as i64
    }

    /// Convert a pts in stream ticks to microseconds.
    pub fn ticks_to_micros(&self, ticks: i64) -> i64 {
        if self.timescale == 0 {
            return 0;
        }
        (ticks as f64 * 1_000_000.0 / self.timescale as f64).round() as i64
    }
}
