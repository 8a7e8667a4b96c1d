//! Identifier and time newtypes shared across the engine.
//!
//! Times exist in three shapes and each has one home: continuous seconds
//! ([`TimeCode`], the render loop's currency), positions on a fixed-rate
//! frame grid ([`FrameNumber`], what the caches key on after quantization),
//! and stream-native microseconds (plain `i64`, the decode subsystem's
//! currency). Conversions between them live here so rounding happens in
//! exactly one place.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position on a fixed-rate frame grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameNumber(pub u64);

impl FrameNumber {
    /// The grid time this frame starts at.
    pub fn as_timecode(self, fps: Rational) -> TimeCode {
        TimeCode(self.0 as f64 / fps.as_f64())
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// A continuous timestamp in seconds.
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TimeCode(pub f64);

impl TimeCode {
    pub const ZERO: Self = Self(0.0);

    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Snap to the nearest frame on an `fps` grid. Negative times land on
    /// frame zero.
    pub fn as_frame(self, fps: Rational) -> FrameNumber {
        FrameNumber((self.0 * fps.as_f64()).round().max(0.0) as u64)
    }

    /// Microseconds, the decode subsystem's presentation-time unit.
    pub fn as_micros(self) -> i64 {
        (self.0 * 1_000_000.0).round() as i64
    }

    pub fn from_micros(us: i64) -> Self {
        Self(us as f64 / 1_000_000.0)
    }
}

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clamped = self.0.max(0.0);
        let hours = (clamped / 3600.0) as u32;
        let mins = ((clamped % 3600.0) / 60.0) as u32;
        let secs = clamped % 60.0;
        write!(f, "{hours:02}:{mins:02}:{secs:06.3}")
    }
}

/// Exact frame rate as a ratio, so NTSC rates carry no rounding error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const FPS_30: Self = Self { num: 30, den: 1 };
    pub const FPS_29_97: Self = Self {
        num: 30000,
        den: 1001,
    };

    /// # Panics
    ///
    /// Panics if `den` is zero.
    pub fn new(num: u32, den: u32) -> Self {
        assert!(den > 0, "Rational denominator must be > 0");
        Self { num, den }
    }

    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Pixel dimensions of a frame, texture, or output surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD: Self = Self {
        width: 1920,
        height: 1080,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Packed RGBA8 byte size.
    pub fn rgba_byte_size(self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// NV12 byte size: full-res Y plane plus half-height interleaved UV.
    pub fn nv12_byte_size(self) -> usize {
        let y = self.width as usize * self.height as usize;
        y + self.width as usize * (self.height as usize / 2)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Identity of a media source bound to a layer: a clip, a still, a canvas,
/// or a nested composition. Every cache tier keys on this.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a layer. Per-layer GPU resources (uniform buffers,
/// bind-group cache entries, mask textures) are keyed by this, so the host
/// must keep it constant across frames for the caches to pay off.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Identity of a registered output surface.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
