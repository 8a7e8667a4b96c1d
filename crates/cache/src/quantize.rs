//! Time quantization onto a fixed frame grid.
//!
//! All three cache tiers key "time" through one [`FrameQuantizer`], so a
//! scrub-cache entry written at 1.001s and a composite-cache lookup at
//! 0.999s agree that both mean frame 30 on a 30fps grid.

use fl_common::types::{FrameNumber, Rational, TimeCode};

/// A quantized time position: the frame index on the shared grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey(pub u64);

/// Snaps continuous timestamps onto a fixed-rate frame grid.
#[derive(Copy, Clone, Debug)]
pub struct FrameQuantizer {
    fps: Rational,
}

impl FrameQuantizer {
    pub fn new(fps: Rational) -> Self {
        Self { fps }
    }

    pub fn fps(&self) -> Rational {
        self.fps
    }

    /// Quantize a time to its frame key. Negative times clamp to frame 0.
    pub fn key(&self, time: TimeCode) -> FrameKey {
        FrameKey(time.as_frame(self.fps).0)
    }

    /// The grid time a key represents.
    pub fn time(&self, key: FrameKey) -> TimeCode {
        FrameNumber(key.0).as_timecode(self.fps)
    }
}

impl Default for FrameQuantizer {
    fn default() -> Self {
        Self::new(Rational::FPS_30)
    }
}
