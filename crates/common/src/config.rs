//! Engine configuration with validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EngineError;
use crate::types::Rational;

/// Cache budgets. Both the scrub cache and the composite cache are hard
/// bounds: eviction runs until every configured bound holds again.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Fixed frame grid shared by every time-keyed cache.
    pub quantize_fps: Rational,
    /// Maximum decoded frames in the scrub cache.
    pub scrub_max_frames: usize,
    /// Maximum frames in the composite (RAM preview) cache.
    pub composite_max_frames: usize,
    /// Maximum bytes in the composite cache.
    pub composite_max_bytes: usize,
    /// Maximum frames in the GPU promotion cache.
    pub gpu_promotion_max_frames: usize,
    /// Minimum interval between last-good-frame refreshes per source.
    pub last_good_refresh_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            quantize_fps: Rational::FPS_30,
            scrub_max_frames: 300,
            composite_max_frames: 900,
            composite_max_bytes: 512 * 1024 * 1024,
            gpu_promotion_max_frames: 60,
            last_good_refresh_interval: Duration::from_millis(250),
        }
    }
}

/// Timeouts for every wait point in the video source state machine.
/// Each wait degrades to a best-effort fallback rather than hanging.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceTimeouts {
    /// Waiting for stream metadata from the demuxer.
    pub metadata: Duration,
    /// Waiting for the decoder to accept configuration.
    pub configure: Duration,
    /// Waiting for a sought frame to come out of the decoder.
    pub seek_frame: Duration,
    /// Base flush timeout; scaled by batch size during export.
    pub flush_per_sample: Duration,
}

impl Default for SourceTimeouts {
    fn default() -> Self {
        Self {
            metadata: Duration::from_secs(5),
            configure: Duration::from_secs(2),
            seek_frame: Duration::from_millis(750),
            flush_per_sample: Duration::from_millis(40),
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub timeouts: SourceTimeouts,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.cache.scrub_max_frames == 0 {
            return Err(EngineError::InvalidConfig(
                "scrub_max_frames must be > 0".to_string(),
            ));
        }
        if self.cache.composite_max_frames == 0 {
            return Err(EngineError::InvalidConfig(
                "composite_max_frames must be > 0".to_string(),
            ));
        }
        if self.cache.composite_max_bytes == 0 {
            return Err(EngineError::InvalidConfig(
                "composite_max_bytes must be > 0".to_string(),
            ));
        }
        if self.cache.gpu_promotion_max_frames == 0 {
            return Err(EngineError::InvalidConfig(
                "gpu_promotion_max_frames must be > 0".to_string(),
            ));
        }
        if self.cache.quantize_fps.den == 0 || self.cache.quantize_fps.num == 0 {
            return Err(EngineError::InvalidConfig(
                "quantize_fps must be a positive rational".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_scrub_frames_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.cache.scrub_max_frames = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_byte_budget_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.cache.composite_max_bytes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cache.scrub_max_frames, 300);
        assert_eq!(back.cache.gpu_promotion_max_frames, 60);
    }
}
