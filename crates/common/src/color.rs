//! Pixel formats and color transfer helpers.

use serde::{Deserialize, Serialize};

/// Pixel formats handled by the engine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA, straight (non-premultiplied) alpha.
    #[default]
    Rgba8,
    /// 8-bit BGRA, straight alpha (some decoder surfaces).
    Bgra8,
    /// Semi-planar YUV 4:2:0 (hardware decoder output).
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats. NV12 is planar; callers should
    /// use [`crate::types::Resolution::nv12_byte_size`] instead.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            Self::Rgba8 | Self::Bgra8 => Some(4),
            Self::Nv12 => None,
        }
    }
}

/// Convert an sRGB component (0.0..1.0) to linear light.
///
/// Uses the exact sRGB transfer function (IEC 61966-2-1).
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Convert a linear-light component (0.0..1.0) to sRGB.
///
/// Uses the exact sRGB inverse transfer function (IEC 61966-2-1).
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_formats_have_bpp() {
        assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), Some(4));
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), Some(4));
        assert_eq!(PixelFormat::Nv12.bytes_per_pixel(), None);
    }

    #[test]
    fn srgb_linear_roundtrip() {
        assert!((srgb_to_linear(0.0) - 0.0).abs() < 1e-6);
        assert!((srgb_to_linear(1.0) - 1.0).abs() < 1e-6);

        for i in 0..=10 {
            let v = i as f32 / 10.0;
            let linear = srgb_to_linear(v);
            let back = linear_to_srgb(linear);
            assert!(
                (back - v).abs() < 1e-5,
                "Roundtrip failed for {v}: got {back}"
            );
        }
    }

    #[test]
    fn srgb_to_linear_monotonic() {
        let mut prev = srgb_to_linear(0.0);
        for i in 1..=100 {
            let v = i as f32 / 100.0;
            let lin = srgb_to_linear(v);
            assert!(lin >= prev, "srgb_to_linear not monotonic at {v}");
            prev = lin;
        }
    }
}
