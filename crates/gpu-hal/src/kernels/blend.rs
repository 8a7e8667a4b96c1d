//! Blend-mode formulas and the per-pixel composite equation.
//!
//! All math operates on straight (non-premultiplied) RGBA in 0..1 floats.
//! Each mode's formula is documented on its match arm; those formulas are
//! the visual-parity contract and the tests in this module hold every mode
//! to them within ±1/255.
//!
//! Color modes run through the standard "blend then composite" equation:
//!
//! ```text
//! sa  = src_alpha * coverage            (coverage = opacity * mask)
//! B   = blend(base_rgb, src_rgb)        (mode-specific)
//! Co  = sa*(1-ba)*src + sa*ba*B + (1-sa)*ba*base
//! ao  = sa + ba*(1-sa)
//! out = (Co / ao, ao)
//! ```
//!
//! The stencil/silhouette/alpha-add modes bypass that equation and rewrite
//! alpha semantics instead; dissolve replaces coverage with a stochastic
//! per-pixel threshold on a fixed integer hash.

use fl_common::blend::BlendMode;
use fl_common::uniforms::CompositeUniforms;

/// Rec.601-style luma weights used by the luma-keyed and HSL modes.
fn luma(c: [f32; 3]) -> f32 {
    0.3 * c[0] + 0.59 * c[1] + 0.11 * c[2]
}

fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

// ─── HSL component helpers (non-separable modes) ────────────────────

fn clip_color(mut c: [f32; 3]) -> [f32; 3] {
    let l = luma(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);
    if n < 0.0 {
        for v in c.iter_mut() {
            *v = l + (*v - l) * l / (l - n).max(f32::EPSILON);
        }
    }
    if x > 1.0 {
        for v in c.iter_mut() {
            *v = l + (*v - l) * (1.0 - l) / (x - l).max(f32::EPSILON);
        }
    }
    c
}

fn set_luma(c: [f32; 3], l: f32) -> [f32; 3] {
    let d = l - luma(c);
    clip_color([c[0] + d, c[1] + d, c[2] + d])
}

fn saturation_of(c: [f32; 3]) -> f32 {
    c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])
}

fn set_saturation(c: [f32; 3], s: f32) -> [f32; 3] {
    // Scale the mid channel between min and max, collapse to gray if flat.
    let mut idx = [0usize, 1, 2];
    idx.sort_by(|&a, &b| c[a].partial_cmp(&c[b]).unwrap_or(std::cmp::Ordering::Equal));
    let (lo, mid, hi) = (idx[0], idx[1], idx[2]);
    let mut out = [0.0f32; 3];
    if c[hi] > c[lo] {
        out[mid] = (c[mid] - c[lo]) * s / (c[hi] - c[lo]);
        out[hi] = s;
    }
    out[lo] = 0.0;
    out
}

// ─── Separable per-channel formulas ─────────────────────────────────

/// Per-channel blend for the separable modes. `b` = base, `s` = source.
fn blend_channel(mode: BlendMode, b: f32, s: f32) -> f32 {
    match mode {
        // normal: s
        BlendMode::Normal => s,
        // darken: min(b, s)
        BlendMode::Darken => b.min(s),
        // multiply: b * s
        BlendMode::Multiply => b * s,
        // color burn: b>=1 -> 1; s<=0 -> 0; else 1 - min(1, (1-b)/s)
        BlendMode::ColorBurn => {
            if b >= 1.0 {
                1.0
            } else if s <= 0.0 {
                0.0
            } else {
                1.0 - ((1.0 - b) / s).min(1.0)
            }
        }
        // classic color burn: s<=0 -> 0 (even at b=1); else 1 - min(1, (1-b)/s)
        BlendMode::ClassicColorBurn => {
            if s <= 0.0 {
                0.0
            } else {
                1.0 - ((1.0 - b) / s).min(1.0)
            }
        }
        // linear burn: b + s - 1
        BlendMode::LinearBurn => clamp01(b + s - 1.0),
        // add / linear dodge: b + s
        BlendMode::Add | BlendMode::LinearDodge => (b + s).min(1.0),
        // lighten: max(b, s)
        BlendMode::Lighten => b.max(s),
        // screen: 1 - (1-b)(1-s)
        BlendMode::Screen => 1.0 - (1.0 - b) * (1.0 - s),
        // color dodge: b<=0 -> 0; s>=1 -> 1; else min(1, b/(1-s))
        BlendMode::ColorDodge => {
            if b <= 0.0 {
                0.0
            } else if s >= 1.0 {
                1.0
            } else {
                (b / (1.0 - s)).min(1.0)
            }
        }
        // classic color dodge: s>=1 -> 1 (even at b=0); else min(1, b/(1-s))
        BlendMode::ClassicColorDodge => {
            if s >= 1.0 {
                1.0
            } else {
                (b / (1.0 - s)).min(1.0)
            }
        }
        // overlay: hard light with operands swapped
        BlendMode::Overlay => blend_channel(BlendMode::HardLight, s, b),
        // soft light (Photoshop/PDF): piecewise with the D(b) darkening curve
        BlendMode::SoftLight => {
            if s <= 0.5 {
                b - (1.0 - 2.0 * s) * b * (1.0 - b)
            } else {
                let d = if b <= 0.25 {
                    ((16.0 * b - 12.0) * b + 4.0) * b
                } else {
                    b.sqrt()
                };
                b + (2.0 * s - 1.0) * (d - b)
            }
        }
        // hard light: s<=0.5 -> multiply(b, 2s); else screen(b, 2s-1)
        BlendMode::HardLight => {
            if s <= 0.5 {
                blend_channel(BlendMode::Multiply, b, 2.0 * s)
            } else {
                blend_channel(BlendMode::Screen, b, 2.0 * s - 1.0)
            }
        }
        // linear light: b + 2s - 1
        BlendMode::LinearLight => clamp01(b + 2.0 * s - 1.0),
        // vivid light: s<=0.5 -> burn(b, 2s); else dodge(b, 2s-1)
        BlendMode::VividLight => {
            if s <= 0.5 {
                blend_channel(BlendMode::ColorBurn, b, 2.0 * s)
            } else {
                blend_channel(BlendMode::ColorDodge, b, 2.0 * s - 1.0)
            }
        }
        // pin light: s<=0.5 -> min(b, 2s); else max(b, 2s-1)
        BlendMode::PinLight => {
            if s <= 0.5 {
                b.min(2.0 * s)
            } else {
                b.max(2.0 * s - 1.0)
            }
        }
        // hard mix: b + s >= 1 -> 1; else 0
        BlendMode::HardMix => {
            if b + s >= 1.0 {
                1.0
            } else {
                0.0
            }
        }
        // difference / classic difference: |b - s|
        BlendMode::Difference | BlendMode::ClassicDifference => (b - s).abs(),
        // exclusion: b + s - 2bs
        BlendMode::Exclusion => b + s - 2.0 * b * s,
        // subtract: b - s
        BlendMode::Subtract => (b - s).max(0.0),
        // divide: s<=0 -> 1; else min(1, b/s)
        BlendMode::Divide => {
            if s <= 0.0 {
                1.0
            } else {
                (b / s).min(1.0)
            }
        }
        _ => s,
    }
}

/// Full-color blend covering separable and non-separable modes.
fn blend_rgb(mode: BlendMode, base: [f32; 3], src: [f32; 3]) -> [f32; 3] {
    match mode {
        // darker color: keep whichever color has lower luma
        BlendMode::DarkerColor => {
            if luma(src) < luma(base) {
                src
            } else {
                base
            }
        }
        // lighter color: keep whichever color has higher luma
        BlendMode::LighterColor => {
            if luma(src) > luma(base) {
                src
            } else {
                base
            }
        }
        // hue: source hue, base saturation and luma
        BlendMode::Hue => set_luma(set_saturation(src, saturation_of(base)), luma(base)),
        // saturation: source saturation, base hue and luma
        BlendMode::Saturation => set_luma(set_saturation(base, saturation_of(src)), luma(base)),
        // color: source hue+saturation, base luma
        BlendMode::Color => set_luma(src, luma(base)),
        // luminosity: base hue+saturation, source luma
        BlendMode::Luminosity => set_luma(base, luma(src)),
        _ => [
            blend_channel(mode, base[0], src[0]),
            blend_channel(mode, base[1], src[1]),
            blend_channel(mode, base[2], src[2]),
        ],
    }
}

// ─── Dissolve hash ──────────────────────────────────────────────────

/// Fixed integer hash of a pixel position and seed, mapped to [0, 1).
///
/// The hash is part of the contract: dissolve output must be reproducible
/// for a given (position, seed) pair on every backend.
pub fn dissolve_hash(x: u32, y: u32, seed: u32) -> f32 {
    let mut h = x
        .wrapping_mul(0x9E37_79B9)
        .wrapping_add(y.wrapping_mul(0x85EB_CA6B))
        .wrapping_add(seed.wrapping_mul(0xC2B2_AE35));
    h ^= h >> 16;
    h = h.wrapping_mul(0x7FEB_352D);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846C_A68B);
    h ^= h >> 16;
    (h >> 8) as f32 / (1u32 << 24) as f32
}

/// Seed for the dancing-dissolve variant: the layer seed re-rolled with the
/// frame time bits so the pattern changes every frame.
pub fn dancing_seed(seed: u32, time: f32) -> u32 {
    seed ^ time.to_bits().rotate_left(13)
}

// ─── Inline adjustments ─────────────────────────────────────────────

/// Apply the inline adjustments (brightness, contrast, saturation, invert)
/// to a straight RGB color. Folded into the composite pass; costs no extra
/// render pass.
pub fn apply_inline_adjustments(rgb: [f32; 3], u: &CompositeUniforms) -> [f32; 3] {
    let mut c = rgb;
    if u.invert > 0.5 {
        c = [1.0 - c[0], 1.0 - c[1], 1.0 - c[2]];
    }
    // brightness: additive
    if u.brightness.abs() > f32::EPSILON {
        c = [c[0] + u.brightness, c[1] + u.brightness, c[2] + u.brightness];
    }
    // contrast: scale around mid-gray
    if (u.contrast - 1.0).abs() > f32::EPSILON {
        c = [
            (c[0] - 0.5) * u.contrast + 0.5,
            (c[1] - 0.5) * u.contrast + 0.5,
            (c[2] - 0.5) * u.contrast + 0.5,
        ];
    }
    // saturation: mix against luma
    if (u.saturation - 1.0).abs() > f32::EPSILON {
        let l = luma(c);
        c = [
            l + (c[0] - l) * u.saturation,
            l + (c[1] - l) * u.saturation,
            l + (c[2] - l) * u.saturation,
        ];
    }
    [clamp01(c[0]), clamp01(c[1]), clamp01(c[2])]
}

// ─── Composite equation ─────────────────────────────────────────────

/// Composite one source pixel over one base pixel.
///
/// * `mode_index` — [`BlendMode::kernel_index`] value from the uniforms.
/// * `base`/`src` — straight RGBA.
/// * `coverage` — opacity x mask, already multiplied.
/// * `hash` — per-pixel dissolve hash; ignored by non-dissolve modes.
///
/// Unknown mode indices fall back to Normal rather than failing the pass.
pub fn composite_pixel(
    mode_index: u32,
    base: [f32; 4],
    src: [f32; 4],
    coverage: f32,
    hash: f32,
) -> [f32; 4] {
    let mode = BlendMode::from_kernel_index(mode_index).unwrap_or(BlendMode::Normal);
    let ba = clamp01(base[3]);
    let sa = clamp01(src[3] * coverage);
    let base_rgb = [base[0], base[1], base[2]];
    let src_rgb = [src[0], src[1], src[2]];

    match mode {
        // dissolve: the pixel fully takes the source when the hash falls
        // under the effective alpha, otherwise the base is untouched
        BlendMode::Dissolve | BlendMode::DancingDissolve => {
            if hash < sa {
                [src_rgb[0], src_rgb[1], src_rgb[2], 1.0]
            } else {
                base
            }
        }
        // stencil alpha: base color, alpha = ba * sa
        BlendMode::StencilAlpha => [base_rgb[0], base_rgb[1], base_rgb[2], ba * sa],
        // stencil luma: base color, alpha = ba * luma(src) * coverage
        BlendMode::StencilLuma => {
            let l = clamp01(luma(src_rgb) * coverage);
            [base_rgb[0], base_rgb[1], base_rgb[2], ba * l]
        }
        // silhouette alpha: base color, alpha = ba * (1 - sa)
        BlendMode::SilhouetteAlpha => [base_rgb[0], base_rgb[1], base_rgb[2], ba * (1.0 - sa)],
        // silhouette luma: base color, alpha = ba * (1 - luma(src) * coverage)
        BlendMode::SilhouetteLuma => {
            let l = clamp01(luma(src_rgb) * coverage);
            [base_rgb[0], base_rgb[1], base_rgb[2], ba * (1.0 - l)]
        }
        // alpha add: normal color math, alpha accumulates additively
        BlendMode::AlphaAdd => {
            let mut out = composite_color(BlendMode::Normal, base_rgb, ba, src_rgb, sa);
            out[3] = (ba + sa).min(1.0);
            out
        }
        _ => composite_color(mode, base_rgb, ba, src_rgb, sa),
    }
}

/// The blend-then-composite equation for color modes.
fn composite_color(
    mode: BlendMode,
    base_rgb: [f32; 3],
    ba: f32,
    src_rgb: [f32; 3],
    sa: f32,
) -> [f32; 4] {
    let blended = blend_rgb(mode, base_rgb, src_rgb);
    let ao = sa + ba * (1.0 - sa);
    if ao <= 0.0 {
        return [0.0, 0.0, 0.0, 0.0];
    }
    let mut out = [0.0f32; 4];
    for i in 0..3 {
        let co =
            sa * (1.0 - ba) * src_rgb[i] + sa * ba * blended[i] + (1.0 - sa) * ba * base_rgb[i];
        out[i] = clamp01(co / ao);
    }
    out[3] = clamp01(ao);
    out
}
