//! The composite pass's geometric transform: maps an output pixel's UV to
//! the layer source UV it samples.
//!
//! The step order is a visual-parity contract and must not be reordered:
//!
//! 1. undo the 0.5-centered UV offset
//! 2. apply the user 2D scale
//! 3. lift into a pseudo-3D coordinate (fixed initial depth from the
//!    layer's z position, output-aspect correction so rotation stays
//!    circular)
//! 4. rotate around X, then Y, then Z, each skipped when the angle is
//!    below [`ANGLE_EPSILON`]
//! 5. perspective divide with `w = 1 - z / max(perspective, 0.5)`
//! 6. re-flatten to 2D, apply source-aspect correction (the relatively
//!    longer axis is stretched in sampling space), then reapply the
//!    position offset
//! 7. out-of-bounds UV means the layer contributes nothing at this pixel
//!
//! Returning `None` marks the pixel fully transparent for the layer,
//! regardless of blend mode.

use fl_common::uniforms::CompositeUniforms;

/// Rotations with a magnitude under this many degrees are skipped entirely.
pub const ANGLE_EPSILON: f32 = 1e-3;

/// Scale factors under this magnitude are treated as degenerate (the layer
/// has collapsed to nothing and samples as transparent).
const SCALE_EPSILON: f32 = 1e-6;

/// The transform fields of the uniform block, pre-extracted for the
/// per-pixel loop.
#[derive(Copy, Clone, Debug)]
pub struct ProjectionParams {
    position: [f32; 3],
    scale: [f32; 2],
    /// Rotation in radians, sampling-inverse sign.
    rot: [f32; 3],
    perspective: f32,
    out_aspect: f32,
    /// Source aspect relative to output aspect.
    rel_aspect: f32,
    out_size: [f32; 2],
}

impl ProjectionParams {
    pub fn from_uniforms(u: &CompositeUniforms) -> Self {
        let out_w = u.out_width.max(1.0);
        let out_h = u.out_height.max(1.0);
        let src_w = u.src_width.max(1.0);
        let src_h = u.src_height.max(1.0);
        let out_aspect = out_w / out_h;
        let src_aspect = src_w / src_h;
        Self {
            position: u.position,
            scale: u.scale,
            // The warp moves sampling coordinates, so layer rotation is
            // applied with inverted sign.
            rot: [
                -u.rotation[0].to_radians(),
                -u.rotation[1].to_radians(),
                -u.rotation[2].to_radians(),
            ],
            perspective: u.perspective,
            out_aspect,
            rel_aspect: src_aspect / out_aspect,
            out_size: [out_w, out_h],
        }
    }

}

fn skip_rotation(source_deg: f32) -> bool {
    source_deg.abs() < ANGLE_EPSILON
}

/// Map one output UV to the layer source UV, or `None` when the pixel falls
/// outside the transformed layer.
pub fn project_uv(out_uv: [f32; 2], u: &CompositeUniforms, p: &ProjectionParams) -> Option<[f32; 2]> {
    // 1. undo the centered-UV offset
    let mut x = out_uv[0] - 0.5;
    let mut y = out_uv[1] - 0.5;

    // 2. user 2D scale (inverse in sampling space)
    if p.scale[0].abs() < SCALE_EPSILON || p.scale[1].abs() < SCALE_EPSILON {
        return None;
    }
    x /= p.scale[0];
    y /= p.scale[1];

    // 3. pseudo-3D lift; x is widened by the output aspect so axis
    //    rotations stay circular, z starts at the layer's depth offset
    let mut px = x * p.out_aspect;
    let mut py = y;
    let mut pz = p.position[2] / p.out_size[1];

    // 4. rotate X, then Y, then Z; near-zero angles cost nothing
    if !skip_rotation(u.rotation[0]) {
        let (s, c) = p.rot[0].sin_cos();
        let (ny, nz) = (py * c - pz * s, py * s + pz * c);
        py = ny;
        pz = nz;
    }
    if !skip_rotation(u.rotation[1]) {
        let (s, c) = p.rot[1].sin_cos();
        let (nx, nz) = (px * c + pz * s, -px * s + pz * c);
        px = nx;
        pz = nz;
    }
    if !skip_rotation(u.rotation[2]) {
        let (s, c) = p.rot[2].sin_cos();
        let (nx, ny) = (px * c - py * s, px * s + py * c);
        px = nx;
        py = ny;
    }

    // 5. perspective divide
    let w = 1.0 - pz / p.perspective.max(0.5);
    if w <= 1e-4 {
        return None;
    }
    px /= w;
    py /= w;

    // 6. re-flatten, source-aspect correction, position offset
    let mut sx = px / p.out_aspect;
    let mut sy = py;
    if p.rel_aspect > 1.0 {
        sy *= p.rel_aspect;
    } else if p.rel_aspect < 1.0 {
        sx /= p.rel_aspect;
    }
    sx -= p.position[0] / p.out_size[0];
    sy -= p.position[1] / p.out_size[1];
    sx += 0.5;
    sy += 0.5;

    // 7. outside the source rectangle contributes nothing
    if !(0.0..=1.0).contains(&sx) || !(0.0..=1.0).contains(&sy) {
        return None;
    }
    Some([sx, sy])
}

#[cfg(test)]
mod tests {
    use super::*;
    use fl_common::blend::BlendMode;

    fn uniforms(out: (f32, f32), src: (f32, f32)) -> CompositeUniforms {
        let mut u = CompositeUniforms::new(BlendMode::Normal);
        u.out_width = out.0;
        u.out_height = out.1;
        u.src_width = src.0;
        u.src_height = src.1;
        u
    }

    fn project(u: &CompositeUniforms, uv: [f32; 2]) -> Option<[f32; 2]> {
        let p = ProjectionParams::from_uniforms(u);
        project_uv(uv, u, &p)
    }

    #[test]
    fn identity_transform_is_passthrough() {
        let u = uniforms((1920.0, 1080.0), (1920.0, 1080.0));
        for uv in [[0.5, 0.5], [0.0, 0.0], [1.0, 1.0], [0.25, 0.75]] {
            let out = project(&u, uv).unwrap();
            assert!((out[0] - uv[0]).abs() < 1e-5, "{uv:?} -> {out:?}");
            assert!((out[1] - uv[1]).abs() < 1e-5, "{uv:?} -> {out:?}");
        }
    }

    #[test]
    fn position_offsets_sampling_inversely() {
        let mut u = uniforms((100.0, 100.0), (100.0, 100.0));
        u.position = [25.0, 0.0, 0.0];
        // The layer moved +25px right, so the output pixel at 0.75 samples
        // the source center.
        let out = project(&u, [0.75, 0.5]).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-5);
        assert!((out[1] - 0.5).abs() < 1e-5);
        // And the left quarter of the output now falls off the source.
        assert!(project(&u, [0.1, 0.5]).is_none());
        assert!(project(&u, [0.24, 0.5]).is_none());
        let near_edge = project(&u, [0.26, 0.5]).unwrap();
        assert!((near_edge[0] - 0.01).abs() < 1e-5);
    }

    #[test]
    fn scale_two_magnifies() {
        let mut u = uniforms((100.0, 100.0), (100.0, 100.0));
        u.scale = [2.0, 2.0];
        // At 2x scale the whole output samples the middle half of the source.
        let out = project(&u, [0.0, 0.0]).unwrap();
        assert!((out[0] - 0.25).abs() < 1e-5);
        assert!((out[1] - 0.25).abs() < 1e-5);
        let out = project(&u, [1.0, 1.0]).unwrap();
        assert!((out[0] - 0.75).abs() < 1e-5);
    }

    #[test]
    fn scale_half_pushes_edges_out_of_bounds() {
        let mut u = uniforms((100.0, 100.0), (100.0, 100.0));
        u.scale = [0.5, 0.5];
        // The layer occupies the middle of the frame; corners miss it.
        assert!(project(&u, [0.05, 0.05]).is_none());
        assert!(project(&u, [0.5, 0.5]).is_some());
    }

    #[test]
    fn degenerate_scale_is_transparent() {
        let mut u = uniforms((100.0, 100.0), (100.0, 100.0));
        u.scale = [0.0, 1.0];
        assert!(project(&u, [0.5, 0.5]).is_none());
    }

    #[test]
    fn z_rotation_quarter_turn() {
        let mut u = uniforms((100.0, 100.0), (100.0, 100.0));
        u.rotation = [0.0, 0.0, 90.0];
        // Center is invariant.
        let out = project(&u, [0.5, 0.5]).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-4);
        assert!((out[1] - 0.5).abs() < 1e-4);
        // A point right of center maps onto the vertical axis.
        let out = project(&u, [0.75, 0.5]).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-4, "{out:?}");
        assert!((out[1] - 0.5).abs() > 0.2, "{out:?}");
    }

    #[test]
    fn tiny_rotation_skips_to_identity() {
        let mut u = uniforms((1920.0, 1080.0), (1920.0, 1080.0));
        u.rotation = [ANGLE_EPSILON / 2.0, 0.0, ANGLE_EPSILON / 2.0];
        let out = project(&u, [0.3, 0.7]).unwrap();
        assert_eq!(out, [0.3, 0.7]);
    }

    #[test]
    fn y_rotation_with_perspective_shrinks_one_side() {
        let mut u = uniforms((100.0, 100.0), (100.0, 100.0));
        u.rotation = [0.0, 45.0, 0.0];
        u.perspective = 2.0;
        // With a strong perspective, the two horizontal edges land at
        // different source offsets (foreshortening).
        let left = project(&u, [0.25, 0.5]);
        let right = project(&u, [0.75, 0.5]);
        match (left, right) {
            (Some(l), Some(r)) => {
                let dl = (l[0] - 0.5).abs();
                let dr = (r[0] - 0.5).abs();
                assert!((dl - dr).abs() > 1e-3, "no foreshortening: {dl} vs {dr}");
            }
            // One side may fall out of bounds entirely, which is also
            // asymmetric.
            (l, r) => assert_ne!(l.is_some(), r.is_some()),
        }
    }

    #[test]
    fn perspective_clamps_at_half() {
        let mut u = uniforms((100.0, 100.0), (100.0, 100.0));
        u.perspective = 0.0; // clamped to 0.5 inside the divide
        u.position = [0.0, 0.0, 10.0];
        // Must not divide by the raw zero perspective.
        let _ = project(&u, [0.5, 0.5]);
    }

    #[test]
    fn wide_source_letterboxes() {
        // 2:1 source in a 1:1 output: vertical sampling is stretched, so
        // the top of the output falls outside the source.
        let u = uniforms((100.0, 100.0), (200.0, 100.0));
        assert!(project(&u, [0.5, 0.01]).is_none());
        assert!(project(&u, [0.5, 0.5]).is_some());
        // Matching aspects stay passthrough.
        let u = uniforms((200.0, 100.0), (200.0, 100.0));
        let out = project(&u, [0.3, 0.3]).unwrap();
        assert!((out[0] - 0.3).abs() < 1e-5);
    }

    #[test]
    fn out_of_bounds_is_none() {
        let mut u = uniforms((100.0, 100.0), (100.0, 100.0));
        u.position = [200.0, 0.0, 0.0];
        assert!(project(&u, [0.5, 0.5]).is_none());
    }
}
