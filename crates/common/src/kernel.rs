//! GPU kernel/pass identification and immediate argument passing.
//!
//! Each [`KernelId`] names one full-target pass. Heavyweight per-layer state
//! travels through uniform buffers and bind groups (see [`crate::gpu`] and
//! [`crate::uniforms`]); small per-dispatch parameters (copy scaling, warp
//! corners) travel as positional [`KernelArgs`].
//!
//! Bind-group layout per kernel is a fixed convention shared by every
//! backend:
//!
//! | kernel              | binding 0        | binding 1  | binding 2    | binding 3 |
//! |---------------------|------------------|------------|--------------|-----------|
//! | `Composite`         | uniform buffer   | base tex   | layer tex    | mask tex  |
//! | `CompositeExternal` | uniform buffer   | base tex   | external tex | mask tex  |
//! | `Copy`              | source tex       | —          | —            | —         |
//! | `CopyExternal`      | external tex     | —          | —            | —         |
//! | `SliceWarp`         | source tex       | region tex | —            | —         |

/// Identifies a GPU pass (maps to a shader entry point on hardware backends).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KernelId {
    /// Full composite pass: base x layer x mask -> blended output.
    Composite,
    /// Composite variant sampling a one-frame external video texture.
    CompositeExternal,
    /// Plain copy (with scaling) for effect pre-processing.
    Copy,
    /// Copy from a one-frame external video texture.
    CopyExternal,
    /// Corner-pinned warp of the final composite onto an output slice.
    SliceWarp,
}

impl KernelId {
    /// Shader entry-point name on hardware backends.
    pub fn entry_point(&self) -> &'static str {
        match self {
            Self::Composite => "composite_layer",
            Self::CompositeExternal => "composite_layer_external",
            Self::Copy => "copy_pass",
            Self::CopyExternal => "copy_pass_external",
            Self::SliceWarp => "slice_warp",
        }
    }

    /// Whether binding 2 (or 0 for copies) is an external texture.
    pub fn samples_external(&self) -> bool {
        matches!(self, Self::CompositeExternal | Self::CopyExternal)
    }
}

/// Arguments passed to a kernel dispatch.
#[derive(Clone, Debug, Default)]
pub struct KernelArgs {
    entries: Vec<KernelArg>,
}

/// A single kernel argument.
#[derive(Clone, Debug, PartialEq)]
pub enum KernelArg {
    U32(u32),
    I32(i32),
    F32(f32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
}

impl KernelArgs {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push_u32(mut self, val: u32) -> Self {
        self.entries.push(KernelArg::U32(val));
        self
    }

    pub fn push_i32(mut self, val: i32) -> Self {
        self.entries.push(KernelArg::I32(val));
        self
    }

    pub fn push_f32(mut self, val: f32) -> Self {
        self.entries.push(KernelArg::F32(val));
        self
    }

    pub fn push_vec2(mut self, val: [f32; 2]) -> Self {
        self.entries.push(KernelArg::Vec2(val));
        self
    }

    pub fn push_vec4(mut self, val: [f32; 4]) -> Self {
        self.entries.push(KernelArg::Vec4(val));
        self
    }

    pub fn entries(&self) -> &[KernelArg] {
        &self.entries
    }

    /// Positional f32 accessor for kernel implementations.
    pub fn f32_at(&self, index: usize) -> Option<f32> {
        match self.entries.get(index) {
            Some(KernelArg::F32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Positional vec2 accessor for kernel implementations.
    pub fn vec2_at(&self, index: usize) -> Option<[f32; 2]> {
        match self.entries.get(index) {
            Some(KernelArg::Vec2(v)) => Some(*v),
            _ => None,
        }
    }

    /// Positional u32 accessor for kernel implementations.
    pub fn u32_at(&self, index: usize) -> Option<u32> {
        match self.entries.get(index) {
            Some(KernelArg::U32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_entry_points() {
        assert_eq!(KernelId::Composite.entry_point(), "composite_layer");
        assert_eq!(KernelId::SliceWarp.entry_point(), "slice_warp");
    }

    #[test]
    fn external_classification() {
        assert!(KernelId::CompositeExternal.samples_external());
        assert!(KernelId::CopyExternal.samples_external());
        assert!(!KernelId::Composite.samples_external());
        assert!(!KernelId::Copy.samples_external());
    }

    #[test]
    fn args_builder_and_accessors() {
        let args = KernelArgs::new()
            .push_u32(1920)
            .push_f32(0.5)
            .push_vec2([0.25, 0.75]);
        assert_eq!(args.len(), 3);
        assert_eq!(args.u32_at(0), Some(1920));
        assert_eq!(args.f32_at(1), Some(0.5));
        assert_eq!(args.vec2_at(2), Some([0.25, 0.75]));
        // Type mismatches are None, not panics.
        assert_eq!(args.f32_at(0), None);
        assert_eq!(args.u32_at(5), None);
    }
}
