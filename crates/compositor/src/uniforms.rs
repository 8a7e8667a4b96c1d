//! Change-tracked uniform buffers.
//!
//! Uniform updates are dirty-checked field by field against the last
//! written snapshot (floats within an epsilon, integer-coded fields
//! exactly); the GPU write is skipped entirely when nothing changed. The
//! pattern is generic over the uniform struct so new uniform blocks don't
//! hand-roll their own compare loops.

use fl_common::error::GpuError;
use fl_common::gpu::{GpuBackend, UniformHandle};
use fl_common::uniforms::CompositeUniforms;

/// A uniform block that can be snapshot-compared and encoded for upload.
pub trait UniformBlock: Clone {
    fn byte_size() -> usize;
    fn encode(&self) -> Vec<u8>;
    /// Float fields within epsilon, integer fields exact.
    fn approx_eq(&self, other: &Self) -> bool;
}

impl UniformBlock for CompositeUniforms {
    fn byte_size() -> usize {
        CompositeUniforms::BYTE_SIZE
    }

    fn encode(&self) -> Vec<u8> {
        CompositeUniforms::encode(self)
    }

    fn approx_eq(&self, other: &Self) -> bool {
        CompositeUniforms::approx_eq(self, other)
    }
}

/// A persistent uniform buffer plus the last-written snapshot.
pub struct Tracked<T: UniformBlock> {
    buffer: UniformHandle,
    last: Option<T>,
}

impl<T: UniformBlock> Tracked<T> {
    pub fn new(backend: &dyn GpuBackend) -> Result<Self, GpuError> {
        Ok(Self {
            buffer: backend.create_uniform_buffer(T::byte_size())?,
            last: None,
        })
    }

    pub fn handle(&self) -> UniformHandle {
        self.buffer
    }

    /// Write `value` to the GPU only if it differs from the last written
    /// snapshot. Returns whether a write happened.
    pub fn update(&mut self, backend: &dyn GpuBackend, value: &T) -> Result<bool, GpuError> {
        if let Some(last) = &self.last {
            if last.approx_eq(value) {
                return Ok(false);
            }
        }
        backend.write_uniform_buffer(self.buffer, &value.encode())?;
        self.last = Some(value.clone());
        Ok(true)
    }

    /// Drop the snapshot so the next update always writes.
    pub fn invalidate(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fl_common::blend::BlendMode;
    use fl_gpu_hal::SoftwareBackend;

    fn uniforms(opacity: f32) -> CompositeUniforms {
        let mut u = CompositeUniforms::new(BlendMode::Normal);
        u.opacity = opacity;
        u
    }

    #[test]
    fn first_update_writes() {
        let backend = SoftwareBackend::new();
        let mut t = Tracked::<CompositeUniforms>::new(&backend).unwrap();
        assert!(t.update(&backend, &uniforms(1.0)).unwrap());
    }

    #[test]
    fn identical_value_skips_write() {
        let backend = SoftwareBackend::new();
        let mut t = Tracked::<CompositeUniforms>::new(&backend).unwrap();
        t.update(&backend, &uniforms(1.0)).unwrap();
        assert!(!t.update(&backend, &uniforms(1.0)).unwrap());
        // Sub-epsilon drift also skips.
        assert!(!t
            .update(&backend, &uniforms(1.0 + f32::EPSILON))
            .unwrap());
    }

    #[test]
    fn changed_value_writes() {
        let backend = SoftwareBackend::new();
        let mut t = Tracked::<CompositeUniforms>::new(&backend).unwrap();
        t.update(&backend, &uniforms(1.0)).unwrap();
        assert!(t.update(&backend, &uniforms(0.5)).unwrap());
    }

    #[test]
    fn invalidate_forces_rewrite() {
        let backend = SoftwareBackend::new();
        let mut t = Tracked::<CompositeUniforms>::new(&backend).unwrap();
        t.update(&backend, &uniforms(1.0)).unwrap();
        t.invalidate();
        assert!(t.update(&backend, &uniforms(1.0)).unwrap());
    }
}
