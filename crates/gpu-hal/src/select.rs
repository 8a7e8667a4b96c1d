//! Backend selection.
//!
//! Hardware backends register behind [`fl_common::GpuBackend`]; probing
//! tries them in preference order and always lands on the software backend
//! when nothing else is available, so the engine can render everywhere.

use std::sync::Arc;

use tracing::info;

use fl_common::gpu::GpuBackend;

use crate::software::SoftwareBackend;

/// The outcome of backend selection.
pub struct BackendChoice {
    pub backend: Arc<dyn GpuBackend>,
    /// Why this backend was chosen (logged and surfaced in diagnostics).
    pub reason: String,
}

/// Select the best available backend.
///
/// `prefer_software` forces the CPU path (useful for headless export and
/// deterministic tests even on machines with GPUs).
pub fn select_backend(prefer_software: bool) -> BackendChoice {
    // Hardware probing slots in here; the software rasterizer is the
    // guaranteed terminal fallback.
    let reason = if prefer_software {
        "software backend requested".to_string()
    } else {
        "no hardware backend available, using software fallback".to_string()
    };

    let backend: Arc<dyn GpuBackend> = Arc::new(SoftwareBackend::new());
    info!(
        backend = backend.backend_name(),
        device = %backend.device_name(),
        reason = %reason,
        "Selected GPU backend"
    );
    BackendChoice { backend, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_always_yields_a_backend() {
        let choice = select_backend(false);
        assert_eq!(choice.backend.backend_name(), "software");
        assert!(!choice.reason.is_empty());
    }

    #[test]
    fn software_preference_is_honored() {
        let choice = select_backend(true);
        assert_eq!(choice.backend.backend_name(), "software");
        assert!(choice.reason.contains("requested"));
    }
}
