//! `fl-gpu-hal` — GPU backend implementations for the Frameloom engine.
//!
//! Higher-level crates program against [`fl_common::GpuBackend`]; this crate
//! provides the concrete backends and the kernel math they share:
//!
//! - [`kernels`] — the per-pixel contract of every pass (blend formulas,
//!   pseudo-3D transform projection, mask coverage, corner-pin warp) as pure
//!   functions. Hardware shader ports are validated against these.
//! - [`software`] — the always-available CPU backend executing every kernel
//!   through the [`kernels`] functions.
//! - [`select`] — backend probing with guaranteed software fallback.

pub mod kernels;
pub mod select;
pub mod software;

pub use select::{select_backend, BackendChoice};
pub use software::SoftwareBackend;
