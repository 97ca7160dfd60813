//! # cgae-core
//!
//! Core types for learning coarse-grained (CG) representations of molecular
//! structures with rotation-equivariant decoders.
//!
//! - [`Signature`] / [`SignatureStack`]: representation signatures (`Rs`) and
//!   the per-layer stacks built from architecture hyperparameters
//! - [`Coordinates`] / [`Displacements`]: frozen geometry values that never
//!   carry gradients
//! - [`Frozen`]: a tensor value moved off the autodiff graph, explicitly
//! - [`CgError`]: configuration, shape, checkpoint and I/O errors
//! - [`PathConfig`]: data and output directory resolution
//!
//! ## Backends
//!
//! ```rust,ignore
//! use cgae_core::backend::{init_cpu_device, TrainBackend};
//!
//! let device = init_cpu_device();
//! ```

#![recursion_limit = "256"]

pub mod backend;
pub mod config;
pub mod error;
pub mod frozen;
pub mod geometry;
pub mod signature;

pub use backend::*;
pub use config::{PathArgs, PathConfig};
pub use error::{CgError, Result};
pub use frozen::Frozen;
pub use geometry::*;
pub use signature::*;
