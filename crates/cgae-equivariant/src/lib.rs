//! Rotation-equivariant point convolutions.
//!
//! Features at each point are laid out by a [`Signature`](cgae_core::Signature).
//! A [`Convolution`] maps features of one signature to another using kernels
//! built from real spherical harmonics of the pair displacement, coupled with
//! real Clebsch-Gordan coefficients and weighted by a learned radial model.
//! Rotating every point and every input feature block by the same rotation
//! rotates the output blocks accordingly.
//!
//! ```text
//! EquivariantStack
//! ├── GatedBlock × (L − 1)    convolution + scalar activation + gates
//! └── Convolution             linear head, no nonlinearity
//! ```

#![recursion_limit = "256"]

pub mod activation;
pub mod convolution;
pub mod gate;
pub mod radial;
pub mod so3;
pub mod stack;

pub use activation::Activation;
pub use convolution::{Convolution, PairGeometry};
pub use gate::GatedBlock;
pub use radial::{CosineBasisModel, RadialConfig};
pub use so3::{
    num_harmonics, rotate_signature_features, rotation_from_axis_angle, rotation_rows_f32,
    spherical_harmonics, spherical_harmonics_f32, wigner_d, CouplingTensor,
};
pub use stack::{EquivariantStack, StackConfig};
