//! Models of the coarse-graining pipeline.
//!
//! - [`EquivariantDecoder`]: per-site latent features → per-site harmonic coefficients
//! - [`project`]: assigned atoms → per-site harmonic coefficients (the target)
//! - [`DenseEncoder`] / [`DenseDecoder`]: auxiliary coordinate autoencoder
//! - [`DenseCheckpoint`]: SafeTensors weights of the autoencoder

pub mod checkpoint;
pub mod decoder;
pub mod dense;
pub mod projection;

pub use checkpoint::{read_f32, write_f32, DenseCheckpoint, DECODER_KEY, ENCODER_KEY};
pub use decoder::{DecoderConfig, EquivariantDecoder};
pub use dense::{dense_reconstruction_loss, DenseDecoder, DenseEncoder};
pub use projection::{displacement_harmonics, project};
