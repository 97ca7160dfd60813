//! Equivariant decoder: per-site latent features at site coordinates to
//! per-site spherical-harmonic coefficients.

use burn::prelude::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use cgae_core::{Coordinates, Result, Signature, SignatureStack};
use cgae_equivariant::{EquivariantStack, StackConfig};

/// Decoder architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Hidden multiplicity of each degree, index = degree.
    pub hidden_multiplicities: Vec<usize>,
    /// Number of hidden signatures between input and output.
    pub hidden_layers: usize,
    /// Feature channels of the target (e.g. species).
    pub channels: usize,
    /// Largest harmonic degree of the target.
    pub max_degree: usize,
    pub stack: StackConfig,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            hidden_multiplicities: vec![8, 4, 2],
            hidden_layers: 1,
            channels: 2,
            max_degree: 2,
            stack: StackConfig::default(),
        }
    }
}

#[derive(Module, Debug)]
pub struct EquivariantDecoder<B: Backend> {
    stack: EquivariantStack<B>,
}

impl<B: Backend> EquivariantDecoder<B> {
    pub fn new(input: Signature, config: &DecoderConfig, device: &B::Device) -> Result<Self> {
        let signatures = SignatureStack::decoder(
            input,
            &config.hidden_multiplicities,
            config.hidden_layers,
            config.channels,
            config.max_degree,
        )?;
        log::info!(
            "decoder: {} layers, {} -> {}",
            signatures.depth(),
            signatures.input(),
            signatures.output()
        );
        Ok(Self {
            stack: EquivariantStack::new(&signatures, &config.stack, device)?,
        })
    }

    pub fn signatures(&self) -> &SignatureStack {
        self.stack.signatures()
    }

    pub fn input_dim(&self) -> usize {
        self.signatures().input().dim()
    }

    pub fn output_dim(&self) -> usize {
        self.signatures().output().dim()
    }

    /// `[batch, sites, input_dim]` → `[batch, sites, output_dim]`.
    ///
    /// Site coordinates are frozen values: no gradient reaches the geometry.
    pub fn decode(&self, features: Tensor<B, 3>, sites: &Coordinates) -> Result<Tensor<B, 3>> {
        self.stack.forward(features, sites)
    }
}
