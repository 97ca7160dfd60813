//! Cosine radial basis followed by a fully connected network.
//!
//! ```text
//! r ──► [cos²(π/2 · (r/step − i)) for i in 0..n]  (zero outside |r/step − i| < 1)
//!   ──► Linear(n, h) ─► act ─► … (L hidden layers) ─► Linear(h, out)
//! ```
//!
//! The basis centres are evenly spaced on `[0, max_radius]`, so
//! `step = max_radius / (n − 1)`.

use burn::module::Ignored;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::activation::Activation;

/// Radial model hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadialConfig {
    pub max_radius: f32,
    /// Number of cosine basis functions.
    pub basis: usize,
    /// Hidden width of the fully connected network.
    pub hidden: usize,
    /// Number of hidden layers.
    pub layers: usize,
    pub activation: Activation,
}

impl Default for RadialConfig {
    fn default() -> Self {
        Self {
            max_radius: 3.0,
            basis: 3,
            hidden: 50,
            layers: 2,
            activation: Activation::Relu,
        }
    }
}

impl RadialConfig {
    fn step(&self) -> f32 {
        if self.basis > 1 {
            self.max_radius / (self.basis - 1) as f32
        } else {
            self.max_radius.max(f32::EPSILON)
        }
    }

    /// Basis values for one radius, length `basis`.
    pub fn basis_values(&self, r: f32) -> impl Iterator<Item = f32> + '_ {
        let x = r / self.step();
        (0..self.basis).map(move |i| {
            let d = x - i as f32;
            if d.abs() < 1.0 {
                (std::f32::consts::FRAC_PI_2 * d).cos().powi(2)
            } else {
                0.0
            }
        })
    }
}

/// Learned map from pair distances to path weights.
#[derive(Module, Debug)]
pub struct CosineBasisModel<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    config: Ignored<RadialConfig>,
}

impl<B: Backend> CosineBasisModel<B> {
    pub fn new(config: &RadialConfig, outputs: usize, device: &B::Device) -> Self {
        let mut hidden = Vec::with_capacity(config.layers);
        let mut width = config.basis;
        for _ in 0..config.layers {
            hidden.push(LinearConfig::new(width, config.hidden).init(device));
            width = config.hidden;
        }
        Self {
            hidden,
            output: LinearConfig::new(width, outputs).init(device),
            config: Ignored(config.clone()),
        }
    }

    pub fn config(&self) -> &RadialConfig {
        &self.config
    }

    /// `[pairs, basis]` → `[pairs, outputs]`.
    pub fn forward(&self, basis: Tensor<B, 2>) -> Tensor<B, 2> {
        let act = self.config.activation;
        let mut h = basis;
        for layer in &self.hidden {
            h = act.apply(layer.forward(h));
        }
        self.output.forward(h)
    }
}
