//! Named scalar activations, rescaled to unit second moment.
//!
//! Each activation `f` is multiplied by `1 / sqrt(E[f(z)²])` with `z ~ N(0, 1)`,
//! so a unit-variance input keeps a unit second moment through the layer.

use std::fmt;
use std::str::FromStr;

use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use cgae_core::CgError;

/// Indexed by discriminant, in the order of [`Activation::ALL`].
static NORMALIZATIONS: Lazy<[f64; 4]> = Lazy::new(|| Activation::ALL.map(|act| act.integrate_normalization()));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Sigmoid,
    Tanh,
    Relu,
    Absolute,
}

impl Activation {
    pub const ALL: [Self; 4] = [Self::Sigmoid, Self::Tanh, Self::Relu, Self::Absolute];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::Relu => "relu",
            Self::Absolute => "absolute",
        }
    }

    /// Unscaled activation on a single value.
    pub fn eval(&self, x: f64) -> f64 {
        match self {
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
            Self::Relu => x.max(0.0),
            Self::Absolute => x.abs(),
        }
    }

    /// `1 / sqrt(E[f(z)²])` under the standard normal, computed once per activation.
    pub fn normalization(&self) -> f64 {
        NORMALIZATIONS[*self as usize]
    }

    /// Simpson's rule on [-10, 10].
    fn integrate_normalization(&self) -> f64 {
        const STEPS: usize = 2000;
        let (lo, hi) = (-10.0_f64, 10.0_f64);
        let h = (hi - lo) / STEPS as f64;
        let density = |z: f64| (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt();
        let integrand = |z: f64| self.eval(z).powi(2) * density(z);

        let mut sum = integrand(lo) + integrand(hi);
        for i in 1..STEPS {
            let z = lo + i as f64 * h;
            sum += if i % 2 == 1 { 4.0 } else { 2.0 } * integrand(z);
        }
        let moment = sum * h / 3.0;
        1.0 / moment.sqrt()
    }

    /// Rescaled activation applied elementwise.
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let y = match self {
            Self::Sigmoid => activation::sigmoid(x),
            Self::Tanh => activation::tanh(x),
            Self::Relu => activation::relu(x),
            Self::Absolute => x.abs(),
        };
        y.mul_scalar(self.normalization() as f32)
    }
}

impl FromStr for Activation {
    type Err = CgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|act| act.name() == s.to_ascii_lowercase())
            .ok_or_else(|| CgError::UnknownActivation(s.to_string()))
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
