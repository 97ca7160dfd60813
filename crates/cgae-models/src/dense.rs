//! Dense (non-equivariant) coarse-graining autoencoder.
//!
//! ```text
//! geometry [B, atoms, 3]
//!    │  A = gumbel_softmax(logits [atoms, sites], τ), columns normalized
//!    ▼
//! sites    [B, sites, 3] = Aᵀ · geometry
//!    │  W [sites, atoms]
//!    ▼
//! decoded  [B, atoms, 3] = Wᵀ · sites
//! ```

use burn::module::Param;
use burn::prelude::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

use cgae_assign::soft_assign_with_noise;

/// Learned assignment logits and centroid encoder.
#[derive(Module, Debug)]
pub struct DenseEncoder<B: Backend> {
    logits: Param<Tensor<B, 2>>,
}

impl<B: Backend> DenseEncoder<B> {
    pub fn new(atoms: usize, sites: usize, device: &B::Device) -> Self {
        Self::from_weight(Tensor::random(
            [atoms, sites],
            Distribution::Normal(0.0, 1.0),
            device,
        ))
    }

    /// From a `[atoms, sites]` logit matrix.
    pub fn from_weight(weight: Tensor<B, 2>) -> Self {
        Self {
            logits: Param::from_tensor(weight),
        }
    }

    /// Assignment logits `[atoms, sites]`.
    pub fn logits(&self) -> Tensor<B, 2> {
        self.logits.val()
    }

    pub fn atoms(&self) -> usize {
        self.logits.val().dims()[0]
    }

    pub fn sites(&self) -> usize {
        self.logits.val().dims()[1]
    }

    /// Site coordinates as assignment-weighted centroids, `[batch, sites, 3]`,
    /// under caller-supplied Gumbel noise.
    pub fn encode_with_noise(
        &self,
        geometry: Tensor<B, 3>,
        noise: Tensor<B, 2>,
        temperature: f32,
    ) -> Tensor<B, 3> {
        let [batch, atoms, _] = geometry.dims();
        let assignment = soft_assign_with_noise(self.logits(), noise, temperature).soft;
        let totals = assignment.clone().sum_dim(0).repeat_dim(0, atoms);
        let weights = (assignment / totals).transpose();

        weights
            .unsqueeze_dim::<3>(0)
            .repeat_dim(0, batch)
            .matmul(geometry)
    }
}

/// Linear map from site coordinates back to atom coordinates.
#[derive(Module, Debug)]
pub struct DenseDecoder<B: Backend> {
    weight: Param<Tensor<B, 2>>,
}

impl<B: Backend> DenseDecoder<B> {
    pub fn new(sites: usize, atoms: usize, device: &B::Device) -> Self {
        let bound = 1.0 / (sites as f64).sqrt();
        Self::from_weight(Tensor::random(
            [sites, atoms],
            Distribution::Uniform(-bound, bound),
            device,
        ))
    }

    /// From a `[sites, atoms]` weight matrix.
    pub fn from_weight(weight: Tensor<B, 2>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
        }
    }

    pub fn weight(&self) -> Tensor<B, 2> {
        self.weight.val()
    }

    /// `[batch, sites, 3]` → `[batch, atoms, 3]`.
    pub fn decode(&self, sites: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, _, _] = sites.dims();
        self.weight()
            .transpose()
            .unsqueeze_dim::<3>(0)
            .repeat_dim(0, batch)
            .matmul(sites)
    }
}

/// `mean_{frame, atom} |decoded − geometry|²`.
pub fn dense_reconstruction_loss<B: Backend>(
    decoded: Tensor<B, 3>,
    geometry: Tensor<B, 3>,
) -> Tensor<B, 1> {
    (decoded - geometry).powf_scalar(2.0).sum_dim(2).mean()
}
