//! Loss terms of the coarse-graining objective.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

use crate::policy::ReconstructionLoss;

/// Per-site error between projected target and decoder output, averaged
/// over frames and sites.
///
/// `Squared` divides each site's summed squared error by `channels`.
pub fn reconstruction_loss<B: Backend>(
    kind: ReconstructionLoss,
    target: Tensor<B, 3>,
    prediction: Tensor<B, 3>,
    channels: usize,
) -> Tensor<B, 1> {
    let diff = target - prediction;
    match kind {
        ReconstructionLoss::Squared => diff
            .powf_scalar(2.0)
            .sum_dim(2)
            .div_scalar(channels.max(1) as f32)
            .mean(),
        ReconstructionLoss::Absolute => diff.abs().sum_dim(2).mean(),
    }
}

/// Net force on each site, `F_s = Σ_a w[a, s] · f_a`, squared and averaged.
///
/// # Arguments
/// * `assignment` - `[atoms, sites]`
/// * `forces` - `[batch, atoms, 3]`
pub fn force_matching_loss<B: Backend>(assignment: Tensor<B, 2>, forces: Tensor<B, 3>) -> Tensor<B, 1> {
    let [batch, _, _] = forces.dims();
    let site_forces = assignment
        .transpose()
        .unsqueeze_dim::<3>(0)
        .repeat_dim(0, batch)
        .matmul(forces);
    site_forces.powf_scalar(2.0).sum_dim(2).mean()
}

/// Value of a one-element loss tensor.
pub fn scalar<B: Backend>(loss: &Tensor<B, 1>) -> f32 {
    loss.clone().into_scalar().elem::<f32>()
}
