//! Spherical projection of assigned atoms onto their sites.
//!
//! ```text
//! target[b, s, c·K + k] = Σ_a  w[b, a, s] · feat[b, a, c] · Y_k(x_a − x_s)
//! ```
//!
//! with `K = (max_degree + 1)²` harmonics per channel. The result uses the
//! layout of `Signature::spherical_channels(channels, max_degree)`.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use cgae_core::{CgError, Displacements, Result};
use cgae_equivariant::{num_harmonics, spherical_harmonics_f32};

/// Harmonics of every displacement, `[batch, atoms, sites, K]`.
pub fn displacement_harmonics<B: Backend>(
    displacements: &Displacements,
    max_degree: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    let (batch, atoms, sites) = (
        displacements.batch(),
        displacements.atoms(),
        displacements.sites(),
    );
    let k = num_harmonics(max_degree);
    let mut values = Vec::with_capacity(batch * atoms * sites * k);
    for b in 0..batch {
        for a in 0..atoms {
            for s in 0..sites {
                values.extend(spherical_harmonics_f32(max_degree, displacements.vector(b, a, s)));
            }
        }
    }
    Tensor::from_data(TensorData::new(values, [batch, atoms, sites, k]), device)
}

/// Project atoms onto sites.
///
/// # Arguments
/// * `displacements` - Frozen atom − site vectors `[batch, atoms, sites, 3]`
/// * `weights` - Assignment `[batch, atoms, sites]`; may carry gradient
/// * `features` - Per-atom channels `[batch, atoms, channels]`; may carry gradient
///
/// # Returns
/// `[batch, sites, channels · (max_degree + 1)²]`
pub fn project<B: Backend>(
    displacements: &Displacements,
    weights: Tensor<B, 3>,
    features: Tensor<B, 3>,
    max_degree: usize,
) -> Result<Tensor<B, 3>> {
    let (batch, atoms, sites) = (
        displacements.batch(),
        displacements.atoms(),
        displacements.sites(),
    );
    if weights.dims() != [batch, atoms, sites] {
        return Err(CgError::shape("assignment weights", &[batch, atoms, sites], &weights.dims()));
    }
    let [fb, fa, channels] = features.dims();
    if [fb, fa] != [batch, atoms] {
        return Err(CgError::shape("atom features", &[batch, atoms, channels], &features.dims()));
    }

    let k = num_harmonics(max_degree);
    let harmonics = displacement_harmonics::<B>(displacements, max_degree, &weights.device());

    // w · Y, then move sites ahead of atoms: [batch, sites, atoms, K]
    let weighted = (weights.unsqueeze_dim::<4>(3).repeat_dim(3, k) * harmonics).swap_dims(1, 2);
    // feat as [batch, sites, channels, atoms]
    let features = features
        .swap_dims(1, 2)
        .unsqueeze_dim::<4>(1)
        .repeat_dim(1, sites);

    Ok(features
        .matmul(weighted)
        .reshape([batch, sites, channels * k]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use cgae_core::Coordinates;
    use cgae_equivariant::so3::y00;

    type B = NdArray<f32>;

    fn tensor3(values: Vec<f32>, shape: [usize; 3]) -> Tensor<B, 3> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn test_hard_assignment_sends_each_atom_to_one_site() {
        let atoms = Coordinates::from_points(&[[1.0, 0.0, 0.0], [0.0, 0.0, 3.0]]);
        let sites = Coordinates::from_points(&[[0.0, 0.0, 0.0], [0.0, 0.0, 2.0]]);
        let rel = atoms.relative_to(&sites).unwrap();
        let weights = tensor3(vec![1.0, 0.0, 0.0, 1.0], [1, 2, 2]);
        let feats = tensor3(vec![1.0, 0.0, 0.0, 1.0], [1, 2, 2]);

        let out = project(&rel, weights, feats, 1).unwrap();
        assert_eq!(out.dims(), [1, 2, 8]);
        let v = out.into_data().to_vec::<f32>().unwrap();
        // site 0, channel 0: atom 0 along +x; channel 1 empty
        assert!((v[0] - y00() as f32).abs() < 1e-6);
        assert!(v[1].abs() < 1e-6 && v[2].abs() < 1e-6);
        let l1 = (3.0 / (4.0 * std::f32::consts::PI)).sqrt();
        assert!((v[3].abs() - l1).abs() < 1e-5);
        assert!(v[4..8].iter().all(|x| x.abs() < 1e-6));
        // site 1, channel 1: atom 1 along +z
        assert!(v[8..12].iter().all(|x| x.abs() < 1e-6));
        assert!((v[12] - y00() as f32).abs() < 1e-6);
        assert!((v[14] - l1).abs() < 1e-5);
    }

    #[test]
    fn test_zero_displacement_is_finite() {
        let atoms = Coordinates::from_points(&[[0.5, 0.5, 0.5]]);
        let sites = Coordinates::from_points(&[[0.5, 0.5, 0.5]]);
        let rel = atoms.relative_to(&sites).unwrap();
        let out = project(&rel, tensor3(vec![1.0], [1, 1, 1]), tensor3(vec![2.0], [1, 1, 1]), 2)
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(out.iter().all(|v| v.is_finite()));
        assert!((out[0] - 2.0 * y00() as f32).abs() < 1e-6);
        assert!(out[1..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_shape_errors() {
        let rel = Coordinates::from_points(&[[0.0; 3]; 2])
            .relative_to(&Coordinates::from_points(&[[1.0; 3]]))
            .unwrap();
        let err = project(&rel, tensor3(vec![1.0; 4], [1, 2, 2]), tensor3(vec![1.0; 2], [1, 2, 1]), 1);
        assert!(matches!(err, Err(CgError::ShapeMismatch { .. })));
    }
}
