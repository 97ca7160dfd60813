//! Gumbel-softmax assignment of atoms to sites.
//!
//! Reference: "Categorical Reparameterization with Gumbel-Softmax"
//! Jang et al., ICLR 2017

use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Int, Tensor, TensorData};
use rand::Rng;

/// Soft and straight-through assignments drawn from the same noise sample.
#[derive(Debug, Clone)]
pub struct SoftAssignment<B: Backend> {
    /// Rows sum to one, `[atoms, sites]`.
    pub soft: Tensor<B, 2>,
    /// One-hot argmax of `soft` in the forward pass, gradient of `soft` in the backward pass.
    pub hard: Tensor<B, 2>,
}

/// Gumbel noise `-log(-log(U))`, `U ~ Uniform(0, 1)`.
pub fn gumbel_noise<B: Backend>(shape: [usize; 2], device: &B::Device) -> Tensor<B, 2> {
    let uniform: Tensor<B, 2> =
        Tensor::random(shape, Distribution::Uniform(1e-10, 1.0 - 1e-10), device);
    -(-(uniform.log())).log()
}

/// Gumbel noise drawn from a caller-owned generator, for reproducible runs.
pub fn gumbel_noise_from_rng<B: Backend, R: Rng>(
    rng: &mut R,
    shape: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 2> {
    let values: Vec<f32> = (0..shape[0] * shape[1])
        .map(|_| {
            let u: f64 = rng.gen_range(1e-10..1.0 - 1e-10);
            -(-u.ln()).ln() as f32
        })
        .collect();
    Tensor::from_data(TensorData::new(values, shape), device)
}

/// Relaxed categorical assignment of each atom (row) over sites (columns).
///
/// # Arguments
/// * `logits` - Unnormalized log probabilities `[atoms, sites]`
/// * `temperature` - τ > 0; large τ approaches uniform rows, τ → 0 approaches one-hot rows
///
/// # Example
/// ```ignore
/// let SoftAssignment { soft, hard } = soft_assign(logits, schedule.at_epoch(epoch));
/// ```
pub fn soft_assign<B: Backend>(logits: Tensor<B, 2>, temperature: f32) -> SoftAssignment<B> {
    let noise = gumbel_noise::<B>(logits.dims(), &logits.device());
    soft_assign_with_noise(logits, noise, temperature)
}

/// [`soft_assign`] with caller-supplied Gumbel noise of the same shape as `logits`.
pub fn soft_assign_with_noise<B: Backend>(
    logits: Tensor<B, 2>,
    noise: Tensor<B, 2>,
    temperature: f32,
) -> SoftAssignment<B> {
    debug_assert!(temperature > 0.0, "temperature must be positive");
    let [_, sites] = logits.dims();

    // y = softmax((logits + g) / τ) over sites
    let soft = softmax((logits + noise) / temperature, 1);

    // Forward: y_hard. Backward: gradient of y_soft.
    let indices = soft.clone().argmax(1);
    let y_hard = one_hot::<B>(indices.squeeze_dim::<1>(1), sites, &soft.device());
    let hard = y_hard - soft.clone().detach() + soft.clone();

    SoftAssignment { soft, hard }
}

/// One-hot rows from indices, `[len, n_categories]`.
pub fn one_hot<B: Backend>(
    indices: Tensor<B, 1, Int>,
    n_categories: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let len = indices.dims()[0];
    let range: Tensor<B, 1, Int> = Tensor::arange(0..n_categories as i64, device);

    let indices = indices.unsqueeze_dim::<2>(1).repeat_dim(1, n_categories);
    let range = range.unsqueeze_dim::<2>(0).repeat_dim(0, len);

    indices.equal(range).float()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    fn rows(t: Tensor<B, 2>) -> Vec<Vec<f32>> {
        let [_, cols] = t.dims();
        t.into_data()
            .to_vec::<f32>()
            .unwrap()
            .chunks(cols)
            .map(<[f32]>::to_vec)
            .collect()
    }

    #[test]
    fn test_soft_rows_sum_to_one() {
        let device = Default::default();
        let logits = Tensor::<B, 2>::from_data(
            TensorData::from([[1.0f32, 2.0, 0.5], [0.0, 0.0, 0.0], [-3.0, 4.0, 1.0]]),
            &device,
        );
        for temperature in [0.1, 1.0, 10.0] {
            let assignment = soft_assign(logits.clone(), temperature);
            for row in rows(assignment.soft) {
                assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
                assert!(row.iter().all(|&w| w >= 0.0));
            }
        }
    }

    #[test]
    fn test_hard_is_argmax_of_soft() {
        let device = Default::default();
        let logits = Tensor::<B, 2>::from_data(TensorData::from([[0.2f32, 0.1, 0.9], [2.0, -1.0, 0.0]]), &device);
        let noise = Tensor::<B, 2>::zeros([2, 3], &device);
        let assignment = soft_assign_with_noise(logits, noise, 0.5);
        let expected = [[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]];
        for (row, expected) in rows(assignment.hard).iter().zip(expected) {
            for (w, e) in row.iter().zip(expected) {
                assert!((w - e).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_equal_logits_high_temperature_near_uniform() {
        let device = Default::default();
        let logits = Tensor::<B, 2>::zeros([4, 3], &device);
        let assignment = soft_assign(logits, 1e4);
        for row in rows(assignment.soft) {
            for w in row {
                assert!((w - 1.0 / 3.0).abs() < 1e-2);
            }
        }
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;

        let device = Default::default();
        let a = gumbel_noise_from_rng::<B, _>(&mut ChaCha8Rng::seed_from_u64(7), [3, 2], &device);
        let b = gumbel_noise_from_rng::<B, _>(&mut ChaCha8Rng::seed_from_u64(7), [3, 2], &device);
        assert_eq!(rows(a.clone()), rows(b));
        assert!(rows(a).iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_one_hot() {
        let device = Default::default();
        let indices = Tensor::<B, 1, Int>::from_data(TensorData::from([2i64, 0]), &device);
        assert_eq!(
            rows(one_hot::<B>(indices, 3, &device)),
            vec![vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 0.0]]
        );
    }
}
