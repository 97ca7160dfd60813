//! Layer stacks: gated blocks followed by one linear convolution.

use burn::module::Ignored;
use burn::prelude::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use cgae_core::{CgError, Coordinates, Result, SignatureStack};

use crate::activation::Activation;
use crate::convolution::{filter_degree, Convolution, PairGeometry};
use crate::gate::GatedBlock;
use crate::radial::RadialConfig;

/// Nonlinearities and radial model shared by every layer of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub radial: RadialConfig,
    pub scalar_activation: Activation,
    pub gate_activation: Activation,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            radial: RadialConfig::default(),
            scalar_activation: Activation::Relu,
            gate_activation: Activation::Sigmoid,
        }
    }
}

/// `Rs[0] → … → Rs[L]`. Every operator but the last is a [`GatedBlock`];
/// the last is a bare [`Convolution`].
///
/// Before each operator the incoming features are divided by `sqrt(points)`.
#[derive(Module, Debug)]
pub struct EquivariantStack<B: Backend> {
    gated: Vec<GatedBlock<B>>,
    head: Convolution<B>,
    signatures: Ignored<SignatureStack>,
    max_filter_degree: Ignored<usize>,
}

impl<B: Backend> EquivariantStack<B> {
    pub fn new(signatures: &SignatureStack, config: &StackConfig, device: &B::Device) -> Result<Self> {
        let transitions: Vec<_> = signatures.transitions().collect();
        let Some((&(last_in, last_out), hidden)) = transitions.split_last() else {
            return Err(CgError::InvalidSignature("stack has no operators".into()));
        };

        let gated = hidden
            .iter()
            .map(|(rs_in, rs_out)| {
                GatedBlock::new(
                    (*rs_in).clone(),
                    (*rs_out).clone(),
                    config.scalar_activation,
                    config.gate_activation,
                    &config.radial,
                    device,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let head = Convolution::new(last_in.clone(), last_out.clone(), &config.radial, device);

        let max_filter_degree = transitions
            .iter()
            .map(|(rs_in, rs_out)| filter_degree(rs_in, rs_out))
            .max()
            .unwrap_or(0);

        Ok(Self {
            gated,
            head,
            signatures: Ignored(signatures.clone()),
            max_filter_degree: Ignored(max_filter_degree),
        })
    }

    pub fn signatures(&self) -> &SignatureStack {
        &self.signatures
    }

    /// `[batch, points, dim(Rs[0])]` features at `coordinates` → `[batch, points, dim(Rs[L])]`.
    pub fn forward(&self, features: Tensor<B, 3>, coordinates: &Coordinates) -> Result<Tensor<B, 3>> {
        let [batch, points, width] = features.dims();
        let expected = [coordinates.batch(), coordinates.points(), self.signatures.input().dim()];
        if [batch, points, width] != expected {
            return Err(CgError::shape("stack input", &expected, &[batch, points, width]));
        }

        let geometry = PairGeometry::new(coordinates, *self.max_filter_degree)?;
        let scale = 1.0 / (points as f32).sqrt();

        let mut h = features;
        for block in &self.gated {
            h = block.forward(h.mul_scalar(scale), &geometry);
        }
        Ok(self.head.forward(h.mul_scalar(scale), &geometry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;
    use cgae_core::Signature;

    type B = NdArray<f32>;

    #[test]
    fn test_stack_shapes() {
        let device = Default::default();
        let stack =
            SignatureStack::decoder(Signature::scalars(3).unwrap(), &[4, 2, 1], 1, 2, 2).unwrap();
        let model = EquivariantStack::<B>::new(&stack, &StackConfig::default(), &device).unwrap();
        assert_eq!(model.gated.len(), 1);

        let coords = Coordinates::from_points(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.5]]);
        let x = Tensor::<B, 3>::from_data(TensorData::new(vec![0.5f32; 9], [1, 3, 3]), &device);
        let y = model.forward(x, &coords).unwrap();
        assert_eq!(y.dims(), [1, 3, 18]);

        let bad = Tensor::<B, 3>::from_data(TensorData::new(vec![0.5f32; 6], [1, 3, 2]), &device);
        assert!(matches!(
            model.forward(bad, &coords),
            Err(CgError::ShapeMismatch { .. })
        ));
    }

    fn values(t: Tensor<B, 3>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    fn assert_all_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        let scale = a.iter().fold(0.0f32, |m, v| m.max(v.abs())).max(1e-3);
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() <= 1e-5 * scale, "{x} vs {y}");
        }
    }

    fn points() -> Coordinates {
        Coordinates::from_points(&[
            [0.0, 0.0, 0.0],
            [1.1, 0.2, -0.3],
            [-0.4, 0.9, 0.5],
            [0.3, -0.7, 1.2],
        ])
    }

    #[test]
    fn test_every_operator_sees_rescaled_input() {
        let device = Default::default();
        let stack =
            SignatureStack::decoder(Signature::scalars(2).unwrap(), &[3, 2], 2, 1, 1).unwrap();
        let model = EquivariantStack::<B>::new(&stack, &StackConfig::default(), &device).unwrap();
        assert_eq!(model.gated.len(), 2);

        let coords = points();
        let x = Tensor::<B, 3>::from_data(
            TensorData::new((0..8).map(|i| i as f32 * 0.4 - 1.0).collect::<Vec<_>>(), [1, 4, 2]),
            &device,
        );
        let geometry = PairGeometry::new(&coords, *model.max_filter_degree).unwrap();
        let s = 0.5;

        let mut h = x.clone();
        for block in &model.gated {
            h = block.forward(h.mul_scalar(s), &geometry);
        }
        let manual = values(model.head.forward(h.mul_scalar(s), &geometry));
        let full = values(model.forward(x.clone(), &coords).unwrap());
        assert_all_close(&full, &manual);

        // rescaling only the first operator gives a different result
        let mut h = x.mul_scalar(s);
        for block in &model.gated {
            h = block.forward(h, &geometry);
        }
        let once = values(model.head.forward(h, &geometry));
        let scale = full.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(scale > 0.0);
        assert!(once.iter().zip(&full).any(|(a, b)| (a - b).abs() > 1e-2 * scale));
    }

    #[test]
    fn test_head_only_stack_scales_with_inverse_sqrt_points() {
        let device = Default::default();
        let stack =
            SignatureStack::decoder(Signature::scalars(1).unwrap(), &[2], 0, 1, 1).unwrap();
        let model = EquivariantStack::<B>::new(&stack, &StackConfig::default(), &device).unwrap();
        assert!(model.gated.is_empty());

        for n in [1usize, 2, 4] {
            let coords = Coordinates::new(1, n, points().values()[..3 * n].to_vec()).unwrap();
            let x = Tensor::<B, 3>::from_data(
                TensorData::new((0..n).map(|i| 0.3 + i as f32).collect::<Vec<_>>(), [1, n, 1]),
                &device,
            );
            let geometry = PairGeometry::new(&coords, *model.max_filter_degree).unwrap();
            let unscaled = values(model.head.forward(x.clone(), &geometry));
            let out = values(model.forward(x, &coords).unwrap());
            let s = 1.0 / (n as f32).sqrt();
            let expected: Vec<f32> = unscaled.iter().map(|v| v * s).collect();
            assert_all_close(&out, &expected);
        }
    }
}
