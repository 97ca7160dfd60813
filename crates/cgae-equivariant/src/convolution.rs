//! Equivariant point convolution.
//!
//! For every ordered pair of points `(a, b)` in a frame (including `a == b`),
//! the kernel from an input block of degree `l_i` to an output block of
//! degree `l_o` is a sum over filter degrees `|l_i − l_o| ≤ l_f ≤ l_i + l_o`:
//!
//! ```text
//! K_p(r_ab)[o, i] = R_p(|r_ab|) · Σ_f C[i, f, o] · Y_lf,f(r_ab / |r_ab|)
//! out_a           = Σ_b K(r_ab) · in_b          with r_ab = x_b − x_a
//! ```
//!
//! The radial factors `R_p` carry a `[mul_in, mul_out]` weight matrix per path
//! and are produced by a single [`CosineBasisModel`].

use std::sync::Arc;

use burn::module::Ignored;
use burn::prelude::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use cgae_core::{CgError, Coordinates, Result, Signature};

use crate::radial::{CosineBasisModel, RadialConfig};
use crate::so3::{num_harmonics, spherical_harmonics_f32, CouplingTensor};

/// Pair geometry of one batch of frames, shared by every layer of a stack.
///
/// Pairs are ordered `(frame, a, b)` with `b` fastest.
#[derive(Debug, Clone)]
pub struct PairGeometry {
    batch: usize,
    points: usize,
    max_degree: usize,
    radii: Vec<f32>,
    /// `[pairs, (max_degree + 1)²]`
    harmonics: Vec<f32>,
}

impl PairGeometry {
    pub fn new(coordinates: &Coordinates, max_degree: usize) -> Result<Self> {
        let (batch, points) = (coordinates.batch(), coordinates.points());
        if points == 0 {
            return Err(CgError::EmptySystem { what: "point" });
        }
        let pairs = batch * points * points;
        let width = num_harmonics(max_degree);
        let mut radii = Vec::with_capacity(pairs);
        let mut harmonics = Vec::with_capacity(pairs * width);
        for frame in 0..batch {
            for a in 0..points {
                let xa = coordinates.point(frame, a);
                for b in 0..points {
                    let xb = coordinates.point(frame, b);
                    let r = [xb[0] - xa[0], xb[1] - xa[1], xb[2] - xa[2]];
                    radii.push(cgae_core::norm3(r));
                    harmonics.extend(spherical_harmonics_f32(max_degree, r));
                }
            }
        }
        Ok(Self {
            batch,
            points,
            max_degree,
            radii,
            harmonics,
        })
    }

    pub const fn batch(&self) -> usize {
        self.batch
    }

    pub const fn points(&self) -> usize {
        self.points
    }

    pub const fn pairs(&self) -> usize {
        self.batch * self.points * self.points
    }

    pub const fn max_degree(&self) -> usize {
        self.max_degree
    }

    pub fn radii(&self) -> &[f32] {
        &self.radii
    }

    /// `[pairs, basis]` radial basis values.
    fn radial_basis(&self, config: &RadialConfig) -> Vec<f32> {
        self.radii
            .iter()
            .flat_map(|&r| config.basis_values(r))
            .collect()
    }

    /// `[pairs, 2l3+1, 2l1+1]` angular factor `Σ_f C[i, f, o] Y_l2,f`.
    fn angular(&self, cg: &CouplingTensor) -> Vec<f32> {
        let [d1, d2, d3] = cg.dims();
        let width = num_harmonics(self.max_degree);
        let offset = cg.l2 * cg.l2;
        let mut out = Vec::with_capacity(self.pairs() * d3 * d1);
        for y in self.harmonics.chunks_exact(width) {
            let y = &y[offset..offset + d2];
            for o in 0..d3 {
                for i in 0..d1 {
                    let value: f64 = (0..d2).map(|f| cg.get(i, f, o) * y[f] as f64).sum();
                    out.push(value as f32);
                }
            }
        }
        out
    }
}

/// One `(input block, filter degree, output block)` coupling.
#[derive(Debug, Clone)]
struct Path {
    input: usize,
    output: usize,
    cg: Arc<CouplingTensor>,
    weight_offset: usize,
    norm: f32,
}

/// Largest filter degree a convolution between `rs_in` and `rs_out` uses.
pub fn filter_degree(rs_in: &Signature, rs_out: &Signature) -> usize {
    rs_in.max_degree() + rs_out.max_degree()
}

#[derive(Module, Debug)]
pub struct Convolution<B: Backend> {
    radial: CosineBasisModel<B>,
    paths: Ignored<Vec<Path>>,
    rs_in: Ignored<Arc<Signature>>,
    rs_out: Ignored<Arc<Signature>>,
}

impl<B: Backend> Convolution<B> {
    pub fn new(
        rs_in: Arc<Signature>,
        rs_out: Arc<Signature>,
        radial: &RadialConfig,
        device: &B::Device,
    ) -> Self {
        let mut paths = Vec::new();
        let mut weights = 0;
        for (o, ir_out) in rs_out.irreps().iter().enumerate() {
            let first = paths.len();
            let mut fan_in = 0;
            for (i, ir_in) in rs_in.irreps().iter().enumerate() {
                let lo = ir_in.degree.abs_diff(ir_out.degree);
                for lf in lo..=(ir_in.degree + ir_out.degree) {
                    let Some(cg) = CouplingTensor::new(ir_in.degree, lf, ir_out.degree) else {
                        continue;
                    };
                    paths.push(Path {
                        input: i,
                        output: o,
                        cg: Arc::new(cg),
                        weight_offset: weights,
                        norm: 1.0,
                    });
                    weights += ir_in.mul * ir_out.mul;
                    fan_in += ir_in.mul;
                }
            }
            let norm = 1.0 / (fan_in.max(1) as f32).sqrt();
            for path in &mut paths[first..] {
                path.norm = norm;
            }
        }
        log::debug!(
            "convolution {rs_in} -> {rs_out}: {} paths, {weights} radial outputs",
            paths.len()
        );

        Self {
            radial: CosineBasisModel::new(radial, weights.max(1), device),
            paths: Ignored(paths),
            rs_in: Ignored(rs_in),
            rs_out: Ignored(rs_out),
        }
    }

    pub fn rs_in(&self) -> &Arc<Signature> {
        &self.rs_in
    }

    pub fn rs_out(&self) -> &Arc<Signature> {
        &self.rs_out
    }

    pub fn num_paths(&self) -> usize {
        self.paths.len()
    }

    /// `[batch, points, dim_in]` → `[batch, points, dim_out]`.
    pub fn forward(&self, features: Tensor<B, 3>, geometry: &PairGeometry) -> Tensor<B, 3> {
        let device = features.device();
        let [batch, n, _] = features.dims();
        let pairs = geometry.pairs();
        let config = self.radial.config();

        let basis = Tensor::<B, 2>::from_data(
            TensorData::new(geometry.radial_basis(config), [pairs, config.basis]),
            &device,
        );
        let weights = self.radial.forward(basis);

        let offsets = self.rs_in.offsets();
        let irreps_in = self.rs_in.irreps();
        let irreps_out = self.rs_out.irreps();
        let mut blocks: Vec<Option<Tensor<B, 3>>> = vec![None; irreps_out.len()];

        for path in self.paths.iter() {
            let ir_in = irreps_in[path.input];
            let ir_out = irreps_out[path.output];
            let (di, d_o) = (ir_in.order(), ir_out.order());

            // in_b for every pair (a, b): [pairs, di, mul_in]
            let f = features
                .clone()
                .narrow(2, offsets[path.input], ir_in.dim())
                .reshape([batch, n, ir_in.mul, di])
                .swap_dims(2, 3)
                .unsqueeze_dim::<5>(1)
                .repeat_dim(1, n)
                .reshape([pairs, di, ir_in.mul]);

            let q = Tensor::<B, 3>::from_data(
                TensorData::new(geometry.angular(&path.cg), [pairs, d_o, di]),
                &device,
            );
            let w = weights
                .clone()
                .narrow(1, path.weight_offset, ir_in.mul * ir_out.mul)
                .reshape([pairs, ir_in.mul, ir_out.mul]);

            let h = q.matmul(f).matmul(w).mul_scalar(path.norm);
            let h = h
                .reshape([batch, n, n, d_o, ir_out.mul])
                .sum_dim(2)
                .reshape([batch, n, d_o, ir_out.mul])
                .swap_dims(2, 3)
                .reshape([batch, n, ir_out.dim()]);

            let slot = &mut blocks[path.output];
            *slot = Some(match slot.take() {
                Some(acc) => acc + h,
                None => h,
            });
        }

        let blocks = blocks
            .into_iter()
            .zip(irreps_out)
            .map(|(block, ir)| block.unwrap_or_else(|| Tensor::zeros([batch, n, ir.dim()], &device)))
            .collect();
        Tensor::cat(blocks, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::so3::{rotate_signature_features, rotation_from_axis_angle, rotation_rows_f32};
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn coords() -> Coordinates {
        Coordinates::from_points(&[
            [0.0, 0.0, 0.0],
            [1.1, 0.2, -0.3],
            [-0.4, 0.9, 0.5],
            [0.3, -0.7, 1.2],
        ])
    }

    fn to_vec(t: Tensor<B, 3>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_pair_geometry_counts_self_pairs() {
        let g = PairGeometry::new(&coords(), 2).unwrap();
        assert_eq!(g.pairs(), 16);
        assert_eq!(g.radii()[0], 0.0);
        assert_eq!(g.radii()[5], 0.0);
        assert!(PairGeometry::new(&Coordinates::from_points(&[]), 1).is_err());
    }

    #[test]
    fn test_path_enumeration() {
        let device = Default::default();
        let rs_in = Arc::new(Signature::new([(2, 0), (1, 1)]).unwrap());
        let rs_out = Arc::new(Signature::new([(1, 1)]).unwrap());
        let conv = Convolution::<B>::new(rs_in, rs_out, &RadialConfig::default(), &device);
        // 0 ⊗ 1 → 1 and 1 ⊗ {0, 1, 2} → 1
        assert_eq!(conv.num_paths(), 4);
    }

    #[test]
    fn test_convolution_is_equivariant() {
        let device = Default::default();
        let rs_in = Arc::new(Signature::new([(2, 0), (1, 1)]).unwrap());
        let rs_out = Arc::new(Signature::new([(1, 0), (2, 1), (1, 2)]).unwrap());
        let conv = Convolution::<B>::new(rs_in.clone(), rs_out.clone(), &RadialConfig::default(), &device);
        let lmax = filter_degree(&rs_in, &rs_out);

        let coords = coords();
        let n = coords.points();
        let feats: Vec<f32> = (0..n * rs_in.dim()).map(|i| ((i * 7 % 11) as f32) * 0.1 - 0.5).collect();

        let rot = rotation_from_axis_angle([0.2, 1.0, -0.4], 0.9);
        let rotated_feats: Vec<f32> = feats
            .chunks(rs_in.dim())
            .flat_map(|x| rotate_signature_features(&rs_in, &rot, x).unwrap())
            .collect();

        let input = Tensor::<B, 3>::from_data(TensorData::new(feats, [1, n, rs_in.dim()]), &device);
        let rotated_input =
            Tensor::<B, 3>::from_data(TensorData::new(rotated_feats, [1, n, rs_in.dim()]), &device);

        let out = to_vec(conv.forward(input, &PairGeometry::new(&coords, lmax).unwrap()));
        let rotated_coords = coords.rotated(&rotation_rows_f32(&rot));
        let out_rot = to_vec(conv.forward(
            rotated_input,
            &PairGeometry::new(&rotated_coords, lmax).unwrap(),
        ));

        for (a, (x, y)) in out.chunks(rs_out.dim()).zip(out_rot.chunks(rs_out.dim())).enumerate() {
            let expected = rotate_signature_features(&rs_out, &rot, x).unwrap();
            for (e, y) in expected.iter().zip(y) {
                assert!((e - y).abs() < 1e-4 * (1.0 + e.abs()), "point {a}: {e} vs {y}");
            }
        }
    }
}
