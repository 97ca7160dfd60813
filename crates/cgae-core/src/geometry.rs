//! Frozen geometry values.
//!
//! Geometry that must not carry gradients (site coordinates handed to the
//! decoder, atom and site coordinates used for nearest assignment, relative
//! displacements used for spherical projection) lives in plain value types.
//! A gradient-carrying `burn` tensor can only become one of these through
//! [`Coordinates::from_tensor`], which reads the values out of the graph.
//! Nothing converts back into a tracked tensor: [`Coordinates::to_tensor`]
//! always produces a fresh constant leaf.
//!
//! Layouts are row-major:
//! - [`Coordinates`]: `[batch, points, 3]`
//! - [`Displacements`]: `[batch, atoms, sites, 3]`, `atom - site`

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};

use crate::error::{CgError, Result};

/// Euclidean norm of a 3-vector.
#[inline]
pub fn norm3(v: [f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// A batch of 3D point sets with the same number of points per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    batch: usize,
    points: usize,
    values: Vec<f32>,
}

impl Coordinates {
    pub fn new(batch: usize, points: usize, values: Vec<f32>) -> Result<Self> {
        if values.len() != batch * points * 3 {
            return Err(CgError::shape(
                "coordinates",
                &[batch, points, 3],
                &[values.len()],
            ));
        }
        Ok(Self {
            batch,
            points,
            values,
        })
    }

    /// Single-frame coordinates from a list of points.
    pub fn from_points(points: &[[f32; 3]]) -> Self {
        Self {
            batch: 1,
            points: points.len(),
            values: points.iter().flat_map(|p| p.iter().copied()).collect(),
        }
    }

    /// Read the values of a `[batch, points, 3]` tensor.
    ///
    /// The result is detached from any autodiff graph the tensor belongs to.
    pub fn from_tensor<B: Backend>(tensor: &Tensor<B, 3>) -> Result<Self> {
        let [batch, points, three] = tensor.dims();
        if three != 3 {
            return Err(CgError::shape("coordinates", &[batch, points, 3], &tensor.dims()));
        }
        let values = tensor
            .clone()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| CgError::TensorData(format!("{e:?}")))?;
        Self::new(batch, points, values)
    }

    /// Constant `[batch, points, 3]` tensor holding these coordinates.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        Tensor::from_data(
            TensorData::new(self.values.clone(), [self.batch, self.points, 3]),
            device,
        )
    }

    pub const fn batch(&self) -> usize {
        self.batch
    }

    pub const fn points(&self) -> usize {
        self.points
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn point(&self, frame: usize, index: usize) -> [f32; 3] {
        let o = (frame * self.points + index) * 3;
        [self.values[o], self.values[o + 1], self.values[o + 2]]
    }

    /// Apply a 3x3 rotation matrix (row-major) to every point.
    pub fn rotated(&self, rotation: &[[f32; 3]; 3]) -> Self {
        let values = self
            .values
            .chunks_exact(3)
            .flat_map(|p| {
                (0..3).map(move |i| {
                    rotation[i][0] * p[0] + rotation[i][1] * p[1] + rotation[i][2] * p[2]
                })
            })
            .collect();
        Self {
            batch: self.batch,
            points: self.points,
            values,
        }
    }

    /// Displacement of every atom (`self`) from every site.
    pub fn relative_to(&self, sites: &Coordinates) -> Result<Displacements> {
        if self.batch != sites.batch {
            return Err(CgError::shape(
                "site coordinates",
                &[self.batch, sites.points, 3],
                &[sites.batch, sites.points, 3],
            ));
        }
        let mut values = Vec::with_capacity(self.batch * self.points * sites.points * 3);
        for b in 0..self.batch {
            for a in 0..self.points {
                let atom = self.point(b, a);
                for s in 0..sites.points {
                    let site = sites.point(b, s);
                    values.extend_from_slice(&[
                        atom[0] - site[0],
                        atom[1] - site[1],
                        atom[2] - site[2],
                    ]);
                }
            }
        }
        Ok(Displacements {
            batch: self.batch,
            atoms: self.points,
            sites: sites.points,
            values,
        })
    }
}

/// Atom-to-site displacement vectors, `[batch, atoms, sites, 3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Displacements {
    batch: usize,
    atoms: usize,
    sites: usize,
    values: Vec<f32>,
}

impl Displacements {
    pub fn new(batch: usize, atoms: usize, sites: usize, values: Vec<f32>) -> Result<Self> {
        if values.len() != batch * atoms * sites * 3 {
            return Err(CgError::shape(
                "displacements",
                &[batch, atoms, sites, 3],
                &[values.len()],
            ));
        }
        Ok(Self {
            batch,
            atoms,
            sites,
            values,
        })
    }

    pub const fn batch(&self) -> usize {
        self.batch
    }

    pub const fn atoms(&self) -> usize {
        self.atoms
    }

    pub const fn sites(&self) -> usize {
        self.sites
    }

    #[inline]
    pub fn vector(&self, frame: usize, atom: usize, site: usize) -> [f32; 3] {
        let o = ((frame * self.atoms + atom) * self.sites + site) * 3;
        [self.values[o], self.values[o + 1], self.values[o + 2]]
    }

    /// Index of the atom closest to `site` in `frame` (lowest index on ties).
    pub fn nearest_atom(&self, frame: usize, site: usize) -> usize {
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for a in 0..self.atoms {
            let d = norm3(self.vector(frame, a, site));
            if d < best_dist {
                best_dist = d;
                best = a;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(Coordinates::new(1, 2, vec![0.0; 5]).is_err());
        assert!(Coordinates::new(1, 2, vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_tensor_round_trip_preserves_layout() {
        let device = Default::default();
        let coords = Coordinates::from_points(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let tensor = coords.to_tensor::<B>(&device);
        assert_eq!(tensor.dims(), [1, 2, 3]);
        let back = Coordinates::from_tensor(&tensor).unwrap();
        assert_eq!(back, coords);
        assert_eq!(back.point(0, 1), [4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_relative_displacement_is_atom_minus_site() {
        let atoms = Coordinates::from_points(&[[1.0, 0.0, 0.0], [0.0, 2.0, 0.0]]);
        let sites = Coordinates::from_points(&[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]);
        let rel = atoms.relative_to(&sites).unwrap();
        assert_eq!(rel.vector(0, 0, 0), [1.0, 0.0, 0.0]);
        assert_eq!(rel.vector(0, 1, 1), [-1.0, 1.0, -1.0]);
        assert_eq!(rel.nearest_atom(0, 0), 0);
    }

    #[test]
    fn test_rotation_preserves_norms() {
        let coords = Coordinates::from_points(&[[1.0, 2.0, 2.0]]);
        let rot = [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let rotated = coords.rotated(&rot);
        assert_eq!(rotated.point(0, 0), [-2.0, 1.0, 2.0]);
        assert!((norm3(rotated.point(0, 0)) - 3.0).abs() < 1e-6);
    }
}
