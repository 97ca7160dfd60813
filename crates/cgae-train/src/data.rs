//! Reference trajectories and fixed-size batching.
//!
//! | Name | Shape | Dtype |
//! |------|-------|-------|
//! | `geometries` | \[frames, atoms, 3\] | F32 |
//! | `forces` | \[frames, atoms, 3\] | F32 |
//! | `features` | \[atoms, species\] | F32 |

use std::path::Path;

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use safetensors::SafeTensors;

use cgae_core::{CgError, Coordinates, Result};
use cgae_models::{read_f32, write_f32};

pub const GEOMETRIES_KEY: &str = "geometries";
pub const FORCES_KEY: &str = "forces";
pub const FEATURES_KEY: &str = "features";

/// Frames of one molecular system with per-atom species features.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    frames: usize,
    atoms: usize,
    species: usize,
    geometries: Vec<f32>,
    forces: Vec<f32>,
    features: Vec<f32>,
}

impl Dataset {
    pub fn new(
        frames: usize,
        atoms: usize,
        species: usize,
        geometries: Vec<f32>,
        forces: Vec<f32>,
        features: Vec<f32>,
    ) -> Result<Self> {
        if frames == 0 {
            return Err(CgError::Dataset("dataset has no frames".into()));
        }
        if atoms == 0 {
            return Err(CgError::EmptySystem { what: "atom" });
        }
        if species == 0 {
            return Err(CgError::Dataset("features have no channels".into()));
        }
        if geometries.len() != frames * atoms * 3 {
            return Err(CgError::shape(GEOMETRIES_KEY, &[frames, atoms, 3], &[geometries.len()]));
        }
        if forces.len() != frames * atoms * 3 {
            return Err(CgError::shape(FORCES_KEY, &[frames, atoms, 3], &[forces.len()]));
        }
        if features.len() != atoms * species {
            return Err(CgError::shape(FEATURES_KEY, &[atoms, species], &[features.len()]));
        }
        Ok(Self {
            frames,
            atoms,
            species,
            geometries,
            forces,
            features,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes).map_err(|e| match e {
            CgError::Dataset(msg) => CgError::Dataset(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let tensors = SafeTensors::deserialize(bytes)
            .map_err(|e| CgError::Dataset(format!("not a SafeTensors file: {e}")))?;
        let (geo_shape, geometries) = read_f32(&tensors, GEOMETRIES_KEY, 3).map_err(CgError::Dataset)?;
        let (force_shape, forces) = read_f32(&tensors, FORCES_KEY, 3).map_err(CgError::Dataset)?;
        let (feat_shape, features) = read_f32(&tensors, FEATURES_KEY, 2).map_err(CgError::Dataset)?;

        let (frames, atoms) = (geo_shape[0], geo_shape[1]);
        if geo_shape[2] != 3 {
            return Err(CgError::Dataset(format!("'{GEOMETRIES_KEY}' has shape {geo_shape:?}, expected [frames, atoms, 3]")));
        }
        if force_shape != geo_shape {
            return Err(CgError::Dataset(format!(
                "'{FORCES_KEY}' has shape {force_shape:?}, expected {geo_shape:?}"
            )));
        }
        if feat_shape[0] != atoms {
            return Err(CgError::Dataset(format!(
                "'{FEATURES_KEY}' has shape {feat_shape:?}, expected [{atoms}, species]"
            )));
        }
        Self::new(frames, atoms, feat_shape[1], geometries, forces, features)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        write_f32(&[
            (GEOMETRIES_KEY, vec![self.frames, self.atoms, 3], self.geometries.as_slice()),
            (FORCES_KEY, vec![self.frames, self.atoms, 3], self.forces.as_slice()),
            (FEATURES_KEY, vec![self.atoms, self.species], self.features.as_slice()),
        ])
        .map_err(CgError::Dataset)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub const fn frames(&self) -> usize {
        self.frames
    }

    pub const fn atoms(&self) -> usize {
        self.atoms
    }

    pub const fn species(&self) -> usize {
        self.species
    }

    /// Split into `frames / batch_size` full batches; the remainder is dropped.
    pub fn batches(&self, batch_size: usize) -> Result<Vec<Batch>> {
        if batch_size == 0 {
            return Err(CgError::InvalidConfig("batch_size must be at least 1".into()));
        }
        let count = self.frames / batch_size;
        if count == 0 {
            return Err(CgError::Dataset(format!(
                "{} frames cannot fill a single batch of {batch_size}",
                self.frames
            )));
        }
        let stride = batch_size * self.atoms * 3;
        (0..count)
            .map(|i| {
                let range = i * stride..(i + 1) * stride;
                Ok(Batch {
                    geometry: Coordinates::new(batch_size, self.atoms, self.geometries[range.clone()].to_vec())?,
                    forces: self.forces[range].to_vec(),
                    features: self.features.clone(),
                    species: self.species,
                })
            })
            .collect()
    }
}

/// `batch_size` consecutive frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    geometry: Coordinates,
    forces: Vec<f32>,
    features: Vec<f32>,
    species: usize,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.geometry.batch()
    }

    pub fn atoms(&self) -> usize {
        self.geometry.points()
    }

    pub const fn species(&self) -> usize {
        self.species
    }

    pub fn geometry(&self) -> &Coordinates {
        &self.geometry
    }

    pub fn forces<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        Tensor::from_data(
            TensorData::new(self.forces.clone(), [self.size(), self.atoms(), 3]),
            device,
        )
    }

    /// Per-atom features repeated for every frame, `[batch, atoms, species]`.
    pub fn features<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        Tensor::<B, 2>::from_data(
            TensorData::new(self.features.clone(), [self.atoms(), self.species]),
            device,
        )
        .unsqueeze_dim::<3>(0)
        .repeat_dim(0, self.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn toy(frames: usize) -> Dataset {
        let atoms = 2;
        let geometries = (0..frames * atoms * 3).map(|i| i as f32).collect();
        let forces = (0..frames * atoms * 3).map(|i| -(i as f32)).collect();
        Dataset::new(frames, atoms, 2, geometries, forces, vec![1.0, 0.0, 0.0, 1.0]).unwrap()
    }

    #[test]
    fn test_bytes_round_trip() {
        let data = toy(3);
        assert_eq!(Dataset::from_bytes(&data.to_bytes().unwrap()).unwrap(), data);
    }

    #[test]
    fn test_incomplete_batch_is_dropped() {
        let batches = toy(5).batches(2).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].geometry().point(0, 0), [12.0, 13.0, 14.0]);

        let features = batches[0].features::<B>(&Default::default());
        assert_eq!(features.dims(), [2, 2, 2]);
        let forces = batches[1].forces::<B>(&Default::default()).into_data().to_vec::<f32>().unwrap();
        assert_eq!(forces[0], -12.0);

        assert!(matches!(toy(1).batches(2), Err(CgError::Dataset(_))));
    }

    #[test]
    fn test_missing_and_malformed_tensors() {
        let geo = vec![0.0f32; 6];
        let bytes = write_f32(&[
            (GEOMETRIES_KEY, vec![1, 2, 3], geo.as_slice()),
            (FEATURES_KEY, vec![2, 1], &[1.0f32, 1.0][..]),
        ])
        .unwrap();
        let err = Dataset::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("missing 'forces'"));

        let bytes = write_f32(&[
            (GEOMETRIES_KEY, vec![1, 2, 3], geo.as_slice()),
            (FORCES_KEY, vec![1, 2, 3], geo.as_slice()),
            (FEATURES_KEY, vec![3, 1], &[1.0f32, 1.0, 1.0][..]),
        ])
        .unwrap();
        assert!(matches!(Dataset::from_bytes(&bytes), Err(CgError::Dataset(_))));
    }
}
