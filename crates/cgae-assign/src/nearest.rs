//! Geometry-only nearest-site assignment.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use cgae_core::{CgError, Coordinates, Result};

/// Hard partition of atoms into sites, one site index per atom per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardAssignment {
    batch: usize,
    atoms: usize,
    sites: usize,
    indices: Vec<usize>,
}

impl HardAssignment {
    pub const fn batch(&self) -> usize {
        self.batch
    }

    pub const fn atoms(&self) -> usize {
        self.atoms
    }

    pub const fn sites(&self) -> usize {
        self.sites
    }

    pub fn site_of(&self, frame: usize, atom: usize) -> usize {
        self.indices[frame * self.atoms + atom]
    }

    /// Atoms assigned to `site` in `frame`.
    pub fn members(&self, frame: usize, site: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.atoms).filter(move |&a| self.site_of(frame, a) == site)
    }

    /// One-hot weights `[batch, atoms, sites]` as a constant tensor.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        let mut values = vec![0.0f32; self.batch * self.atoms * self.sites];
        for (row, &site) in self.indices.iter().enumerate() {
            values[row * self.sites + site] = 1.0;
        }
        Tensor::from_data(
            TensorData::new(values, [self.batch, self.atoms, self.sites]),
            device,
        )
    }
}

/// Assign every atom to its closest site (Euclidean, lowest site index on ties).
///
/// Both inputs are frozen values, so no gradient can reach the coordinates.
pub fn nearest_assign(sites: &Coordinates, atoms: &Coordinates) -> Result<HardAssignment> {
    if sites.points() == 0 {
        return Err(CgError::EmptySystem { what: "site" });
    }
    if atoms.points() == 0 {
        return Err(CgError::EmptySystem { what: "atom" });
    }
    if sites.batch() != atoms.batch() {
        return Err(CgError::shape(
            "site coordinates",
            &[atoms.batch(), sites.points(), 3],
            &[sites.batch(), sites.points(), 3],
        ));
    }

    let displacements = atoms.relative_to(sites)?;
    let mut indices = Vec::with_capacity(atoms.batch() * atoms.points());
    for frame in 0..atoms.batch() {
        for atom in 0..atoms.points() {
            let mut best = 0;
            let mut best_sq = f32::INFINITY;
            for site in 0..sites.points() {
                let d = displacements.vector(frame, atom, site);
                let sq = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
                if sq < best_sq {
                    best_sq = sq;
                    best = site;
                }
            }
            indices.push(best);
        }
    }

    Ok(HardAssignment {
        batch: atoms.batch(),
        atoms: atoms.points(),
        sites: sites.points(),
        indices,
    })
}
