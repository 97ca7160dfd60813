//! Tensors cut off from the autodiff graph.
//!
//! A [`Frozen`] holds its value on the inner (non-autodiff) backend, so it
//! cannot be passed where a tracked tensor is expected. Freezing is explicit
//! ([`Frozen::detach`]); the only way back is [`Frozen::constant`], which
//! yields a leaf that never requires a gradient.

use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;

use crate::error::Result;
use crate::geometry::Coordinates;

#[derive(Debug, Clone)]
pub struct Frozen<B: AutodiffBackend, const D: usize> {
    value: Tensor<B::InnerBackend, D>,
}

impl<B: AutodiffBackend, const D: usize> Frozen<B, D> {
    /// Copy of `tensor`'s value without its graph.
    pub fn detach(tensor: &Tensor<B, D>) -> Self {
        Self {
            value: tensor.clone().inner(),
        }
    }

    pub fn value(&self) -> &Tensor<B::InnerBackend, D> {
        &self.value
    }

    pub fn into_value(self) -> Tensor<B::InnerBackend, D> {
        self.value
    }

    pub fn dims(&self) -> [usize; D] {
        self.value.dims()
    }

    /// The value as a constant of the tracked backend.
    pub fn constant(&self) -> Tensor<B, D> {
        Tensor::from_inner(self.value.clone())
    }
}

impl<B: AutodiffBackend> Frozen<B, 3> {
    /// Read `[batch, points, 3]` coordinates.
    pub fn coordinates(&self) -> Result<Coordinates> {
        Coordinates::from_tensor(&self.value)
    }
}
