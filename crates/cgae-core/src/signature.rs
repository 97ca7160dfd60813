//! Representation signatures.
//!
//! A signature (often written `Rs`) is an ordered list of `(multiplicity, degree)`
//! pairs. A feature vector with signature `[(2, 0), (1, 1)]` holds two scalars
//! followed by one vector, `2·1 + 1·3 = 5` numbers in total. Within a block of
//! multiplicity `mul` and degree `l`, the layout is `[mul, 2l+1]` (copy-major).
//!
//! # Building layer stacks
//!
//! ```text
//! decoder:  Rs[0] = input features (policy dependent)
//!           Rs[1..L-1] = hidden signature, repeated
//!           Rs[L] = [(1,0), (1,1), …, (1,lmax)] × species
//!
//! encoder:  Rs[0] = [(species, 0)]
//!           Rs[1..L-1] = hidden signature (scalars only unless high-l)
//!           Rs[L] = [(sites, 0)]
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CgError, Result};

/// One block of a signature: `mul` copies of a degree-`degree` tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Irrep {
    pub mul: usize,
    pub degree: usize,
}

impl Irrep {
    /// Width of a single copy, `2l + 1`.
    pub const fn order(&self) -> usize {
        2 * self.degree + 1
    }

    /// Width of the whole block, `mul · (2l + 1)`.
    pub const fn dim(&self) -> usize {
        self.mul * self.order()
    }
}

/// An immutable representation signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    irreps: Vec<Irrep>,
}

impl Signature {
    /// Build from `(multiplicity, degree)` pairs.
    ///
    /// Rejects empty signatures and zero multiplicities.
    pub fn new(pairs: impl IntoIterator<Item = (usize, usize)>) -> Result<Self> {
        let irreps: Vec<Irrep> = pairs
            .into_iter()
            .map(|(mul, degree)| Irrep { mul, degree })
            .collect();
        if irreps.is_empty() {
            return Err(CgError::InvalidSignature("signature is empty".into()));
        }
        if let Some(bad) = irreps.iter().find(|ir| ir.mul == 0) {
            return Err(CgError::InvalidSignature(format!(
                "multiplicity of degree {} must be positive",
                bad.degree
            )));
        }
        Ok(Self { irreps })
    }

    /// `mul` scalars.
    pub fn scalars(mul: usize) -> Result<Self> {
        Self::new([(mul, 0)])
    }

    /// One block per degree, `multiplicities[l]` copies of degree `l`.
    pub fn from_multiplicities(multiplicities: &[usize]) -> Result<Self> {
        Self::new(multiplicities.iter().copied().zip(0..))
    }

    /// Per-channel spherical tensor: `[(1,0), (1,1), …, (1,max_degree)]`
    /// repeated once per channel.
    pub fn spherical_channels(channels: usize, max_degree: usize) -> Result<Self> {
        if channels == 0 {
            return Err(CgError::InvalidSignature(
                "spherical tensor needs at least one channel".into(),
            ));
        }
        Self::new((0..channels).flat_map(|_| (0..=max_degree).map(|l| (1, l))))
    }

    pub fn irreps(&self) -> &[Irrep] {
        &self.irreps
    }

    /// Total feature width, `Σ mul · (2l + 1)`.
    pub fn dim(&self) -> usize {
        self.irreps.iter().map(Irrep::dim).sum()
    }

    pub fn max_degree(&self) -> usize {
        self.irreps.iter().map(|ir| ir.degree).max().unwrap_or(0)
    }

    /// Start offset of each block in the flat feature vector.
    pub fn offsets(&self) -> Vec<usize> {
        self.irreps
            .iter()
            .scan(0, |acc, ir| {
                let start = *acc;
                *acc += ir.dim();
                Some(start)
            })
            .collect()
    }

    /// Total multiplicity of degree-0 blocks.
    pub fn num_scalars(&self) -> usize {
        self.irreps
            .iter()
            .filter(|ir| ir.degree == 0)
            .map(|ir| ir.mul)
            .sum()
    }

    /// Total multiplicity of blocks with degree > 0.
    pub fn num_nonscalars(&self) -> usize {
        self.irreps
            .iter()
            .filter(|ir| ir.degree > 0)
            .map(|ir| ir.mul)
            .sum()
    }

    /// Non-scalar blocks in order.
    pub fn nonscalars(&self) -> impl Iterator<Item = Irrep> + '_ {
        self.irreps.iter().copied().filter(|ir| ir.degree > 0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, ir) in self.irreps.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "({}, {})", ir.mul, ir.degree)?;
        }
        write!(f, "]")
    }
}

/// Ordered signatures of a layer stack, `Rs[0..=L]`.
///
/// Signatures are shared (`Arc`) between the architecture description and
/// the modules built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStack {
    layers: Vec<Arc<Signature>>,
}

impl SignatureStack {
    /// `input`, then `hidden` repeated `hidden_layers` times, then `output`.
    pub fn new(
        input: Signature,
        hidden: &Signature,
        hidden_layers: usize,
        output: Signature,
    ) -> Self {
        let hidden = Arc::new(hidden.clone());
        let mut layers = Vec::with_capacity(hidden_layers + 2);
        layers.push(Arc::new(input));
        layers.extend(std::iter::repeat_n(hidden, hidden_layers));
        layers.push(Arc::new(output));
        Self { layers }
    }

    /// Decoder stack ending in the per-species spherical target.
    pub fn decoder(
        input: Signature,
        hidden_multiplicities: &[usize],
        hidden_layers: usize,
        species: usize,
        max_degree: usize,
    ) -> Result<Self> {
        let hidden = Signature::from_multiplicities(hidden_multiplicities)?;
        let output = Signature::spherical_channels(species, max_degree)?;
        Ok(Self::new(input, &hidden, hidden_layers, output))
    }

    /// Encoder stack mapping species one-hots to per-atom site logits.
    ///
    /// With `high_degree` unset the hidden layers carry only the scalar
    /// multiplicity `hidden_multiplicities[0]`.
    pub fn encoder(
        species: usize,
        hidden_multiplicities: &[usize],
        hidden_layers: usize,
        sites: usize,
        high_degree: bool,
    ) -> Result<Self> {
        if sites == 0 {
            return Err(CgError::EmptySystem { what: "site" });
        }
        let hidden = if high_degree {
            Signature::from_multiplicities(hidden_multiplicities)?
        } else {
            let scalars = hidden_multiplicities.first().copied().unwrap_or(0);
            Signature::scalars(scalars)?
        };
        Ok(Self::new(
            Signature::scalars(species)?,
            &hidden,
            hidden_layers,
            Signature::scalars(sites)?,
        ))
    }

    pub fn layers(&self) -> &[Arc<Signature>] {
        &self.layers
    }

    pub fn input(&self) -> &Arc<Signature> {
        &self.layers[0]
    }

    pub fn output(&self) -> &Arc<Signature> {
        &self.layers[self.layers.len() - 1]
    }

    /// Number of operators (transitions between consecutive signatures).
    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    /// Consecutive `(in, out)` pairs, one per operator.
    pub fn transitions(&self) -> impl Iterator<Item = (&Arc<Signature>, &Arc<Signature>)> {
        self.layers.iter().zip(self.layers.iter().skip(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dim_counts_every_component() {
        let rs = Signature::new([(2, 0), (1, 1), (3, 2)]).unwrap();
        assert_eq!(rs.dim(), 2 + 3 + 15);
        assert_eq!(rs.offsets(), vec![0, 2, 5]);
        assert_eq!(rs.num_scalars(), 2);
        assert_eq!(rs.num_nonscalars(), 4);
        assert_eq!(rs.max_degree(), 2);
    }

    #[test]
    fn test_zero_multiplicity_rejected() {
        let err = Signature::from_multiplicities(&[4, 0, 2]).unwrap_err();
        assert!(matches!(err, CgError::InvalidSignature(_)));
        assert!(Signature::new(Vec::new()).is_err());
    }

    #[test]
    fn test_spherical_channels_layout() {
        let rs = Signature::spherical_channels(2, 2).unwrap();
        assert_eq!(rs.to_string(), "[(1, 0), (1, 1), (1, 2), (1, 0), (1, 1), (1, 2)]");
        assert_eq!(rs.dim(), 2 * 9);
    }

    #[test]
    fn test_decoder_stack() {
        let stack =
            SignatureStack::decoder(Signature::scalars(3).unwrap(), &[8, 4, 2], 2, 2, 2).unwrap();
        assert_eq!(stack.layers().len(), 4);
        assert_eq!(stack.depth(), 3);
        assert_eq!(stack.input().dim(), 3);
        assert_eq!(stack.layers()[1].dim(), 8 + 12 + 10);
        assert!(Arc::ptr_eq(&stack.layers()[1], &stack.layers()[2]));
        assert_eq!(stack.output().dim(), 18);
        assert_eq!(stack.transitions().count(), 3);
    }

    #[test]
    fn test_encoder_stack_scalar_hidden() {
        let stack = SignatureStack::encoder(2, &[6, 3], 1, 3, false).unwrap();
        assert_eq!(stack.input().to_string(), "[(2, 0)]");
        assert_eq!(stack.layers()[1].to_string(), "[(6, 0)]");
        assert_eq!(stack.output().to_string(), "[(3, 0)]");

        let high = SignatureStack::encoder(2, &[6, 3], 1, 3, true).unwrap();
        assert_eq!(high.layers()[1].to_string(), "[(6, 0), (3, 1)]");

        assert!(SignatureStack::encoder(2, &[6], 1, 0, false).is_err());
    }
}
