//! Closed policy choices of a training run.
//!
//! Every policy is dispatched at exactly one place in the trainer. Variants
//! that do not apply to a run mode are rejected by config validation.

use std::fmt;
use std::str::FromStr;

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use cgae_core::{CgError, Displacements, Result, Signature};
use cgae_equivariant::spherical_harmonics_f32;

/// Which assignment feeds the spherical projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentPolicy {
    /// Geometry-only closest site; no gradient reaches the logits.
    Nearest,
    /// One-hot argmax with the soft gradient.
    StraightThrough,
    /// Relaxed categorical weights.
    Soft,
}

impl AssignmentPolicy {
    /// Whether the target tensor depends differentiably on the logits.
    pub const fn is_differentiable(&self) -> bool {
        !matches!(self, Self::Nearest)
    }
}

/// How the decoder's per-site input features are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum FeaturePolicy {
    /// One-hot site identity, `[batch, sites, sites]`.
    SiteIdentity,
    /// A single constant scalar per site.
    #[default]
    Ones,
    /// The projected target itself (ablation: the decoder only has to copy it).
    Solution,
    /// Degree-`degree` harmonics of the displacement from `site` to its nearest
    /// atom, zero at every other site, after a constant scalar channel.
    NearestAtom { site: usize, degree: usize },
}

/// Inputs a feature policy may draw on.
pub struct FeatureContext<'a, B: Backend> {
    pub batch: usize,
    pub sites: usize,
    /// Projected target `[batch, sites, channels·K]`.
    pub target: &'a Tensor<B, 3>,
    /// Frozen atom − site displacements.
    pub displacements: &'a Displacements,
    pub device: &'a B::Device,
}

impl FeaturePolicy {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SiteIdentity => "site-identity",
            Self::Ones => "ones",
            Self::Solution => "solution",
            Self::NearestAtom { .. } => "nearest-atom",
        }
    }

    /// Decoder input signature under this policy.
    pub fn input_signature(&self, channels: usize, sites: usize, max_degree: usize) -> Result<Signature> {
        match *self {
            Self::SiteIdentity => Signature::scalars(sites),
            Self::Ones => Signature::scalars(1),
            Self::Solution => Signature::spherical_channels(channels, max_degree),
            Self::NearestAtom { degree, .. } => Signature::new([(1, 0), (1, degree)]),
        }
    }

    pub fn validate(&self, sites: usize) -> Result<()> {
        match *self {
            Self::NearestAtom { site, .. } if site >= sites => Err(CgError::UnsupportedPolicy(format!(
                "nearest-atom feature uses site {site}, but there are only {sites} sites"
            ))),
            Self::NearestAtom { degree: 0, .. } => Err(CgError::UnsupportedPolicy(
                "nearest-atom feature needs a degree of at least 1".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Per-site decoder input features, `[batch, sites, width]`.
    pub fn build<B: Backend>(&self, ctx: &FeatureContext<'_, B>) -> Tensor<B, 3> {
        let (batch, sites) = (ctx.batch, ctx.sites);
        match *self {
            Self::SiteIdentity => {
                let mut values = vec![0.0f32; batch * sites * sites];
                for b in 0..batch {
                    for s in 0..sites {
                        values[(b * sites + s) * sites + s] = 1.0;
                    }
                }
                Tensor::from_data(TensorData::new(values, [batch, sites, sites]), ctx.device)
            }
            Self::Ones => Tensor::ones([batch, sites, 1], ctx.device),
            Self::Solution => ctx.target.clone(),
            Self::NearestAtom { site, degree } => {
                let order = 2 * degree + 1;
                let width = 1 + order;
                let offset = degree * degree;
                let mut values = vec![0.0f32; batch * sites * width];
                for b in 0..batch {
                    for s in 0..sites {
                        values[(b * sites + s) * width] = 1.0;
                    }
                    let atom = ctx.displacements.nearest_atom(b, site);
                    let y = spherical_harmonics_f32(degree, ctx.displacements.vector(b, atom, site));
                    let start = (b * sites + site) * width + 1;
                    values[start..start + order].copy_from_slice(&y[offset..offset + order]);
                }
                Tensor::from_data(TensorData::new(values, [batch, sites, width]), ctx.device)
            }
        }
    }
}

impl fmt::Display for FeaturePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NearestAtom { site, degree } => write!(f, "nearest-atom:{site}:{degree}"),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for FeaturePolicy {
    type Err = CgError;

    /// `site-identity | ones | solution | nearest-atom[:SITE[:DEGREE]]`
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        let kind = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let mut number = |default: usize| -> Result<usize> {
            parts.next().map_or(Ok(default), |p| {
                p.trim()
                    .parse()
                    .map_err(|_| CgError::UnsupportedPolicy(format!("bad number '{p}' in '{s}'")))
            })
        };
        let policy = match kind.as_str() {
            "site-identity" => Self::SiteIdentity,
            "ones" => Self::Ones,
            "solution" => Self::Solution,
            "nearest-atom" => {
                let site = number(2)?;
                let degree = number(2)?;
                Self::NearestAtom { site, degree }
            }
            _ => return Err(CgError::UnsupportedPolicy(format!("unknown feature policy '{s}'"))),
        };
        if parts.next().is_some() {
            return Err(CgError::UnsupportedPolicy(format!("trailing fields in '{s}'")));
        }
        Ok(policy)
    }
}

/// Which parameters of the dense encoder the optimizer updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EncoderMode {
    /// Pretrained encoder and decoder are never stepped.
    #[default]
    Frozen,
    /// The encoder logits are optimized together with the equivariant decoder.
    Joint,
}

/// Per-site reconstruction error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReconstructionLoss {
    /// Squared error summed over coefficients, divided by the channel count.
    #[default]
    Squared,
    /// Absolute error summed over coefficients.
    Absolute,
}

/// Visiting order of batches within an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BatchOrder {
    #[default]
    Sequential,
    /// A fresh permutation every epoch.
    Shuffled,
    /// Batch 0 every step (overfitting check).
    FirstOnly,
}

impl BatchOrder {
    pub fn epoch_order<R: Rng>(&self, num_batches: usize, rng: &mut R) -> Vec<usize> {
        match self {
            Self::Sequential => (0..num_batches).collect(),
            Self::Shuffled => {
                let mut order: Vec<usize> = (0..num_batches).collect();
                order.shuffle(rng);
                order
            }
            Self::FirstOnly => vec![0; num_batches],
        }
    }
}
