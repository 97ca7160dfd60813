//! Training configuration.
//!
//! One [`TrainingConfig`] is built per run (defaults, then TOML, then CLI
//! overrides), validated once, and passed by reference to every component.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cgae_core::{CgError, Result, SignatureStack};
use cgae_equivariant::{Activation, RadialConfig, StackConfig};
use cgae_models::DecoderConfig;

use crate::policy::{AssignmentPolicy, BatchOrder, EncoderMode, FeaturePolicy, ReconstructionLoss};

/// Layer signatures and nonlinearities of the equivariant networks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureConfig {
    /// Hidden multiplicity per degree, index = degree.
    pub hidden_multiplicities: Vec<usize>,
    /// Hidden signatures of the decoder.
    pub hidden_layers: usize,
    /// Largest harmonic degree of the projected target.
    pub max_degree: usize,
    pub scalar_activation: Activation,
    pub gate_activation: Activation,
    /// Hidden signatures of the encoder.
    pub encoder_layers: usize,
    /// Give encoder hidden layers every degree, not only scalars.
    pub high_degree_encoder: bool,
    pub radial: RadialConfig,
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        Self {
            hidden_multiplicities: vec![8, 4, 2],
            hidden_layers: 1,
            max_degree: 2,
            scalar_activation: Activation::Relu,
            gate_activation: Activation::Sigmoid,
            encoder_layers: 1,
            high_degree_encoder: false,
            radial: RadialConfig::default(),
        }
    }
}

impl ArchitectureConfig {
    pub fn decoder_config(&self, channels: usize) -> DecoderConfig {
        DecoderConfig {
            hidden_multiplicities: self.hidden_multiplicities.clone(),
            hidden_layers: self.hidden_layers,
            channels,
            max_degree: self.max_degree,
            stack: StackConfig {
                radial: self.radial.clone(),
                scalar_activation: self.scalar_activation,
                gate_activation: self.gate_activation,
            },
        }
    }

    pub fn encoder_stack(&self, species: usize, sites: usize) -> Result<SignatureStack> {
        SignatureStack::encoder(
            species,
            &self.hidden_multiplicities,
            self.encoder_layers,
            sites,
            self.high_degree_encoder,
        )
    }
}

/// Temperature annealing of the relaxed assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealConfig {
    pub epochs: usize,
    pub decay_rate: f32,
    pub t_init: f32,
    pub t_min: f32,
}

impl Default for AnnealConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            decay_rate: 0.1,
            t_init: 4.0,
            t_min: 0.1,
        }
    }
}

/// Loss terms and their weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub reconstruction: ReconstructionLoss,
    /// Weight of the dense autoencoder term; zero records it without optimizing it.
    pub dense_weight: f32,
    pub force_matching: bool,
    /// First epoch with force matching.
    pub fm_epoch: usize,
    pub fm_coeff: f32,
    /// Factor on τ for the force-matching assignment.
    pub force_temp_coeff: f32,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            reconstruction: ReconstructionLoss::Squared,
            dense_weight: 0.0,
            force_matching: false,
            fm_epoch: 0,
            fm_coeff: 1.0,
            force_temp_coeff: 1.0,
        }
    }
}

/// Optimizer, batching and run bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub batch_order: BatchOrder,
    /// Budget checked after every epoch (every step in single-example mode).
    pub wall_clock_secs: f64,
    pub seed: u64,
    /// Append a rich summary every this many epochs (steps in single-example mode).
    pub summary_period: usize,
    pub save_state: bool,
    /// Optimizer steps of the single-example run.
    pub single_steps: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            learning_rate: 5e-3,
            batch_size: 32,
            batch_order: BatchOrder::Sequential,
            wall_clock_secs: 3600.0,
            seed: 42,
            summary_period: 1,
            save_state: false,
            single_steps: 1000,
        }
    }
}

/// Complete configuration of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of coarse-grained sites.
    pub sites: usize,
    pub assignment: AssignmentPolicy,
    pub encoder_mode: EncoderMode,
    pub features: FeaturePolicy,
    pub architecture: ArchitectureConfig,
    pub anneal: AnnealConfig,
    pub loss: LossConfig,
    pub run: RunConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            sites: 3,
            assignment: AssignmentPolicy::StraightThrough,
            encoder_mode: EncoderMode::Frozen,
            features: FeaturePolicy::Ones,
            architecture: ArchitectureConfig::default(),
            anneal: AnnealConfig::default(),
            loss: LossConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Defaults for the single-example overfit: nearest assignment with the
    /// projected target as decoder input.
    pub fn single_example() -> Self {
        Self {
            assignment: AssignmentPolicy::Nearest,
            features: FeaturePolicy::Solution,
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CgError::InvalidConfig(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CgError::Serialization(e.to_string()))
    }

    /// Checks shared by both run modes.
    pub fn validate(&self) -> Result<()> {
        if self.sites == 0 {
            return Err(CgError::EmptySystem { what: "site" });
        }
        let arch = &self.architecture;
        if arch.hidden_multiplicities.is_empty() || arch.hidden_multiplicities.iter().all(|&m| m == 0) {
            return Err(CgError::InvalidSignature(
                "hidden multiplicities must contain a non-zero entry".into(),
            ));
        }
        if arch.radial.basis == 0 || arch.radial.hidden == 0 || arch.radial.max_radius <= 0.0 {
            return Err(CgError::InvalidConfig(
                "radial model needs a positive radius, basis size and hidden width".into(),
            ));
        }
        self.features.validate(self.sites)?;

        let anneal = &self.anneal;
        if anneal.epochs == 0 {
            return Err(CgError::InvalidConfig("epochs must be at least 1".into()));
        }
        if !(anneal.t_min > 0.0 && anneal.t_init >= anneal.t_min && anneal.decay_rate >= 0.0) {
            return Err(CgError::InvalidConfig(format!(
                "temperature schedule needs 0 < t_min <= t_init and decay_rate >= 0 (got t_init={}, t_min={}, decay_rate={})",
                anneal.t_init, anneal.t_min, anneal.decay_rate
            )));
        }
        if self.loss.force_matching && self.loss.force_temp_coeff <= 0.0 {
            return Err(CgError::InvalidConfig("force_temp_coeff must be positive".into()));
        }

        let run = &self.run;
        if run.batch_size == 0 {
            return Err(CgError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if !(run.learning_rate > 0.0) {
            return Err(CgError::InvalidConfig("learning_rate must be positive".into()));
        }
        if run.summary_period == 0 {
            return Err(CgError::InvalidConfig("summary_period must be at least 1".into()));
        }
        Ok(())
    }

    /// Checks of the single-example run, on top of [`validate`](Self::validate).
    ///
    /// The built-in structure has no learned logits or forces, so only
    /// nearest assignment applies.
    pub fn validate_single(&self) -> Result<()> {
        self.validate()?;
        if self.assignment != AssignmentPolicy::Nearest {
            return Err(CgError::UnsupportedPolicy(format!(
                "single-example mode only supports nearest assignment, got {:?}",
                self.assignment
            )));
        }
        if self.features == FeaturePolicy::SiteIdentity {
            return Err(CgError::UnsupportedPolicy(
                "single-example mode takes solution, nearest-atom or ones features".into(),
            ));
        }
        if self.encoder_mode == EncoderMode::Joint {
            return Err(CgError::UnsupportedPolicy(
                "single-example mode has no encoder to train jointly".into(),
            ));
        }
        if self.loss.force_matching {
            return Err(CgError::UnsupportedPolicy(
                "single-example mode has no reference forces".into(),
            ));
        }
        if self.run.single_steps == 0 {
            return Err(CgError::InvalidConfig("single_steps must be at least 1".into()));
        }
        Ok(())
    }
}
