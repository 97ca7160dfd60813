//! Single-example overfit run.
//!
//! Trains only the equivariant decoder on one fixed structure with nearest
//! assignment. With [`FeaturePolicy::Solution`](crate::policy::FeaturePolicy::Solution)
//! the decoder merely has to reproduce its input, so the loss should fall
//! close to zero; anything else points at the decoder, the projection or
//! the assignment.

use std::path::Path;
use std::time::Instant;

use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Tensor, TensorData};

use cgae_assign::nearest_assign;
use cgae_core::{CgError, Coordinates, Result};
use cgae_models::{project, EquivariantDecoder};

use crate::config::TrainingConfig;
use crate::diagnostics::{RunMode, RunRecord, StepRecord, StopLabel, StopReason, Summary, TensorSnapshot};
use crate::loss::{reconstruction_loss, scalar};
use crate::policy::{FeatureContext, ReconstructionLoss};
use crate::progress::{Progress, ProgressReporter};
use crate::trainer::save_decoder;

const BUILTIN_SITES: [[f32; 3]; 3] = [
    [2.163_681_3, 0.413_151_95, 2.737_675_4],
    [-2.299_998_3, 0.752_108_04, 4.802_013_4],
    [0.030_993_08, 4.300_592_4, 3.257_509_5],
];

const BUILTIN_ATOMS: [[f32; 3]; 32] = [
    [2.95687, -0.155487, 2.11914],
    [2.06787, 0.671653, 1.43503],
    [0.850204, 1.00373, 2.03273],
    [0.601561, 0.628464, 3.40416],
    [1.56987, -0.160152, 4.10868],
    [2.7057, -0.572914, 3.4475],
    [-0.660677, 0.987154, 4.01818],
    [-1.5062, -0.0960717, 4.51092],
    [-2.79988, 0.102162, 5.03003],
    [-3.24092, 1.39391, 5.26613],
    [-2.4742, 2.51713, 4.79282],
    [-1.26258, 2.37251, 4.09869],
    [-0.543147, 3.54105, 3.57502],
    [0.705632, 3.706, 4.07958],
    [1.4324, 4.92182, 3.79255],
    [0.943385, 5.85763, 2.93262],
    [-0.394225, 5.73001, 2.50639],
    [-1.12944, 4.62928, 2.87664],
    [3.87787, -0.345135, 1.63161],
    [2.28279, 0.994601, 0.40769],
    [0.0681252, 1.5429, 1.54221],
    [1.31643, -0.405288, 5.13049],
    [3.50865, -0.971784, 4.06418],
    [-1.18795, -1.17369, 4.3918],
    [-3.36382, -0.788193, 5.36065],
    [-4.20054, 1.44102, 5.74857],
    [-2.98015, 3.51865, 4.87225],
    [1.22583, 3.04857, 4.6967],
    [2.46003, 5.08062, 4.05937],
    [1.53019, 6.73809, 2.68288],
    [-0.856573, 6.50135, 1.8472],
    [-2.14819, 4.48423, 2.48099],
];

/// Heavy atoms come first, then hydrogens.
const BUILTIN_HEAVY_ATOMS: usize = 18;

/// One frame: site and atom coordinates plus per-atom features.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleExample {
    sites: Coordinates,
    atoms: Coordinates,
    features: Vec<f32>,
    species: usize,
}

impl SingleExample {
    pub fn new(sites: Coordinates, atoms: Coordinates, features: Vec<f32>, species: usize) -> Result<Self> {
        if sites.batch() != 1 || atoms.batch() != 1 {
            return Err(CgError::InvalidConfig("a single example holds exactly one frame".into()));
        }
        if sites.points() == 0 {
            return Err(CgError::EmptySystem { what: "site" });
        }
        if atoms.points() == 0 {
            return Err(CgError::EmptySystem { what: "atom" });
        }
        if species == 0 || features.len() != atoms.points() * species {
            return Err(CgError::shape("atom features", &[atoms.points(), species], &[features.len()]));
        }
        Ok(Self {
            sites,
            atoms,
            features,
            species,
        })
    }

    /// Ortho-terphenyl fragment: 32 atoms around 3 sites, species one-hot
    /// `[0, 1]` for the 18 carbons and `[1, 0]` for the 14 hydrogens.
    pub fn builtin() -> Self {
        let features = (0..BUILTIN_ATOMS.len())
            .flat_map(|a| if a < BUILTIN_HEAVY_ATOMS { [0.0, 1.0] } else { [1.0, 0.0] })
            .collect();
        Self {
            sites: Coordinates::from_points(&BUILTIN_SITES),
            atoms: Coordinates::from_points(&BUILTIN_ATOMS),
            features,
            species: 2,
        }
    }

    pub fn sites(&self) -> &Coordinates {
        &self.sites
    }

    pub fn atoms(&self) -> &Coordinates {
        &self.atoms
    }

    pub const fn species(&self) -> usize {
        self.species
    }

    fn feature_tensor<B: AutodiffBackend>(&self, device: &B::Device) -> Tensor<B, 3> {
        Tensor::from_data(
            TensorData::new(self.features.clone(), [1, self.atoms.points(), self.species]),
            device,
        )
    }
}

/// Overfit the decoder to `example` for `run.single_steps` steps.
///
/// The configured `sites` count is ignored in favour of the example's. The
/// wall-clock budget is checked after every step; reconstruction error is
/// always the absolute error summed per site.
pub fn run_single<B: AutodiffBackend>(
    config: &TrainingConfig,
    example: &SingleExample,
    decoder_state: Option<&Path>,
    reporter: &ProgressReporter<'_>,
    device: &B::Device,
) -> Result<RunRecord> {
    let mut config = config.clone();
    config.sites = example.sites.points();
    config.validate_single()?;
    let run = &config.run;
    let arch = &config.architecture;
    let sites = example.sites.points();

    let displacements = example.atoms.relative_to(&example.sites)?;
    let nearest = nearest_assign(&example.sites, &example.atoms)?.to_tensor::<B>(device);
    let target = project(
        &displacements,
        nearest.clone(),
        example.feature_tensor::<B>(device),
        arch.max_degree,
    )?;
    let inputs = config.features.build(&FeatureContext {
        batch: 1,
        sites,
        target: &target,
        displacements: &displacements,
        device,
    });

    let input = config.features.input_signature(example.species, sites, arch.max_degree)?;
    let mut decoder = EquivariantDecoder::<B>::new(input, &arch.decoder_config(example.species), device)?;
    let mut optim = AdamConfig::new().init::<B, EquivariantDecoder<B>>();
    let site_tensor = example.sites.to_tensor::<B>(device);

    let mut dynamics = Vec::with_capacity(run.single_steps);
    let mut summaries = Vec::new();
    let mut stop = StopLabel {
        epoch: 0,
        step: 0,
        reason: StopReason::Completed,
    };
    let start = Instant::now();

    reporter.report(Progress::PhaseStart { name: "Single example" });
    reporter.report(Progress::TaskStart {
        total_steps: run.single_steps as u64,
    });

    for step in 0..run.single_steps {
        let prediction = decoder.decode(inputs.clone(), &example.sites)?;
        let loss = reconstruction_loss(ReconstructionLoss::Absolute, target.clone(), prediction.clone(), example.species);
        let value = scalar(&loss);
        let record = StepRecord {
            epoch: 0,
            step,
            batch: 0,
            loss: value,
            loss_reconstruction: value,
            loss_dense: 0.0,
            loss_fm: 0.0,
            temperature: 0.0,
            wall_secs: start.elapsed().as_secs_f64(),
        };
        dynamics.push(record.clone());

        let grads = GradientsParams::from_grads(loss.backward(), &decoder);
        decoder = optim.step(run.learning_rate, decoder, grads);
        stop.step = step;
        reporter.report(Progress::TaskIncrement);

        if step % 100 == 0 {
            log::info!("step {step}: loss={value:.6}");
        }
        if start.elapsed().as_secs_f64() > run.wall_clock_secs {
            log::warn!("wall-clock budget of {}s exhausted at step {step}", run.wall_clock_secs);
            stop.reason = StopReason::WallClock;
            break;
        }
        if step % run.summary_period == 0 {
            summaries.push(Summary {
                step: record,
                sites: TensorSnapshot::of(&site_tensor)?,
                prediction: TensorSnapshot::of(&prediction)?,
                target: TensorSnapshot::of(&target)?,
                nearest: TensorSnapshot::of(&nearest)?,
                soft_assignment: None,
                straight_through: None,
            });
        }
    }

    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);

    let decoder_state = match (run.save_state, decoder_state) {
        (true, Some(path)) => Some(save_decoder(&decoder, path)?),
        _ => None,
    };

    Ok(RunRecord {
        mode: RunMode::Single,
        config,
        dynamics,
        summaries,
        stop,
        decoder_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AssignmentPolicy, FeaturePolicy};
    use burn::backend::{Autodiff, NdArray};

    type B = Autodiff<NdArray<f32>>;

    #[test]
    fn test_builtin_example() {
        let example = SingleExample::builtin();
        assert_eq!(example.sites().points(), 3);
        assert_eq!(example.atoms().points(), 32);
        assert_eq!(example.species(), 2);
        let carbons: f32 = example.features.chunks(2).map(|f| f[1]).sum();
        assert_eq!(carbons, 18.0);
    }

    #[test]
    fn test_rejects_learned_assignment() {
        let config = TrainingConfig::default();
        let err = run_single::<B>(
            &config,
            &SingleExample::builtin(),
            None,
            &ProgressReporter::new(),
            &Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CgError::UnsupportedPolicy(_)));
    }

    #[test]
    fn test_zero_budget_stops_after_first_step() {
        let mut config = TrainingConfig::default();
        config.assignment = AssignmentPolicy::Nearest;
        config.features = FeaturePolicy::NearestAtom { site: 2, degree: 2 };
        config.architecture.hidden_layers = 0;
        config.run.wall_clock_secs = 0.0;
        let record = run_single::<B>(
            &config,
            &SingleExample::builtin(),
            None,
            &ProgressReporter::new(),
            &Default::default(),
        )
        .unwrap();
        assert_eq!(record.dynamics.len(), 1);
        assert!(record.summaries.is_empty());
        assert_eq!(record.stop.reason, StopReason::WallClock);
        assert_eq!(record.stop.step, 0);
    }
}
