//! Dataset training loop.
//!
//! ```text
//! geometry ─► DenseEncoder(τ) ─► sites ──┬─► DenseDecoder ─► loss_dense
//!              │ logits                  │ (frozen)
//!              ▼                         ▼
//!        soft / straight-through   nearest, displacements
//!              └──────── AssignmentPolicy ───────┐
//!                                                ▼
//!          features ─► project ─► target ◄─► prediction ◄─ EquivariantDecoder(inputs, sites)
//!                                        loss_rec        ▲
//!                                                        └─ FeaturePolicy
//! ```
//!
//! Site coordinates reach the decoder, the displacements and the nearest
//! assignment only as frozen values. With [`EncoderMode::Joint`] the logits
//! still receive gradient through the assignment weights of the target and
//! through the auxiliary terms.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::prelude::Module;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use cgae_assign::{gumbel_noise_from_rng, nearest_assign, soft_assign_with_noise, SoftAssignment, TemperatureSchedule};
use cgae_core::{CgError, Frozen, Result};
use cgae_models::{dense_reconstruction_loss, project, DenseCheckpoint, DenseDecoder, DenseEncoder, EquivariantDecoder};

use crate::config::TrainingConfig;
use crate::data::{Batch, Dataset};
use crate::diagnostics::{RunMode, RunRecord, StepRecord, StopLabel, StopReason, Summary, TensorSnapshot};
use crate::loss::{force_matching_loss, reconstruction_loss, scalar};
use crate::policy::{AssignmentPolicy, EncoderMode, FeatureContext};
use crate::progress::{Progress, ProgressReporter};

/// Parameters the optimizer may touch.
///
/// The encoder's parameters are switched off in [`EncoderMode::Frozen`],
/// so the optimizer finds no gradient for them.
#[derive(Module, Debug)]
pub struct CgModel<B: Backend> {
    pub decoder: EquivariantDecoder<B>,
    pub encoder: DenseEncoder<B>,
}

/// Tensors of one step, kept for the loss and for summaries.
struct StepOutput<B: Backend> {
    loss: Tensor<B, 1>,
    record: StepRecord,
    sites: Tensor<B, 3>,
    prediction: Tensor<B, 3>,
    target: Tensor<B, 3>,
    nearest: Tensor<B, 3>,
    assignment: SoftAssignment<B>,
}

impl<B: Backend> StepOutput<B> {
    fn summary(&self) -> Result<Summary> {
        Ok(Summary {
            step: self.record.clone(),
            sites: TensorSnapshot::of(&self.sites)?,
            prediction: TensorSnapshot::of(&self.prediction)?,
            target: TensorSnapshot::of(&self.target)?,
            nearest: TensorSnapshot::of(&self.nearest)?,
            soft_assignment: Some(TensorSnapshot::of(&self.assignment.soft)?),
            straight_through: Some(TensorSnapshot::of(&self.assignment.hard)?),
        })
    }
}

/// Trains the equivariant decoder (and optionally the encoder logits) over a dataset.
pub struct DatasetTrainer<'a, B: AutodiffBackend> {
    config: &'a TrainingConfig,
    model: CgModel<B>,
    dense_decoder: DenseDecoder<B>,
    schedule: TemperatureSchedule,
    species: usize,
    rng: ChaCha8Rng,
    device: B::Device,
}

impl<'a, B: AutodiffBackend> DatasetTrainer<'a, B> {
    /// Build the models for a dataset with `atoms` atoms and `species` channels.
    ///
    /// Fails on an invalid configuration or a checkpoint of the wrong size.
    pub fn new(
        config: &'a TrainingConfig,
        checkpoint: DenseCheckpoint,
        atoms: usize,
        species: usize,
        device: &B::Device,
    ) -> Result<Self> {
        config.validate()?;
        if checkpoint.atoms() != atoms {
            return Err(CgError::Checkpoint(format!(
                "checkpoint covers {} atoms, dataset has {atoms}",
                checkpoint.atoms()
            )));
        }
        if checkpoint.sites() != config.sites {
            return Err(CgError::InvalidConfig(format!(
                "checkpoint has {} sites, configuration asks for {}",
                checkpoint.sites(),
                config.sites
            )));
        }

        let arch = &config.architecture;
        let input = config.features.input_signature(species, config.sites, arch.max_degree)?;
        let decoder = EquivariantDecoder::new(input, &arch.decoder_config(species), device)?;
        let encoder_stack = arch.encoder_stack(species, config.sites)?;
        log::info!(
            "encoder signatures: {}",
            encoder_stack
                .layers()
                .iter()
                .map(|rs| rs.to_string())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        if config.encoder_mode == EncoderMode::Joint
            && !config.assignment.is_differentiable()
            && !config.loss.force_matching
            && config.loss.dense_weight == 0.0
        {
            log::warn!("joint encoder mode with {:?} assignment: no loss term reaches the logits", config.assignment);
        }

        let (encoder, dense_decoder) = checkpoint.into_models::<B>(device);
        let encoder = match config.encoder_mode {
            EncoderMode::Frozen => encoder.no_grad(),
            EncoderMode::Joint => encoder,
        };

        let anneal = &config.anneal;
        let schedule = TemperatureSchedule::build(anneal.epochs, anneal.decay_rate, anneal.t_init, anneal.t_min)?;

        Ok(Self {
            config,
            model: CgModel { decoder, encoder },
            dense_decoder: dense_decoder.no_grad(),
            schedule,
            species,
            rng: ChaCha8Rng::seed_from_u64(config.run.seed),
            device: device.clone(),
        })
    }

    pub fn model(&self) -> &CgModel<B> {
        &self.model
    }

    pub fn into_model(self) -> CgModel<B> {
        self.model
    }

    fn step(&mut self, batch: &Batch, epoch: usize, step: usize, batch_index: usize) -> Result<StepOutput<B>> {
        let config = self.config;
        let device = &self.device;
        let temperature = self.schedule.at_epoch(epoch);
        let (size, atoms, sites) = (batch.size(), batch.atoms(), config.sites);

        let geometry = batch.geometry().to_tensor::<B>(device);
        let noise = gumbel_noise_from_rng::<B, _>(&mut self.rng, [atoms, sites], device);
        let site_xyz = self.model.encoder.encode_with_noise(geometry.clone(), noise, temperature);
        let decoded = self.dense_decoder.decode(site_xyz.clone());
        let loss_dense = dense_reconstruction_loss(decoded, geometry);

        let logits = self.model.encoder.logits();
        let noise = gumbel_noise_from_rng::<B, _>(&mut self.rng, [atoms, sites], device);
        let assignment = soft_assign_with_noise(logits.clone(), noise, temperature);

        let site_coords = Frozen::<B, 3>::detach(&site_xyz).coordinates()?;
        let displacements = batch.geometry().relative_to(&site_coords)?;
        let nearest = nearest_assign(&site_coords, batch.geometry())?.to_tensor::<B>(device);

        let weights = match config.assignment {
            AssignmentPolicy::Nearest => nearest.clone(),
            AssignmentPolicy::StraightThrough => assignment.hard.clone().unsqueeze_dim::<3>(0).repeat_dim(0, size),
            AssignmentPolicy::Soft => assignment.soft.clone().unsqueeze_dim::<3>(0).repeat_dim(0, size),
        };
        let target = project(
            &displacements,
            weights,
            batch.features::<B>(device),
            config.architecture.max_degree,
        )?;

        let inputs = config.features.build(&FeatureContext {
            batch: size,
            sites,
            target: &target,
            displacements: &displacements,
            device,
        });
        let prediction = self.model.decoder.decode(inputs, &site_coords)?;
        let loss_rec = reconstruction_loss(config.loss.reconstruction, target.clone(), prediction.clone(), self.species);

        let loss_fm = if config.loss.force_matching && epoch >= config.loss.fm_epoch {
            let noise = gumbel_noise_from_rng::<B, _>(&mut self.rng, [atoms, sites], device);
            let force_assignment = soft_assign_with_noise(logits, noise, temperature * config.loss.force_temp_coeff);
            Some(force_matching_loss(force_assignment.soft, batch.forces::<B>(device)))
        } else {
            None
        };

        let mut loss = loss_rec.clone();
        if config.loss.dense_weight != 0.0 {
            loss = loss + loss_dense.clone().mul_scalar(config.loss.dense_weight);
        }
        if let Some(fm) = &loss_fm {
            loss = loss + fm.clone().mul_scalar(config.loss.fm_coeff);
        }

        let record = StepRecord {
            epoch,
            step,
            batch: batch_index,
            loss: scalar(&loss),
            loss_reconstruction: scalar(&loss_rec),
            loss_dense: scalar(&loss_dense),
            loss_fm: loss_fm.as_ref().map_or(0.0, scalar),
            temperature,
            wall_secs: 0.0,
        };
        Ok(StepOutput {
            loss,
            record,
            sites: site_xyz,
            prediction,
            target,
            nearest,
            assignment,
        })
    }

    /// Run every epoch of the schedule, or until the wall-clock budget runs out.
    ///
    /// # Arguments
    /// * `dataset` - Frames to train on; must match the checkpoint's atom count
    /// * `decoder_state` - Where to save decoder parameters when `run.save_state` is set
    /// * `reporter` - Progress sink
    ///
    /// # Returns
    /// The run record, labelled with the epoch and step at which the loop stopped.
    pub fn train(
        &mut self,
        dataset: &Dataset,
        decoder_state: Option<&Path>,
        reporter: &ProgressReporter<'_>,
    ) -> Result<RunRecord> {
        let config = self.config;
        let run = &config.run;
        if dataset.species() != self.species {
            return Err(CgError::Dataset(format!(
                "dataset has {} feature channels, trainer was built for {}",
                dataset.species(),
                self.species
            )));
        }
        let batches = dataset.batches(run.batch_size)?;
        let mut optim = AdamConfig::new().init::<B, CgModel<B>>();

        let mut dynamics = Vec::new();
        let mut summaries = Vec::new();
        let mut stop = StopLabel {
            epoch: 0,
            step: 0,
            reason: StopReason::Completed,
        };
        let start = Instant::now();

        reporter.report(Progress::PhaseStart { name: "Training" });
        reporter.report(Progress::TaskStart {
            total_steps: (self.schedule.len() * batches.len()) as u64,
        });

        for epoch in 0..self.schedule.len() {
            let order = run.batch_order.epoch_order(batches.len(), &mut self.rng);
            let mut last = None;
            for (step, &index) in order.iter().enumerate() {
                let mut output = self.step(&batches[index], epoch, step, index)?;
                output.record.wall_secs = start.elapsed().as_secs_f64();
                log::debug!(
                    "epoch {epoch} step {step}: loss={:.6} rec={:.6} dense={:.6} fm={:.6}",
                    output.record.loss,
                    output.record.loss_reconstruction,
                    output.record.loss_dense,
                    output.record.loss_fm
                );
                dynamics.push(output.record.clone());

                let grads = GradientsParams::from_grads(output.loss.backward(), &self.model);
                self.model = optim.step(run.learning_rate, self.model.clone(), grads);

                stop.epoch = epoch;
                stop.step = step;
                reporter.report(Progress::TaskIncrement);
                last = Some(output);
            }

            let Some(last) = last else { continue };
            log::info!(
                "epoch {epoch}: τ={:.4} loss={:.6}",
                last.record.temperature,
                last.record.loss
            );
            reporter.report(Progress::Message(format!(
                "epoch {epoch}: loss={:.6}",
                last.record.loss
            )));

            if start.elapsed().as_secs_f64() > run.wall_clock_secs {
                log::warn!("wall-clock budget of {}s exhausted after epoch {epoch}", run.wall_clock_secs);
                stop.reason = StopReason::WallClock;
                break;
            }
            if epoch % run.summary_period == 0 {
                summaries.push(last.summary()?);
            }
        }

        reporter.report(Progress::TaskFinish);
        reporter.report(Progress::PhaseFinish);

        let decoder_state = match (run.save_state, decoder_state) {
            (true, Some(path)) => Some(save_decoder(&self.model.decoder, path)?),
            _ => None,
        };

        Ok(RunRecord {
            mode: RunMode::Dataset,
            config: config.clone(),
            dynamics,
            summaries,
            stop,
            decoder_state,
        })
    }
}

/// Save decoder parameters with the full-precision binary recorder.
///
/// Returns the written path (the recorder adds the `bin` extension).
pub fn save_decoder<B: Backend>(decoder: &EquivariantDecoder<B>, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    decoder
        .clone()
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| CgError::Record(e.to_string()))?;
    Ok(path.with_extension("bin"))
}

/// Load a [`DenseCheckpoint`] and a [`Dataset`], then train.
pub fn train_from_files<B: AutodiffBackend>(
    config: &TrainingConfig,
    checkpoint: &Path,
    dataset: &Path,
    decoder_state: Option<&Path>,
    reporter: &ProgressReporter<'_>,
    device: &B::Device,
) -> Result<RunRecord> {
    let checkpoint = DenseCheckpoint::load(checkpoint)?;
    let dataset = Dataset::load(dataset)?;
    log::info!(
        "dataset: {} frames, {} atoms, {} species",
        dataset.frames(),
        dataset.atoms(),
        dataset.species()
    );
    let mut trainer = DatasetTrainer::<B>::new(config, checkpoint, dataset.atoms(), dataset.species(), device)?;
    trainer.train(&dataset, decoder_state, reporter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FeaturePolicy;
    use burn::backend::{Autodiff, NdArray};

    type B = Autodiff<NdArray<f32>>;

    fn small_config() -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.sites = 2;
        config.architecture.hidden_multiplicities = vec![2, 1];
        config.architecture.hidden_layers = 0;
        config.architecture.max_degree = 1;
        config.architecture.radial.hidden = 4;
        config.architecture.radial.layers = 1;
        config.anneal.epochs = 2;
        config.run.batch_size = 1;
        config
    }

    fn checkpoint(atoms: usize, sites: usize) -> DenseCheckpoint {
        let encoder = (0..atoms * sites).map(|i| if i % sites == (i / sites) % sites { 3.0 } else { 0.0 }).collect();
        DenseCheckpoint::new(atoms, sites, encoder, vec![0.5; atoms * sites]).unwrap()
    }

    #[test]
    fn test_checkpoint_size_is_checked() {
        let config = small_config();
        let device = Default::default();
        assert!(matches!(
            DatasetTrainer::<B>::new(&config, checkpoint(3, 2), 4, 1, &device),
            Err(CgError::Checkpoint(_))
        ));
        assert!(matches!(
            DatasetTrainer::<B>::new(&config, checkpoint(4, 3), 4, 1, &device),
            Err(CgError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_frozen_encoder_is_not_stepped() {
        let mut config = small_config();
        config.assignment = AssignmentPolicy::Soft;
        config.features = FeaturePolicy::SiteIdentity;
        config.loss.dense_weight = 1.0;
        let device = Default::default();
        let dataset = Dataset::new(
            2,
            4,
            1,
            (0..24).map(|i| (i % 7) as f32 * 0.3).collect(),
            vec![0.0; 24],
            vec![1.0; 4],
        )
        .unwrap();

        let mut trainer = DatasetTrainer::<B>::new(&config, checkpoint(4, 2), 4, 1, &device).unwrap();
        let before = trainer.model().encoder.logits().into_data().to_vec::<f32>().unwrap();
        let record = trainer.train(&dataset, None, &ProgressReporter::new()).unwrap();
        let after = trainer.model().encoder.logits().into_data().to_vec::<f32>().unwrap();

        assert_eq!(before, after);
        assert_eq!(record.dynamics.len(), 4);
        assert_eq!(record.stop.reason, StopReason::Completed);
        assert!(record.dynamics.iter().all(|s| s.loss_fm == 0.0 && s.loss.is_finite()));
    }

    #[test]
    fn test_joint_encoder_moves_logits() {
        let mut config = small_config();
        config.assignment = AssignmentPolicy::Soft;
        config.encoder_mode = EncoderMode::Joint;
        config.loss.force_matching = true;
        let device = Default::default();
        let dataset = Dataset::new(
            1,
            4,
            1,
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.5, 0.5, 1.5],
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0],
            vec![1.0; 4],
        )
        .unwrap();

        let mut trainer = DatasetTrainer::<B>::new(&config, checkpoint(4, 2), 4, 1, &device).unwrap();
        let before = trainer.model().encoder.logits().into_data().to_vec::<f32>().unwrap();
        let record = trainer.train(&dataset, None, &ProgressReporter::new()).unwrap();
        let after = trainer.model().encoder.logits().into_data().to_vec::<f32>().unwrap();

        assert_ne!(before, after);
        assert!(record.dynamics.iter().all(|s| s.loss_fm > 0.0));
    }
}
