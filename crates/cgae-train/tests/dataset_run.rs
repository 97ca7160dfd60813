//! Dataset loop through files on disk.

use burn::backend::{Autodiff, NdArray};
use cgae_core::CgError;
use cgae_models::DenseCheckpoint;
use cgae_train::{
    train_from_files, AssignmentPolicy, BatchOrder, Dataset, FeaturePolicy, ProgressReporter,
    RunRecord, StopReason, TrainingConfig,
};

type B = Autodiff<NdArray<f32>>;

const ATOMS: usize = 6;
const SITES: usize = 2;

fn write_inputs(dir: &std::path::Path, frames: usize) -> (std::path::PathBuf, std::path::PathBuf) {
    let mut geometries = Vec::with_capacity(frames * ATOMS * 3);
    for f in 0..frames {
        let shift = 0.05 * f as f32;
        for a in 0..ATOMS {
            let cluster = if a < ATOMS / 2 { 0.0 } else { 2.5 };
            geometries.extend([cluster + 0.4 * (a % 3) as f32 + shift, 0.3 * (a % 2) as f32, -0.2 * (a % 3) as f32]);
        }
    }
    let forces = (0..frames * ATOMS * 3).map(|i| ((i % 5) as f32 - 2.0) * 0.1).collect();
    let features = (0..ATOMS).flat_map(|a| if a % 2 == 0 { [1.0, 0.0] } else { [0.0, 1.0] }).collect();
    let dataset = Dataset::new(frames, ATOMS, 2, geometries, forces, features).unwrap();
    let data_path = dir.join("frames.safetensors");
    dataset.save(&data_path).unwrap();

    let encoder = (0..ATOMS * SITES)
        .map(|i| {
            let (atom, site) = (i / SITES, i % SITES);
            if (atom < ATOMS / 2) == (site == 0) { 4.0 } else { -4.0 }
        })
        .collect();
    let decoder = (0..SITES * ATOMS)
        .map(|i| if (i % ATOMS < ATOMS / 2) == (i / ATOMS == 0) { 1.0 } else { 0.0 })
        .collect();
    let checkpoint_path = dir.join("dense.safetensors");
    DenseCheckpoint::new(ATOMS, SITES, encoder, decoder)
        .unwrap()
        .save(&checkpoint_path)
        .unwrap();
    (checkpoint_path, data_path)
}

fn small_config() -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.sites = SITES;
    config.architecture.hidden_multiplicities = vec![2, 2, 1];
    config.architecture.radial.hidden = 8;
    config.architecture.radial.layers = 1;
    config.anneal.epochs = 3;
    config.run.batch_size = 2;
    config
}

fn train(config: &TrainingConfig, frames: usize) -> RunRecord {
    let dir = tempfile::tempdir().unwrap();
    let (checkpoint, data) = write_inputs(dir.path(), frames);
    train_from_files::<B>(config, &checkpoint, &data, None, &ProgressReporter::new(), &Default::default())
        .unwrap()
}

#[test]
fn test_every_assignment_policy_runs() {
    for assignment in [AssignmentPolicy::Nearest, AssignmentPolicy::StraightThrough, AssignmentPolicy::Soft] {
        let mut config = small_config();
        config.assignment = assignment;
        config.features = FeaturePolicy::SiteIdentity;
        // 5 frames in batches of 2: the last frame is dropped
        let record = train(&config, 5);
        assert_eq!(record.dynamics.len(), 3 * 2, "{assignment:?}");
        assert_eq!(record.summaries.len(), 3);
        assert_eq!(record.stop.reason, StopReason::Completed);
        assert_eq!((record.stop.epoch, record.stop.step), (2, 1));
        assert!(record.dynamics.iter().all(|s| s.loss.is_finite() && s.loss_dense.is_finite()));

        let temps: Vec<f32> = record.dynamics.iter().map(|s| s.temperature).collect();
        assert!(temps.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(temps[0], config.anneal.t_init);
    }
}

#[test]
fn test_wall_clock_stop_is_labelled() {
    let mut config = small_config();
    config.run.wall_clock_secs = 0.0;
    config.run.batch_order = BatchOrder::Shuffled;
    let record = train(&config, 4);
    assert_eq!(record.stop.reason, StopReason::WallClock);
    assert_eq!(record.stop.epoch, 0);
    // the first epoch finishes, its summary is not appended
    assert_eq!(record.dynamics.len(), 2);
    assert!(record.summaries.is_empty());
}

#[test]
fn test_force_matching_starts_at_its_epoch() {
    let mut config = small_config();
    config.loss.force_matching = true;
    config.loss.fm_epoch = 1;
    config.run.batch_order = BatchOrder::FirstOnly;
    let record = train(&config, 4);
    for step in &record.dynamics {
        assert_eq!(step.batch, 0);
        if step.epoch < 1 {
            assert_eq!(step.loss_fm, 0.0);
        } else {
            assert!(step.loss_fm > 0.0);
        }
    }
}

#[test]
fn test_record_json_round_trip() {
    let config = small_config();
    let record = train(&config, 2);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");
    record.save(&path).unwrap();
    let loaded = RunRecord::load(&path).unwrap();
    assert_eq!(loaded.config, record.config);
    assert_eq!(loaded.stop, record.stop);
    assert_eq!(loaded.dynamics.len(), record.dynamics.len());
    assert_eq!(loaded.summaries[0].target, record.summaries[0].target);
}

#[test]
fn test_missing_files_are_io_errors() {
    let dir = tempfile::tempdir().unwrap();
    let err = train_from_files::<B>(
        &small_config(),
        &dir.path().join("absent.safetensors"),
        &dir.path().join("absent-data.safetensors"),
        None,
        &ProgressReporter::new(),
        &Default::default(),
    )
    .unwrap_err();
    assert!(matches!(err, CgError::Io(_)));
}
