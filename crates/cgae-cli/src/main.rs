//! `cgae`: single-example and dataset runs.
//!
//! ```bash
//! cgae single --assignment nearest --features solution --steps 1000
//! cgae train --dense dense.safetensors --data otp.safetensors --config run.toml --save-state
//! ```
//!
//! Set `RUST_LOG=info` (or `debug` for per-step losses) to see the log.

mod cli;
mod progress;

use anyhow::{Context, Result};
use clap::Parser;

use cgae_core::PathConfig;
use cgae_train::{run_single, train_from_files, ProgressReporter, RunRecord, SingleExample, TrainingConfig};

use crate::cli::{Cli, Commands};
use crate::progress::CliProgressHandler;

#[cfg(not(feature = "gpu"))]
type Backend = cgae_core::TrainBackend;
#[cfg(feature = "gpu")]
type Backend = cgae_core::GpuTrainBackend;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        log::error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(command: &Commands) -> Result<TrainingConfig> {
    let args = command.run_args();
    let mut config = match &args.config {
        Some(path) => TrainingConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => command.base_config(),
    };
    args.apply(&mut config);
    Ok(config)
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = PathConfig::from_path_args(cli.paths.clone());

    #[cfg(not(feature = "gpu"))]
    let device = cgae_core::init_cpu_device();
    #[cfg(feature = "gpu")]
    let device = cgae_core::init_gpu_device();

    let handler = CliProgressHandler::new();
    let reporter = if cli.quiet {
        ProgressReporter::new()
    } else {
        ProgressReporter::with_callback(handler.get_callback())
    };

    let (record, name) = match &cli.command {
        Commands::Single(args) => {
            let config = load_config(&cli.command)?;
            log::info!("single example: {:?} features", config.features);
            let state = paths.decoder_state(&args.name);
            let record = run_single::<Backend>(
                &config,
                &SingleExample::builtin(),
                Some(state.as_path()),
                &reporter,
                &device,
            )
            .context("Single-example run failed")?;
            (record, &args.name)
        }
        Commands::Train(args) => {
            let config = load_config(&cli.command)?;
            let dense = paths.data_file(&args.dense);
            let data = paths.data_file(&args.data);
            let state = paths.decoder_state(&args.run.name);
            let record = train_from_files::<Backend>(&config, &dense, &data, Some(state.as_path()), &reporter, &device)
                .with_context(|| format!("Training on {} failed", data.display()))?;
            (record, &args.run.name)
        }
    };

    write_record(&paths, name, &record)?;
    println!("{record}");
    Ok(())
}

fn write_record(paths: &PathConfig, name: &str, record: &RunRecord) -> Result<()> {
    paths.ensure_dirs().context("Failed to create output directories")?;
    let path = paths.run_record(name);
    record
        .save(&path)
        .with_context(|| format!("Failed to write run record {}", path.display()))?;
    log::info!("run record written to {}", path.display());
    Ok(())
}
