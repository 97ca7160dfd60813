use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use cgae_core::PathArgs;
use cgae_train::{AssignmentPolicy, BatchOrder, EncoderMode, FeaturePolicy, ReconstructionLoss, TrainingConfig};

#[derive(Parser, Debug)]
#[command(name = "cgae", author, version, about = "Learn coarse-grained sites with a rotation-equivariant decoder")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub paths: PathArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Overfit the decoder on the built-in 32-atom structure.
    Single(RunArgs),
    /// Train on a dataset of frames with a pretrained dense autoencoder.
    Train(TrainArgs),
}

impl Commands {
    pub fn run_args(&self) -> &RunArgs {
        match self {
            Self::Single(args) => args,
            Self::Train(args) => &args.run,
        }
    }

    /// Configuration used when no `--config` file is given.
    pub fn base_config(&self) -> TrainingConfig {
        match self {
            Self::Single(_) => TrainingConfig::single_example(),
            Self::Train(_) => TrainingConfig::default(),
        }
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// SafeTensors file with `encoder.weight` and `decoder.weight`
    #[arg(long, value_name = "PATH")]
    pub dense: PathBuf,

    /// SafeTensors file with `geometries`, `forces` and `features`
    #[arg(long, value_name = "PATH")]
    pub data: PathBuf,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Options shared by both run modes. Every flag overrides the config file.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Name of the run record (and saved decoder) in the output directory
    #[arg(long, default_value = "cgae-run")]
    pub name: String,

    /// Number of coarse-grained sites
    #[arg(long)]
    pub sites: Option<usize>,

    /// Assignment feeding the projected target
    #[arg(long, value_enum)]
    pub assignment: Option<AssignmentPolicy>,

    /// Decoder input: site-identity | ones | solution | nearest-atom[:SITE[:DEGREE]]
    #[arg(long, value_name = "POLICY")]
    pub features: Option<FeaturePolicy>,

    #[arg(long, value_enum)]
    pub encoder_mode: Option<EncoderMode>,

    #[arg(long, value_enum)]
    pub loss: Option<ReconstructionLoss>,

    /// Hidden multiplicity per degree, e.g. `8,4,2`
    #[arg(long, value_delimiter = ',')]
    pub multiplicities: Option<Vec<usize>>,

    #[arg(long)]
    pub hidden_layers: Option<usize>,

    #[arg(long)]
    pub max_degree: Option<usize>,

    #[arg(long)]
    pub epochs: Option<usize>,

    /// Optimizer steps in single-example mode
    #[arg(long)]
    pub steps: Option<usize>,

    #[arg(long)]
    pub lr: Option<f64>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long, value_enum)]
    pub batch_order: Option<BatchOrder>,

    /// Enable force matching from this epoch on
    #[arg(long, value_name = "EPOCH")]
    pub force_matching: Option<usize>,

    /// Wall-clock budget in seconds
    #[arg(long)]
    pub wall: Option<f64>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Save decoder parameters next to the run record
    #[arg(long)]
    pub save_state: bool,
}

impl RunArgs {
    /// Apply the command-line overrides on top of `config`.
    pub fn apply(&self, config: &mut TrainingConfig) {
        if let Some(sites) = self.sites {
            config.sites = sites;
        }
        if let Some(assignment) = self.assignment {
            config.assignment = assignment;
        }
        if let Some(features) = self.features {
            config.features = features;
        }
        if let Some(mode) = self.encoder_mode {
            config.encoder_mode = mode;
        }
        if let Some(loss) = self.loss {
            config.loss.reconstruction = loss;
        }
        if let Some(multiplicities) = &self.multiplicities {
            config.architecture.hidden_multiplicities = multiplicities.clone();
        }
        if let Some(layers) = self.hidden_layers {
            config.architecture.hidden_layers = layers;
        }
        if let Some(degree) = self.max_degree {
            config.architecture.max_degree = degree;
        }
        if let Some(epochs) = self.epochs {
            config.anneal.epochs = epochs;
        }
        if let Some(steps) = self.steps {
            config.run.single_steps = steps;
        }
        if let Some(lr) = self.lr {
            config.run.learning_rate = lr;
        }
        if let Some(batch_size) = self.batch_size {
            config.run.batch_size = batch_size;
        }
        if let Some(order) = self.batch_order {
            config.run.batch_order = order;
        }
        if let Some(epoch) = self.force_matching {
            config.loss.force_matching = true;
            config.loss.fm_epoch = epoch;
        }
        if let Some(wall) = self.wall {
            config.run.wall_clock_secs = wall;
        }
        if let Some(seed) = self.seed {
            config.run.seed = seed;
        }
        if self.save_state {
            config.run.save_state = true;
        }
    }
}
