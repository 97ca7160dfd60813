//! Training orchestration.
//!
//! - [`TrainingConfig`]: one validated configuration per run
//! - [`policy`]: assignment, feature, encoder, loss and batch-order choices
//! - [`DatasetTrainer`]: annealed training over a SafeTensors [`Dataset`]
//! - [`run_single`]: overfit the decoder on one fixed structure
//! - [`RunRecord`]: dynamics, summaries and the stop label, saved as JSON
//!
//! ```rust,ignore
//! use cgae_core::{init_cpu_device, TrainBackend};
//! use cgae_train::{run_single, ProgressReporter, SingleExample, TrainingConfig};
//!
//! let mut config = TrainingConfig::default();
//! config.assignment = cgae_train::AssignmentPolicy::Nearest;
//! let record = run_single::<TrainBackend>(
//!     &config,
//!     &SingleExample::builtin(),
//!     None,
//!     &ProgressReporter::new(),
//!     &init_cpu_device(),
//! )?;
//! println!("{record}");
//! ```

#![recursion_limit = "256"]

pub mod config;
pub mod data;
pub mod diagnostics;
pub mod loss;
pub mod policy;
pub mod progress;
pub mod single;
pub mod trainer;

pub use config::{AnnealConfig, ArchitectureConfig, LossConfig, RunConfig, TrainingConfig};
pub use data::{Batch, Dataset};
pub use diagnostics::{RunMode, RunRecord, StepRecord, StopLabel, StopReason, Summary, TensorSnapshot};
pub use loss::{force_matching_loss, reconstruction_loss};
pub use policy::{AssignmentPolicy, BatchOrder, EncoderMode, FeatureContext, FeaturePolicy, ReconstructionLoss};
pub use progress::{Progress, ProgressCallback, ProgressReporter};
pub use single::{run_single, SingleExample};
pub use trainer::{save_decoder, train_from_files, CgModel, DatasetTrainer};
