//! Run record: per-step dynamics, periodic summaries and the stop label.
//!
//! The record is append-only while a loop runs and written once, after the
//! loop exits.

use std::fmt;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use cgae_core::{CgError, Result};

use crate::config::TrainingConfig;

/// Scalars of one optimizer step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub epoch: usize,
    pub step: usize,
    /// Index of the batch within the dataset.
    pub batch: usize,
    pub loss: f32,
    pub loss_reconstruction: f32,
    pub loss_dense: f32,
    pub loss_fm: f32,
    pub temperature: f32,
    pub wall_secs: f64,
}

/// Raw tensor values, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSnapshot {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl TensorSnapshot {
    pub fn of<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Result<Self> {
        let data = tensor.clone().into_data().convert::<f32>();
        let shape = data.shape.clone();
        let values = data
            .to_vec::<f32>()
            .map_err(|e| CgError::TensorData(format!("{e:?}")))?;
        Ok(Self { shape, values })
    }
}

/// Step record plus the tensors behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(flatten)]
    pub step: StepRecord,
    pub sites: TensorSnapshot,
    pub prediction: TensorSnapshot,
    pub target: TensorSnapshot,
    pub nearest: TensorSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_assignment: Option<TensorSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub straight_through: Option<TensorSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// Every epoch (or step) ran.
    Completed,
    /// The wall-clock budget ran out.
    WallClock,
}

/// Where the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLabel {
    pub epoch: usize,
    pub step: usize,
    pub reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Single,
    Dataset,
}

/// Everything a run leaves behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub mode: RunMode,
    pub config: TrainingConfig,
    pub dynamics: Vec<StepRecord>,
    pub summaries: Vec<Summary>,
    pub stop: StopLabel,
    /// Saved decoder parameters, when requested.
    pub decoder_state: Option<PathBuf>,
}

impl RunRecord {
    pub fn final_loss(&self) -> Option<f32> {
        self.dynamics.last().map(|s| s.loss)
    }

    pub fn initial_loss(&self) -> Option<f32> {
        self.dynamics.first().map(|s| s.loss)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} steps, loss {:.4} -> {:.4}, stopped at epoch {} step {} ({:?})",
            self.dynamics.len(),
            self.initial_loss().unwrap_or(f32::NAN),
            self.final_loss().unwrap_or(f32::NAN),
            self.stop.epoch,
            self.stop.step,
            self.stop.reason
        )
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CgError::Serialization(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| CgError::Serialization(e.to_string()))
    }
}

impl fmt::Display for RunRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RunRecord ({:?}):", self.mode)?;
        writeln!(f, "  Steps: {}", self.dynamics.len())?;
        writeln!(f, "  Summaries: {}", self.summaries.len())?;
        if let (Some(first), Some(last)) = (self.initial_loss(), self.final_loss()) {
            writeln!(f, "  Loss: {first:.6} -> {last:.6}")?;
        }
        writeln!(
            f,
            "  Stopped: epoch {}, step {} ({:?})",
            self.stop.epoch, self.stop.step, self.stop.reason
        )?;
        if let Some(path) = &self.decoder_state {
            writeln!(f, "  Decoder state: {}", path.display())?;
        }
        Ok(())
    }
}
