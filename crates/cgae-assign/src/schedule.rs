//! Temperature annealing schedule.

use serde::{Deserialize, Serialize};

use cgae_core::{CgError, Result};

/// Precomputed per-epoch temperatures.
///
/// `τ(e) = max(τ_min, τ_0 · exp(−r · e))`, so each entry is the previous one
/// decayed by `exp(−r)` and floored at `τ_min`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSchedule {
    temperatures: Vec<f32>,
}

impl TemperatureSchedule {
    pub fn build(num_epochs: usize, decay_rate: f32, t_init: f32, t_min: f32) -> Result<Self> {
        if !(t_min > 0.0 && t_min.is_finite()) {
            return Err(CgError::InvalidConfig(format!(
                "minimum temperature must be positive, got {t_min}"
            )));
        }
        if !(t_init >= t_min && t_init.is_finite()) {
            return Err(CgError::InvalidConfig(format!(
                "initial temperature {t_init} is below the floor {t_min}"
            )));
        }
        if !(decay_rate >= 0.0 && decay_rate.is_finite()) {
            return Err(CgError::InvalidConfig(format!(
                "decay rate must be non-negative, got {decay_rate}"
            )));
        }

        let temperatures = (0..num_epochs)
            .map(|epoch| (t_init * (-decay_rate * epoch as f32).exp()).max(t_min))
            .collect();
        Ok(Self { temperatures })
    }

    /// Temperature for `epoch`; past the end the last entry is repeated.
    pub fn at_epoch(&self, epoch: usize) -> f32 {
        self.temperatures
            .get(epoch)
            .or_else(|| self.temperatures.last())
            .copied()
            .unwrap_or(1.0)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.temperatures
    }

    pub fn len(&self) -> usize {
        self.temperatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.temperatures.is_empty()
    }
}
