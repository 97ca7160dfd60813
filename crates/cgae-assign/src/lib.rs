//! Assignment of atoms to coarse-grained sites.
//!
//! Three pathways produce an `[atoms, sites]` weighting:
//!
//! | Pathway | Rows | Gradient |
//! |---------|------|----------|
//! | [`soft_assign`] `.soft` | categorical, sum to 1 | through the relaxation |
//! | [`soft_assign`] `.hard` | one-hot argmax of `.soft` | of `.soft` (straight-through) |
//! | [`nearest_assign`] | one-hot, closest site | none |
//!
//! The temperature of the relaxation follows a [`TemperatureSchedule`].

pub mod gumbel;
pub mod nearest;
pub mod schedule;

pub use gumbel::{
    gumbel_noise, gumbel_noise_from_rng, one_hot, soft_assign, soft_assign_with_noise,
    SoftAssignment,
};
pub use nearest::{nearest_assign, HardAssignment};
pub use schedule::TemperatureSchedule;
