//! Backend aliases.
//!
//! Training runs on `Autodiff<NdArray>` by default. The `gpu` feature adds the
//! WGPU backend (Metal is selected automatically on macOS).

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};

/// Plain CPU backend used for inference and frozen computations.
pub type CpuBackend = NdArray<f32>;

/// CPU backend with gradient tracking, used by the training loops.
pub type TrainBackend = Autodiff<CpuBackend>;

pub fn init_cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

#[cfg(feature = "gpu")]
pub type WgpuBackend = burn::backend::Wgpu;

#[cfg(feature = "gpu")]
pub type GpuTrainBackend = Autodiff<WgpuBackend>;

#[cfg(feature = "gpu")]
pub fn init_gpu_device() -> burn::backend::wgpu::WgpuDevice {
    // Burn's WGPU backend uses Default::default() for device creation
    burn::backend::wgpu::WgpuDevice::default()
}
