//! Backend selection for the burn framework.
//!
//! The CPU backend (`NdArray`) is always compiled in. The CUDA backend is
//! available when the crate is built with the `cuda` feature. Neither selects
//! kernels by benchmarking: `NdArray` has a single implementation per op and
//! `burn-cuda` is built without autotune.

use crate::error::{Error, Result};
use crate::types::DeviceType;

pub use burn::backend::Autodiff;

/// Always-available CPU backend.
pub type CpuBackend = burn_ndarray::NdArray<f32>;
pub type CpuDevice = burn_ndarray::NdArrayDevice;

#[cfg(feature = "cuda")]
pub type CudaBackend = burn_cuda::Cuda<f32, i32>;
#[cfg(feature = "cuda")]
pub type CudaDevice = burn_cuda::CudaDevice;

/// Whether this build can run on `device`.
pub fn device_supported(device: DeviceType) -> bool {
    match device {
        DeviceType::Cpu => true,
        DeviceType::Cuda(_) => cfg!(feature = "cuda"),
    }
}

/// Fail with a configuration error if `device` is not compiled in.
pub fn ensure_device_supported(device: DeviceType) -> Result<()> {
    if device_supported(device) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "device '{device}' requested but this build has no CUDA support (rebuild with --features cuda)"
        )))
    }
}

pub fn cpu_device() -> CpuDevice {
    CpuDevice::Cpu
}

#[cfg(feature = "cuda")]
pub fn cuda_device(index: usize) -> CudaDevice {
    CudaDevice::new(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_always_supported() {
        assert!(device_supported(DeviceType::Cpu));
        assert!(ensure_device_supported(DeviceType::Cpu).is_ok());
    }

    #[test]
    fn test_cuda_kernels_are_not_benchmarked() {
        let manifest: toml::Value = toml::from_str(include_str!("../../../Cargo.toml")).unwrap();
        let cuda = &manifest["workspace"]["dependencies"]["burn-cuda"];

        assert_eq!(cuda["default-features"].as_bool(), Some(false));
        let features: Vec<&str> = cuda["features"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f.as_str())
            .collect();
        assert!(features
            .iter()
            .all(|f| !f.contains("autotune") && *f != "fusion"));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_rejected_without_feature() {
        let err = ensure_device_supported(DeviceType::Cuda(0)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
