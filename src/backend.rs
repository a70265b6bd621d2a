//! Compute Backend Selection
//!
//! The model routes its heavy primitives through a [`ComputeBackend`] trait
//! object chosen once per training session. Two implementations exist:
//!
//! - [`CpuBackend`]: plain delegation to [`crate::ops`]. Always available.
//! - `GpuBackend` (feature `gpu`): wgpu compute pipelines for the same
//!   operations, with explicit size thresholds below which the CPU kernel runs
//!   anyway, and a permanent CPU downgrade after any device failure.
//!
//! Both produce numerically equivalent results (within float tolerance), so
//! the backend is a performance choice, never a correctness dependency.
//!
//! ```text
//! select_backend(prefer_gpu, timeout)
//!   ├── prefer_gpu && gpu feature && adapter within timeout → GpuBackend
//!   └── otherwise                                           → CpuBackend
//! ```

use crate::ops;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Numeric primitives the transformer forward pass needs
///
/// Every method has CPU semantics defined by the function of the same name in
/// [`crate::ops`]. Implementations may compute on another device but must
/// return the same shapes and (up to rounding) the same values.
pub trait ComputeBackend: Send + Sync + fmt::Debug {
    /// `"cpu"` or `"webgpu"`
    fn name(&self) -> &'static str;

    fn matmul(&self, a: &Tensor, b: &Tensor) -> Tensor;

    fn linear(&self, x: &Tensor, w: &Tensor) -> Tensor;

    fn softmax(&self, x: &Tensor) -> Tensor;

    /// RMS-norm runs on the CPU for every backend; vectors are too short to
    /// amortize a dispatch.
    fn rms_norm(&self, x: &Tensor) -> (Tensor, f32) {
        ops::rms_norm(x)
    }

    fn relu(&self, x: &Tensor) -> Tensor;

    fn add(&self, a: &Tensor, b: &Tensor) -> Tensor;

    fn scale(&self, x: &Tensor, s: f32) -> Tensor;
}

/// Backend that runs every kernel on the CPU
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn matmul(&self, a: &Tensor, b: &Tensor) -> Tensor {
        ops::matmul(a, b)
    }

    fn linear(&self, x: &Tensor, w: &Tensor) -> Tensor {
        ops::linear(x, w)
    }

    fn softmax(&self, x: &Tensor) -> Tensor {
        ops::softmax(x)
    }

    fn relu(&self, x: &Tensor) -> Tensor {
        ops::relu(x)
    }

    fn add(&self, a: &Tensor, b: &Tensor) -> Tensor {
        ops::add(a, b)
    }

    fn scale(&self, x: &Tensor, s: f32) -> Tensor {
        ops::scale(x, s)
    }
}

/// Which kind of backend ended up serving a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cpu,
    Webgpu,
}

/// Result of probing for a GPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuStatus {
    pub available: bool,
    /// Adapter name, empty when no GPU is in use
    pub gpu_name: String,
    pub backend: BackendKind,
}

impl GpuStatus {
    /// Status reported when no GPU is used
    pub fn cpu_only() -> Self {
        Self {
            available: false,
            gpu_name: String::new(),
            backend: BackendKind::Cpu,
        }
    }
}

/// A chosen backend together with the status to report for it
#[derive(Debug, Clone)]
pub struct BackendSelection {
    pub backend: Arc<dyn ComputeBackend>,
    pub status: GpuStatus,
}

impl BackendSelection {
    /// The always-available CPU selection
    pub fn cpu() -> Self {
        Self {
            backend: Arc::new(CpuBackend),
            status: GpuStatus::cpu_only(),
        }
    }
}

/// Pick the compute backend for a session
///
/// When `prefer_gpu` is set and the crate was built with the `gpu` feature, an
/// adapter is requested; initialization taking longer than `init_timeout` or
/// failing in any way yields the CPU backend. Never fails.
///
/// # Example
///
/// ```rust
/// use microgpt::backend::{select_backend, BackendKind};
/// use std::time::Duration;
///
/// let selection = select_backend(false, Duration::from_secs(1));
/// assert_eq!(selection.backend.name(), "cpu");
/// assert_eq!(selection.status.backend, BackendKind::Cpu);
/// ```
pub fn select_backend(prefer_gpu: bool, init_timeout: Duration) -> BackendSelection {
    if !prefer_gpu {
        return BackendSelection::cpu();
    }

    #[cfg(feature = "gpu")]
    {
        match crate::gpu::GpuBackend::init(init_timeout) {
            Ok(gpu) => {
                let status = GpuStatus {
                    available: true,
                    gpu_name: gpu.adapter_name().to_string(),
                    backend: BackendKind::Webgpu,
                };
                tracing::info!(adapter = %gpu.adapter_name(), "using GPU compute backend");
                BackendSelection {
                    backend: Arc::new(gpu),
                    status,
                }
            }
            Err(e) => {
                warn!(error = %e, "GPU unavailable, using CPU backend");
                BackendSelection::cpu()
            }
        }
    }

    #[cfg(not(feature = "gpu"))]
    {
        let _ = init_timeout;
        warn!(
            error = %crate::error::GpuError::NotCompiled,
            "GPU unavailable, using CPU backend"
        );
        BackendSelection::cpu()
    }
}
