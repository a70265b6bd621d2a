//! GPU Compute Backend
//!
//! A [`ComputeBackend`] that dispatches matmul, linear, softmax and the
//! element-wise kernels to wgpu compute pipelines.
//!
//! ## Size Thresholds
//!
//! Uploading a few hundred floats costs more than computing on them, so every
//! method first checks its work size and runs the CPU kernel below it:
//!
//! ```text
//! matmul   M·K·N  < 4096  → CPU
//! linear   in·out < 4096  → CPU   (else transpose w, matmul [1,in] @ [in,out])
//! softmax  len    < 512   → CPU
//! relu/add/scale len < 1024 → CPU
//! rms_norm               → always CPU
//! ```
//!
//! ## Failure Handling
//!
//! Any GPU error (device lost, validation error, map failure) is logged once,
//! the backend permanently downgrades itself to CPU, and the CPU result for the
//! failed call is returned. Training never observes a GPU failure.

mod context;
pub mod shaders;

use crate::backend::ComputeBackend;
use crate::error::GpuError;
use crate::ops;
use crate::tensor::Tensor;
use context::{div_ceil, GpuContext, Kernel, MatmulDims, VectorParams};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// Products (M·K·N or in·out) below which matmul/linear stay on the CPU
pub const MATMUL_MIN_WORK: usize = 4096;
/// Softmax vector length below which the CPU kernel runs
pub const SOFTMAX_MIN_LEN: usize = 512;
/// Element-wise vector length below which the CPU kernel runs
pub const ELEMENTWISE_MIN_LEN: usize = 1024;

const TILE: u32 = 16;
const WG_SIZE: u32 = 256;

/// wgpu-backed compute backend with automatic CPU downgrade
#[derive(Debug)]
pub struct GpuBackend {
    ctx: GpuContext,
    disabled: AtomicBool,
}

impl GpuBackend {
    /// Acquire an adapter and device within `timeout`
    pub fn init(timeout: Duration) -> Result<Self, GpuError> {
        Ok(Self {
            ctx: GpuContext::init(timeout)?,
            disabled: AtomicBool::new(false),
        })
    }

    pub fn adapter_name(&self) -> &str {
        self.ctx.adapter_name()
    }

    /// False once any GPU failure has downgraded this backend to CPU
    pub fn is_active(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst) && !self.ctx.is_lost()
    }

    fn downgrade(&self, op: &'static str, err: &GpuError) {
        if !self.disabled.swap(true, Ordering::SeqCst) {
            warn!(op, error = %err, "GPU kernel failed, falling back to CPU for this session");
        }
    }

    fn matmul_gpu(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, GpuError> {
        let (m, k, n) = (a.shape[0], a.shape[1], b.shape[1]);
        let dims = MatmulDims {
            m: m as u32,
            k: k as u32,
            n: n as u32,
            _pad: 0,
        };
        let out = self.ctx.run(
            Kernel::Matmul,
            bytemuck::bytes_of(&dims),
            &[&a.data, &b.data],
            m * n,
            [div_ceil(n as u32, TILE), div_ceil(m as u32, TILE), 1],
        )?;
        Ok(Tensor::new(out, vec![m, n]))
    }

    fn vector_gpu(
        &self,
        kernel: Kernel,
        inputs: &[&[f32]],
        scalar: f32,
        shape: &[usize],
    ) -> Result<Tensor, GpuError> {
        let n = inputs[0].len();
        let params = VectorParams {
            n: n as u32,
            scalar,
            _pad: [0; 2],
        };
        let groups = match kernel {
            Kernel::Softmax => 1,
            _ => div_ceil(n as u32, WG_SIZE),
        };
        let out = self
            .ctx
            .run(kernel, bytemuck::bytes_of(&params), inputs, n, [groups, 1, 1])?;
        Ok(Tensor::new(out, shape.to_vec()))
    }

    fn or_cpu(
        &self,
        op: &'static str,
        result: Result<Tensor, GpuError>,
        cpu: impl FnOnce() -> Tensor,
    ) -> Tensor {
        match result {
            Ok(t) => t,
            Err(e) => {
                self.downgrade(op, &e);
                cpu()
            }
        }
    }
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &'static str {
        if self.is_active() {
            "webgpu"
        } else {
            "cpu"
        }
    }

    fn matmul(&self, a: &Tensor, b: &Tensor) -> Tensor {
        let work = a.shape[0] * a.shape[1] * b.shape[1];
        if work < MATMUL_MIN_WORK || !self.is_active() {
            return ops::matmul(a, b);
        }
        assert_eq!(a.shape[1], b.shape[0], "matmul inner dimensions differ");
        self.or_cpu("matmul", self.matmul_gpu(a, b), || ops::matmul(a, b))
    }

    fn linear(&self, x: &Tensor, w: &Tensor) -> Tensor {
        let (out_dim, in_dim) = (w.shape[0], w.shape[1]);
        if out_dim * in_dim < MATMUL_MIN_WORK || !self.is_active() {
            return ops::linear(x, w);
        }
        let x_row = x.reshape(&[1, in_dim]);
        let result = self
            .matmul_gpu(&x_row, &w.transpose())
            .map(|t| t.reshape(&[out_dim]));
        self.or_cpu("linear", result, || ops::linear(x, w))
    }

    fn softmax(&self, x: &Tensor) -> Tensor {
        if x.size() < SOFTMAX_MIN_LEN || !self.is_active() {
            return ops::softmax(x);
        }
        let result = self.vector_gpu(Kernel::Softmax, &[&x.data], 0.0, &x.shape);
        self.or_cpu("softmax", result, || ops::softmax(x))
    }

    fn relu(&self, x: &Tensor) -> Tensor {
        if x.size() < ELEMENTWISE_MIN_LEN || !self.is_active() {
            return ops::relu(x);
        }
        let result = self.vector_gpu(Kernel::Relu, &[&x.data], 0.0, &x.shape);
        self.or_cpu("relu", result, || ops::relu(x))
    }

    fn add(&self, a: &Tensor, b: &Tensor) -> Tensor {
        if a.size() < ELEMENTWISE_MIN_LEN || !self.is_active() {
            return ops::add(a, b);
        }
        assert_eq!(a.size(), b.size(), "add: length mismatch");
        let result = self.vector_gpu(Kernel::Add, &[&a.data, &b.data], 0.0, &a.shape);
        self.or_cpu("add", result, || ops::add(a, b))
    }

    fn scale(&self, x: &Tensor, s: f32) -> Tensor {
        if x.size() < ELEMENTWISE_MIN_LEN || !self.is_active() {
            return ops::scale(x, s);
        }
        let result = self.vector_gpu(Kernel::Scale, &[&x.data], s, &x.shape);
        self.or_cpu("scale", result, || ops::scale(x, s))
    }
}
