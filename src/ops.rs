//! CPU Kernels and Their Derivatives
//!
//! Every numeric primitive the transformer needs, each paired with a backward
//! function that returns the gradient with respect to its inputs. The model
//! processes one token position at a time, so most kernels work on 1-D
//! vectors; `matmul` is the general 2-D case that the GPU backend accelerates.
//!
//! ## Kernels
//!
//! ```text
//! matmul(a [M,K], b [K,N])     -> [M,N]
//! linear(x [in], w [out,in])   -> [out]        out[i] = Σ_j w[i,j] x[j]
//! softmax(x)                   -> exp(x - max) / Σ exp(x - max)
//! rms_norm(x)                  -> (x / rms, rms),  rms = sqrt(mean(x²) + 1e-5)
//! relu(x)                      -> max(x, 0)
//! add(a, b), scale(x, s)
//! embedding_lookup(table, i)   -> row i
//! cross_entropy(logits, t)     -> (-ln(p_t + 1e-10), p - onehot(t))
//! ```
//!
//! ## Backward Rules
//!
//! ```text
//! linear:   dx = Wᵀ dy                 dW = dy ⊗ x
//! softmax:  dx = y ⊙ (dy - <dy, y>)
//! rms_norm: dx = dy / rms - x <x, dy> / (n rms³)
//! relu:     dx = dy where x > 0, else 0
//! matmul:   dA = dC Bᵀ                 dB = Aᵀ dC
//! ```
//!
//! ## Performance
//!
//! Large matmuls use a cache-blocked algorithm with parallel row blocks via
//! Rayon; large linear projections compute output rows in parallel. Each output
//! element is still summed sequentially, so results do not depend on the
//! thread count.

use crate::tensor::Tensor;
use rayon::prelude::*;

/// Added under the square root of every RMS-norm
pub const RMS_EPS: f32 = 1e-5;

/// Added to the target probability before taking the log
pub const LOG_EPS: f32 = 1e-10;

/// Work (m·n·k) at which matmul switches to the parallel blocked path
const PARALLEL_MATMUL_WORK: usize = 1_000;

/// Weight elements (out·in) at which linear computes rows in parallel
const PARALLEL_LINEAR_WORK: usize = 1 << 14;

/// Computes: result[j] += a_val * b[j] for all j
///
/// Structured for auto-vectorization.
#[inline(always)]
pub(crate) fn axpy(a_val: f32, b: &[f32], result: &mut [f32]) {
    for (r, &b_val) in result.iter_mut().zip(b.iter()) {
        *r += a_val * b_val;
    }
}

#[inline(always)]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Matrix multiplication `a [M,K] @ b [K,N] -> [M,N]`
///
/// # Performance
///
/// - **Small matrices** (< 1K ops): Sequential computation
/// - **Large matrices** (≥ 1K ops): Parallel cache-blocked algorithm
///
/// # Panics
///
/// Panics if either input is not 2-D or the inner dimensions differ
///
/// # Example
///
/// ```rust
/// # use microgpt::{ops, Tensor};
/// let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
/// let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]);
/// assert_eq!(ops::matmul(&a, &b).data, a.data);
/// ```
pub fn matmul(a: &Tensor, b: &Tensor) -> Tensor {
    assert!(
        a.ndim() == 2 && b.ndim() == 2,
        "matmul needs 2-D inputs, got {:?} @ {:?}",
        a.shape,
        b.shape
    );
    assert_eq!(
        a.shape[1], b.shape[0],
        "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
        a.shape[0], a.shape[1], b.shape[0], b.shape[1]
    );

    let m = a.shape[0];
    let k = a.shape[1];
    let n = b.shape[1];

    if m * n * k >= PARALLEL_MATMUL_WORK {
        return matmul_parallel_blocked(a, b, m, n, k);
    }

    let mut result = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for l in 0..k {
                sum += a.data[i * k + l] * b.data[l * n + j];
            }
            result[i * n + j] = sum;
        }
    }
    Tensor::new(result, vec![m, n])
}

/// Parallel cache-blocked matrix multiplication
///
/// 1. **Cache blocking**: Processes data in 8×8 blocks that fit in L1 cache
/// 2. **Parallel processing**: Distributes row blocks across CPU cores via Rayon
/// 3. **Memory locality**: Inner loops access memory sequentially
fn matmul_parallel_blocked(a: &Tensor, b: &Tensor, m: usize, n: usize, k: usize) -> Tensor {
    const BLOCK_SIZE: usize = 8;

    let mut result = vec![0.0; m * n];
    if n == 0 {
        return Tensor::new(result, vec![m, n]);
    }

    result
        .par_chunks_mut(BLOCK_SIZE * n)
        .enumerate()
        .for_each(|(block_i, result_block)| {
            let i_start = block_i * BLOCK_SIZE;
            let i_end = (i_start + BLOCK_SIZE).min(m);

            for j_start in (0..n).step_by(BLOCK_SIZE) {
                let j_end = (j_start + BLOCK_SIZE).min(n);

                for k_start in (0..k).step_by(BLOCK_SIZE) {
                    let k_end = (k_start + BLOCK_SIZE).min(k);

                    for i in i_start..i_end {
                        let row_offset = (i - i_start) * n;
                        for k_idx in k_start..k_end {
                            axpy(
                                a.data[i * k + k_idx],
                                &b.data[k_idx * n + j_start..k_idx * n + j_end],
                                &mut result_block[row_offset + j_start..row_offset + j_end],
                            );
                        }
                    }
                }
            }
        });

    Tensor::new(result, vec![m, n])
}

/// Gradients of `c = a @ b`: `(dA, dB) = (dC Bᵀ, Aᵀ dC)`
pub fn matmul_backward(d_out: &Tensor, a: &Tensor, b: &Tensor) -> (Tensor, Tensor) {
    let d_a = matmul(d_out, &b.transpose());
    let d_b = matmul(&a.transpose(), d_out);
    (d_a, d_b)
}

/// Bias-free linear projection `out[i] = Σ_j w[i,j] x[j]`
///
/// # Arguments
///
/// * `x` - Input vector `[in]`
/// * `w` - Weight matrix `[out, in]`
///
/// # Returns
///
/// Output vector `[out]`
pub fn linear(x: &Tensor, w: &Tensor) -> Tensor {
    let (out_dim, in_dim) = (w.shape[0], w.shape[1]);
    assert_eq!(
        x.size(),
        in_dim,
        "linear: input has {} elements, weight expects {}",
        x.size(),
        in_dim
    );

    let out: Vec<f32> = if out_dim * in_dim >= PARALLEL_LINEAR_WORK {
        (0..out_dim)
            .into_par_iter()
            .map(|i| dot(w.row(i), &x.data))
            .collect()
    } else {
        (0..out_dim).map(|i| dot(w.row(i), &x.data)).collect()
    };
    Tensor::from_vec(out)
}

/// Gradients of a linear projection
#[derive(Debug, Clone)]
pub struct LinearGrads {
    /// Gradient with respect to the input vector `[in]`
    pub d_x: Tensor,
    /// Gradient with respect to the weight matrix `[out, in]`
    pub d_w: Tensor,
}

/// Backward of [`linear`]: `dx = Wᵀ dy`, `dW = dy ⊗ x`
pub fn linear_backward(d_out: &Tensor, x: &Tensor, w: &Tensor) -> LinearGrads {
    let in_dim = w.shape[1];
    let mut d_w = vec![0.0; w.size()];
    for (i, &g) in d_out.data.iter().enumerate() {
        axpy(g, &x.data, &mut d_w[i * in_dim..(i + 1) * in_dim]);
    }
    LinearGrads {
        d_x: linear_input_grad(d_out, w),
        d_w: Tensor::new(d_w, w.shape.clone()),
    }
}

/// Input half of [`linear_backward`]: `dx = Wᵀ dy`
pub fn linear_input_grad(d_out: &Tensor, w: &Tensor) -> Tensor {
    let (out_dim, in_dim) = (w.shape[0], w.shape[1]);
    assert_eq!(d_out.size(), out_dim, "linear backward: gradient length mismatch");
    let mut d_x = vec![0.0; in_dim];
    for (i, &g) in d_out.data.iter().enumerate() {
        if g != 0.0 {
            axpy(g, w.row(i), &mut d_x);
        }
    }
    Tensor::from_vec(d_x)
}

/// Backward of [`linear`] that adds `dW` straight into `w`'s gradient buffer
///
/// Returns `dx`. Equivalent to [`linear_backward`] followed by
/// `w.accumulate_grad(&d_w.data)` without materializing `dW`.
pub fn linear_backward_into(d_out: &Tensor, x: &Tensor, w: &mut Tensor) -> Tensor {
    let d_x = linear_input_grad(d_out, w);
    w.accumulate_outer_grad(&d_out.data, &x.data);
    d_x
}

/// Numerically stable softmax over a vector
///
/// ```text
/// softmax(x)[i] = exp(x[i] - max(x)) / Σ_j exp(x[j] - max(x))
/// ```
pub fn softmax(x: &Tensor) -> Tensor {
    let max = x.data.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exps: Vec<f32> = x.data.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    Tensor::new(exps.into_iter().map(|e| e / sum).collect(), x.shape.clone())
}

/// Backward of [`softmax`] given its output `y`: `dx = y ⊙ (dy - <dy, y>)`
pub fn softmax_backward(d_out: &Tensor, y: &Tensor) -> Tensor {
    let inner = dot(&d_out.data, &y.data);
    let data = y
        .data
        .iter()
        .zip(&d_out.data)
        .map(|(&yi, &di)| yi * (di - inner))
        .collect();
    Tensor::new(data, y.shape.clone())
}

/// RMS normalization without learned scale or bias
///
/// Returns the normalized vector and the `rms` needed by the backward pass.
pub fn rms_norm(x: &Tensor) -> (Tensor, f32) {
    let n = x.size() as f32;
    let mean_sq = x.data.iter().map(|v| v * v).sum::<f32>() / n;
    let rms = (mean_sq + RMS_EPS).sqrt();
    let out = x.data.iter().map(|v| v / rms).collect();
    (Tensor::new(out, x.shape.clone()), rms)
}

/// Backward of [`rms_norm`]: `dx = dy / rms - x <x, dy> / (n rms³)`
pub fn rms_norm_backward(d_out: &Tensor, x: &Tensor, rms: f32) -> Tensor {
    let n = x.size() as f32;
    let proj = dot(&x.data, &d_out.data) / (n * rms * rms * rms);
    let data = x
        .data
        .iter()
        .zip(&d_out.data)
        .map(|(&xi, &di)| di / rms - xi * proj)
        .collect();
    Tensor::new(data, x.shape.clone())
}

/// Rectified linear unit, element-wise
pub fn relu(x: &Tensor) -> Tensor {
    Tensor::new(x.data.iter().map(|&v| v.max(0.0)).collect(), x.shape.clone())
}

/// Backward of [`relu`]: gradient passes where the forward input was positive
pub fn relu_backward(d_out: &Tensor, x: &Tensor) -> Tensor {
    let data = x
        .data
        .iter()
        .zip(&d_out.data)
        .map(|(&xi, &di)| if xi > 0.0 { di } else { 0.0 })
        .collect();
    Tensor::new(data, x.shape.clone())
}

/// Element-wise sum of two same-shaped tensors
pub fn add(a: &Tensor, b: &Tensor) -> Tensor {
    assert_eq!(a.size(), b.size(), "add: length mismatch");
    Tensor::new(
        a.data.iter().zip(&b.data).map(|(x, y)| x + y).collect(),
        a.shape.clone(),
    )
}

/// Multiply every element by `s`
pub fn scale(x: &Tensor, s: f32) -> Tensor {
    Tensor::new(x.data.iter().map(|v| v * s).collect(), x.shape.clone())
}

/// Copy row `index` of an embedding table into a vector
pub fn embedding_lookup(table: &Tensor, index: usize) -> Tensor {
    Tensor::from_vec(table.row(index).to_vec())
}

/// Scatter-add `grad` into row `index` of the table's gradient buffer
pub fn embedding_backward(grad: &Tensor, table: &mut Tensor, index: usize) {
    table.accumulate_row_grad(index, &grad.data);
}

/// Cross-entropy of logits against a target class
///
/// # Returns
///
/// `(loss, d_logits)` with `loss = -ln(softmax[target] + 1e-10)` and
/// `d_logits = softmax - onehot(target)`.
pub fn cross_entropy(logits: &Tensor, target: usize) -> (f32, Tensor) {
    let mut probs = softmax(logits);
    let loss = -(probs.data[target] + LOG_EPS).ln();
    probs.data[target] -= 1.0;
    (loss, probs)
}
