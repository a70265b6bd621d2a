//! Tensors with Gradient Buffers
//!
//! This module provides the minimal tensor type the training engine is built
//! on. A tensor is a flat row-major `Vec<f32>` plus shape and stride metadata,
//! and optionally a gradient buffer of the same length.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f32>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[vocab, n_embd]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//! - **Grad**: Same-length accumulator, present only on trainable parameters
//!
//! Tensors are never resized after creation. Parameters are allocated once per
//! training run and mutated in place by the optimizer; gradients accumulate in
//! place across every position of a training step and are zeroed once at the
//! start of the step.
//!
//! ## Example
//!
//! ```rust
//! use microgpt::Tensor;
//!
//! let mut w = Tensor::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).with_grad();
//! assert_eq!(w.row(1), &[3.0, 4.0]);
//!
//! w.accumulate_grad(&[0.5, 0.5, 0.5, 0.5]);
//! w.zero_grad();
//! assert!(w.grad().unwrap().iter().all(|&g| g == 0.0));
//! ```
//!
//! ## Random Initialization
//!
//! [`Tensor::randn`] draws from `rand_distr::StandardNormal` over the caller's
//! RNG, so a seeded `StdRng` reproduces the same weights bit for bit.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// A multi-dimensional array with an optional gradient buffer
///
/// For shape `[2, 3]`, data is stored as
/// `[row0_col0, row0_col1, row0_col2, row1_col0, row1_col1, row1_col2]` and
/// strides are `[3, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f32>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
    /// Gradient accumulator, same length as `data` when present
    pub grad: Option<Vec<f32>>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Arguments
    ///
    /// * `data` - Flat vector of values
    /// * `shape` - Dimensions of the tensor
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    ///
    /// # Example
    ///
    /// ```rust
    /// # use microgpt::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(tensor.shape, vec![2, 2]);
    /// assert!(tensor.grad.is_none());
    /// ```
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
            grad: None,
        }
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![0.0; size], shape)
    }

    /// Create a tensor filled with ones
    pub fn ones(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![1.0; size], shape)
    }

    /// Create a 1-D tensor from a vector
    pub fn from_vec(data: Vec<f32>) -> Self {
        let len = data.len();
        Self::new(data, vec![len])
    }

    /// Create a 2-D tensor from literal rows
    ///
    /// # Panics
    ///
    /// Panics if the rows have different lengths
    pub fn from_rows(rows: &[Vec<f32>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            assert_eq!(row.len(), cols, "Ragged rows: expected {} columns", cols);
            data.extend_from_slice(row);
        }
        Self::new(data, vec![rows.len(), cols])
    }

    /// Create a tensor of Gaussian samples with mean 0 and the given std
    ///
    /// Every element is an independent `N(0, 1)` draw scaled by `std`, so
    /// the same seed always yields the same tensor.
    ///
    /// # Arguments
    ///
    /// * `shape` - Dimensions of the tensor
    /// * `std` - Standard deviation of every element
    /// * `rng` - Random source; pass a seeded `StdRng` for reproducibility
    pub fn randn<R: Rng + ?Sized>(shape: Vec<usize>, std: f32, rng: &mut R) -> Self {
        let size: usize = shape.iter().product();
        let data = (0..size)
            .map(|_| {
                let z: f32 = StandardNormal.sample(rng);
                z * std
            })
            .collect();
        Self::new(data, shape)
    }

    /// Compute strides from shape (row-major layout)
    ///
    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Attach a zeroed gradient buffer (builder style)
    pub fn with_grad(mut self) -> Self {
        self.grad = Some(vec![0.0; self.data.len()]);
        self
    }

    /// Total number of elements
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of rows of a 2-D tensor (length of a 1-D tensor is one row)
    pub fn rows(&self) -> usize {
        if self.shape.len() == 2 {
            self.shape[0]
        } else {
            1
        }
    }

    /// Number of columns of a 2-D tensor (length of a 1-D tensor)
    pub fn cols(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    /// Borrow row `i` of a 2-D tensor
    ///
    /// The returned slice shares the underlying buffer; it is read-only.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not 2-D or `i` is out of range
    pub fn row(&self, i: usize) -> &[f32] {
        assert_eq!(self.shape.len(), 2, "row() needs a 2-D tensor");
        assert!(i < self.shape[0], "Row {} out of range {}", i, self.shape[0]);
        let cols = self.shape[1];
        &self.data[i * cols..(i + 1) * cols]
    }

    /// Element at a multi-dimensional index
    pub fn get(&self, index: &[usize]) -> f32 {
        self.data[self.flat_index(index)]
    }

    /// Overwrite the element at a multi-dimensional index
    pub fn set(&mut self, index: &[usize], value: f32) {
        let flat = self.flat_index(index);
        self.data[flat] = value;
    }

    fn flat_index(&self, index: &[usize]) -> usize {
        assert_eq!(index.len(), self.shape.len(), "Index rank mismatch");
        index
            .iter()
            .zip(&self.strides)
            .map(|(&i, &stride)| i * stride)
            .sum()
    }

    /// Reshape to new dimensions (same element count)
    ///
    /// The gradient buffer, if any, is carried over unchanged.
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape: element count mismatch"
        );
        let mut out = Tensor::new(self.data.clone(), new_shape.to_vec());
        out.grad = self.grad.clone();
        out
    }

    /// Transpose a 2-D tensor
    ///
    /// # Example
    ///
    /// ```rust
    /// # use microgpt::Tensor;
    /// let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
    /// let tt = t.transpose();
    /// assert_eq!(tt.shape, vec![3, 2]);
    /// assert_eq!(tt.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    /// ```
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.shape.len(), 2, "transpose() needs a 2-D tensor");
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![0.0; rows * cols];

        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }

        Tensor::new(result, vec![cols, rows])
    }

    /// Borrow the gradient buffer, if any
    pub fn grad(&self) -> Option<&[f32]> {
        self.grad.as_deref()
    }

    /// Mutable gradient buffer, allocating a zeroed one on first use
    pub fn grad_mut(&mut self) -> &mut [f32] {
        let len = self.data.len();
        self.grad.get_or_insert_with(|| vec![0.0; len])
    }

    /// Reset the gradient buffer to zero (allocating it if absent)
    pub fn zero_grad(&mut self) {
        self.grad_mut().iter_mut().for_each(|g| *g = 0.0);
    }

    /// Add `delta` element-wise into the gradient buffer
    ///
    /// # Panics
    ///
    /// Panics if `delta` has a different length from the tensor
    pub fn accumulate_grad(&mut self, delta: &[f32]) {
        assert_eq!(delta.len(), self.data.len(), "Gradient length mismatch");
        for (g, &d) in self.grad_mut().iter_mut().zip(delta) {
            *g += d;
        }
    }

    /// Add `delta` into row `i` of the gradient buffer of a 2-D tensor
    pub fn accumulate_row_grad(&mut self, i: usize, delta: &[f32]) {
        assert_eq!(self.shape.len(), 2, "accumulate_row_grad() needs a 2-D tensor");
        let cols = self.shape[1];
        assert_eq!(delta.len(), cols, "Row gradient length mismatch");
        let row = &mut self.grad_mut()[i * cols..(i + 1) * cols];
        for (g, &d) in row.iter_mut().zip(delta) {
            *g += d;
        }
    }

    /// Add the outer product `a ⊗ b` into the gradient of a `[a.len(), b.len()]` tensor
    ///
    /// This is the weight gradient of a bias-free linear layer: for
    /// `y = W x`, `dW += dy ⊗ x`.
    pub fn accumulate_outer_grad(&mut self, a: &[f32], b: &[f32]) {
        assert_eq!(
            self.shape,
            vec![a.len(), b.len()],
            "Outer product shape mismatch"
        );
        let cols = b.len();
        let grad = self.grad_mut();
        for (i, &ai) in a.iter().enumerate() {
            if ai == 0.0 {
                continue;
            }
            let row = &mut grad[i * cols..(i + 1) * cols];
            for (g, &bj) in row.iter_mut().zip(b) {
                *g += ai * bj;
            }
        }
    }

    /// True when every element is finite
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}
