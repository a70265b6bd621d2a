//! Adam Optimizer with Linear Decay
//!
//! Bias-corrected Adam over the model's flattened parameter list, with a
//! learning rate that falls linearly to zero over the configured run length.
//!
//! ## Algorithm
//!
//! For each parameter θ with gradient g, at step t (1-based):
//!
//! ```text
//! lr_t  = lr · max(0, 1 - (t-1) / max_steps)
//! m     = β₁·m + (1-β₁)·g
//! v     = β₂·v + (1-β₂)·g²
//! m_hat = m / (1 - β₁^t)
//! v_hat = v / (1 - β₂^t)
//! θ     = θ - lr_t · m_hat / (√v_hat + ε)
//! ```
//!
//! There is no weight decay. Moment buffers follow the order of
//! [`MicroGpt::parameters`] and live for one training run; a new run builds a
//! new optimizer.
//!
//! ## Example
//!
//! ```rust
//! use microgpt::{AdamConfig, AdamOptimizer, MicroGpt, ModelConfig};
//!
//! let config = ModelConfig { vocab_size: 4, block_size: 8, n_layer: 1, n_head: 1, n_embd: 8 };
//! let mut model = MicroGpt::new(config);
//! let mut opt = AdamOptimizer::new(&model, AdamConfig::default());
//!
//! // ... train_step fills the gradients ...
//! opt.step(&mut model);
//! assert_eq!(opt.step_count(), 1);
//! ```

use crate::config::AdamConfig;
use crate::model::MicroGpt;
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Tensors with more elements than this are updated in parallel
const PARALLEL_UPDATE_LEN: usize = 1000;

/// Adam state: one first and one second moment buffer per parameter
#[derive(Clone, Debug)]
pub struct AdamOptimizer {
    pub config: AdamConfig,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
    step: usize,
}

impl AdamOptimizer {
    /// Zeroed moments shaped like `model`'s parameters
    pub fn new(model: &MicroGpt, config: AdamConfig) -> Self {
        let zeros: Vec<Vec<f32>> = model
            .parameters()
            .iter()
            .map(|p| vec![0.0; p.size()])
            .collect();
        Self {
            config,
            m: zeros.clone(),
            v: zeros,
            step: 0,
        }
    }

    /// Steps taken so far
    pub fn step_count(&self) -> usize {
        self.step
    }

    /// Learning rate the next call to [`AdamOptimizer::step`] will use
    pub fn current_lr(&self) -> f32 {
        decayed_lr(self.config.lr, self.step + 1, self.config.max_steps)
    }

    /// Apply one update from the gradients accumulated in `model`
    ///
    /// Parameters without a gradient buffer are left untouched.
    ///
    /// # Panics
    ///
    /// Panics if `model` has a different parameter layout from the one this
    /// optimizer was built for
    pub fn step(&mut self, model: &mut MicroGpt) {
        self.step += 1;
        let t = self.step as i32;
        let lr = decayed_lr(self.config.lr, self.step, self.config.max_steps);
        let AdamConfig {
            beta1, beta2, eps, ..
        } = self.config;
        let bias_correction1 = 1.0 - beta1.powi(t);
        let bias_correction2 = 1.0 - beta2.powi(t);

        let update = |theta: &mut f32, g: f32, m: &mut f32, v: &mut f32| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / bias_correction1;
            let v_hat = *v / bias_correction2;
            *theta -= lr * m_hat / (v_hat.sqrt() + eps);
        };

        let params = model.parameters_mut();
        assert_eq!(params.len(), self.m.len(), "Optimizer/model layout mismatch");

        for ((param, m), v) in params.into_iter().zip(&mut self.m).zip(&mut self.v) {
            let Tensor { data, grad, .. } = param;
            let Some(grad) = grad.as_deref() else {
                continue;
            };
            assert_eq!(data.len(), m.len(), "Optimizer/model layout mismatch");

            if data.len() > PARALLEL_UPDATE_LEN {
                data.par_iter_mut()
                    .zip(grad.par_iter())
                    .zip(m.par_iter_mut().zip(v.par_iter_mut()))
                    .for_each(|((theta, &g), (m, v))| update(theta, g, m, v));
            } else {
                for (((theta, &g), m), v) in data.iter_mut().zip(grad).zip(m.iter_mut()).zip(v.iter_mut()) {
                    update(theta, g, m, v);
                }
            }
        }
    }
}

/// `lr · max(0, 1 - (t-1)/max_steps)` for 1-based step `t`
pub fn decayed_lr(lr: f32, t: usize, max_steps: usize) -> f32 {
    let progress = t.saturating_sub(1) as f32 / max_steps.max(1) as f32;
    lr * (1.0 - progress).max(0.0)
}
