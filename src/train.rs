//! Training Step
//!
//! One training step runs the model over a window of a tokenized document,
//! one position at a time, and accumulates the gradient of the mean
//! next-token cross-entropy into every parameter.
//!
//! ## Window
//!
//! ```text
//! tokens:  [b, h, e, l, l, o, b]        n = min(block_size, len - 1)
//! inputs:   b  h  e  l  l  o            positions 0..n
//! targets:  h  e  l  l  o  b            tokens[pos + 1]
//! ```
//!
//! ## Two Passes
//!
//! 1. **Forward** over `0..n`, keeping every [`StepCache`] in an arena indexed
//!    by position while the [`KvCache`] grows.
//! 2. **Backward, reverse order** `n-1..=0`. Each position's key/value
//!    gradients for earlier positions are summed into a
//!    [`CrossPositionAccumulator`] slot per target position. Because later
//!    positions run first, the slot of position `t` is complete when `t` is
//!    reached and feeds `t`'s own input gradient.
//! 3. **Deferred key/value weights**, `0..n`: each slot is pushed through its
//!    position's cached normalized input into the `wk`/`wv` gradients.
//!
//! Gradients are zeroed once at the start of the step and only accumulate
//! afterwards; the optimizer runs after [`train_step`] returns.

use crate::error::{EngineError, Result};
use crate::model::{CrossPositionGrads, KvCache, KvGrads, MicroGpt, StepCache};
use crate::ops;
use crate::tensor::Tensor;
use tracing::trace;

/// Summed cross-position key/value gradients, indexed by target position
#[derive(Clone, Debug)]
pub struct CrossPositionAccumulator {
    slots: Vec<KvGrads>,
}

impl CrossPositionAccumulator {
    pub fn new(n_positions: usize, n_layer: usize, n_embd: usize) -> Self {
        Self {
            slots: vec![KvGrads::zeros(n_layer, n_embd); n_positions],
        }
    }

    /// Add every off-diagonal contribution of one backward step
    pub fn absorb(&mut self, grads: &CrossPositionGrads) {
        for (layer, (d_k, d_v)) in grads.d_k.iter().zip(&grads.d_v).enumerate() {
            for (t, (dk_t, dv_t)) in d_k.iter().zip(d_v).enumerate() {
                self.slots[t].add(layer, dk_t, dv_t);
            }
        }
    }

    /// Everything later positions sent to position `t`
    pub fn inflow(&self, t: usize) -> &KvGrads {
        &self.slots[t]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Number of positions a step trains on
pub fn window_len(block_size: usize, n_tokens: usize) -> usize {
    block_size.min(n_tokens.saturating_sub(1))
}

/// The `step`-th training window of a long document
///
/// Windows of `block_size + 1` tokens tile the document, overlapping by one
/// token, and wrap around. The last window is aligned to the end of the
/// document, so every window trains exactly `block_size` positions; it may
/// overlap its predecessor by more than one token. A document that fits in one
/// window always yields the whole document.
///
/// ```text
/// tokens 0..10, block_size 4:   [0..=4]  [4..=8]  [5..=9]  [0..=4] ...
/// ```
pub fn window_for_step(tokens: &[usize], block_size: usize, step: usize) -> &[usize] {
    let pairs = tokens.len().saturating_sub(1);
    if pairs <= block_size {
        return tokens;
    }
    let n_windows = pairs.div_ceil(block_size);
    let start = ((step % n_windows) * block_size).min(pairs - block_size);
    &tokens[start..start + block_size + 1]
}

fn check_tokens(model: &MicroGpt, tokens: &[usize]) -> Result<usize> {
    if tokens.len() < 2 {
        return Err(EngineError::DocumentTooShort(tokens.len()));
    }
    let vocab = model.config.vocab_size;
    if let Some(&token) = tokens.iter().find(|&&t| t >= vocab) {
        return Err(EngineError::TokenOutOfRange { token, vocab });
    }
    Ok(window_len(model.config.block_size, tokens.len()))
}

/// Forward over the window, returning the arena of caches and the per-position
/// logits
fn forward_window(
    model: &MicroGpt,
    tokens: &[usize],
    n: usize,
) -> (KvCache, Vec<StepCache>, Vec<Tensor>) {
    let mut kv = KvCache::new(model.config.n_layer);
    let mut caches = Vec::with_capacity(n);
    let mut logits = Vec::with_capacity(n);
    for pos in 0..n {
        let (l, cache) = model.forward(tokens[pos], pos, &mut kv);
        caches.push(cache);
        logits.push(l);
    }
    (kv, caches, logits)
}

/// One forward/backward pass over the first window of `tokens`
///
/// Zeroes all gradients, then accumulates the gradient of the mean
/// cross-entropy over `n = min(block_size, tokens.len() - 1)` positions.
///
/// # Returns
///
/// The mean loss over the window
///
/// # Errors
///
/// [`EngineError::DocumentTooShort`] for fewer than 2 tokens and
/// [`EngineError::TokenOutOfRange`] for ids outside the vocabulary
pub fn train_step(model: &mut MicroGpt, tokens: &[usize]) -> Result<f32> {
    let n = check_tokens(model, tokens)?;
    let (kv, caches, logits) = forward_window(model, tokens, n);

    let inv_n = 1.0 / n as f32;
    let mut total_loss = 0.0;
    let mut d_logits = Vec::with_capacity(n);
    for (pos, l) in logits.iter().enumerate() {
        let (loss, grad) = ops::cross_entropy(l, tokens[pos + 1]);
        total_loss += loss;
        d_logits.push(ops::scale(&grad, inv_n));
    }

    model.zero_grad();
    let mut acc = CrossPositionAccumulator::new(n, model.config.n_layer, model.config.n_embd);

    for pos in (0..n).rev() {
        let cross = model.backward(&d_logits[pos], &caches[pos], &kv, acc.inflow(pos));
        acc.absorb(&cross);
    }

    for t in 0..n {
        model.apply_deferred_kv_grads(&caches[t], acc.inflow(t));
    }

    let mean = total_loss * inv_n;
    trace!(positions = n, loss = mean, "train step");
    Ok(mean)
}

/// Mean cross-entropy over the first window of `tokens`, forward only
pub fn sequence_loss(model: &MicroGpt, tokens: &[usize]) -> Result<f32> {
    let n = check_tokens(model, tokens)?;
    let (_, _, logits) = forward_window(model, tokens, n);
    let total: f32 = logits
        .iter()
        .enumerate()
        .map(|(pos, l)| ops::cross_entropy(l, tokens[pos + 1]).0)
        .sum();
    Ok(total / n as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model() -> MicroGpt {
        let config = ModelConfig {
            vocab_size: 5,
            block_size: 4,
            n_layer: 1,
            n_head: 2,
            n_embd: 8,
        };
        MicroGpt::with_rng(config, &mut StdRng::seed_from_u64(11))
    }

    #[test]
    fn test_window_len() {
        assert_eq!(window_len(16, 7), 6);
        assert_eq!(window_len(4, 100), 4);
        assert_eq!(window_len(4, 1), 0);
    }

    #[test]
    fn test_window_for_step_tiles_document() {
        let tokens: Vec<usize> = (0..10).collect();
        assert_eq!(window_for_step(&tokens, 4, 0), &[0, 1, 2, 3, 4]);
        assert_eq!(window_for_step(&tokens, 4, 1), &[4, 5, 6, 7, 8]);
        assert_eq!(window_for_step(&tokens, 4, 2), &[5, 6, 7, 8, 9]);
        assert_eq!(window_for_step(&tokens, 4, 3), &[0, 1, 2, 3, 4]);
        assert_eq!(window_for_step(&tokens[..4], 4, 7), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_every_window_trains_full_block() {
        for len in 6..40 {
            let tokens: Vec<usize> = (0..len).collect();
            let mut covered = vec![false; len];
            for step in 0..len {
                let w = window_for_step(&tokens, 5, step);
                assert_eq!(window_len(5, w.len()), 5, "len {} step {}", len, step);
                w.iter().for_each(|&t| covered[t] = true);
            }
            assert!(covered.iter().all(|&c| c), "len {} not fully covered", len);
        }
    }

    #[test]
    fn test_rejects_short_documents() {
        let mut m = model();
        assert!(matches!(
            train_step(&mut m, &[1]),
            Err(EngineError::DocumentTooShort(1))
        ));
        assert!(matches!(
            sequence_loss(&m, &[]),
            Err(EngineError::DocumentTooShort(0))
        ));
    }

    #[test]
    fn test_rejects_unknown_tokens() {
        let mut m = model();
        assert!(matches!(
            train_step(&mut m, &[0, 9, 1]),
            Err(EngineError::TokenOutOfRange { token: 9, vocab: 5 })
        ));
    }

    #[test]
    fn test_train_step_matches_forward_loss() {
        let mut m = model();
        let tokens = [4, 0, 1, 2, 3, 4];
        let expected = sequence_loss(&m, &tokens).unwrap();
        let loss = train_step(&mut m, &tokens).unwrap();
        assert!((loss - expected).abs() < 1e-6);
    }

    #[test]
    fn test_gradients_do_not_carry_over_between_steps() {
        let mut m = model();
        let tokens = [4, 0, 1, 2];
        train_step(&mut m, &tokens).unwrap();
        let first: Vec<f32> = m.lm_head.grad().unwrap().to_vec();
        train_step(&mut m, &tokens).unwrap();
        assert_eq!(m.lm_head.grad().unwrap(), first.as_slice());
    }

    #[test]
    fn test_accumulator_sums_per_target_position() {
        let mut acc = CrossPositionAccumulator::new(3, 1, 2);
        let grads = |pos: usize, val: f32| CrossPositionGrads {
            pos,
            d_k: vec![(0..pos).map(|_| Tensor::from_vec(vec![val, 0.0])).collect()],
            d_v: vec![(0..pos).map(|_| Tensor::from_vec(vec![0.0, val])).collect()],
        };
        acc.absorb(&grads(2, 1.0));
        acc.absorb(&grads(1, 0.5));
        assert_eq!(acc.inflow(0).d_k[0].data, vec![1.5, 0.0]);
        assert_eq!(acc.inflow(1).d_v[0].data, vec![0.0, 1.0]);
        assert_eq!(acc.inflow(2).d_k[0].data, vec![0.0, 0.0]);
        assert_eq!(acc.len(), 3);
    }
}
