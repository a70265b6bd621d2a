//! Incremental GPT Model
//!
//! A small GPT-style transformer that processes **one token position at a
//! time**. Keys and values of earlier positions live in a [`KvCache`], so the
//! forward pass for position `pos` only computes the new row of the attention
//! pattern. Every intermediate is kept in a [`StepCache`] for the
//! hand-written backward pass.
//!
//! ## Architecture
//!
//! ```text
//! token id, position id
//!     ↓
//! wte[token] + wpe[pos] → RMS-norm
//!     ↓
//! ┌── layer × n_layer ─────────────────────────────────────────┐
//! │ x_norm1 = RMS-norm(x)                                      │
//! │ q, k, v = wq·x_norm1, wk·x_norm1, wv·x_norm1               │
//! │ append k, v to the cache                                   │
//! │ per head h: w = softmax(q_h·k_h[t] / √head_dim), t ≤ pos    │
//! │             mix_h = Σ_t w[t] v_h[t]                        │
//! │ x = x + wo·mix                                             │
//! │ x = x + fc2·relu(fc1·RMS-norm(x))                          │
//! └────────────────────────────────────────────────────────────┘
//!     ↓
//! logits = lm_head·x
//! ```
//!
//! There are no biases and the RMS-norms have no learned scale.
//!
//! ## Backward Across Positions
//!
//! Position `pos` attends to the keys and values of every `t ≤ pos`, so its
//! loss also flows into those earlier positions. [`MicroGpt::backward`] handles
//! the `t == pos` part itself and hands back the `t < pos` parts as
//! [`CrossPositionGrads`]. The training step sums them per target position
//! (see [`crate::train`]) and, because positions are processed in reverse, the
//! sum for position `t` is complete by the time `t` is processed. It comes back
//! in as `inflow`: routed through `wkᵀ`/`wvᵀ` into `t`'s residual stream
//! during its backward, and through [`MicroGpt::apply_deferred_kv_grads`] into
//! the `wk`/`wv` weight gradients afterwards.
//!
//! ## Example
//!
//! ```rust
//! use microgpt::{KvCache, MicroGpt, ModelConfig};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let config = ModelConfig { vocab_size: 5, block_size: 8, n_layer: 1, n_head: 2, n_embd: 8 };
//! let model = MicroGpt::with_rng(config, &mut StdRng::seed_from_u64(0));
//! let mut kv = KvCache::new(config.n_layer);
//!
//! let (logits, _cache) = model.forward(4, 0, &mut kv);
//! assert_eq!(logits.size(), 5);
//! assert_eq!(kv.seq_len(), 1);
//! ```

use crate::backend::{ComputeBackend, CpuBackend};
use crate::config::{compute_param_count, ModelConfig, INIT_STD};
use crate::ops::{self, axpy, dot};
use crate::tensor::Tensor;
use rand::Rng;
use std::sync::Arc;

/// Weights of one transformer layer, each `[out, in]`
#[derive(Clone, Debug)]
pub struct LayerWeights {
    pub wq: Tensor,
    pub wk: Tensor,
    pub wv: Tensor,
    pub wo: Tensor,
    /// `[4E, E]`
    pub fc1: Tensor,
    /// `[E, 4E]`
    pub fc2: Tensor,
}

impl LayerWeights {
    fn new<R: Rng + ?Sized>(n_embd: usize, rng: &mut R) -> Self {
        let mut param = |rows, cols| Tensor::randn(vec![rows, cols], INIT_STD, rng).with_grad();
        Self {
            wq: param(n_embd, n_embd),
            wk: param(n_embd, n_embd),
            wv: param(n_embd, n_embd),
            wo: param(n_embd, n_embd),
            fc1: param(4 * n_embd, n_embd),
            fc2: param(n_embd, 4 * n_embd),
        }
    }

    fn tensors(&self) -> [&Tensor; 6] {
        [&self.wq, &self.wk, &self.wv, &self.wo, &self.fc1, &self.fc2]
    }

    fn tensors_mut(&mut self) -> [&mut Tensor; 6] {
        [
            &mut self.wq,
            &mut self.wk,
            &mut self.wv,
            &mut self.wo,
            &mut self.fc1,
            &mut self.fc2,
        ]
    }
}

const LAYER_PARAM_NAMES: [&str; 6] = ["wq", "wk", "wv", "wo", "fc1", "fc2"];

/// Keys and values of every processed position, per layer
///
/// Append-only: after processing position `pos`, each layer holds `pos + 1`
/// entries. Rebuilt for every document.
#[derive(Clone, Debug, Default)]
pub struct KvCache {
    pub keys: Vec<Vec<Tensor>>,
    pub values: Vec<Vec<Tensor>>,
}

impl KvCache {
    pub fn new(n_layer: usize) -> Self {
        Self {
            keys: vec![Vec::new(); n_layer],
            values: vec![Vec::new(); n_layer],
        }
    }

    /// Positions cached so far
    pub fn seq_len(&self) -> usize {
        self.keys.first().map_or(0, Vec::len)
    }

    fn push(&mut self, layer: usize, k: Tensor, v: Tensor) {
        self.keys[layer].push(k);
        self.values[layer].push(v);
    }
}

/// Intermediates of one layer at one position
#[derive(Clone, Debug)]
pub struct LayerCache {
    /// Residual stream entering the layer
    pub x_in: Tensor,
    pub x_norm1: Tensor,
    pub rms1: f32,
    pub q: Tensor,
    pub k: Tensor,
    pub v: Tensor,
    /// Softmax output per head, each of length `pos + 1`
    pub attn_weights: Vec<Tensor>,
    /// Concatenated head outputs, input of `wo`
    pub attn_mix: Tensor,
    /// Residual stream after attention
    pub x_mid: Tensor,
    pub x_norm2: Tensor,
    pub rms2: f32,
    pub fc1_out: Tensor,
    pub fc1_act: Tensor,
    /// Residual stream leaving the layer
    pub x_out: Tensor,
}

/// Everything the backward pass needs about one forward position
#[derive(Clone, Debug)]
pub struct StepCache {
    pub token_id: usize,
    pub pos_id: usize,
    pub tok_emb: Tensor,
    pub pos_emb: Tensor,
    /// `tok_emb + pos_emb`, before the initial RMS-norm
    pub x_embed: Tensor,
    pub x_norm0: Tensor,
    pub rms0: f32,
    pub layers: Vec<LayerCache>,
}

impl StepCache {
    /// Input of the LM head
    pub fn final_hidden(&self) -> &Tensor {
        self.layers.last().map_or(&self.x_norm0, |l| &l.x_out)
    }
}

/// Key/value gradients aimed at one position, one `[E]` vector per layer
#[derive(Clone, Debug)]
pub struct KvGrads {
    pub d_k: Vec<Tensor>,
    pub d_v: Vec<Tensor>,
}

impl KvGrads {
    pub fn zeros(n_layer: usize, n_embd: usize) -> Self {
        Self {
            d_k: vec![Tensor::zeros(vec![n_embd]); n_layer],
            d_v: vec![Tensor::zeros(vec![n_embd]); n_layer],
        }
    }

    /// Add another position's contribution for `layer`
    pub fn add(&mut self, layer: usize, d_k: &Tensor, d_v: &Tensor) {
        for (a, b) in self.d_k[layer].data.iter_mut().zip(&d_k.data) {
            *a += b;
        }
        for (a, b) in self.d_v[layer].data.iter_mut().zip(&d_v.data) {
            *a += b;
        }
    }
}

/// Gradients one backward step sends to earlier positions
///
/// `d_k[layer][t]` / `d_v[layer][t]` for every `t < pos`: the gradient of this
/// position's loss with respect to the key/value vector of position `t`.
#[derive(Clone, Debug)]
pub struct CrossPositionGrads {
    pub pos: usize,
    pub d_k: Vec<Vec<Tensor>>,
    pub d_v: Vec<Vec<Tensor>>,
}

/// The transformer: parameters plus the compute backend they run on
#[derive(Clone, Debug)]
pub struct MicroGpt {
    pub config: ModelConfig,
    /// Token embeddings `[vocab, E]`
    pub wte: Tensor,
    /// Position embeddings `[block, E]`
    pub wpe: Tensor,
    /// Output projection `[vocab, E]`
    pub lm_head: Tensor,
    pub layers: Vec<LayerWeights>,
    backend: Arc<dyn ComputeBackend>,
}

impl MicroGpt {
    /// Create a model with weights drawn from the thread RNG
    ///
    /// # Panics
    ///
    /// Panics if `n_embd` is not divisible by `n_head` or any dimension is zero
    pub fn new(config: ModelConfig) -> Self {
        Self::with_rng(config, &mut rand::rng())
    }

    /// Create a model with every weight drawn from N(0, 0.08²) using `rng`
    ///
    /// Gradient buffers are allocated zeroed. The backend is the CPU until
    /// [`MicroGpt::with_backend`] replaces it.
    pub fn with_rng<R: Rng + ?Sized>(config: ModelConfig, rng: &mut R) -> Self {
        assert!(
            config.vocab_size > 0 && config.block_size > 0 && config.n_head > 0,
            "Model dimensions must be non-zero: {:?}",
            config
        );
        assert_eq!(
            config.n_embd % config.n_head,
            0,
            "n_embd ({}) must be divisible by n_head ({})",
            config.n_embd,
            config.n_head
        );

        let e = config.n_embd;
        let wte = Tensor::randn(vec![config.vocab_size, e], INIT_STD, rng).with_grad();
        let wpe = Tensor::randn(vec![config.block_size, e], INIT_STD, rng).with_grad();
        let layers = (0..config.n_layer)
            .map(|_| LayerWeights::new(e, rng))
            .collect();
        let lm_head = Tensor::randn(vec![config.vocab_size, e], INIT_STD, rng).with_grad();

        Self {
            config,
            wte,
            wpe,
            lm_head,
            layers,
            backend: Arc::new(CpuBackend),
        }
    }

    /// Route forward computation through `backend`
    pub fn with_backend(mut self, backend: Arc<dyn ComputeBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    /// Process one token at one position
    ///
    /// Appends this position's keys and values to `kv` and returns the logits
    /// over the vocabulary together with every intermediate.
    ///
    /// # Panics
    ///
    /// Panics if `token_id` or `pos_id` is out of range, or if `kv` does not
    /// hold exactly `pos_id` earlier positions
    pub fn forward(&self, token_id: usize, pos_id: usize, kv: &mut KvCache) -> (Tensor, StepCache) {
        let cfg = &self.config;
        assert!(
            token_id < cfg.vocab_size,
            "token {} out of vocabulary {}",
            token_id,
            cfg.vocab_size
        );
        assert!(
            pos_id < cfg.block_size,
            "position {} outside context window {}",
            pos_id,
            cfg.block_size
        );
        assert_eq!(kv.seq_len(), pos_id, "KV cache out of step with position");

        let b = self.backend.as_ref();
        let head_dim = cfg.head_dim();
        let scale = 1.0 / (head_dim as f32).sqrt();

        let tok_emb = ops::embedding_lookup(&self.wte, token_id);
        let pos_emb = ops::embedding_lookup(&self.wpe, pos_id);
        let x_embed = b.add(&tok_emb, &pos_emb);
        let (x_norm0, rms0) = b.rms_norm(&x_embed);

        let mut x = x_norm0.clone();
        let mut layer_caches = Vec::with_capacity(self.layers.len());

        for (li, layer) in self.layers.iter().enumerate() {
            let x_in = x;
            let (x_norm1, rms1) = b.rms_norm(&x_in);
            let q = b.linear(&x_norm1, &layer.wq);
            let k = b.linear(&x_norm1, &layer.wk);
            let v = b.linear(&x_norm1, &layer.wv);
            kv.push(li, k.clone(), v.clone());

            let keys = &kv.keys[li];
            let values = &kv.values[li];
            let mut mix = vec![0.0; cfg.n_embd];
            let mut attn_weights = Vec::with_capacity(cfg.n_head);

            for h in 0..cfg.n_head {
                let hs = h * head_dim..(h + 1) * head_dim;
                let q_h = &q.data[hs.clone()];
                let scores: Vec<f32> = keys.iter().map(|k_t| dot(q_h, &k_t.data[hs.clone()])).collect();
                let weights = b.softmax(&b.scale(&Tensor::from_vec(scores), scale));
                for (t, v_t) in values.iter().enumerate() {
                    axpy(weights.data[t], &v_t.data[hs.clone()], &mut mix[hs.clone()]);
                }
                attn_weights.push(weights);
            }

            let attn_mix = Tensor::from_vec(mix);
            let x_mid = b.add(&b.linear(&attn_mix, &layer.wo), &x_in);

            let (x_norm2, rms2) = b.rms_norm(&x_mid);
            let fc1_out = b.linear(&x_norm2, &layer.fc1);
            let fc1_act = b.relu(&fc1_out);
            let x_out = b.add(&b.linear(&fc1_act, &layer.fc2), &x_mid);

            x = x_out.clone();
            layer_caches.push(LayerCache {
                x_in,
                x_norm1,
                rms1,
                q,
                k,
                v,
                attn_weights,
                attn_mix,
                x_mid,
                x_norm2,
                rms2,
                fc1_out,
                fc1_act,
                x_out,
            });
        }

        let logits = b.linear(&x, &self.lm_head);
        let cache = StepCache {
            token_id,
            pos_id,
            tok_emb,
            pos_emb,
            x_embed,
            x_norm0,
            rms0,
            layers: layer_caches,
        };
        (logits, cache)
    }

    /// Backpropagate one position's logit gradient
    ///
    /// Accumulates into the gradient buffers of every parameter this position
    /// touched, including the `t == pos` share of `wk`/`wv`.
    ///
    /// # Arguments
    ///
    /// * `d_logits` - Gradient of the loss with respect to this position's logits
    /// * `cache` - This position's forward intermediates
    /// * `kv` - The full key/value cache of the sequence
    /// * `inflow` - Summed key/value gradients that later positions sent here;
    ///   routed into this position's input path (their weight share is applied
    ///   later by [`MicroGpt::apply_deferred_kv_grads`])
    ///
    /// # Returns
    ///
    /// The key/value gradients this position sends to every earlier position
    pub fn backward(
        &mut self,
        d_logits: &Tensor,
        cache: &StepCache,
        kv: &KvCache,
        inflow: &KvGrads,
    ) -> CrossPositionGrads {
        let n_embd = self.config.n_embd;
        let n_head = self.config.n_head;
        let head_dim = self.config.head_dim();
        let scale = 1.0 / (head_dim as f32).sqrt();
        let pos = cache.pos_id;
        let seq = pos + 1;

        let mut d_x = ops::linear_backward_into(d_logits, cache.final_hidden(), &mut self.lm_head);

        let mut cross = CrossPositionGrads {
            pos,
            d_k: vec![Vec::new(); self.layers.len()],
            d_v: vec![Vec::new(); self.layers.len()],
        };

        for li in (0..self.layers.len()).rev() {
            let lc = &cache.layers[li];
            let layer = &mut self.layers[li];

            // feed-forward block
            let d_fc1_act = ops::linear_backward_into(&d_x, &lc.fc1_act, &mut layer.fc2);
            let d_fc1_out = ops::relu_backward(&d_fc1_act, &lc.fc1_out);
            let d_xn2 = ops::linear_backward_into(&d_fc1_out, &lc.x_norm2, &mut layer.fc1);
            let d_mid = ops::add(&d_x, &ops::rms_norm_backward(&d_xn2, &lc.x_mid, lc.rms2));

            // attention
            let d_mix = ops::linear_backward_into(&d_mid, &lc.attn_mix, &mut layer.wo);
            let keys = &kv.keys[li];
            let values = &kv.values[li];

            let mut d_q = vec![0.0; n_embd];
            let mut d_k = vec![vec![0.0; n_embd]; seq];
            let mut d_v = vec![vec![0.0; n_embd]; seq];

            for h in 0..n_head {
                let hs = h * head_dim..(h + 1) * head_dim;
                let weights = &lc.attn_weights[h];
                let d_mix_h = &d_mix.data[hs.clone()];

                let mut d_weights = vec![0.0; seq];
                for t in 0..seq {
                    d_weights[t] = dot(d_mix_h, &values[t].data[hs.clone()]);
                    axpy(weights.data[t], d_mix_h, &mut d_v[t][hs.clone()]);
                }

                let d_scores = ops::softmax_backward(&Tensor::from_vec(d_weights), weights);
                let q_h = &lc.q.data[hs.clone()];
                for t in 0..seq {
                    let g = d_scores.data[t] * scale;
                    axpy(g, &keys[t].data[hs.clone()], &mut d_q[hs.clone()]);
                    axpy(g, q_h, &mut d_k[t][hs.clone()]);
                }
            }

            // projections: query, then own key/value plus what later positions sent
            let d_k_self = Tensor::from_vec(d_k.pop().unwrap_or_default());
            let d_v_self = Tensor::from_vec(d_v.pop().unwrap_or_default());

            let mut d_xn1 = ops::linear_backward_into(&Tensor::from_vec(d_q), &lc.x_norm1, &mut layer.wq);
            layer.wk.accumulate_outer_grad(&d_k_self.data, &lc.x_norm1.data);
            layer.wv.accumulate_outer_grad(&d_v_self.data, &lc.x_norm1.data);
            let d_k_total = ops::add(&d_k_self, &inflow.d_k[li]);
            let d_v_total = ops::add(&d_v_self, &inflow.d_v[li]);
            d_xn1 = ops::add(&d_xn1, &ops::linear_input_grad(&d_k_total, &layer.wk));
            d_xn1 = ops::add(&d_xn1, &ops::linear_input_grad(&d_v_total, &layer.wv));

            d_x = ops::add(&d_mid, &ops::rms_norm_backward(&d_xn1, &lc.x_in, lc.rms1));

            cross.d_k[li] = d_k.into_iter().map(Tensor::from_vec).collect();
            cross.d_v[li] = d_v.into_iter().map(Tensor::from_vec).collect();
        }

        let d_embed = ops::rms_norm_backward(&d_x, &cache.x_embed, cache.rms0);
        ops::embedding_backward(&d_embed, &mut self.wte, cache.token_id);
        ops::embedding_backward(&d_embed, &mut self.wpe, cache.pos_id);

        cross
    }

    /// Apply the weight share of the key/value gradients other positions sent
    /// to `cache`'s position: `dWk += d_k ⊗ x_norm1`, `dWv += d_v ⊗ x_norm1`
    pub fn apply_deferred_kv_grads(&mut self, cache: &StepCache, inflow: &KvGrads) {
        for (li, layer) in self.layers.iter_mut().enumerate() {
            let x_norm1 = &cache.layers[li].x_norm1;
            layer.wk.accumulate_outer_grad(&inflow.d_k[li].data, &x_norm1.data);
            layer.wv.accumulate_outer_grad(&inflow.d_v[li].data, &x_norm1.data);
        }
    }

    /// All parameters in optimizer order:
    /// `wte, wpe, lm_head`, then `wq, wk, wv, wo, fc1, fc2` per layer
    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.wte, &self.wpe, &self.lm_head];
        for layer in &self.layers {
            params.extend(layer.tensors());
        }
        params
    }

    /// Mutable parameters, same order as [`MicroGpt::parameters`]
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.wte, &mut self.wpe, &mut self.lm_head];
        for layer in &mut self.layers {
            params.extend(layer.tensors_mut());
        }
        params
    }

    /// Names matching [`MicroGpt::parameters`], e.g. `layer0.wq`
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = vec!["wte".to_string(), "wpe".to_string(), "lm_head".to_string()];
        for li in 0..self.layers.len() {
            names.extend(LAYER_PARAM_NAMES.iter().map(|n| format!("layer{}.{}", li, n)));
        }
        names
    }

    /// Total number of trainable scalars
    pub fn param_count(&self) -> usize {
        self.parameters().iter().map(|p| p.size()).sum()
    }

    /// Reset every gradient buffer to zero
    pub fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.zero_grad();
        }
    }

    /// True when every weight is finite
    pub fn is_finite(&self) -> bool {
        self.parameters().iter().all(|p| p.is_finite())
    }

    /// Expected parameter total for this model's config
    pub fn expected_param_count(&self) -> usize {
        compute_param_count(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny() -> ModelConfig {
        ModelConfig {
            vocab_size: 6,
            block_size: 8,
            n_layer: 2,
            n_head: 2,
            n_embd: 8,
        }
    }

    fn model(seed: u64) -> MicroGpt {
        MicroGpt::with_rng(tiny(), &mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_shapes_and_param_count() {
        let m = model(1);
        assert_eq!(m.wte.shape, vec![6, 8]);
        assert_eq!(m.wpe.shape, vec![8, 8]);
        assert_eq!(m.layers[0].fc1.shape, vec![32, 8]);
        assert_eq!(m.layers[0].fc2.shape, vec![8, 32]);
        assert_eq!(m.param_count(), compute_param_count(&m.config));
        assert_eq!(m.param_count(), m.expected_param_count());
    }

    #[test]
    fn test_parameter_order_and_names() {
        let m = model(1);
        let names = m.parameter_names();
        assert_eq!(names.len(), m.parameters().len());
        assert_eq!(&names[..4], &["wte", "wpe", "lm_head", "layer0.wq"]);
        assert_eq!(names.last().unwrap(), "layer1.fc2");
        assert!(m.parameters().iter().all(|p| p.grad().is_some()));
    }

    #[test]
    fn test_forward_grows_cache() {
        let m = model(2);
        let mut kv = KvCache::new(2);
        for (pos, &tok) in [5usize, 0, 3].iter().enumerate() {
            let (logits, cache) = m.forward(tok, pos, &mut kv);
            assert_eq!(logits.size(), 6);
            assert!(logits.is_finite());
            assert_eq!(cache.layers.len(), 2);
            assert_eq!(cache.layers[0].attn_weights[0].size(), pos + 1);
            let total: f32 = cache.layers[1].attn_weights[1].data.iter().sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
        assert_eq!(kv.seq_len(), 3);
        assert_eq!(kv.values[1].len(), 3);
    }

    #[test]
    fn test_forward_is_deterministic() {
        let m = model(3);
        let (a, _) = m.forward(1, 0, &mut KvCache::new(2));
        let (b, _) = m.forward(1, 0, &mut KvCache::new(2));
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_first_position_attends_only_to_itself() {
        let m = model(4);
        let mut kv = KvCache::new(2);
        let (_, cache) = m.forward(2, 0, &mut kv);
        for lc in &cache.layers {
            for w in &lc.attn_weights {
                assert_eq!(w.data, vec![1.0]);
            }
            assert_eq!(lc.attn_mix.data, lc.v.data);
        }
    }

    #[test]
    #[should_panic(expected = "KV cache out of step")]
    fn test_forward_rejects_skipped_position() {
        let m = model(5);
        m.forward(1, 2, &mut KvCache::new(2));
    }

    #[test]
    fn test_backward_returns_grads_for_earlier_positions() {
        let mut m = model(6);
        let mut kv = KvCache::new(2);
        let caches: Vec<StepCache> = [5usize, 1, 2]
            .iter()
            .enumerate()
            .map(|(pos, &tok)| m.forward(tok, pos, &mut kv).1)
            .collect();

        m.zero_grad();
        let d_logits = Tensor::from_vec(vec![0.1, -0.5, 0.1, 0.1, 0.1, 0.1]);
        let inflow = KvGrads::zeros(2, 8);
        let cross = m.backward(&d_logits, &caches[2], &kv, &inflow);

        assert_eq!(cross.pos, 2);
        assert_eq!(cross.d_k[0].len(), 2);
        assert_eq!(cross.d_v[1].len(), 2);
        assert!(m.lm_head.grad().unwrap().iter().any(|&g| g != 0.0));
        // only the embedding rows of this token and position receive gradient
        assert!(m.wte.grad().unwrap()[..8].iter().all(|&g| g == 0.0));
        assert!(m.wte.grad().unwrap()[16..24].iter().any(|&g| g != 0.0));
        assert!(m.wpe.grad().unwrap()[16..24].iter().any(|&g| g != 0.0));
    }

    #[test]
    fn test_zero_grad_clears_everything() {
        let mut m = model(7);
        for p in m.parameters_mut() {
            p.grad_mut().iter_mut().for_each(|g| *g = 1.0);
        }
        m.zero_grad();
        assert!(m
            .parameters()
            .iter()
            .all(|p| p.grad().unwrap().iter().all(|&g| g == 0.0)));
    }
}
