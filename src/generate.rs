//! Autoregressive Sampling
//!
//! Generation reuses the incremental forward pass: starting from the boundary
//! token at position 0, each step feeds the previously sampled token, scales
//! the logits by `1 / max(temperature, 1e-6)`, and draws the next token from
//! the softmax by walking the cumulative distribution. Zero, negative and NaN
//! temperatures all clamp to `1e-6`, which is effectively argmax.
//!
//! Sampling stops when the boundary token comes up again (it is never part of
//! the output) or after `min(max_tokens, block_size)` positions.

use crate::error::{EngineError, Result};
use crate::model::{KvCache, MicroGpt};
use crate::ops;
use crate::tensor::Tensor;
use crate::tokenizer::CharTokenizer;
use rand::Rng;

/// Smallest temperature used for scaling; lower values behave like argmax
pub const MIN_TEMPERATURE: f32 = 1e-6;

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Index of the first cumulative probability that reaches `r`
///
/// Falls back to the last index when rounding leaves the total below `r`.
fn sample_from_probs(probs: &Tensor, r: f32) -> usize {
    let mut cumulative = 0.0;
    for (i, &p) in probs.data.iter().enumerate() {
        cumulative += p;
        if r <= cumulative {
            return i;
        }
    }
    probs.size() - 1
}

/// Generate text with the thread RNG
///
/// # Errors
///
/// [`EngineError::TokenOutOfRange`] when the tokenizer's boundary token does
/// not fit the model's vocabulary
pub fn generate(
    model: &MicroGpt,
    tokenizer: &CharTokenizer,
    max_tokens: usize,
    temperature: f32,
) -> Result<String> {
    generate_with_rng(model, tokenizer, max_tokens, temperature, &mut rand::rng())
}

/// Generate text drawing from `rng`
///
/// # Example
///
/// ```rust
/// use microgpt::{generate_with_rng, CharTokenizer, MicroGpt, ModelConfig};
/// use rand::{rngs::StdRng, SeedableRng};
///
/// let tok = CharTokenizer::new("abc");
/// let config = ModelConfig { vocab_size: tok.vocab_size(), block_size: 16, n_layer: 1, n_head: 2, n_embd: 16 };
/// let model = MicroGpt::with_rng(config, &mut StdRng::seed_from_u64(1));
///
/// let text = generate_with_rng(&model, &tok, 10, 0.8, &mut StdRng::seed_from_u64(2)).unwrap();
/// assert!(text.chars().count() <= 10);
/// ```
pub fn generate_with_rng<R: Rng + ?Sized>(
    model: &MicroGpt,
    tokenizer: &CharTokenizer,
    max_tokens: usize,
    temperature: f32,
    rng: &mut R,
) -> Result<String> {
    let boundary = tokenizer.boundary_token();
    if boundary >= model.config.vocab_size {
        return Err(EngineError::TokenOutOfRange {
            token: boundary,
            vocab: model.config.vocab_size,
        });
    }

    let limit = max_tokens.min(model.config.block_size);
    let inv_temp = 1.0 / temperature.max(MIN_TEMPERATURE);

    let mut kv = KvCache::new(model.config.n_layer);
    let mut token = boundary;
    let mut generated = Vec::with_capacity(limit);

    for pos in 0..limit {
        let (logits, _) = model.forward(token, pos, &mut kv);
        let probs = ops::softmax(&ops::scale(&logits, inv_temp));
        token = sample_from_probs(&probs, rng.random::<f32>());
        if token == boundary {
            break;
        }
        generated.push(token);
    }

    Ok(tokenizer.decode(&generated))
}
