//! Model, Optimizer and Host Configuration
//!
//! Three groups of settings drive a training run:
//!
//! - [`Architecture`]: the transformer's shape as a caller asks for it
//!   (context window, depth, heads, width). The vocabulary is not known until
//!   the training text is tokenized, so [`Architecture::with_vocab`] turns it
//!   into a full [`ModelConfig`].
//! - [`AdamConfig`]: optimizer hyperparameters.
//! - [`HostLimits`]: resource limits the execution host enforces (text length,
//!   parameter budget, wall-clock budgets, message cadence).
//!
//! Both wire-facing configs serialize in camelCase (`nLayer`, `maxSteps`, ...).
//!
//! ## Parameter Count
//!
//! ```text
//! wte       vocab × E
//! wpe       block × E
//! per layer 4·E² (q, k, v, o) + 8·E² (fc1 [4E,E], fc2 [E,4E]) = 12·E²
//! lm_head   vocab × E
//! ```
//!
//! ## Validation
//!
//! [`validate_run`] checks a train request before any weight is allocated and
//! reports the first violated bound, naming the field.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds accepted for a train request
pub const N_LAYER_RANGE: (usize, usize) = (1, 8);
pub const N_HEAD_RANGE: (usize, usize) = (1, 8);
pub const N_EMBD_RANGE: (usize, usize) = (16, 256);
pub const BLOCK_SIZE_RANGE: (usize, usize) = (16, 128);
pub const MAX_STEPS_RANGE: (usize, usize) = (1, 2000);
pub const MAX_LR: f32 = 0.05;

/// Standard deviation of every initial weight
pub const INIT_STD: f32 = 0.08;

/// Transformer shape without the vocabulary
///
/// This is what a train request carries; the vocabulary comes from the text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Architecture {
    pub block_size: usize,
    pub n_layer: usize,
    pub n_head: usize,
    pub n_embd: usize,
}

impl Default for Architecture {
    fn default() -> Self {
        Self {
            block_size: 64,
            n_layer: 4,
            n_head: 4,
            n_embd: 64,
        }
    }
}

impl Architecture {
    /// **~30K parameters** (small vocabulary) - trains in seconds
    pub fn tiny() -> Self {
        Self {
            block_size: 32,
            n_layer: 2,
            n_head: 2,
            n_embd: 32,
        }
    }

    /// **~200K parameters** - the default shape
    pub fn small() -> Self {
        Self::default()
    }

    /// **~1.2M parameters** - noticeably slower per step
    pub fn medium() -> Self {
        Self {
            block_size: 64,
            n_layer: 6,
            n_head: 4,
            n_embd: 128,
        }
    }

    /// Look up a preset by name (`tiny`, `small`, `medium`)
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "tiny" => Some(Self::tiny()),
            "small" => Some(Self::small()),
            "medium" => Some(Self::medium()),
            _ => None,
        }
    }

    /// Names accepted by [`Architecture::preset`]
    pub const PRESETS: [&'static str; 3] = ["tiny", "small", "medium"];

    /// Complete the shape with a vocabulary size
    pub fn with_vocab(self, vocab_size: usize) -> ModelConfig {
        ModelConfig {
            vocab_size,
            block_size: self.block_size,
            n_layer: self.n_layer,
            n_head: self.n_head,
            n_embd: self.n_embd,
        }
    }

    /// Check every field against its accepted range
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("nLayer", self.n_layer, N_LAYER_RANGE)?;
        check_range("nHead", self.n_head, N_HEAD_RANGE)?;
        check_range("nEmbd", self.n_embd, N_EMBD_RANGE)?;
        if self.n_embd % self.n_head != 0 {
            return Err(ValidationError::HeadsNotDivisor {
                n_embd: self.n_embd,
                n_head: self.n_head,
            });
        }
        check_range("blockSize", self.block_size, BLOCK_SIZE_RANGE)?;
        Ok(())
    }
}

/// Full model configuration
///
/// Invariant: `n_embd % n_head == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub block_size: usize,
    pub n_layer: usize,
    pub n_head: usize,
    pub n_embd: usize,
}

impl ModelConfig {
    /// Width of one attention head
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }
}

/// Number of trainable parameters a model with this config has
///
/// # Example
///
/// ```rust
/// # use microgpt::config::{compute_param_count, ModelConfig};
/// let config = ModelConfig { vocab_size: 10, block_size: 16, n_layer: 1, n_head: 2, n_embd: 16 };
/// assert_eq!(compute_param_count(&config), 10 * 16 + 16 * 16 + 12 * 16 * 16 + 10 * 16);
/// ```
pub fn compute_param_count(config: &ModelConfig) -> usize {
    let e = config.n_embd;
    config.vocab_size * e
        + config.block_size * e
        + config.n_layer * 12 * e * e
        + config.vocab_size * e
}

/// Bytes held during training: weights, gradients and two Adam moments
pub fn estimate_memory_bytes(config: &ModelConfig) -> usize {
    compute_param_count(config) * std::mem::size_of::<f32>() * 4
}

/// Adam optimizer hyperparameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdamConfig {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub max_steps: usize,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            beta1: 0.85,
            beta2: 0.99,
            eps: 1e-8,
            max_steps: 1000,
        }
    }
}

impl AdamConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("lr", self.lr),
            ("beta1", self.beta1),
            ("beta2", self.beta2),
            ("eps", self.eps),
        ] {
            if !value.is_finite() {
                return Err(ValidationError::NotFinite { field });
            }
        }
        if self.lr <= 0.0 || self.lr > MAX_LR {
            return Err(ValidationError::LearningRate {
                value: self.lr,
                max: MAX_LR,
            });
        }
        check_range("maxSteps", self.max_steps, MAX_STEPS_RANGE)
    }
}

/// Limits enforced by the execution host
#[derive(Clone, Debug, PartialEq)]
pub struct HostLimits {
    /// Longest accepted training text, in characters
    pub max_text_len: usize,
    /// Largest accepted model
    pub max_param_count: usize,
    /// Wall-clock allowance for one training step
    pub step_budget: Duration,
    /// Wall-clock allowance for a whole run
    pub run_budget: Duration,
    /// Emit `progress` every this many steps (and always on the last)
    pub progress_interval: usize,
    /// Emit `weights-snapshot` every this many steps
    pub snapshot_interval: usize,
    /// Yield and drain pending requests every this many steps
    pub yield_interval: usize,
    /// How long GPU probing may take before falling back to CPU
    pub gpu_init_timeout: Duration,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            max_text_len: 50_000,
            max_param_count: 5_000_000,
            step_budget: Duration::from_secs(30),
            run_budget: Duration::from_secs(600),
            progress_interval: 1,
            snapshot_interval: 50,
            yield_interval: 10,
            gpu_init_timeout: Duration::from_secs(5),
        }
    }
}

/// Remove null characters and markup tags, then enforce the length and
/// emptiness limits
///
/// A tag is a `<` followed by everything up to the next `>`; a `<` with no
/// closing `>` is kept as text.
pub fn sanitize_text(text: &str, max_len: usize) -> Result<String, ValidationError> {
    let clean = strip_tags(&text.replace('\0', ""));
    let len = clean.chars().count();
    if len > max_len {
        return Err(ValidationError::TextTooLong { len, max: max_len });
    }
    if len == 0 {
        return Err(ValidationError::EmptyText);
    }
    Ok(clean)
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        match rest[open..].find('>') {
            Some(close) => rest = &rest[open + close + 1..],
            None => {
                rest = &rest[open..];
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// A train request that passed validation
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedRun {
    pub text: String,
    pub model: ModelConfig,
    pub adam: AdamConfig,
}

/// Validate a train request before any allocation
///
/// Order: text, architecture, optimizer, then the parameter budget computed
/// with the text's actual vocabulary.
pub fn validate_run(
    text: &str,
    arch: &Architecture,
    adam: &AdamConfig,
    limits: &HostLimits,
) -> Result<ValidatedRun, ValidationError> {
    let text = sanitize_text(text, limits.max_text_len)?;
    arch.validate()?;
    adam.validate()?;

    let distinct = text.chars().collect::<std::collections::BTreeSet<_>>().len();
    let model = arch.with_vocab(distinct + 1);
    let estimated = compute_param_count(&model);
    if estimated > limits.max_param_count {
        return Err(ValidationError::TooManyParams {
            estimated,
            max: limits.max_param_count,
        });
    }

    Ok(ValidatedRun {
        text,
        model,
        adam: *adam,
    })
}

fn check_range(
    field: &'static str,
    value: usize,
    (min, max): (usize, usize),
) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for name in Architecture::PRESETS {
            let arch = Architecture::preset(name).unwrap();
            assert!(arch.validate().is_ok(), "{} preset invalid", name);
        }
        assert!(Architecture::preset("huge").is_none());
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = serde_json::to_value(Architecture::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"blockSize": 64, "nLayer": 4, "nHead": 4, "nEmbd": 64})
        );

        let adam: AdamConfig = serde_json::from_str(r#"{"lr": 0.02, "maxSteps": 300}"#).unwrap();
        assert_eq!(adam.lr, 0.02);
        assert_eq!(adam.max_steps, 300);
        assert_eq!(adam.beta1, 0.85);
    }

    #[test]
    fn test_architecture_bounds() {
        let mut arch = Architecture::default();
        arch.n_layer = 9;
        assert_eq!(arch.validate().unwrap_err().to_string(), "nLayer must be 1-8, got 9");

        let arch = Architecture {
            n_embd: 48,
            n_head: 5,
            ..Architecture::default()
        };
        assert_eq!(
            arch.validate().unwrap_err().to_string(),
            "nEmbd (48) must be divisible by nHead (5)"
        );

        let arch = Architecture {
            block_size: 8,
            ..Architecture::default()
        };
        assert!(matches!(
            arch.validate(),
            Err(ValidationError::OutOfRange { field: "blockSize", .. })
        ));
    }

    #[test]
    fn test_adam_bounds() {
        let bad_lr = AdamConfig {
            lr: 0.0,
            ..AdamConfig::default()
        };
        assert_eq!(bad_lr.validate().unwrap_err().to_string(), "lr must be (0, 0.05], got 0");

        let nan = AdamConfig {
            lr: f32::NAN,
            ..AdamConfig::default()
        };
        assert_eq!(nan.validate(), Err(ValidationError::NotFinite { field: "lr" }));

        let steps = AdamConfig {
            max_steps: 2001,
            ..AdamConfig::default()
        };
        assert!(steps.validate().is_err());
        assert!(AdamConfig::default().validate().is_ok());
    }

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("a\0b", 10).unwrap(), "ab");
        assert_eq!(sanitize_text("<b>bold</b> 1 < 2", 20).unwrap(), "bold 1 < 2");
        assert_eq!(sanitize_text("<script>", 10), Err(ValidationError::EmptyText));
        assert_eq!(sanitize_text("\0\0", 10), Err(ValidationError::EmptyText));
        assert_eq!(
            sanitize_text("abcdef", 5),
            Err(ValidationError::TextTooLong { len: 6, max: 5 })
        );
    }

    #[test]
    fn test_validate_run_uses_text_vocabulary() {
        let run = validate_run(
            "abcabc",
            &Architecture::tiny(),
            &AdamConfig::default(),
            &HostLimits::default(),
        )
        .unwrap();
        assert_eq!(run.model.vocab_size, 4);
        assert_eq!(run.model.n_embd, 32);
    }

    #[test]
    fn test_validate_run_param_budget() {
        let limits = HostLimits {
            max_param_count: 1_000,
            ..HostLimits::default()
        };
        let err = validate_run("abc", &Architecture::tiny(), &AdamConfig::default(), &limits)
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooManyParams { max: 1_000, .. }));
    }

    #[test]
    fn test_memory_estimate() {
        let config = Architecture::tiny().with_vocab(10);
        assert_eq!(estimate_memory_bytes(&config), compute_param_count(&config) * 16);
    }
}
