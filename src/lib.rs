//! MicroGPT: Incremental Transformer Training Engine
//!
//! A small character-level GPT trained one token position at a time, with a
//! hand-written backward pass, a bias-corrected Adam optimizer, an optional
//! GPU compute backend, and a worker thread that runs training under time
//! budgets and a cancellable message protocol.
//!
//! # Modules
//!
//! - [`tensor`] - Flat `f32` buffers with shape, strides and a gradient buffer
//! - [`ops`] - CPU kernels and their derivatives
//! - [`backend`] - CPU/GPU backend trait and selection
//! - `gpu` - wgpu compute pipelines (feature `gpu`)
//! - [`tokenizer`] - Character vocabulary with a boundary token
//! - [`config`] - Model presets, optimizer settings, host limits, validation
//! - [`model`] - Incremental forward and per-position backward
//! - [`train`] - Training step with two-pass cross-position accumulation
//! - [`optimizer`] - Adam with linear learning-rate decay
//! - [`generate`] - Temperature sampling
//! - [`grad_check`] - Finite-difference gradient verification
//! - [`snapshot`] - Nested-array weight copies for observers
//! - [`messages`], [`session`], [`worker`] - The execution host
//! - [`progress`] - Loss history and console reporting
//!
//! # Example
//!
//! ```rust
//! use microgpt::{train_step, AdamConfig, AdamOptimizer, CharTokenizer, MicroGpt, ModelConfig};
//!
//! let text = "hello world";
//! let tokenizer = CharTokenizer::new(text);
//! let config = ModelConfig {
//!     vocab_size: tokenizer.vocab_size(),
//!     block_size: 16,
//!     n_layer: 1,
//!     n_head: 2,
//!     n_embd: 16,
//! };
//! let mut model = MicroGpt::new(config);
//! let mut optimizer = AdamOptimizer::new(&model, AdamConfig::default());
//!
//! let tokens = tokenizer.encode_doc(text);
//! for _ in 0..5 {
//!     let loss = train_step(&mut model, &tokens).unwrap();
//!     optimizer.step(&mut model);
//!     assert!(loss.is_finite());
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod generate;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod grad_check;
pub mod messages;
pub mod model;
pub mod ops;
pub mod optimizer;
pub mod progress;
pub mod session;
pub mod snapshot;
pub mod tensor;
pub mod tokenizer;
pub mod train;
pub mod worker;

// Re-export main types for convenience
pub use backend::{select_backend, BackendKind, ComputeBackend, CpuBackend, GpuStatus};
pub use config::{
    compute_param_count, estimate_memory_bytes, validate_run, AdamConfig, Architecture,
    HostLimits, ModelConfig,
};
pub use error::{EngineError, GpuError, Result, ValidationError};
pub use generate::{generate, generate_with_rng, DEFAULT_TEMPERATURE};
pub use grad_check::{grad_check, GradCheckOptions, GradCheckReport};
pub use messages::{Request, Response};
pub use model::{CrossPositionGrads, KvCache, KvGrads, MicroGpt, StepCache};
pub use optimizer::AdamOptimizer;
pub use session::{RunOutcome, TrainingSession};
pub use snapshot::{SnapshotConfig, WeightsSnapshot};
pub use tensor::Tensor;
pub use tokenizer::CharTokenizer;
pub use train::{sequence_loss, train_step, CrossPositionAccumulator};
pub use worker::WorkerHandle;
