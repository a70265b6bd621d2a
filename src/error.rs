//! Error Types
//!
//! Every fallible operation in the crate returns [`Result`]. Three families of
//! failure exist, mirroring how the execution host reports them:
//!
//! - **Validation**: malformed or out-of-range configuration/text, rejected
//!   before any weights are allocated. Always recoverable.
//! - **Budget**: a step or whole run exceeded its wall-clock allowance. The
//!   host reports these as a `timeout` message, not through this type.
//! - **Runtime**: GPU failures (downgraded to CPU, never fatal) and protocol
//!   misuse such as generating before training.

use thiserror::Error;

/// Errors produced by the training engine and its host.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("document needs at least 2 tokens to form a training pair, got {0}")]
    DocumentTooShort(usize),

    #[error("token {token} outside vocabulary of {vocab}")]
    TokenOutOfRange { token: usize, vocab: usize },

    #[error("loss became non-finite at step {0}")]
    Diverged(usize),

    #[error("Model not trained yet")]
    ModelNotTrained,

    #[error("training worker is no longer running")]
    WorkerGone,

    #[error("worker panicked: {0}")]
    WorkerPanic(String),
}

/// Input validation failures. Messages name the field and its bound.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Input text cannot be empty")]
    EmptyText,

    #[error("Input text too long: {len} > {max}")]
    TextTooLong { len: usize, max: usize },

    #[error("{field} must be {min}-{max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: usize,
        max: usize,
        value: usize,
    },

    #[error("nEmbd ({n_embd}) must be divisible by nHead ({n_head})")]
    HeadsNotDivisor { n_embd: usize, n_head: usize },

    #[error("lr must be (0, {max}], got {value}")]
    LearningRate { value: f32, max: f32 },

    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },

    #[error("Model too large: ~{estimated} params exceeds limit of {max}")]
    TooManyParams { estimated: usize, max: usize },
}

/// GPU initialization and dispatch failures.
///
/// None of these abort training: the backend logs them and continues on CPU.
#[derive(Debug, Clone, Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("GPU initialization timed out after {0:?}")]
    InitTimeout(std::time::Duration),

    #[error("failed to request device: {0}")]
    DeviceRequest(String),

    #[error("GPU device lost")]
    DeviceLost,

    #[error("buffer mapping failed: {0}")]
    BufferMap(String),

    #[error("GPU validation error: {0}")]
    Validation(String),

    #[error("GPU support not compiled in (enable the `gpu` feature)")]
    NotCompiled,
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, EngineError>;
