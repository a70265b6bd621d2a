//! Worker Message Protocol
//!
//! Requests and responses exchanged with the training worker. Both are
//! internally tagged JSON objects with a `type` field and camelCase fields:
//!
//! ```text
//! → {"type":"train","text":"...","modelConfig":{...},"adamConfig":{...}}
//! ← {"type":"ready","paramCount":30496,"vocabSize":27}
//! ← {"type":"progress","step":1,"loss":3.29,"totalSteps":500}
//! ← {"type":"weights-snapshot","weights":{...},"config":{...},"step":50}
//! ← {"type":"complete","finalLoss":1.87}
//! → {"type":"generate","temperature":0.8,"maxTokens":200}
//! ← {"type":"generated","text":"..."}
//! ```
//!
//! Request names are snake_case (`init_gpu`), response names kebab-case
//! (`gpu-status`, `weights-snapshot`).

use crate::backend::GpuStatus;
use crate::config::{AdamConfig, Architecture};
use crate::generate::DEFAULT_TEMPERATURE;
use crate::snapshot::{SnapshotConfig, WeightsSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default `maxTokens` of a generate request
pub const DEFAULT_MAX_TOKENS: usize = 200;

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

/// Messages the caller sends to the worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    /// Probe for a GPU and report `gpu-status`
    InitGpu,
    /// Validate, build a fresh model and train it
    Train {
        text: String,
        model_config: Architecture,
        #[serde(default)]
        adam_config: AdamConfig,
    },
    /// Sample from the most recently trained model
    Generate {
        #[serde(default = "default_temperature")]
        temperature: f32,
        #[serde(default = "default_max_tokens")]
        max_tokens: usize,
    },
    /// Ask a running training loop to stop at the next step boundary
    Stop,
}

/// Messages the worker sends back
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Response {
    Ready {
        param_count: usize,
        vocab_size: usize,
    },
    Progress {
        step: usize,
        loss: f32,
        total_steps: usize,
    },
    WeightsSnapshot {
        weights: Box<WeightsSnapshot>,
        config: SnapshotConfig,
        step: usize,
    },
    /// Training ended normally or by `stop`; `None` when no step ran
    Complete {
        final_loss: Option<f32>,
    },
    Generated {
        text: String,
    },
    /// A step or the whole run exceeded its budget; the worker shuts down
    Timeout {
        step: usize,
    },
    Error {
        message: String,
    },
    GpuStatus(GpuStatus),
}

impl Response {
    pub fn error(err: impl fmt::Display) -> Self {
        Response::Error {
            message: err.to_string(),
        }
    }

    /// The `type` tag of this message
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Ready { .. } => "ready",
            Response::Progress { .. } => "progress",
            Response::WeightsSnapshot { .. } => "weights-snapshot",
            Response::Complete { .. } => "complete",
            Response::Generated { .. } => "generated",
            Response::Timeout { .. } => "timeout",
            Response::Error { .. } => "error",
            Response::GpuStatus(_) => "gpu-status",
        }
    }
}
