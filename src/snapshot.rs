//! Weight Snapshots for Observers
//!
//! Training periodically publishes a deep copy of the weights reshaped into
//! nested row arrays, the layout a visualizer consumes. Snapshots never alias
//! the live tensors, so training keeps mutating the originals freely.
//!
//! ## Layout
//!
//! ```text
//! token_embedding      [vocab][E]
//! position_embedding   [block][E]
//! lm_head              [vocab][E]
//! ln_f_weight          [E]            all 1.0 (RMS-norm has no scale)
//! blocks[l]
//!   ln1_weight, ln2_weight  [E]       all 1.0
//!   attn.proj_weight        [E][E]    wo
//!   attn.heads[h]           query/key/value_weight [head_dim][E], rows of head h
//!   ffwd.net_0_weight       [4E][E]   fc1
//!   ffwd.net_2_weight       [E][4E]   fc2
//! ```

use crate::config::ModelConfig;
use crate::model::MicroGpt;
use crate::tensor::Tensor;
use crate::tokenizer::CharTokenizer;
use serde::{Deserialize, Serialize};

pub type Matrix = Vec<Vec<f32>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadWeights {
    pub query_weight: Matrix,
    pub key_weight: Matrix,
    pub value_weight: Matrix,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttentionWeights {
    pub proj_weight: Matrix,
    pub heads: Vec<HeadWeights>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedForwardWeights {
    pub net_0_weight: Matrix,
    pub net_2_weight: Matrix,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockWeights {
    pub ln1_weight: Vec<f32>,
    pub ln2_weight: Vec<f32>,
    pub attn: AttentionWeights,
    pub ffwd: FeedForwardWeights,
}

/// All weights of a model as nested arrays
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightsSnapshot {
    pub token_embedding: Matrix,
    pub position_embedding: Matrix,
    pub ln_f_weight: Vec<f32>,
    pub lm_head: Matrix,
    pub blocks: Vec<BlockWeights>,
}

/// Model shape plus the character of every token id
///
/// `chars[i]` is the text of token `i`; the boundary token maps to `""`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub n_embd: usize,
    pub n_head: usize,
    pub n_layer: usize,
    pub vocab_size: usize,
    pub block_size: usize,
    pub chars: Vec<String>,
}

impl SnapshotConfig {
    pub fn new(config: &ModelConfig, tokenizer: &CharTokenizer) -> Self {
        let chars = (0..config.vocab_size)
            .map(|id| tokenizer.decode(&[id]))
            .collect();
        Self {
            n_embd: config.n_embd,
            n_head: config.n_head,
            n_layer: config.n_layer,
            vocab_size: config.vocab_size,
            block_size: config.block_size,
            chars,
        }
    }
}

fn rows(t: &Tensor, start: usize, end: usize) -> Matrix {
    (start..end).map(|r| t.row(r).to_vec()).collect()
}

fn matrix(t: &Tensor) -> Matrix {
    rows(t, 0, t.rows())
}

impl WeightsSnapshot {
    /// Copy every weight of `model`
    pub fn capture(model: &MicroGpt) -> Self {
        let e = model.config.n_embd;
        let head_dim = model.config.head_dim();
        let ones = vec![1.0; e];

        let blocks = model
            .layers
            .iter()
            .map(|layer| BlockWeights {
                ln1_weight: ones.clone(),
                ln2_weight: ones.clone(),
                attn: AttentionWeights {
                    proj_weight: matrix(&layer.wo),
                    heads: (0..model.config.n_head)
                        .map(|h| {
                            let (start, end) = (h * head_dim, (h + 1) * head_dim);
                            HeadWeights {
                                query_weight: rows(&layer.wq, start, end),
                                key_weight: rows(&layer.wk, start, end),
                                value_weight: rows(&layer.wv, start, end),
                            }
                        })
                        .collect(),
                },
                ffwd: FeedForwardWeights {
                    net_0_weight: matrix(&layer.fc1),
                    net_2_weight: matrix(&layer.fc2),
                },
            })
            .collect();

        Self {
            token_embedding: matrix(&model.wte),
            position_embedding: matrix(&model.wpe),
            ln_f_weight: ones,
            lm_head: matrix(&model.lm_head),
            blocks,
        }
    }
}
