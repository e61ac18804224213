#[cfg(test)]
#[path = "../tests/unit/weights_test.rs"]
mod tests;

use anyhow::{Context, Result};
use log::{info, warn};
use std::{collections::HashMap, path::Path};

use crate::loader::{TensorReader, TensorSet};
use crate::tensor::Matrix;

pub const EMBEDDING_TENSOR: &str = "E";
pub const POSITIONAL_EMBEDDING_TENSOR: &str = "positional_embedding";
pub const OUTPUT_BIAS_TENSOR: &str = "output_bias";

/// Per-block tensor name prefixes; the block index follows an underscore (`WQ_0`).
pub const BLOCK_TENSOR_PREFIXES: [&str; 5] = ["WQ", "WK", "WV", "W1", "W2"];

/// Parameters of a single transformer block.
#[derive(Clone)]
pub struct BlockWeights {
    /// Query projection, shape: [dim, dim]
    pub wq: Matrix,
    /// Key projection, shape: [dim, dim]
    pub wk: Matrix,
    /// Value projection, shape: [dim, dim]
    pub wv: Matrix,
    /// Feed-forward expansion, shape: [dim, hidden_dim]
    pub w1: Matrix,
    /// Feed-forward contraction, shape: [hidden_dim, dim]
    pub w2: Matrix,
}

impl std::fmt::Debug for BlockWeights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockWeights")
            .field("dim", &self.wq.rows())
            .field("hidden_dim", &self.w1.cols())
            .finish()
    }
}

/// Immutable bundle of all learned parameters.
///
/// Loaded once and then only read, so it can be shared across any number of
/// concurrent generation calls.
#[derive(Debug, Clone)]
pub struct ModelWeights {
    /// Token embedding table, doubles as the transposed output projection.
    /// Shape: [vocab_size, dim]
    pub embedding: Matrix,
    /// Shape: [max_context_length, dim]
    pub positional_embedding: Matrix,
    /// Shape: [vocab_size]
    pub output_bias: Vec<f32>,
    /// Ordered `0..n_blocks`.
    pub blocks: Vec<BlockWeights>,
    /// String metadata from the checkpoint header.
    pub metadata: HashMap<String, String>,
}

impl ModelWeights {
    /// Assembles and validates a weight bundle.
    pub fn new(
        embedding: Matrix,
        positional_embedding: Matrix,
        output_bias: Vec<f32>,
        blocks: Vec<BlockWeights>,
    ) -> Result<Self> {
        let weights = Self { embedding, positional_embedding, output_bias, blocks, metadata: HashMap::new() };
        weights.validate()?;
        Ok(weights)
    }

    /// Loads weights from a safetensors checkpoint.
    pub fn load(checkpoint_path: &Path) -> Result<Self> {
        let tensors = TensorReader::open(checkpoint_path)?.read()?;
        let weights = Self::from_tensors(tensors)
            .with_context(|| format!("Invalid checkpoint {}", checkpoint_path.display()))?;

        info!("Model weights loaded from {}:", checkpoint_path.display());
        info!("   • Vocabulary size: {}", weights.vocab_size());
        info!("   • Dimensions: {}", weights.dim());
        info!("   • Hidden dimensions: {}", weights.hidden_dim());
        info!("   • Blocks: {}", weights.blocks.len());
        info!("   • Max context length: {}", weights.max_context_length());

        Ok(weights)
    }

    pub(crate) fn from_tensors(mut tensors: TensorSet) -> Result<Self> {
        let n_blocks = count_blocks(tensors.names())?;

        let embedding = tensors.take_matrix(EMBEDDING_TENSOR)?;
        let positional_embedding = tensors.take_matrix(POSITIONAL_EMBEDDING_TENSOR)?;
        let output_bias = tensors.take_vector(OUTPUT_BIAS_TENSOR)?;

        let blocks = (0..n_blocks)
            .map(|idx| {
                Ok(BlockWeights {
                    wq: tensors.take_matrix(&format!("WQ_{idx}"))?,
                    wk: tensors.take_matrix(&format!("WK_{idx}"))?,
                    wv: tensors.take_matrix(&format!("WV_{idx}"))?,
                    w1: tensors.take_matrix(&format!("W1_{idx}"))?,
                    w2: tensors.take_matrix(&format!("W2_{idx}"))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let remaining = tensors.names().map(str::to_owned).collect::<Vec<_>>();
        if !remaining.is_empty() {
            warn!("Ignoring unrecognised tensors: {remaining:?}");
        }

        let weights = Self {
            embedding,
            positional_embedding,
            output_bias,
            blocks,
            metadata: tensors.metadata().clone(),
        };
        weights.validate()?;

        Ok(weights)
    }

    pub fn dim(&self) -> usize {
        self.embedding.cols()
    }

    pub fn vocab_size(&self) -> usize {
        self.embedding.rows()
    }

    pub fn max_context_length(&self) -> usize {
        self.positional_embedding.rows()
    }

    /// Feed-forward width, or 0 for a model without blocks.
    pub fn hidden_dim(&self) -> usize {
        self.blocks.first().map_or(0, |block| block.w1.cols())
    }

    /// Checks that `dim` agrees across all matrices and every block is well formed.
    pub fn validate(&self) -> Result<()> {
        let dim = self.dim();
        let vocab_size = self.vocab_size();
        let hidden_dim = self.hidden_dim();

        if dim == 0 || vocab_size == 0 {
            anyhow::bail!("Embedding matrix {EMBEDDING_TENSOR} must be non-empty, got {:?}", self.embedding.shape());
        }

        if self.positional_embedding.cols() != dim || self.positional_embedding.rows() == 0 {
            anyhow::bail!(
                "{POSITIONAL_EMBEDDING_TENSOR} shape {:?} is inconsistent with dim {dim}",
                self.positional_embedding.shape()
            );
        }

        if self.output_bias.len() != vocab_size {
            anyhow::bail!(
                "{OUTPUT_BIAS_TENSOR} length {} does not match vocabulary size {vocab_size}",
                self.output_bias.len()
            );
        }

        for (idx, block) in self.blocks.iter().enumerate() {
            let expected = [
                ("WQ", &block.wq, (dim, dim)),
                ("WK", &block.wk, (dim, dim)),
                ("WV", &block.wv, (dim, dim)),
                ("W1", &block.w1, (dim, hidden_dim)),
                ("W2", &block.w2, (hidden_dim, dim)),
            ];

            for (prefix, matrix, shape) in expected {
                if matrix.shape() != shape {
                    anyhow::bail!("{prefix}_{idx} has shape {:?}, expected {shape:?}", matrix.shape());
                }
            }
        }

        if hidden_dim == 0 && !self.blocks.is_empty() {
            anyhow::bail!("Feed-forward hidden dimension must be positive");
        }

        Ok(())
    }
}

/// Derives the block count from the highest block index present.
///
/// Every index below the maximum must be present for all prefixes; gaps are
/// reported as missing tensors when the block is assembled.
fn count_blocks<'a>(names: impl Iterator<Item = &'a str>) -> Result<usize> {
    let mut max_index = None;

    for name in names {
        let Some((prefix, suffix)) = name.rsplit_once('_') else {
            continue;
        };
        if !BLOCK_TENSOR_PREFIXES.contains(&prefix) {
            continue;
        }
        let index: usize = suffix.parse().with_context(|| format!("Invalid block index in tensor name {name}"))?;
        max_index = max_index.max(Some(index));
    }

    if max_index.is_none() {
        warn!("Checkpoint contains no transformer blocks");
    }

    match max_index {
        Some(idx) => idx.checked_add(1).with_context(|| format!("Block index {idx} out of range")),
        None => Ok(0),
    }
}
