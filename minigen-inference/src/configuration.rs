use anyhow::{Context, Result};

use crate::weights::ModelWeights;

/// Metadata key holding the attention head count in the checkpoint header.
pub const NUM_HEADS_METADATA_KEY: &str = "num_heads";
/// Head count used when neither the checkpoint nor the caller provides one.
pub const DEFAULT_NUM_HEADS: usize = 4;
/// Epsilon added to the standard deviation in layer normalization.
pub const DEFAULT_NORM_EPS: f32 = 1e-8;

/// Configuration struct for transformer models.
///
/// Every dimension is derived from the loaded tensors except the head count
/// and the normalization epsilon, which the tensors cannot express.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub dim: usize,
    pub hidden_dim: usize,
    pub n_blocks: usize,
    pub n_heads: usize,
    pub head_dim: usize,
    /// Maximum context length (rows of the positional embedding, possibly reduced).
    pub seq_len: usize,
    pub vocab_size: usize,
    pub norm_eps: f32,
}

impl ModelConfig {
    /// Derives the configuration from loaded weights.
    ///
    /// `n_heads` falls back to the checkpoint's `num_heads` metadata and then to
    /// [`DEFAULT_NUM_HEADS`]; `ctx_length` may only shrink the context window.
    pub fn from_weights(
        weights: &ModelWeights,
        n_heads: Option<usize>,
        ctx_length: Option<usize>,
        norm_eps: Option<f32>,
    ) -> Result<Self> {
        let n_heads = match (n_heads, weights.metadata.get(NUM_HEADS_METADATA_KEY)) {
            (Some(n_heads), _) => n_heads,
            (None, Some(value)) => value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {NUM_HEADS_METADATA_KEY} metadata: {value:?}"))?,
            (None, None) => DEFAULT_NUM_HEADS,
        };

        let dim = weights.dim();
        let max_seq_len = weights.max_context_length();
        let seq_len = ctx_length.map_or(max_seq_len, |ctx_len| ctx_len.min(max_seq_len));

        let config = Self {
            dim,
            hidden_dim: weights.hidden_dim(),
            n_blocks: weights.blocks.len(),
            n_heads,
            head_dim: if n_heads > 0 { dim / n_heads } else { 0 },
            seq_len,
            vocab_size: weights.vocab_size(),
            norm_eps: norm_eps.unwrap_or(DEFAULT_NORM_EPS),
        };

        validate_config(&config).with_context(|| "Invalid model configuration")?;

        Ok(config)
    }
}

/// Validates the model configuration to ensure it's supported.
fn validate_config(config: &ModelConfig) -> Result<()> {
    let dimensions = [
        ("dim", config.dim),
        ("n_heads", config.n_heads),
        ("vocab_size", config.vocab_size),
        ("seq_len", config.seq_len),
    ];

    for (name, value) in dimensions {
        if value == 0 {
            anyhow::bail!("Invalid {name}: must be positive, got {value}");
        }
    }

    if config.dim % config.n_heads != 0 {
        anyhow::bail!("n_heads ({}) must divide dim ({}) evenly", config.n_heads, config.dim);
    }

    if !(config.norm_eps.is_finite() && config.norm_eps > 0.0) {
        anyhow::bail!("Invalid norm_eps: must be positive and finite, got {}", config.norm_eps);
    }

    Ok(())
}
