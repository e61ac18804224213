#[cfg(test)]
#[path = "../tests/unit/transformer_test.rs"]
mod tests;

use anyhow::Result;
use log::debug;
use std::path::{Path, PathBuf};

use crate::configuration::ModelConfig;
use crate::layers::*;
use crate::tensor::Matrix;
use crate::weights::{BlockWeights, ModelWeights};

/// A model that maps a token window to a next-token distribution per position.
pub trait LanguageModel {
    /// Runs the forward pass over `tokens` (at most `config().seq_len` of them).
    ///
    /// Returns a `[tokens.len(), vocab_size]` matrix whose rows are probability
    /// distributions.
    fn forward(&self, tokens: &[usize]) -> Matrix;

    fn config(&self) -> &ModelConfig;
}

/// Main Transformer model: a stack of post-norm self-attention blocks over
/// learned token and position embeddings.
///
/// **Process Flow:**
/// 1. **Embedding**: `X[t] = E[id[t]] + P[t]`
/// 2. **Transformer Blocks**: attention and feed-forward sublayers, each
///    followed by a residual add and LayerNorm
/// 3. **Tied Output Head**: `logits = X · Eᵗ + bias`
/// 4. **Softmax**: per position, over the vocabulary
///
/// The model holds no per-call state, so one instance can serve concurrent
/// requests through a shared reference.
pub struct Transformer {
    config: ModelConfig,
    token_embedding: TokenEmbedding,
    positional_embedding: PositionalEmbedding,
    blocks: Vec<TransformerBlock>,
    lm_head: TiedOutputHead,
}

impl Transformer {
    pub fn new(config: ModelConfig, weights: ModelWeights) -> Result<Self> {
        weights.validate()?;

        if weights.blocks.len() != config.n_blocks || weights.dim() != config.dim {
            anyhow::bail!("Model configuration {config:?} does not match the supplied weights");
        }

        let ModelWeights { embedding, positional_embedding, output_bias, blocks, .. } = weights;

        let blocks = blocks
            .into_iter()
            .enumerate()
            .map(|(block_idx, block_weights)| TransformerBlock::new(&config, block_weights, block_idx))
            .collect();

        Ok(Self {
            token_embedding: TokenEmbedding::new(embedding),
            positional_embedding: PositionalEmbedding::new(positional_embedding),
            blocks,
            lm_head: TiedOutputHead::new(output_bias),
            config,
        })
    }

    /// Unnormalized output scores for every position of the window.
    ///
    /// Windows longer than `seq_len` are cut to their trailing `seq_len` tokens.
    pub fn logits(&self, tokens: &[usize]) -> Matrix {
        let tokens = if tokens.len() > self.config.seq_len {
            debug!("Truncating {} tokens to the last {}", tokens.len(), self.config.seq_len);
            &tokens[tokens.len() - self.config.seq_len..]
        } else {
            tokens
        };

        // Token + position embedding
        let mut x = self.token_embedding.forward(tokens);
        self.positional_embedding.forward_inplace(&mut x);

        // Process through transformer blocks
        for block in &self.blocks {
            x = block.forward(x);
        }

        // Classification head tied to the embedding table
        self.lm_head.forward(&x, &self.token_embedding)
    }

    pub fn blocks(&self) -> &[TransformerBlock] {
        &self.blocks
    }
}

impl LanguageModel for Transformer {
    fn forward(&self, tokens: &[usize]) -> Matrix {
        let mut probs = self.logits(tokens);
        probs.iter_rows_mut().for_each(softmax);
        probs
    }

    fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl std::fmt::Debug for Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        struct BlocksSummary<'a, T>(&'a [T]);

        impl<'a, T: std::fmt::Debug> std::fmt::Debug for BlocksSummary<'a, T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_list()
                    .entries(self.0.iter().take(1))
                    .entry(&format_args!("... and {} more", self.0.len().saturating_sub(1)))
                    .finish()
            }
        }

        f.debug_struct("Transformer")
            .field("config", &self.config)
            .field("token_embedding", &self.token_embedding)
            .field("positional_embedding", &self.positional_embedding)
            .field("blocks", &BlocksSummary(&self.blocks))
            .field("lm_head", &self.lm_head)
            .finish()
    }
}

/// Transformer Block - self-attention and feed-forward sublayers
///
/// ```text
/// X1  = LayerNorm(X + Attention(X))
/// out = LayerNorm(X1 + FFN(X1))
/// ```
pub struct TransformerBlock {
    pub attention: MultiHeadAttention,
    pub norm: LayerNorm,
    pub feed_forward: FeedForward,
    pub block_idx: usize,
}

impl TransformerBlock {
    fn new(config: &ModelConfig, weights: BlockWeights, block_idx: usize) -> Self {
        let BlockWeights { wq, wk, wv, w1, w2 } = weights;

        Self {
            attention: MultiHeadAttention::new(Linear::new(wq), Linear::new(wk), Linear::new(wv), config.n_heads),
            norm: LayerNorm::new(config.norm_eps),
            feed_forward: FeedForward::new(Linear::new(w1), Linear::new(w2)),
            block_idx,
        }
    }

    pub fn forward(&self, mut x: Matrix) -> Matrix {
        // Attention sublayer with residual connection
        let attention_output = self.attention.forward(&x);
        x.add_assign(&attention_output);
        self.norm.forward_inplace(&mut x);

        // Feed-forward sublayer with residual connection
        let ffn_output = self.feed_forward.forward(&x);
        x.add_assign(&ffn_output);
        self.norm.forward_inplace(&mut x);

        x
    }
}

impl std::fmt::Debug for TransformerBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerBlock")
            .field("block_idx", &self.block_idx)
            .field("attention", &self.attention)
            .field("norm", &self.norm)
            .field("feed_forward", &self.feed_forward)
            .finish()
    }
}

/// Builder pattern for creating transformer models
pub struct TransformerBuilder {
    checkpoint_path: PathBuf,
    ctx_length: Option<usize>,
    n_heads: Option<usize>,
    norm_eps: Option<f32>,
}

impl TransformerBuilder {
    pub fn new(checkpoint_path: impl AsRef<Path>) -> Self {
        Self { checkpoint_path: checkpoint_path.as_ref().to_path_buf(), ctx_length: None, n_heads: None, norm_eps: None }
    }

    pub fn with_ctx_length(mut self, ctx_length: Option<usize>) -> Self {
        self.ctx_length = ctx_length;
        self
    }

    pub fn with_n_heads(mut self, n_heads: Option<usize>) -> Self {
        self.n_heads = n_heads;
        self
    }

    pub fn with_norm_eps(mut self, norm_eps: Option<f32>) -> Self {
        self.norm_eps = norm_eps;
        self
    }

    pub fn build(self) -> Result<Transformer> {
        let weights = ModelWeights::load(&self.checkpoint_path)?;
        let config = ModelConfig::from_weights(&weights, self.n_heads, self.ctx_length, self.norm_eps)?;

        Transformer::new(config, weights)
    }
}
