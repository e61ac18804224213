#[cfg(test)]
#[path = "../tests/unit/layers_test.rs"]
mod tests;

use rayon::prelude::*;

use crate::tensor::{Matrix, dot, matmul, matmul_transposed};

/// Token embedding layer - converts token IDs to dense vectors
///
/// **Shape**: [vocab_size, dim]
/// **Note**: Shared with the output projection (weight tying), see [`TiedOutputHead`].
pub struct TokenEmbedding {
    pub table: Matrix,
}

impl TokenEmbedding {
    pub fn new(table: Matrix) -> Self {
        Self { table }
    }

    pub fn dim(&self) -> usize {
        self.table.cols()
    }

    /// Looks up one row per token; every id must be below `vocab_size`.
    pub fn forward(&self, tokens: &[usize]) -> Matrix {
        let mut output = Matrix::zeros(tokens.len(), self.dim());
        output.iter_rows_mut().zip(tokens).for_each(|(row, &token)| {
            debug_assert!(token < self.table.rows(), "Token {token} out of vocabulary range");
            row.copy_from_slice(self.table.row(token));
        });
        output
    }
}

impl std::fmt::Debug for TokenEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEmbedding")
            .field("dim", &self.table.cols())
            .field("vocab_size", &self.table.rows())
            .finish()
    }
}

/// Learned absolute position embedding, added row-wise to token embeddings.
///
/// **Shape**: [max_context_length, dim]
pub struct PositionalEmbedding {
    pub table: Matrix,
}

impl PositionalEmbedding {
    pub fn new(table: Matrix) -> Self {
        Self { table }
    }

    /// Adds `P[t]` to row `t` of `x`.
    pub fn forward_inplace(&self, x: &mut Matrix) {
        debug_assert!(x.rows() <= self.table.rows(), "Sequence longer than positional table");
        x.iter_rows_mut().zip(self.table.iter_rows()).for_each(|(row, pos)| {
            row.iter_mut().zip(pos).for_each(|(val, &p)| *val += p);
        });
    }
}

impl std::fmt::Debug for PositionalEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionalEmbedding").field("max_context_length", &self.table.rows()).finish()
    }
}

/// Layer normalization without learned scale or shift.
///
/// **Mathematical Formula**:
/// ```text
/// LayerNorm(x) = (x - mean(x)) / (std(x) + ε)
/// ```
/// Statistics are taken per position across the embedding dimension, using
/// the population standard deviation.
pub struct LayerNorm {
    pub eps: f32,
}

impl LayerNorm {
    pub fn new(eps: f32) -> Self {
        Self { eps }
    }

    pub fn forward_inplace(&self, x: &mut Matrix) {
        x.iter_rows_mut().for_each(|row| self.normalize_row(row));
    }

    pub fn normalize_row(&self, row: &mut [f32]) {
        if row.is_empty() {
            return;
        }
        let n = row.len() as f32;
        let mean = row.iter().sum::<f32>() / n;
        let variance = row.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n;
        let scale = (variance.sqrt() + self.eps).recip();

        row.iter_mut().for_each(|val| *val = (*val - mean) * scale);
    }
}

impl std::fmt::Debug for LayerNorm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerNorm").field("eps", &self.eps).finish()
    }
}

/// Dense projection `y = x · W` without bias.
pub struct Linear {
    pub weight: Matrix,
}

impl Linear {
    pub fn new(weight: Matrix) -> Self {
        Self { weight }
    }

    pub fn in_features(&self) -> usize {
        self.weight.rows()
    }

    pub fn out_features(&self) -> usize {
        self.weight.cols()
    }

    pub fn forward(&self, input: &Matrix) -> Matrix {
        matmul(input, &self.weight)
    }
}

impl std::fmt::Debug for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features())
            .field("out_features", &self.out_features())
            .finish()
    }
}

/// Multi-Head Self-Attention
///
/// **Components**:
/// - **Q, K, V Projections**: full `dim × dim` projections, split into
///   `n_heads` slices of `head_dim` only after projecting
/// - **Scaled Dot-Product Attention**: softmax over every key position
/// - **Concatenation**: head outputs are written back side by side; there is
///   no output projection
///
/// No causal mask is applied: each position attends to every position in
/// the window, including later ones.
///
/// **Attention Formula**:
/// ```text
/// Attention(Q,K,V) = softmax(QK^T / √d_k)V
/// ```
pub struct MultiHeadAttention {
    pub wq: Linear,
    pub wk: Linear,
    pub wv: Linear,
    pub n_heads: usize,
    pub head_dim: usize,
}

impl MultiHeadAttention {
    pub fn new(wq: Linear, wk: Linear, wv: Linear, n_heads: usize) -> Self {
        let head_dim = wq.out_features() / n_heads;
        Self { wq, wk, wv, n_heads, head_dim }
    }

    pub fn forward(&self, x: &Matrix) -> Matrix {
        let q = self.wq.forward(x);
        let k = self.wk.forward(x);
        let v = self.wv.forward(x);

        let head_outputs = (0..self.n_heads)
            .into_par_iter()
            .map(|head_idx| {
                let weights = self.head_weights(head_idx, &q, &k);
                self.weighted_values(head_idx, &weights, &v)
            })
            .collect::<Vec<_>>();

        // Concatenate heads back to the full dimension
        let mut output = Matrix::zeros(x.rows(), self.n_heads * self.head_dim);
        for (head_idx, head_output) in head_outputs.iter().enumerate() {
            let range = self.head_range(head_idx);
            output.iter_rows_mut().zip(head_output.iter_rows()).for_each(|(out_row, head_row)| {
                out_row[range.clone()].copy_from_slice(head_row);
            });
        }

        output
    }

    /// Attention weights for every head, each of shape [seq_len, seq_len].
    pub fn attention_weights(&self, x: &Matrix) -> Vec<Matrix> {
        let q = self.wq.forward(x);
        let k = self.wk.forward(x);
        (0..self.n_heads).map(|head_idx| self.head_weights(head_idx, &q, &k)).collect()
    }

    fn head_range(&self, head_idx: usize) -> std::ops::Range<usize> {
        head_idx * self.head_dim..(head_idx + 1) * self.head_dim
    }

    fn head_weights(&self, head_idx: usize, q: &Matrix, k: &Matrix) -> Matrix {
        let range = self.head_range(head_idx);
        let attention_scale = (self.head_dim as f32).sqrt().recip();

        let mut weights = Matrix::zeros(q.rows(), k.rows());
        weights.iter_rows_mut().zip(q.iter_rows()).for_each(|(scores, q_row)| {
            let q_head = &q_row[range.clone()];
            scores.iter_mut().zip(k.iter_rows()).for_each(|(score, k_row)| {
                *score = dot(q_head, &k_row[range.clone()]) * attention_scale;
            });
            softmax(scores);
        });
        weights
    }

    fn weighted_values(&self, head_idx: usize, weights: &Matrix, v: &Matrix) -> Matrix {
        let range = self.head_range(head_idx);

        let mut output = Matrix::zeros(weights.rows(), self.head_dim);
        output.iter_rows_mut().zip(weights.iter_rows()).for_each(|(out_row, weight_row)| {
            for (&attention_weight, v_row) in weight_row.iter().zip(v.iter_rows()) {
                out_row
                    .iter_mut()
                    .zip(&v_row[range.clone()])
                    .for_each(|(out, &value)| *out += attention_weight * value);
            }
        });
        output
    }
}

impl std::fmt::Debug for MultiHeadAttention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiHeadAttention")
            .field("n_heads", &self.n_heads)
            .field("head_dim", &self.head_dim)
            .field("wq", &self.wq)
            .field("wk", &self.wk)
            .field("wv", &self.wv)
            .finish()
    }
}

/// Feed-Forward Network with ReLU activation
///
/// ```text
/// FFN(x) = ReLU(x · W1) · W2
/// ```
pub struct FeedForward {
    pub w1: Linear, // Expansion
    pub w2: Linear, // Contraction
}

impl FeedForward {
    pub fn new(w1: Linear, w2: Linear) -> Self {
        Self { w1, w2 }
    }

    pub fn forward(&self, x: &Matrix) -> Matrix {
        let mut hidden = self.w1.forward(x);
        hidden.iter_rows_mut().for_each(|row| row.iter_mut().for_each(|val| *val = (*val).max(0.0)));
        self.w2.forward(&hidden)
    }
}

impl std::fmt::Debug for FeedForward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedForward")
            .field("hidden_dim", &self.w1.out_features())
            .field("w1", &self.w1)
            .field("w2", &self.w2)
            .finish()
    }
}

/// Output projection tied to the token embedding: `logits = X · Eᵗ + b`.
pub struct TiedOutputHead {
    pub bias: Vec<f32>,
}

impl TiedOutputHead {
    pub fn new(bias: Vec<f32>) -> Self {
        Self { bias }
    }

    pub fn forward(&self, x: &Matrix, embedding: &TokenEmbedding) -> Matrix {
        let mut logits = matmul_transposed(x, &embedding.table);
        logits.add_row_vector(&self.bias);
        logits
    }
}

impl std::fmt::Debug for TiedOutputHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiedOutputHead").field("vocab_size", &self.bias.len()).finish()
    }
}

// Applies softmax normalization to a slice in-place.
pub(crate) fn softmax(x: &mut [f32]) {
    let max_val = x.iter().fold(f32::NEG_INFINITY, |acc, &val| acc.max(val));
    let sum = x
        .iter_mut()
        .map(|val| {
            *val = (*val - max_val).exp();
            *val
        })
        .sum::<f32>();
    let inv_sum = sum.recip();
    x.iter_mut().for_each(|val| *val *= inv_sum);
}
