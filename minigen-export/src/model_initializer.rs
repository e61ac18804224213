#[cfg(test)]
#[path = "../tests/unit/model_initializer_test.rs"]
mod model_initializer_test;

use anyhow::Result;
use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

use crate::artifact_writer::NamedTensor;

/// Standard deviation of the normal distribution used for every weight.
pub const DEFAULT_INIT_STD: f32 = 0.02;

/// Architecture hyperparameters that the vocabulary does not determine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelShape {
    pub dim: usize,
    pub hidden_dim: usize,
    pub n_blocks: usize,
    pub n_heads: usize,
    pub max_context_length: usize,
}

impl ModelShape {
    pub fn validate(&self) -> Result<()> {
        let dimensions = [
            ("dim", self.dim),
            ("hidden_dim", self.hidden_dim),
            ("n_heads", self.n_heads),
            ("max_context_length", self.max_context_length),
        ];

        for (name, value) in dimensions {
            if value == 0 {
                anyhow::bail!("Invalid {name}: must be positive, got {value}");
            }
        }

        if self.dim % self.n_heads != 0 {
            anyhow::bail!("n_heads ({}) must divide dim ({}) evenly", self.n_heads, self.dim);
        }

        Ok(())
    }
}

/// Creates randomly initialised weights for a given shape and vocabulary size.
///
/// Every tensor draws from its own seeded stream, so the result depends only on
/// the seed and never on how the per-block work is scheduled.
#[derive(Debug, Clone)]
pub struct ModelInitializer {
    shape: ModelShape,
    seed: u64,
    std: f32,
}

impl ModelInitializer {
    pub fn new(shape: ModelShape, seed: u64) -> Result<Self> {
        shape.validate()?;
        Ok(Self { shape, seed, std: DEFAULT_INIT_STD })
    }

    pub fn with_std(mut self, std: f32) -> Self {
        self.std = std;
        self
    }

    pub fn shape(&self) -> &ModelShape {
        &self.shape
    }

    /// Returns all tensors in checkpoint naming: `E`, `positional_embedding`,
    /// `output_bias` (zeros), then `WQ_i`, `WK_i`, `WV_i`, `W1_i`, `W2_i` per block.
    pub fn initialize(&self, vocab_size: usize) -> Result<Vec<NamedTensor>> {
        if vocab_size == 0 {
            anyhow::bail!("Cannot initialise a model for an empty vocabulary");
        }

        let ModelShape { dim, hidden_dim, n_blocks, max_context_length, .. } = self.shape;

        let mut tensors = vec![
            self.random_tensor("E", vec![vocab_size, dim], 0)?,
            self.random_tensor("positional_embedding", vec![max_context_length, dim], 1)?,
            NamedTensor::zeros("output_bias", vec![vocab_size]),
        ];

        let blocks = (0..n_blocks)
            .into_par_iter()
            .map(|block_idx| {
                let stream = 2 + 5 * block_idx as u64;
                debug!("Initialising block {block_idx}");
                Ok::<_, anyhow::Error>(vec![
                    self.random_tensor(format!("WQ_{block_idx}"), vec![dim, dim], stream)?,
                    self.random_tensor(format!("WK_{block_idx}"), vec![dim, dim], stream + 1)?,
                    self.random_tensor(format!("WV_{block_idx}"), vec![dim, dim], stream + 2)?,
                    self.random_tensor(format!("W1_{block_idx}"), vec![dim, hidden_dim], stream + 3)?,
                    self.random_tensor(format!("W2_{block_idx}"), vec![hidden_dim, dim], stream + 4)?,
                ])
            })
            .collect::<Result<Vec<_>>>()?;

        tensors.extend(blocks.into_iter().flatten());

        let parameters = tensors.iter().map(|tensor| tensor.data.len()).sum::<usize>();
        info!("🧮 Initialised {} tensors, {parameters} parameters", tensors.len());

        Ok(tensors)
    }

    fn random_tensor(&self, name: impl Into<String>, shape: Vec<usize>, stream: u64) -> Result<NamedTensor> {
        if !(self.std.is_finite() && self.std > 0.0) {
            anyhow::bail!("Invalid initialisation std {}: must be positive and finite", self.std);
        }
        let normal = Normal::new(0.0f32, self.std)
            .map_err(|err| anyhow::anyhow!("Invalid initialisation std {}: {err}", self.std))?;
        let mut rng = StdRng::seed_from_u64(self.seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15));

        let len = shape.iter().product();
        let data = normal.sample_iter(&mut rng).take(len).collect();

        NamedTensor::new(name, shape, data)
    }
}
