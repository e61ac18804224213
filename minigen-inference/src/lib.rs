//! Inference for minigen: a small word-level transformer language model.
//!
//! The [`Engine`] loads a checkpoint once and serves any number of
//! `generate(prompt, max_new_tokens, temperature)` calls against it.

mod configuration;
mod engine;
mod generation;
mod layers;
mod loader;
mod sampler;
mod tensor;
mod tokenizer;
mod transformer;
mod weights;

#[cfg(test)]
#[path = "../tests/unit/config_test.rs"]
mod config_test;

use anyhow::Result;
use log::{debug, error, info};
use std::io::{self, BufRead, Write};
use std::time::Duration;

pub use crate::configuration::{DEFAULT_NORM_EPS, DEFAULT_NUM_HEADS, ModelConfig, NUM_HEADS_METADATA_KEY};
pub use crate::engine::Engine;
pub use crate::generation::{
    Cancellation, DEFAULT_MAX_OUTPUT_CHARS, Generation, GenerationOptions, GenerationPhase, StopReason, generate,
};
pub use crate::layers::{FeedForward, LayerNorm, Linear, MultiHeadAttention};
pub use crate::sampler::{SAMPLING_EPSILON, Sampler};
pub use crate::tensor::Matrix;
pub use crate::tokenizer::{
    BOS_TOKEN, EOS_TOKEN, MergeTable, Tokenizer, UNK_TOKEN, VOCABULARY_FILE_SUFFIX, Vocabulary,
};
pub use crate::transformer::{LanguageModel, Transformer, TransformerBuilder};
pub use crate::weights::{BlockWeights, ModelWeights};

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub checkpoint_path: String,
    pub temperature: f32,
    pub max_new_tokens: usize,
    pub ctx_length: Option<usize>,
    pub n_heads: Option<usize>,
    pub norm_eps: Option<f32>,
    pub max_output_chars: usize,
    pub timeout: Option<Duration>,
    pub prompt: Option<String>,
    pub seed: Option<u64>,
}

impl InferenceConfig {
    pub fn builder() -> InferenceConfigBuilder {
        InferenceConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct InferenceConfigBuilder {
    checkpoint_path: Option<String>,
    temperature: Option<f32>,
    max_new_tokens: Option<usize>,
    ctx_length: Option<usize>,
    n_heads: Option<usize>,
    norm_eps: Option<f32>,
    max_output_chars: Option<usize>,
    timeout: Option<Duration>,
    prompt: Option<String>,
    seed: Option<u64>,
}

impl InferenceConfigBuilder {
    pub fn checkpoint_path(mut self, path: Option<&String>) -> Self {
        self.checkpoint_path = path.cloned();
        self
    }
    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
    pub fn max_new_tokens(mut self, max_new_tokens: Option<usize>) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }
    pub fn ctx_length(mut self, ctx_length: Option<usize>) -> Self {
        self.ctx_length = ctx_length;
        self
    }
    pub fn n_heads(mut self, n_heads: Option<usize>) -> Self {
        self.n_heads = n_heads;
        self
    }
    pub fn norm_eps(mut self, norm_eps: Option<f32>) -> Self {
        self.norm_eps = norm_eps;
        self
    }
    pub fn max_output_chars(mut self, max_output_chars: Option<usize>) -> Self {
        self.max_output_chars = max_output_chars;
        self
    }
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn prompt(mut self, prompt: Option<&String>) -> Self {
        self.prompt = prompt.cloned();
        self
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
    pub fn build(self) -> Result<InferenceConfig, String> {
        let temperature = self.temperature.unwrap_or(1.0);
        if !(temperature.is_finite() && temperature >= 0.0) {
            return Err(format!("temperature must be a non-negative number, got {temperature}"));
        }

        Ok(InferenceConfig {
            checkpoint_path: self.checkpoint_path.ok_or("checkpoint_path is required")?,
            temperature,
            max_new_tokens: self.max_new_tokens.unwrap_or(64),
            ctx_length: self.ctx_length,
            n_heads: self.n_heads,
            norm_eps: self.norm_eps,
            max_output_chars: self.max_output_chars.unwrap_or(DEFAULT_MAX_OUTPUT_CHARS),
            timeout: self.timeout,
            prompt: self.prompt,
            seed: self.seed,
        })
    }
}

/// Runs inference.
///
/// Generates for the configured prompt, or for every line read from stdin
/// when no prompt is given. Each request runs on a worker thread.
pub fn run_inference(inference_config: InferenceConfig) -> Result<()> {
    debug!("{inference_config:#?}");

    let engine = Engine::load(&inference_config)?;

    info!("Model ready: {:?}", engine.config());

    let run = |prompt: String| -> Result<()> {
        let options = engine.options(inference_config.max_new_tokens, inference_config.temperature);
        let generation = engine
            .spawn(prompt, options)?
            .join()
            .map_err(|_| anyhow::anyhow!("Generation worker panicked"))?;

        debug!("Stopped: {:?} after {} new tokens", generation.stop_reason, generation.generated().len());
        println!("{}", generation.text);
        io::stdout().flush()?;
        Ok(())
    };

    match inference_config.prompt.clone() {
        Some(prompt) => run(prompt),
        None => {
            for line in io::stdin().lock().lines() {
                let prompt = line?;
                if prompt.trim().is_empty() {
                    continue;
                }
                if let Err(err) = run(prompt) {
                    error!("{err}");
                }
            }
            Ok(())
        }
    }
}
