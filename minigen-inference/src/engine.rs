use anyhow::{Context, Result};
use log::{debug, warn};
use std::{path::Path, sync::Arc, thread::JoinHandle, time::Duration};

use crate::InferenceConfig;
use crate::configuration::ModelConfig;
use crate::generation::{self, Cancellation, DEFAULT_MAX_OUTPUT_CHARS, Generation, GenerationOptions};
use crate::sampler::Sampler;
use crate::tokenizer::Tokenizer;
use crate::transformer::{LanguageModel, Transformer, TransformerBuilder};

/// Loaded model and vocabulary, shared read-only between requests.
///
/// Cloning is cheap; every clone refers to the same weights.
#[derive(Debug, Clone)]
pub struct Engine {
    model: Arc<Transformer>,
    tokenizer: Arc<Tokenizer>,
    max_output_chars: usize,
    timeout: Option<Duration>,
    seed: Option<u64>,
}

impl Engine {
    /// Loads the checkpoint and its vocabulary once.
    pub fn load(config: &InferenceConfig) -> Result<Self> {
        let model = TransformerBuilder::new(&config.checkpoint_path)
            .with_ctx_length(config.ctx_length)
            .with_n_heads(config.n_heads)
            .with_norm_eps(config.norm_eps)
            .build()?;

        debug!("{model:#?}");

        let tokenizer = Tokenizer::load(Path::new(&config.checkpoint_path))?;

        debug!("{tokenizer:#?}");

        let engine = Self::new(model, tokenizer)?
            .with_max_output_chars(config.max_output_chars)
            .with_timeout(config.timeout)
            .with_seed(config.seed);

        Ok(engine)
    }

    /// Pairs a model with a tokenizer; their vocabulary sizes must agree.
    pub fn new(model: Transformer, tokenizer: Tokenizer) -> Result<Self> {
        let vocab_size = model.config().vocab_size;
        if tokenizer.vocab_size() != vocab_size {
            anyhow::bail!(
                "Vocabulary has {} tokens but the embedding matrix has {vocab_size} rows",
                tokenizer.vocab_size()
            );
        }

        Ok(Self {
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            timeout: None,
            seed: None,
        })
    }

    pub fn with_max_output_chars(mut self, max_output_chars: usize) -> Self {
        self.max_output_chars = max_output_chars;
        self
    }

    /// Wall-clock budget applied to every request built by [`Engine::options`].
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Seeds every request's sampler identically, making outputs reproducible.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        self.model.config()
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Options carrying the engine's output cap and timeout.
    pub fn options(&self, max_new_tokens: usize, temperature: f32) -> GenerationOptions {
        let cancellation = match self.timeout {
            Some(timeout) => Cancellation::new().with_timeout(timeout),
            None => Cancellation::new(),
        };

        GenerationOptions::new(max_new_tokens, temperature)
            .with_max_output_chars(self.max_output_chars)
            .with_cancellation(cancellation)
    }

    /// Generates a continuation of `prompt` and returns the decoded text.
    pub fn generate(&self, prompt: &str, max_new_tokens: usize, temperature: f32) -> String {
        self.generate_with(prompt, &self.options(max_new_tokens, temperature)).text
    }

    pub fn generate_with(&self, prompt: &str, options: &GenerationOptions) -> Generation {
        let temperature = if options.temperature.is_finite() && options.temperature >= 0.0 {
            options.temperature
        } else {
            warn!("Invalid temperature {}, using 1.0", options.temperature);
            1.0
        };

        let mut sampler = Sampler::new(temperature, self.seed);
        generation::generate(self.model.as_ref(), &self.tokenizer, &mut sampler, prompt, options)
    }

    /// Runs a request on a dedicated worker thread, off the caller's dispatch path.
    pub fn spawn(&self, prompt: String, options: GenerationOptions) -> Result<JoinHandle<Generation>> {
        let engine = self.clone();
        std::thread::Builder::new()
            .name("minigen-worker".to_string())
            .spawn(move || engine.generate_with(&prompt, &options))
            .context("Failed to spawn generation worker")
    }
}
