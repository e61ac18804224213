#[cfg(test)]
#[path = "../tests/unit/generation_test.rs"]
mod tests;

use log::debug;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crate::sampler::Sampler;
use crate::tokenizer::Tokenizer;
use crate::transformer::LanguageModel;

/// Default cap on the number of characters returned to the caller.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 2000;

/// Why a generation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `<EOS>` was sampled.
    EndOfSequence,
    /// `max_new_tokens` ids were appended.
    MaxLength,
    /// The deadline passed or the cancellation flag was raised.
    Cancelled,
}

/// Lifecycle of a single request; there is no transition out of `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Prompting,
    Generating,
    Stopped(StopReason),
}

/// Deadline and/or shared flag polled once per generation step.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    deadline: Option<Instant>,
    flag: Option<Arc<AtomicBool>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.flag = Some(flag);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Per-request generation settings.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub max_output_chars: usize,
    pub cancellation: Cancellation,
}

impl GenerationOptions {
    pub fn new(max_new_tokens: usize, temperature: f32) -> Self {
        Self { max_new_tokens, temperature, max_output_chars: DEFAULT_MAX_OUTPUT_CHARS, cancellation: Cancellation::new() }
    }

    pub fn with_max_output_chars(mut self, max_output_chars: usize) -> Self {
        self.max_output_chars = max_output_chars;
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Result of one generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Decoded prompt and continuation, capped at `max_output_chars` characters.
    pub text: String,
    /// Full token stream: encoded prompt followed by the generated ids.
    pub tokens: Vec<usize>,
    pub prompt_len: usize,
    pub stop_reason: StopReason,
}

impl Generation {
    pub fn generated(&self) -> &[usize] {
        &self.tokens[self.prompt_len..]
    }
}

/// Generates a continuation of `prompt`.
///
/// Each step feeds the trailing `seq_len` tokens to the model, samples from the
/// last position and appends the result. Stops after `<EOS>`, after
/// `max_new_tokens` steps, or when cancelled; the partial output is returned in
/// every case.
pub fn generate<M: LanguageModel + ?Sized>(
    model: &M,
    tokenizer: &Tokenizer,
    sampler: &mut Sampler,
    prompt: &str,
    options: &GenerationOptions,
) -> Generation {
    let mut state = GenerationState::new(tokenizer.encode(prompt, true, false));
    let seq_len = model.config().seq_len;
    let eos_id = tokenizer.eos_id();

    state.phase = GenerationPhase::Generating;

    while state.phase == GenerationPhase::Generating {
        if state.generated_count() >= options.max_new_tokens {
            state.stop(StopReason::MaxLength);
            break;
        }

        if options.cancellation.is_cancelled() {
            state.stop(StopReason::Cancelled);
            break;
        }

        state.metrics.start_generation();
        let next_token = generate_next_token(model, sampler, state.window(seq_len));
        state.metrics.increment_token();
        state.advance(next_token);

        if next_token == eos_id {
            state.stop(StopReason::EndOfSequence);
        }
    }

    state.metrics.report();
    state.finish(tokenizer, options.max_output_chars)
}

fn generate_next_token<M: LanguageModel + ?Sized>(model: &M, sampler: &mut Sampler, window: &[usize]) -> usize {
    let probs = model.forward(window);
    match probs.last_row() {
        Some(last) => sampler.sample(last),
        None => sampler.sample(&[]),
    }
}

/// Tracks token generation performance metrics
struct TokenMetrics {
    start_time: Option<Instant>,
    generated_count: usize,
}

impl TokenMetrics {
    fn new() -> Self {
        Self { start_time: None, generated_count: 0 }
    }

    fn start_generation(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
    }

    fn increment_token(&mut self) {
        self.generated_count += 1;
    }

    fn report(&self) {
        if let Some(start_time) = self.start_time {
            let duration = start_time.elapsed();
            if self.generated_count > 0 && duration.as_secs_f64() > 0.0 {
                let tps = self.generated_count as f64 / duration.as_secs_f64();
                debug!(
                    "Generated {} tokens in {:.2}s - {:.2} tokens/sec",
                    self.generated_count,
                    duration.as_secs_f64(),
                    tps
                );
            }
        }
    }
}

/// Token stream and phase of one request
struct GenerationState {
    phase: GenerationPhase,
    tokens: Vec<usize>,
    prompt_len: usize,
    metrics: TokenMetrics,
}

impl GenerationState {
    fn new(prompt_tokens: Vec<usize>) -> Self {
        Self {
            phase: GenerationPhase::Prompting,
            prompt_len: prompt_tokens.len(),
            tokens: prompt_tokens,
            metrics: TokenMetrics::new(),
        }
    }

    fn generated_count(&self) -> usize {
        self.tokens.len() - self.prompt_len
    }

    /// The most recent `seq_len` tokens.
    fn window(&self, seq_len: usize) -> &[usize] {
        &self.tokens[self.tokens.len().saturating_sub(seq_len)..]
    }

    fn advance(&mut self, next_token: usize) {
        self.tokens.push(next_token);
    }

    fn stop(&mut self, reason: StopReason) {
        debug!("Generation stopped: {reason:?} after {} new tokens", self.generated_count());
        self.phase = GenerationPhase::Stopped(reason);
    }

    fn finish(self, tokenizer: &Tokenizer, max_output_chars: usize) -> Generation {
        let stop_reason = match self.phase {
            GenerationPhase::Stopped(reason) => reason,
            GenerationPhase::Prompting | GenerationPhase::Generating => StopReason::MaxLength,
        };

        let text = tokenizer.decode(&self.tokens).chars().take(max_output_chars).collect();

        Generation { text, tokens: self.tokens, prompt_len: self.prompt_len, stop_reason }
    }
}
