#[cfg(test)]
#[path = "../tests/unit/sampler_test.rs"]
mod tests;

use log::warn;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, weighted::WeightedIndex};

/// Floor added before the logarithm and used as the lower clip bound.
pub const SAMPLING_EPSILON: f64 = 1e-10;

/// Temperature sampler over a probability vector.
///
/// Sampling never fails: a distribution that turns non-finite after
/// temperature scaling is replaced by a uniform one for that step.
#[derive(Debug)]
pub struct Sampler {
    pub temperature: f32,
    rng: StdRng,
}

impl Sampler {
    /// Creates a sampler; `seed` makes the draws reproducible, `None` seeds from the OS.
    ///
    /// # Arguments
    /// * `temperature` - Scaling applied to log-probabilities (0.0 for greedy)
    /// * `seed` - Optional random seed
    pub fn new(temperature: f32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(temperature, rng)
    }

    pub fn with_rng(temperature: f32, rng: StdRng) -> Self {
        debug_assert!(temperature >= 0.0, "Temperature must be non-negative");
        Self { temperature, rng }
    }

    /// Returns the index of the highest probability (greedy decoding).
    fn sample_argmax(probs: &[f32]) -> usize {
        probs
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
            .unwrap_or_default()
    }

    /// Post-processes `probs` into the distribution actually sampled from.
    ///
    /// 1. `p' = exp(ln(p + ε) / temperature)`
    /// 2. any non-finite entry replaces the whole vector with a uniform distribution
    /// 3. clip to `[ε, 1]` and renormalize
    pub fn distribution(probs: &[f32], temperature: f32) -> Vec<f64> {
        let temperature = temperature as f64;
        let mut scaled = probs
            .iter()
            .map(|&p| ((p as f64 + SAMPLING_EPSILON).ln() / temperature).exp())
            .collect::<Vec<_>>();

        if scaled.iter().any(|p| !p.is_finite()) {
            warn!("Non-finite sampling distribution, falling back to uniform");
            let uniform = 1.0 / scaled.len() as f64;
            scaled.fill(uniform);
        }

        scaled.iter_mut().for_each(|p| *p = p.clamp(SAMPLING_EPSILON, 1.0));
        let inv_sum = scaled.iter().sum::<f64>().recip();
        scaled.iter_mut().for_each(|p| *p *= inv_sum);

        scaled
    }

    /// Samples an index from `probs`.
    ///
    /// - If temperature is 0, returns the argmax (greedy).
    /// - Otherwise draws from [`Sampler::distribution`] with a weighted random choice.
    pub fn sample(&mut self, probs: &[f32]) -> usize {
        if probs.is_empty() {
            return 0;
        }

        if self.temperature == 0.0 {
            return Self::sample_argmax(probs);
        }

        let distribution = Self::distribution(probs, self.temperature);
        match WeightedIndex::new(&distribution) {
            Ok(weighted) => weighted.sample(&mut self.rng),
            Err(err) => {
                warn!("Weighted sampling failed ({err}), drawing uniformly");
                self.rng.random_range(0..probs.len())
            }
        }
    }
}
