use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::GenerationConfig;
use crate::error::{GenerationError, Result};
use crate::ops::{
    apply_repetition_penalty_inplace, apply_temperature, argmax, min_p_filtering,
    softmax_1d_inplace, top_k_filtering, top_p_filtering,
};

/// Picks the next token from a logit vector.
///
/// Owns the engine's single random source, so a fixed seed replays the same
/// sequence of draws.
#[derive(Debug, Clone)]
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Samples one token id.
    ///
    /// `context` is the prompt plus everything generated so far; it only
    /// matters when a repetition penalty is configured.
    pub fn sample(
        &mut self,
        mut logits: Array1<f32>,
        config: &GenerationConfig,
        context: &[u32],
    ) -> Result<u32> {
        if logits.is_empty() {
            return Err(GenerationError::Session(
                "backend returned an empty logit vector".into(),
            ));
        }

        apply_repetition_penalty_inplace(&mut logits, context, config.repetition_penalty());

        if config.is_greedy() {
            return argmax(&logits)
                .ok_or_else(|| GenerationError::Session("no token to select".into()));
        }

        apply_temperature(&mut logits, config.temperature());
        let logits = top_k_filtering(logits, config.top_k());

        let mut probs = logits;
        softmax_1d_inplace(&mut probs);
        let probs = top_p_filtering(probs, config.top_p());
        let probs = min_p_filtering(probs, config.min_p());

        sample_from_probs(&probs, &mut self.rng)
            .ok_or_else(|| GenerationError::Session("no token to select".into()))
    }
}

/// Draws an index from a normalized distribution.
///
/// Zero-probability entries are never chosen; rounding shortfall in the
/// cumulative sum falls back to the last entry with positive mass.
pub fn sample_from_probs<R: Rng + ?Sized>(probs: &Array1<f32>, rng: &mut R) -> Option<u32> {
    let uniform: f32 = rng.gen_range(0.0..1.0);
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (idx, &prob) in probs.iter().enumerate() {
        if prob > 0.0 {
            cumulative += prob;
            last_positive = Some(idx as u32);
            if cumulative >= uniform {
                return last_positive;
            }
        }
    }
    last_positive
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn config() -> crate::common::GenerationConfigBuilder {
        GenerationConfig::builder().eos_token_id(0)
    }

    #[test]
    fn test_greedy_is_argmax() {
        let config = config().build().unwrap();
        let mut sampler = Sampler::new(None);
        for _ in 0..10 {
            assert_eq!(sampler.sample(array![0.1, 3.0, 2.0], &config, &[]).unwrap(), 1);
        }
    }

    #[test]
    fn test_repetition_penalty_changes_greedy_choice() {
        let config = config().repetition_penalty(2.0).build().unwrap();
        let mut sampler = Sampler::new(None);
        // 3.0 / 2 = 1.5 drops below 2.0.
        assert_eq!(sampler.sample(array![0.1, 3.0, 2.0], &config, &[1]).unwrap(), 2);
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let config = config().temperature(1.0).seed(42).build().unwrap();
        let logits = array![1.0, 1.2, 0.8, 1.1, 0.9];
        let draw = |seed| {
            let mut sampler = Sampler::new(Some(seed));
            (0..20)
                .map(|_| sampler.sample(logits.clone(), &config, &[]).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(7), draw(7));
    }

    #[test]
    fn test_top_k_one_is_deterministic() {
        let config = config().temperature(1.5).top_k(1).build().unwrap();
        let mut sampler = Sampler::new(Some(3));
        for _ in 0..20 {
            assert_eq!(sampler.sample(array![0.5, 0.4, 2.0, 1.9], &config, &[]).unwrap(), 2);
        }
    }

    #[test]
    fn test_filtered_tokens_never_sampled() {
        let config = config().temperature(1.0).top_k(2).build().unwrap();
        let mut sampler = Sampler::new(Some(11));
        for _ in 0..200 {
            let id = sampler.sample(array![5.0, 0.0, 5.0, -1.0], &config, &[]).unwrap();
            assert!(id == 0 || id == 2);
        }
    }

    #[test]
    fn test_empty_logits_is_an_error() {
        let config = config().build().unwrap();
        let mut sampler = Sampler::new(None);
        assert!(sampler.sample(Array1::zeros(0), &config, &[]).is_err());
    }

    #[test]
    fn test_sample_from_probs_skips_zero_mass() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            assert_eq!(sample_from_probs(&array![0.0, 1.0, 0.0], &mut rng), Some(1));
        }
        assert_eq!(sample_from_probs(&array![0.0, 0.0], &mut rng), None);
    }

    #[test]
    fn test_sample_from_probs_rounding_shortfall() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let id = sample_from_probs(&array![0.3, 0.3, 0.0], &mut rng).unwrap();
            assert!(id < 2);
        }
    }
}
