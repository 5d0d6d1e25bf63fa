//! Generation configuration and sampling.

pub mod sampling;

pub use sampling::{sample_from_probs, Sampler};

use std::fmt;
use std::sync::Arc;

use crate::chat::ChatTemplate;
use crate::error::{GenerationError, Result};
use crate::model_config::ModelConfig;

pub const DEFAULT_MAX_NEW_TOKENS: usize = 256;

/// Immutable settings for one engine.
///
/// Built through [`GenerationConfig::builder`], which validates every field
/// before a config can exist.
#[derive(Clone)]
pub struct GenerationConfig {
    max_new_tokens: usize,
    temperature: f32,
    top_k: usize,
    top_p: f32,
    min_p: f32,
    repetition_penalty: f32,
    eos_token_ids: Vec<u32>,
    stop_sequences: Vec<String>,
    chat_template: Option<Arc<dyn ChatTemplate>>,
    bos_token_id: Option<u32>,
    add_bos_token: bool,
    seed: Option<u64>,
}

impl GenerationConfig {
    pub fn builder() -> GenerationConfigBuilder {
        GenerationConfigBuilder::default()
    }

    pub fn max_new_tokens(&self) -> usize {
        self.max_new_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn top_p(&self) -> f32 {
        self.top_p
    }

    pub fn min_p(&self) -> f32 {
        self.min_p
    }

    pub fn repetition_penalty(&self) -> f32 {
        self.repetition_penalty
    }

    /// Greedy decoding: temperature 0 always picks the argmax.
    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }

    pub fn eos_token_ids(&self) -> &[u32] {
        &self.eos_token_ids
    }

    pub fn is_eos(&self, id: u32) -> bool {
        self.eos_token_ids.contains(&id)
    }

    pub fn stop_sequences(&self) -> &[String] {
        &self.stop_sequences
    }

    pub fn chat_template(&self) -> Option<&dyn ChatTemplate> {
        self.chat_template.as_deref()
    }

    pub fn bos_token_id(&self) -> Option<u32> {
        self.bos_token_id
    }

    pub fn add_bos_token(&self) -> bool {
        self.add_bos_token
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Length in bytes of the longest stop sequence.
    pub fn longest_stop_sequence(&self) -> usize {
        self.stop_sequences.iter().map(String::len).max().unwrap_or(0)
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("max_new_tokens", &self.max_new_tokens)
            .field("temperature", &self.temperature)
            .field("top_k", &self.top_k)
            .field("top_p", &self.top_p)
            .field("min_p", &self.min_p)
            .field("repetition_penalty", &self.repetition_penalty)
            .field("eos_token_ids", &self.eos_token_ids)
            .field("stop_sequences", &self.stop_sequences)
            .field("chat_template", &self.chat_template.is_some())
            .field("bos_token_id", &self.bos_token_id)
            .field("add_bos_token", &self.add_bos_token)
            .field("seed", &self.seed)
            .finish()
    }
}

/// Builder for [`GenerationConfig`].
///
/// ```ignore
/// let config = GenerationConfig::builder()
///     .temperature(0.8)
///     .top_p(0.95)
///     .max_new_tokens(128)
///     .stop_sequence("<|im_end|>")
///     .build_for_model(&model_config)?;
/// ```
#[derive(Clone)]
pub struct GenerationConfigBuilder {
    max_new_tokens: usize,
    temperature: f32,
    top_k: usize,
    top_p: f32,
    min_p: f32,
    repetition_penalty: f32,
    eos_token_ids: Vec<u32>,
    stop_sequences: Vec<String>,
    chat_template: Option<Arc<dyn ChatTemplate>>,
    template_stop_sequences: bool,
    bos_token_id: Option<u32>,
    add_bos_token: bool,
    seed: Option<u64>,
}

impl Default for GenerationConfigBuilder {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: 0.0,
            top_k: 0,
            top_p: 0.0,
            min_p: 0.0,
            repetition_penalty: 1.0,
            eos_token_ids: Vec::new(),
            stop_sequences: Vec::new(),
            chat_template: None,
            template_stop_sequences: true,
            bos_token_id: None,
            add_bos_token: false,
            seed: None,
        }
    }
}

impl GenerationConfigBuilder {
    // =========================================================================
    // Sampling
    // =========================================================================

    pub fn max_new_tokens(mut self, n: usize) -> Self {
        self.max_new_tokens = n;
        self
    }

    /// 0 selects greedy decoding.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Keep only the `k` most likely tokens (0 disables).
    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    /// Nucleus sampling threshold (0 disables).
    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = p;
        self
    }

    pub fn min_p(mut self, min_p: f32) -> Self {
        self.min_p = min_p;
        self
    }

    pub fn repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = penalty;
        self
    }

    /// Deterministic argmax decoding.
    pub fn greedy(self) -> Self {
        self.temperature(0.0)
    }

    /// Seed for the engine's random source.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    // =========================================================================
    // Stopping
    // =========================================================================

    pub fn eos_token_id(mut self, id: u32) -> Self {
        if !self.eos_token_ids.contains(&id) {
            self.eos_token_ids.push(id);
        }
        self
    }

    pub fn eos_token_ids(self, ids: impl IntoIterator<Item = u32>) -> Self {
        ids.into_iter().fold(self, |builder, id| builder.eos_token_id(id))
    }

    pub fn stop_sequence(mut self, stop: impl Into<String>) -> Self {
        let stop = stop.into();
        if !self.stop_sequences.contains(&stop) {
            self.stop_sequences.push(stop);
        }
        self
    }

    pub fn stop_sequences<I, S>(self, stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        stops.into_iter().fold(self, |builder, stop| builder.stop_sequence(stop))
    }

    // =========================================================================
    // Prompt
    // =========================================================================

    pub fn chat_template(self, template: impl ChatTemplate + 'static) -> Self {
        self.shared_chat_template(Arc::new(template))
    }

    pub fn shared_chat_template(mut self, template: Arc<dyn ChatTemplate>) -> Self {
        self.chat_template = Some(template);
        self
    }

    /// Whether the template's own stop sequences are added (on by default).
    pub fn template_stop_sequences(mut self, enabled: bool) -> Self {
        self.template_stop_sequences = enabled;
        self
    }

    pub fn bos_token_id(mut self, id: u32) -> Self {
        self.bos_token_id = Some(id);
        self
    }

    /// Prepend the BOS id to every prompt that does not already start with it.
    pub fn add_bos_token(mut self, add: bool) -> Self {
        self.add_bos_token = add;
        self
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Builds with model metadata as the fallback for EOS and BOS ids.
    pub fn build_for_model(mut self, model: &ModelConfig) -> Result<GenerationConfig> {
        if self.eos_token_ids.is_empty() {
            self = self.eos_token_ids(model.eos_token_id.iter().copied());
        }
        if self.bos_token_id.is_none() {
            self.bos_token_id = model.bos_token_id;
        }
        self.build()
    }

    pub fn build(self) -> Result<GenerationConfig> {
        self.validate()?;

        let mut stop_sequences = self.stop_sequences;
        if self.template_stop_sequences {
            if let Some(template) = &self.chat_template {
                for stop in template.stop_sequences() {
                    if !stop.is_empty() && !stop_sequences.contains(&stop) {
                        stop_sequences.push(stop);
                    }
                }
            }
        }

        Ok(GenerationConfig {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            min_p: self.min_p,
            repetition_penalty: self.repetition_penalty,
            eos_token_ids: self.eos_token_ids,
            stop_sequences,
            chat_template: self.chat_template,
            bos_token_id: self.bos_token_id,
            add_bos_token: self.add_bos_token,
            seed: self.seed,
        })
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(GenerationError::InvalidConfig(msg));

        if self.max_new_tokens == 0 {
            return invalid("max_new_tokens must be greater than 0".into());
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return invalid(format!(
                "temperature must be a finite value >= 0, got {}",
                self.temperature
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return invalid(format!("top_p must be in [0, 1], got {}", self.top_p));
        }
        if !(0.0..=1.0).contains(&self.min_p) {
            return invalid(format!("min_p must be in [0, 1], got {}", self.min_p));
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty <= 0.0 {
            return invalid(format!(
                "repetition_penalty must be > 0, got {}",
                self.repetition_penalty
            ));
        }
        if self.stop_sequences.iter().any(String::is_empty) {
            return invalid("stop sequences must not be empty".into());
        }
        if self.eos_token_ids.is_empty() {
            return invalid(
                "no end-of-sequence token id configured and none found in model config".into(),
            );
        }
        if self.add_bos_token && self.bos_token_id.is_none() {
            log::warn!("add_bos_token is set but no BOS token id is known; prompts are left as-is");
        }
        Ok(())
    }
}
