use log::debug;
use ndarray::Array1;

use super::{BackendHandle, GenerativeSession};
use crate::cache::{Cache, SelfAttentionCache};
use crate::error::{GenerationError, Result};
use crate::model_config::KvLayout;
use crate::tensor::{
    last_logits, ForwardBackend, Tensor, TensorMap, ATTENTION_MASK, INPUT_IDS, POSITION_IDS,
};

/// A decoder-only model: one backend, one growing cache.
pub struct DecoderOnlySession {
    backend: BackendHandle,
    cache: SelfAttentionCache,
    position_ids: bool,
    prefilled: bool,
}

impl DecoderOnlySession {
    /// `layout` enables empty past tensors on the first pass, for backends
    /// that always expect `past_key_values.*` inputs.
    pub fn new(backend: Box<dyn ForwardBackend>, layout: Option<KvLayout>) -> Self {
        Self {
            backend: BackendHandle::new("decoder", backend),
            cache: SelfAttentionCache::new(layout),
            position_ids: false,
            prefilled: false,
        }
    }

    /// Also send a `position_ids` input.
    pub fn with_position_ids(mut self, enabled: bool) -> Self {
        self.position_ids = enabled;
        self
    }

    fn forward(&mut self, stage: &'static str, ids: &[u32]) -> Result<Array1<f32>> {
        let past_len = self.cache.seq_length();

        let mut inputs = TensorMap::new();
        inputs.insert(INPUT_IDS.to_string(), Tensor::ids(ids));
        inputs.insert(ATTENTION_MASK.to_string(), Tensor::ones(past_len + ids.len()));
        if self.position_ids {
            inputs.insert(POSITION_IDS.to_string(), Tensor::positions(past_len, ids.len()));
        }
        self.cache.feed(&mut inputs);

        let mut outputs = self.backend.run(stage, inputs)?;
        let logits = last_logits(&outputs).map_err(|e| GenerationError::backend(stage, e))?;
        self.cache
            .absorb(&mut outputs, ids.len())
            .map_err(|e| GenerationError::backend(stage, e))?;
        Ok(logits)
    }
}

impl GenerativeSession for DecoderOnlySession {
    fn prefill(&mut self, prompt_ids: &[u32]) -> Result<Array1<f32>> {
        if self.backend.is_closed() {
            return Err(GenerationError::Closed);
        }
        if prompt_ids.is_empty() {
            return Err(GenerationError::Session("prompt must contain at least one token".into()));
        }
        if self.prefilled || self.cache.seq_length() > 0 {
            return Err(GenerationError::Session(
                "prefill requires an empty cache; call reset_cache first".into(),
            ));
        }
        debug!("Prefilling {} tokens", prompt_ids.len());
        let logits = self.forward("prefill", prompt_ids)?;
        self.prefilled = true;
        Ok(logits)
    }

    fn decode(&mut self, token_id: u32) -> Result<Array1<f32>> {
        if self.backend.is_closed() {
            return Err(GenerationError::Closed);
        }
        if !self.prefilled {
            return Err(GenerationError::Session("decode called before prefill".into()));
        }
        self.forward("decode", &[token_id])
    }

    fn cache_sequence_length(&self) -> usize {
        self.cache.seq_length()
    }

    fn reset_cache(&mut self) {
        self.cache.clear();
        self.prefilled = false;
    }

    fn close(&mut self) -> Result<()> {
        self.cache.clear();
        self.prefilled = false;
        self.backend.close()
    }

    fn is_closed(&self) -> bool {
        self.backend.is_closed()
    }
}
