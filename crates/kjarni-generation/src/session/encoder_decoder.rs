use log::{debug, warn};
use ndarray::Array1;

use super::{BackendHandle, GenerativeSession};
use crate::cache::{Cache, CrossAttentionCache, SelfAttentionCache};
use crate::error::{GenerationError, Result};
use crate::model_config::KvLayout;
use crate::tensor::{
    last_logits, ForwardBackend, Tensor, TensorMap, ATTENTION_MASK, INPUT_IDS, LAST_HIDDEN_STATE,
};

/// An encoder + decoder pair.
///
/// `prefill` encodes the prompt once and primes the decoder with the
/// decoder-start token. The decoder's self-attention cache grows on every
/// step while the cross-attention cache stays frozen until the next reset.
pub struct EncoderDecoderSession {
    encoder: BackendHandle,
    decoder: BackendHandle,
    self_cache: SelfAttentionCache,
    cross_cache: CrossAttentionCache,
    decoder_start_token_id: u32,
    prefilled: bool,
}

impl EncoderDecoderSession {
    pub fn new(
        encoder: Box<dyn ForwardBackend>,
        decoder: Box<dyn ForwardBackend>,
        decoder_start_token_id: u32,
        layout: Option<KvLayout>,
    ) -> Self {
        Self {
            encoder: BackendHandle::new("encoder", encoder),
            decoder: BackendHandle::new("decoder", decoder),
            self_cache: SelfAttentionCache::for_decoder(layout),
            cross_cache: CrossAttentionCache::new(layout),
            decoder_start_token_id,
            prefilled: false,
        }
    }

    /// Opens both backends. If the decoder fails to open, the already opened
    /// encoder is closed before the error is returned.
    pub fn open<E, D>(
        open_encoder: E,
        open_decoder: D,
        decoder_start_token_id: u32,
        layout: Option<KvLayout>,
    ) -> Result<Self>
    where
        E: FnOnce() -> anyhow::Result<Box<dyn ForwardBackend>>,
        D: FnOnce() -> anyhow::Result<Box<dyn ForwardBackend>>,
    {
        let encoder = open_encoder().map_err(|e| GenerationError::backend("open encoder", e))?;
        let mut encoder = BackendHandle::new("encoder", encoder);
        let decoder = match open_decoder() {
            Ok(decoder) => decoder,
            Err(e) => {
                if let Err(close_err) = encoder.close() {
                    warn!("Failed to release encoder after decoder open failure: {}", close_err);
                }
                return Err(GenerationError::backend("open decoder", e));
            }
        };
        Ok(Self {
            encoder,
            decoder: BackendHandle::new("decoder", decoder),
            self_cache: SelfAttentionCache::for_decoder(layout),
            cross_cache: CrossAttentionCache::new(layout),
            decoder_start_token_id,
            prefilled: false,
        })
    }

    pub fn decoder_start_token_id(&self) -> u32 {
        self.decoder_start_token_id
    }

    /// Positions of the encoded prompt held by the cross-attention cache.
    pub fn encoder_sequence_length(&self) -> usize {
        self.cross_cache.seq_length()
    }

    fn encode(&mut self, prompt_ids: &[u32]) -> Result<()> {
        let mut inputs = TensorMap::new();
        inputs.insert(INPUT_IDS.to_string(), Tensor::ids(prompt_ids));
        inputs.insert(ATTENTION_MASK.to_string(), Tensor::ones(prompt_ids.len()));

        let mut outputs = self.encoder.run("encode", inputs)?;
        let hidden = outputs.remove(LAST_HIDDEN_STATE).ok_or_else(|| {
            GenerationError::backend(
                "encode",
                anyhow::anyhow!("encoder output has no '{}' tensor", LAST_HIDDEN_STATE),
            )
        })?;
        self.cross_cache
            .set_encoder_output(hidden, prompt_ids.len())
            .map_err(|e| GenerationError::backend("encode", e))
    }

    fn forward_decoder(&mut self, stage: &'static str, token_id: u32) -> Result<Array1<f32>> {
        let mut inputs = TensorMap::new();
        inputs.insert(INPUT_IDS.to_string(), Tensor::ids(&[token_id]));
        self.cross_cache.feed(&mut inputs);
        self.self_cache.feed(&mut inputs);

        let mut outputs = self.decoder.run(stage, inputs)?;
        let logits = last_logits(&outputs).map_err(|e| GenerationError::backend(stage, e))?;
        self.self_cache
            .absorb(&mut outputs, 1)
            .and_then(|()| self.cross_cache.absorb(&mut outputs, 1))
            .map_err(|e| GenerationError::backend(stage, e))?;
        Ok(logits)
    }
}

impl GenerativeSession for EncoderDecoderSession {
    fn prefill(&mut self, prompt_ids: &[u32]) -> Result<Array1<f32>> {
        if self.is_closed() {
            return Err(GenerationError::Closed);
        }
        if prompt_ids.is_empty() {
            return Err(GenerationError::Session("prompt must contain at least one token".into()));
        }
        if self.prefilled || self.cross_cache.has_encoder_output() || !self.self_cache.is_empty() {
            return Err(GenerationError::Session(
                "prefill requires an empty cache; call reset_cache first".into(),
            ));
        }
        debug!("Encoding {} prompt tokens", prompt_ids.len());
        self.encode(prompt_ids)?;
        let logits = self.forward_decoder("prefill", self.decoder_start_token_id)?;
        self.prefilled = true;
        Ok(logits)
    }

    fn decode(&mut self, token_id: u32) -> Result<Array1<f32>> {
        if self.is_closed() {
            return Err(GenerationError::Closed);
        }
        if !self.prefilled {
            return Err(GenerationError::Session("decode called before prefill".into()));
        }
        self.forward_decoder("decode", token_id)
    }

    fn cache_sequence_length(&self) -> usize {
        self.self_cache.seq_length()
    }

    fn reset_cache(&mut self) {
        self.self_cache.clear();
        self.cross_cache.clear();
        self.prefilled = false;
    }

    fn close(&mut self) -> Result<()> {
        self.reset_cache();
        let decoder = self.decoder.close();
        let encoder = self.encoder.close();
        decoder.and(encoder)
    }

    fn is_closed(&self) -> bool {
        self.decoder.is_closed() && self.encoder.is_closed()
    }
}
