//! Sessions: a forward-pass backend plus the cache it needs between passes.
//!
//! The engine only sees logits. Whether the model is a single decoder with
//! one growing cache or an encoder + decoder pair with a frozen
//! cross-attention cache is decided here.

mod decoder;
mod encoder_decoder;

pub use decoder::DecoderOnlySession;
pub use encoder_decoder::EncoderDecoderSession;

use log::warn;
use ndarray::Array1;

use crate::error::{GenerationError, Result};
use crate::tensor::{ForwardBackend, TensorMap};

/// Prefill/decode contract shared by every session kind.
pub trait GenerativeSession: Send {
    /// Runs the whole prompt through one forward pass. The cache must be empty.
    fn prefill(&mut self, prompt_ids: &[u32]) -> Result<Array1<f32>>;

    /// Extends the cache by exactly one position.
    fn decode(&mut self, token_id: u32) -> Result<Array1<f32>>;

    /// Positions held by the self-attention cache.
    fn cache_sequence_length(&self) -> usize;

    /// Discards every cached tensor; the next `prefill` behaves as on a new session.
    fn reset_cache(&mut self);

    /// Releases backend resources. Repeated calls are no-ops.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// The closed set of session kinds.
pub enum AnySession {
    DecoderOnly(DecoderOnlySession),
    EncoderDecoder(EncoderDecoderSession),
}

impl AnySession {
    pub fn is_encoder_decoder(&self) -> bool {
        matches!(self, AnySession::EncoderDecoder(_))
    }

    fn inner(&self) -> &dyn GenerativeSession {
        match self {
            AnySession::DecoderOnly(s) => s,
            AnySession::EncoderDecoder(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn GenerativeSession {
        match self {
            AnySession::DecoderOnly(s) => s,
            AnySession::EncoderDecoder(s) => s,
        }
    }
}

impl GenerativeSession for AnySession {
    fn prefill(&mut self, prompt_ids: &[u32]) -> Result<Array1<f32>> {
        self.inner_mut().prefill(prompt_ids)
    }

    fn decode(&mut self, token_id: u32) -> Result<Array1<f32>> {
        self.inner_mut().decode(token_id)
    }

    fn cache_sequence_length(&self) -> usize {
        self.inner().cache_sequence_length()
    }

    fn reset_cache(&mut self) {
        self.inner_mut().reset_cache()
    }

    fn close(&mut self) -> Result<()> {
        self.inner_mut().close()
    }

    fn is_closed(&self) -> bool {
        self.inner().is_closed()
    }
}

impl From<DecoderOnlySession> for AnySession {
    fn from(s: DecoderOnlySession) -> Self {
        AnySession::DecoderOnly(s)
    }
}

impl From<EncoderDecoderSession> for AnySession {
    fn from(s: EncoderDecoderSession) -> Self {
        AnySession::EncoderDecoder(s)
    }
}

/// Exclusive owner of one backend; closes it exactly once.
pub(crate) struct BackendHandle {
    name: &'static str,
    backend: Option<Box<dyn ForwardBackend>>,
}

impl BackendHandle {
    pub(crate) fn new(name: &'static str, backend: Box<dyn ForwardBackend>) -> Self {
        Self {
            name,
            backend: Some(backend),
        }
    }

    pub(crate) fn run(&mut self, stage: &'static str, inputs: TensorMap) -> Result<TensorMap> {
        let backend = self.backend.as_mut().ok_or(GenerationError::Closed)?;
        backend
            .run(inputs)
            .map_err(|e| GenerationError::backend(stage, e))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.backend.is_none()
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        match self.backend.take() {
            Some(mut backend) => {
                log::debug!("Closing {} backend", self.name);
                backend
                    .close()
                    .map_err(|e| GenerationError::backend("close", e))
            }
            None => Ok(()),
        }
    }
}

impl Drop for BackendHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {} backend on drop: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests;
