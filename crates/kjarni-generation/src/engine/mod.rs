//! The autoregressive generation loop.

mod stream;

pub use stream::GenerationStream;

use std::fmt;
use std::time::{Duration, Instant};

use kjarni_tokenizers::{AnyTokenizer, Tokenizer};
use log::{debug, warn};

use crate::chat::{ChatTemplate, Conversation, RawTemplate};
use crate::common::{GenerationConfig, Sampler};
use crate::error::{GenerationError, Result};
use crate::session::{AnySession, GenerativeSession};

/// Why generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// An end-of-sequence id was sampled. It is not part of the output.
    Eos,
    /// The decoded text ended with this stop sequence, trimmed from the output.
    StopSequence(String),
    /// `max_new_tokens` tokens were generated.
    MaxNewTokens,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Eos => f.write_str("eos"),
            StopReason::StopSequence(s) => write!(f, "stop sequence {:?}", s),
            StopReason::MaxNewTokens => f.write_str("max new tokens"),
        }
    }
}

/// The outcome of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub duration: Duration,
    pub stop_reason: StopReason,
    /// Generated ids, without the end-of-sequence id.
    pub token_ids: Vec<u32>,
}

impl GenerationResult {
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.generated_tokens as f64 / secs
        } else {
            0.0
        }
    }
}

/// Drives tokenizer, session and sampler for one model.
///
/// One engine serves one request at a time (every generation method takes
/// `&mut self`). The session cache is reset at the start of every call, so
/// calls never see each other's state.
///
/// ```ignore
/// let mut engine = GenerationEngine::new(tokenizer, session, config)?;
/// let result = engine.generate_with("Once upon a time", |fragment| print!("{fragment}"))?;
/// println!("\n{} tokens ({})", result.generated_tokens, result.stop_reason);
/// engine.close()?;
/// ```
pub struct GenerationEngine<T: Tokenizer = AnyTokenizer, S: GenerativeSession = AnySession> {
    tokenizer: T,
    session: S,
    config: GenerationConfig,
    sampler: Sampler,
    closed: bool,
}

impl<T: Tokenizer, S: GenerativeSession> GenerationEngine<T, S> {
    /// Takes ownership of the tokenizer and session. A session that is
    /// already closed is rejected.
    pub fn new(tokenizer: T, session: S, config: GenerationConfig) -> Result<Self> {
        if session.is_closed() {
            return Err(GenerationError::Closed);
        }
        let sampler = Sampler::new(config.seed());
        Ok(Self {
            tokenizer,
            session,
            config,
            sampler,
            closed: false,
        })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Generates a complete response.
    pub fn generate(&mut self, text: &str) -> Result<GenerationResult> {
        self.generate_with(text, |_| {})
    }

    /// Generates a response, calling `on_token` with every text fragment as
    /// soon as it is decoded.
    pub fn generate_with<F>(&mut self, text: &str, mut on_token: F) -> Result<GenerationResult>
    where
        F: FnMut(&str),
    {
        let mut stream = self.stream(text)?;
        for fragment in stream.by_ref() {
            on_token(&fragment?);
        }
        stream.finish()
    }

    /// Starts generation and returns the fragments lazily.
    ///
    /// The prompt is prefilled before this returns; every further forward
    /// pass happens while the stream is consumed.
    pub fn stream(&mut self, text: &str) -> Result<GenerationStream<'_, T, S>> {
        let prompt = match self.config.chat_template() {
            Some(template) => template.render(text),
            None => text.to_string(),
        };
        self.start(&prompt)
    }

    /// Renders a multi-turn conversation through the chat template (or joins
    /// the messages when there is none) and generates the next reply.
    pub fn generate_conversation(&mut self, conversation: &Conversation) -> Result<GenerationResult> {
        let prompt = match self.config.chat_template() {
            Some(template) => {
                template
                    .validate(conversation)
                    .map_err(GenerationError::InvalidConfig)?;
                template.apply(conversation)
            }
            None => RawTemplate.apply(conversation),
        };
        self.start(&prompt)?.finish()
    }

    /// Releases the session's backends. Repeated calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.session.close()
    }

    fn encode_prompt(&self, prompt: &str) -> Result<Vec<u32>> {
        let mut ids = self.tokenizer.encode(prompt, None)?.into_ids();
        if self.config.add_bos_token() {
            match self.config.bos_token_id() {
                Some(bos) if ids.first() != Some(&bos) => ids.insert(0, bos),
                Some(_) => {}
                None => warn!("Config requested BOS token, but no BOS id is defined."),
            }
        }
        if ids.is_empty() {
            return Err(GenerationError::Session("prompt encodes to zero tokens".into()));
        }
        Ok(ids)
    }

    fn start(&mut self, prompt: &str) -> Result<GenerationStream<'_, T, S>> {
        if self.closed {
            return Err(GenerationError::Closed);
        }
        let started = Instant::now();
        self.session.reset_cache();

        let prompt_ids = self.encode_prompt(prompt)?;
        debug!("Prefilling {} prompt tokens...", prompt_ids.len());
        let t_prefill = Instant::now();
        let logits = self.session.prefill(&prompt_ids)?;
        debug!(
            "Prefill complete in {:.2}ms",
            t_prefill.elapsed().as_secs_f64() * 1000.0
        );

        Ok(GenerationStream::new(
            &self.tokenizer,
            &mut self.session,
            &mut self.sampler,
            &self.config,
            prompt_ids,
            logits,
            started,
        ))
    }
}

impl<T: Tokenizer, S: GenerativeSession> Drop for GenerationEngine<T, S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close generation engine: {}", e);
        }
    }
}
