use std::time::{Duration, Instant};

use kjarni_tokenizers::{TokenDecoder, Tokenizer};
use log::{debug, info};
use ndarray::Array1;

use super::{GenerationResult, StopReason};
use crate::common::{GenerationConfig, Sampler};
use crate::error::{GenerationError, Result};
use crate::session::GenerativeSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    /// Stopped; the decoder's held-back bytes are still to be released.
    Flushing,
    Done,
}

/// A single generation in progress, yielding text fragments in order.
///
/// Each call to `next` samples tokens until one produces text (or generation
/// stops). Dropping the stream early skips the remaining forward passes.
/// [`GenerationStream::finish`] runs the rest of the generation and returns
/// the result.
pub struct GenerationStream<'a, T: Tokenizer, S: GenerativeSession> {
    tokenizer: &'a T,
    session: &'a mut S,
    sampler: &'a mut Sampler,
    config: &'a GenerationConfig,
    decoder: Box<dyn TokenDecoder + 'a>,

    phase: Phase,
    /// Prompt plus every sampled id, for the repetition penalty.
    context: Vec<u32>,
    prompt_tokens: usize,
    token_ids: Vec<u32>,
    sampled: usize,
    logits: Option<Array1<f32>>,
    /// Last sampled id not yet fed back through the session.
    pending: Option<u32>,
    stop_reason: Option<StopReason>,

    /// Tail of the decoded text, long enough to hold any stop sequence.
    stop_window: String,
    stop_window_cap: usize,

    started: Instant,
    generation_started: Instant,
    sampling_time: Duration,
    backend_time: Duration,
}

impl<'a, T: Tokenizer, S: GenerativeSession> GenerationStream<'a, T, S> {
    pub(super) fn new(
        tokenizer: &'a T,
        session: &'a mut S,
        sampler: &'a mut Sampler,
        config: &'a GenerationConfig,
        prompt_ids: Vec<u32>,
        logits: Array1<f32>,
        started: Instant,
    ) -> Self {
        let stop_window_cap = config.longest_stop_sequence();
        Self {
            tokenizer,
            session,
            sampler,
            config,
            decoder: tokenizer.token_decoder(),
            phase: Phase::Running,
            prompt_tokens: prompt_ids.len(),
            context: prompt_ids,
            token_ids: Vec::new(),
            sampled: 0,
            logits: Some(logits),
            pending: None,
            stop_reason: None,
            stop_window: String::with_capacity(stop_window_cap * 2),
            stop_window_cap,
            started,
            generation_started: Instant::now(),
            sampling_time: Duration::ZERO,
            backend_time: Duration::ZERO,
        }
    }

    pub fn prompt_tokens(&self) -> usize {
        self.prompt_tokens
    }

    /// Ids generated so far (without an end-of-sequence id).
    pub fn token_ids(&self) -> &[u32] {
        &self.token_ids
    }

    /// Consumes whatever is left and assembles the result.
    pub fn finish(mut self) -> Result<GenerationResult> {
        while self.advance()?.is_some() {}

        let stop_reason = self.stop_reason.take().ok_or_else(|| {
            GenerationError::Session("generation was aborted by an earlier error".into())
        })?;

        let mut text = self.tokenizer.decode(&self.token_ids);
        if let StopReason::StopSequence(stop) = &stop_reason {
            match text.rfind(stop.as_str()) {
                Some(pos) => text.truncate(pos),
                None => debug!("Stop sequence {:?} matched a special token; nothing to trim", stop),
            }
        }

        Ok(GenerationResult {
            text,
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.token_ids.len(),
            duration: self.started.elapsed(),
            stop_reason,
            token_ids: std::mem::take(&mut self.token_ids),
        })
    }

    /// Next non-empty fragment, or `None` once generation has stopped.
    fn advance(&mut self) -> Result<Option<String>> {
        loop {
            match self.phase {
                Phase::Done => return Ok(None),
                Phase::Flushing => {
                    self.phase = Phase::Done;
                    self.log_performance();
                    let tail = self.decoder.finish();
                    if !tail.is_empty() {
                        return Ok(Some(tail));
                    }
                }
                Phase::Running => {
                    let fragment = self.step()?;
                    if !fragment.is_empty() {
                        return Ok(Some(fragment));
                    }
                }
            }
        }
    }

    /// Samples one token and evaluates the stop conditions.
    fn step(&mut self) -> Result<String> {
        let logits = match self.pending.take() {
            Some(token) => {
                let t_backend = Instant::now();
                let logits = self.session.decode(token)?;
                self.backend_time += t_backend.elapsed();
                logits
            }
            None => self
                .logits
                .take()
                .ok_or_else(|| GenerationError::Session("no logits to sample from".into()))?,
        };

        let t_sampling = Instant::now();
        let token = self.sampler.sample(logits, self.config, &self.context)?;
        self.sampling_time += t_sampling.elapsed();
        self.sampled += 1;
        self.context.push(token);

        if self.config.is_eos(token) {
            debug!("Stop token generated: {}", token);
            self.stop(StopReason::Eos);
            return Ok(String::new());
        }

        self.token_ids.push(token);
        let fragment = self.decoder.step(token);

        if let Some(stop) = self.match_stop_sequence(token, &fragment) {
            debug!("Stop sequence {:?} reached", stop);
            self.stop(StopReason::StopSequence(stop));
        } else if self.sampled >= self.config.max_new_tokens() {
            info!("Generation reached max new tokens ({})", self.config.max_new_tokens());
            self.stop(StopReason::MaxNewTokens);
        } else {
            self.pending = Some(token);
        }
        Ok(fragment)
    }

    fn stop(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
        self.phase = Phase::Flushing;
    }

    /// Appends the token's text to the window and checks every stop sequence.
    ///
    /// Special tokens decode to nothing, so their literal content is matched
    /// instead.
    fn match_stop_sequence(&mut self, token: u32, fragment: &str) -> Option<String> {
        if self.stop_window_cap == 0 {
            return None;
        }
        if fragment.is_empty() && self.tokenizer.is_special(token) {
            if let Some(content) = self.tokenizer.id_to_token(token) {
                self.stop_window.push_str(content);
            }
        } else {
            self.stop_window.push_str(fragment);
        }

        let matched = self
            .config
            .stop_sequences()
            .iter()
            .find(|stop| self.stop_window.ends_with(stop.as_str()))
            .cloned();

        if self.stop_window.len() > self.stop_window_cap {
            let mut start = self.stop_window.len() - self.stop_window_cap;
            while !self.stop_window.is_char_boundary(start) {
                start -= 1;
            }
            self.stop_window.drain(..start);
        }
        matched
    }

    fn log_performance(&self) {
        let tokens_generated = self.sampled as u32;
        let total_generation_time = self.generation_started.elapsed();

        if tokens_generated > 0 && total_generation_time.as_secs_f64() > 0.0 {
            let tokens_per_sec = tokens_generated as f64 / total_generation_time.as_secs_f64();
            let avg_total_per_token = total_generation_time / tokens_generated;
            let avg_sampling_per_token = self.sampling_time / tokens_generated;
            let avg_backend_per_token = self.backend_time / tokens_generated;

            info!("-------------------- Generation Performance --------------------");
            info!("Total Tokens: {}", tokens_generated);
            info!("Total Time:   {:.3}s", total_generation_time.as_secs_f64());
            info!("Overall T/s:  {:.2}", tokens_per_sec);
            info!("----------------------------------------------------------------");
            info!("Avg. Time per Token Breakdown:");
            info!("  - Total:    {:?}", avg_total_per_token);
            info!("  - Sampling: {:?}", avg_sampling_per_token);
            info!("  - Backend:  {:?}", avg_backend_per_token);
            info!("----------------------------------------------------------------");
        } else if tokens_generated > 0 {
            info!("Generation complete. Generated {} tokens.", tokens_generated);
        }
    }
}

impl<T: Tokenizer, S: GenerativeSession> Iterator for GenerationStream<'_, T, S> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(fragment)) => Some(Ok(fragment)),
            Ok(None) => None,
            Err(e) => {
                self.phase = Phase::Done;
                Some(Err(e))
            }
        }
    }
}
