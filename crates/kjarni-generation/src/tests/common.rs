//! Scripted backends, sessions and a tiny tokenizer shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use kjarni_tokenizers::{AddedToken, AnyTokenizer, PrependScheme, TokenizerOptions, Unigram};
use ndarray::{Array1, Array3, ArrayD};

use crate::error::GenerationError;
use crate::session::GenerativeSession;
use crate::tensor::{
    ForwardBackend, Tensor, TensorMap, ENCODER_HIDDEN_STATES, INPUT_IDS, LAST_HIDDEN_STATE, LOGITS,
};

pub const VOCAB: usize = 12;
pub const LAYERS: usize = 2;

// =========================================================================
//  Tokenizer
// =========================================================================

pub const UNK: u32 = 0;
pub const BOS: u32 = 1;
pub const EOS: u32 = 2;
pub const HELLO: u32 = 3;
pub const WORLD: u32 = 4;
pub const IM_END: u32 = 5;
pub const SPACE: u32 = 6;
pub const H: u32 = 7;
pub const I: u32 = 8;
pub const SPACE_WORLD: u32 = 9;
pub const BANG: u32 = 10;
pub const END_TURN: u32 = 11;

/// Unigram over a handful of pieces; `<|im_end|>` is an ordinary piece and
/// `<end_turn>` a special one.
pub fn tokenizer() -> AnyTokenizer {
    let pieces = [
        ("<unk>", 0.0),
        ("<s>", 0.0),
        ("</s>", 0.0),
        ("hello", -1.0),
        ("world", -1.0),
        ("<|im_end|>", -1.0),
        ("▁", -2.0),
        ("h", -3.0),
        ("i", -3.0),
        ("▁world", -1.0),
        ("!", -2.0),
        ("<end_turn>", 0.0),
    ];
    let pieces = pieces.iter().map(|(p, s)| (p.to_string(), *s)).collect();
    let added = vec![
        AddedToken::special("<s>", BOS),
        AddedToken::special("</s>", EOS),
        AddedToken::special("<end_turn>", END_TURN),
    ];
    Unigram::new(pieces, Some(UNK), added, PrependScheme::Never, TokenizerOptions::default())
        .map(AnyTokenizer::from)
        .expect("test tokenizer")
}

pub fn one_hot(id: u32) -> Array1<f32> {
    let mut logits = Array1::zeros(VOCAB);
    logits[id as usize] = 10.0;
    logits
}

// =========================================================================
//  Backends
// =========================================================================

/// What a mock backend saw.
#[derive(Default)]
pub struct Probe {
    pub runs: Mutex<Vec<TensorMap>>,
    pub closes: AtomicUsize,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn input_ids(&self) -> Vec<Vec<i64>> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .map(|inputs| inputs[INPUT_IDS].as_i64().unwrap().iter().copied().collect())
            .collect()
    }

    pub fn input_names(&self, run: usize) -> Vec<String> {
        let runs = self.runs.lock().unwrap();
        let mut names: Vec<String> = runs[run].keys().cloned().collect();
        names.sort();
        names
    }
}

fn seq_len_of(inputs: &TensorMap, name: &str) -> usize {
    inputs.get(name).map(|t| t.shape()[2]).unwrap_or(0)
}

fn logits_for(seq: usize, next: u32) -> Tensor {
    let mut logits = Array3::<f32>::zeros((1, seq, VOCAB));
    logits[[0, seq - 1, next as usize]] = 10.0;
    Tensor::F32(logits.into_dyn())
}

fn kv(seq: usize) -> Tensor {
    Tensor::F32(ArrayD::zeros(vec![1, 1, seq, 2]))
}

/// Decoder that predicts `script[step]`, where step 0 is the prefill pass.
/// An empty script predicts `(last input id + 1) % VOCAB`.
pub struct MockDecoder {
    probe: Arc<Probe>,
    script: Vec<u32>,
    prompt_len: usize,
    fail_on_run: Option<usize>,
    seq2seq: bool,
}

impl MockDecoder {
    pub fn new(probe: Arc<Probe>, script: Vec<u32>) -> Self {
        Self {
            probe,
            script,
            prompt_len: 0,
            fail_on_run: None,
            seq2seq: false,
        }
    }

    /// Decoder half of an encoder-decoder pair.
    pub fn seq2seq(probe: Arc<Probe>, script: Vec<u32>) -> Self {
        Self {
            seq2seq: true,
            ..Self::new(probe, script)
        }
    }

    pub fn failing_on(mut self, run: usize) -> Self {
        self.fail_on_run = Some(run);
        self
    }

    fn next_token(&self, step: usize, last_id: u32) -> u32 {
        if self.script.is_empty() {
            (last_id + 1) % VOCAB as u32
        } else {
            self.script[step.min(self.script.len() - 1)]
        }
    }
}

impl ForwardBackend for MockDecoder {
    fn run(&mut self, inputs: TensorMap) -> Result<TensorMap> {
        let run = self.probe.run_count();
        self.probe.runs.lock().unwrap().push(inputs.clone());
        if self.fail_on_run == Some(run) {
            bail!("mock decoder failure on run {}", run);
        }

        let ids = inputs[INPUT_IDS].as_i64().ok_or_else(|| anyhow!("ids must be i64"))?;
        let seq = ids.len();
        let last_id = ids.iter().last().copied().unwrap_or(0) as u32;

        let mut outputs = TensorMap::new();
        if self.seq2seq {
            let encoder_len = inputs
                .get(ENCODER_HIDDEN_STATES)
                .map(|t| t.shape()[1])
                .ok_or_else(|| anyhow!("missing encoder_hidden_states"))?;
            let past = seq_len_of(&inputs, "past_key_values.0.decoder.key");
            let step = past;
            for layer in 0..LAYERS {
                for part in ["key", "value"] {
                    outputs.insert(format!("present.{layer}.decoder.{part}"), kv(past + seq));
                    outputs.insert(format!("present.{layer}.encoder.{part}"), kv(encoder_len));
                }
            }
            outputs.insert(LOGITS.into(), logits_for(seq, self.next_token(step, last_id)));
        } else {
            let past = seq_len_of(&inputs, "past_key_values.0.key");
            if past == 0 {
                self.prompt_len = seq;
            }
            let step = past + seq - self.prompt_len;
            for layer in 0..LAYERS {
                for part in ["key", "value"] {
                    outputs.insert(format!("present.{layer}.{part}"), kv(past + seq));
                }
            }
            outputs.insert(LOGITS.into(), logits_for(seq, self.next_token(step, last_id)));
        }
        Ok(outputs)
    }

    fn close(&mut self) -> Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Encoder producing a `[1, seq, 4]` hidden state.
pub struct MockEncoder {
    probe: Arc<Probe>,
}

impl MockEncoder {
    pub fn new(probe: Arc<Probe>) -> Self {
        Self { probe }
    }
}

impl ForwardBackend for MockEncoder {
    fn run(&mut self, inputs: TensorMap) -> Result<TensorMap> {
        self.probe.runs.lock().unwrap().push(inputs.clone());
        let seq = inputs[INPUT_IDS].shape()[1];
        Ok(TensorMap::from([(
            LAST_HIDDEN_STATE.to_string(),
            Tensor::F32(ArrayD::from_elem(vec![1, seq, 4], 0.5)),
        )]))
    }

    fn close(&mut self) -> Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =========================================================================
//  Session
// =========================================================================

/// Session that emits a fixed token script, one id per pass.
pub struct ScriptedSession {
    script: Vec<u32>,
    step: usize,
    cache_len: usize,
    pub prefills: Arc<Mutex<Vec<Vec<u32>>>>,
    pub decodes: Arc<Mutex<Vec<u32>>>,
    pub resets: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    closed: bool,
    fail_on_decode: Option<usize>,
}

impl ScriptedSession {
    pub fn new(script: Vec<u32>) -> Self {
        Self {
            script,
            step: 0,
            cache_len: 0,
            prefills: Arc::default(),
            decodes: Arc::default(),
            resets: Arc::default(),
            closes: Arc::default(),
            closed: false,
            fail_on_decode: None,
        }
    }

    pub fn failing_on_decode(mut self, n: usize) -> Self {
        self.fail_on_decode = Some(n);
        self
    }

    fn emit(&mut self) -> Array1<f32> {
        let id = self.script[self.step.min(self.script.len() - 1)];
        self.step += 1;
        one_hot(id)
    }
}

impl GenerativeSession for ScriptedSession {
    fn prefill(&mut self, prompt_ids: &[u32]) -> crate::Result<Array1<f32>> {
        if self.closed {
            return Err(GenerationError::Closed);
        }
        self.prefills.lock().unwrap().push(prompt_ids.to_vec());
        self.cache_len = prompt_ids.len();
        Ok(self.emit())
    }

    fn decode(&mut self, token_id: u32) -> crate::Result<Array1<f32>> {
        if self.closed {
            return Err(GenerationError::Closed);
        }
        let n = {
            let mut decodes = self.decodes.lock().unwrap();
            decodes.push(token_id);
            decodes.len() - 1
        };
        if self.fail_on_decode == Some(n) {
            return Err(GenerationError::backend("decode", anyhow!("scripted failure")));
        }
        self.cache_len += 1;
        Ok(self.emit())
    }

    fn cache_sequence_length(&self) -> usize {
        self.cache_len
    }

    fn reset_cache(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.step = 0;
        self.cache_len = 0;
    }

    fn close(&mut self) -> crate::Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
