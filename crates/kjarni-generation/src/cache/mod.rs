//! Key/value caches carried between forward passes.
//!
//! Caches hold the backend's `present.*` outputs and feed them back as
//! `past_key_values.*` inputs on the next pass. The cache tensors are never
//! shown to the engine.

use std::collections::BTreeMap;

use anyhow::bail;

use crate::model_config::KvLayout;
use crate::tensor::{Tensor, TensorMap, ENCODER_ATTENTION_MASK, ENCODER_HIDDEN_STATES};

const PAST_PREFIX: &str = "past_key_values.";
const PRESENT_PREFIX: &str = "present.";
const SEQ_AXIS: usize = 2;

/// Mutable inference state owned by a session.
pub trait Cache: Send {
    /// Number of positions currently cached.
    fn seq_length(&self) -> usize;

    fn clear(&mut self);

    /// Moves this cache's tensors out of a forward pass's outputs.
    ///
    /// `new_tokens` is the number of positions that pass processed.
    fn absorb(&mut self, outputs: &mut TensorMap, new_tokens: usize) -> anyhow::Result<()>;

    /// Adds the cached tensors to the next pass's inputs.
    fn feed(&self, inputs: &mut TensorMap);
}

fn past_name(present: &str) -> Option<String> {
    present
        .strip_prefix(PRESENT_PREFIX)
        .map(|rest| format!("{PAST_PREFIX}{rest}"))
}

fn empty_past(layout: &KvLayout, infix: &str, inputs: &mut TensorMap) {
    for layer in 0..layout.num_layers {
        for part in ["key", "value"] {
            inputs.insert(
                format!("{PAST_PREFIX}{layer}.{infix}{part}"),
                Tensor::empty_past(layout.num_kv_heads, layout.head_dim),
            );
        }
    }
}

/// Takes every output whose name matches `present.*` (and contains `infix`).
fn take_present(outputs: &mut TensorMap, infix: &str) -> Vec<(String, Tensor)> {
    let names: Vec<String> = outputs
        .keys()
        .filter(|name| name.starts_with(PRESENT_PREFIX) && name.contains(infix))
        .cloned()
        .collect();
    names
        .into_iter()
        .filter_map(|name| {
            let tensor = outputs.remove(&name)?;
            Some((past_name(&name)?, tensor))
        })
        .collect()
}

/// Self-attention cache: grows by the number of processed tokens every pass.
///
/// For decoder-only models it owns every `present.*` output; inside an
/// encoder-decoder pair it owns only `present.*.decoder.*`.
#[derive(Debug, Clone)]
pub struct SelfAttentionCache {
    layout: Option<KvLayout>,
    infix: &'static str,
    tensors: BTreeMap<String, Tensor>,
    seq_len: usize,
}

impl SelfAttentionCache {
    pub fn new(layout: Option<KvLayout>) -> Self {
        Self {
            layout,
            infix: "",
            tensors: BTreeMap::new(),
            seq_len: 0,
        }
    }

    /// The decoder half of an encoder-decoder cache.
    pub fn for_decoder(layout: Option<KvLayout>) -> Self {
        Self {
            infix: "decoder.",
            ..Self::new(layout)
        }
    }

    pub fn layout(&self) -> Option<&KvLayout> {
        self.layout.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.seq_len == 0
    }

    pub fn tensor(&self, input_name: &str) -> Option<&Tensor> {
        self.tensors.get(input_name)
    }
}

impl Cache for SelfAttentionCache {
    fn seq_length(&self) -> usize {
        self.seq_len
    }

    fn clear(&mut self) {
        self.tensors.clear();
        self.seq_len = 0;
    }

    fn absorb(&mut self, outputs: &mut TensorMap, new_tokens: usize) -> anyhow::Result<()> {
        let expected = self.seq_len + new_tokens;
        let present = take_present(outputs, self.infix);
        for (name, tensor) in &present {
            let shape = tensor.shape();
            if shape.len() == 4 && shape[SEQ_AXIS] != expected {
                bail!(
                    "'{}' has {} cached positions, expected {} ({} + {})",
                    name,
                    shape[SEQ_AXIS],
                    expected,
                    self.seq_len,
                    new_tokens
                );
            }
        }
        self.tensors.extend(present);
        self.seq_len = expected;
        Ok(())
    }

    fn feed(&self, inputs: &mut TensorMap) {
        if !self.tensors.is_empty() {
            inputs.extend(self.tensors.iter().map(|(k, v)| (k.clone(), v.clone())));
        } else if let Some(layout) = &self.layout {
            empty_past(layout, self.infix, inputs);
        }
    }
}

/// Cross-attention state of an encoder-decoder model.
///
/// Holds the encoder output and the `present.*.encoder.*` tensors of the
/// first decoder pass. Once captured they never change until [`Cache::clear`].
#[derive(Debug, Clone, Default)]
pub struct CrossAttentionCache {
    layout: Option<KvLayout>,
    hidden_states: Option<Tensor>,
    attention_mask: Option<Tensor>,
    tensors: BTreeMap<String, Tensor>,
    frozen: bool,
    encoder_len: usize,
}

impl CrossAttentionCache {
    pub fn new(layout: Option<KvLayout>) -> Self {
        Self {
            layout,
            ..Self::default()
        }
    }

    /// Stores the encoder output for a prompt of `encoder_len` tokens.
    pub fn set_encoder_output(&mut self, hidden_states: Tensor, encoder_len: usize) -> anyhow::Result<()> {
        if self.hidden_states.is_some() {
            bail!("cross-attention state is already set; clear the cache first");
        }
        self.hidden_states = Some(hidden_states);
        self.attention_mask = Some(Tensor::ones(encoder_len));
        self.encoder_len = encoder_len;
        Ok(())
    }

    pub fn has_encoder_output(&self) -> bool {
        self.hidden_states.is_some()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn tensor(&self, input_name: &str) -> Option<&Tensor> {
        self.tensors.get(input_name)
    }
}

impl Cache for CrossAttentionCache {
    fn seq_length(&self) -> usize {
        self.encoder_len
    }

    fn clear(&mut self) {
        self.hidden_states = None;
        self.attention_mask = None;
        self.tensors.clear();
        self.frozen = false;
        self.encoder_len = 0;
    }

    /// Captures the first pass's cross-attention tensors; later ones are dropped.
    fn absorb(&mut self, outputs: &mut TensorMap, _new_tokens: usize) -> anyhow::Result<()> {
        let present = take_present(outputs, "encoder.");
        if !self.frozen {
            self.tensors.extend(present);
            self.frozen = true;
        }
        Ok(())
    }

    fn feed(&self, inputs: &mut TensorMap) {
        if let Some(hidden) = &self.hidden_states {
            inputs.insert(ENCODER_HIDDEN_STATES.to_string(), hidden.clone());
        }
        if let Some(mask) = &self.attention_mask {
            inputs.insert(ENCODER_ATTENTION_MASK.to_string(), mask.clone());
        }
        if !self.tensors.is_empty() {
            inputs.extend(self.tensors.iter().map(|(k, v)| (k.clone(), v.clone())));
        } else if let Some(layout) = &self.layout {
            empty_past(layout, "encoder.", inputs);
        }
    }
}
