//! The subset of a model's `config.json` that generation needs.

use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::{GenerationError, Result};

/// Key/value cache geometry of one attention stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvLayout {
    pub num_layers: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub is_encoder_decoder: bool,
    #[serde(default)]
    pub vocab_size: Option<usize>,

    /// Accepts a single id or a list.
    #[serde(default, deserialize_with = "one_or_many")]
    pub eos_token_id: Vec<u32>,
    #[serde(default, deserialize_with = "first_of_one_or_many")]
    pub bos_token_id: Option<u32>,
    #[serde(default, deserialize_with = "first_of_one_or_many")]
    pub pad_token_id: Option<u32>,
    #[serde(default)]
    pub decoder_start_token_id: Option<u32>,

    #[serde(default, alias = "n_layer", alias = "num_layers")]
    pub num_hidden_layers: Option<usize>,
    #[serde(default, alias = "n_head", alias = "num_heads")]
    pub num_attention_heads: Option<usize>,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    #[serde(default, alias = "n_embd", alias = "d_model")]
    pub hidden_size: Option<usize>,
    #[serde(default, alias = "d_kv")]
    pub head_dim: Option<usize>,

    /// Encoder-decoder models may size the decoder stack separately.
    #[serde(default, alias = "num_decoder_layers")]
    pub decoder_layers: Option<usize>,
    #[serde(default)]
    pub decoder_attention_heads: Option<usize>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(u32),
    Many(Vec<u32>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(id)) => vec![id],
        Some(OneOrMany::Many(ids)) => ids,
    })
}

fn first_of_one_or_many<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(one_or_many(deserializer)?.first().copied())
}

impl ModelConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Reads `config.json`; errors name the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| GenerationError::ModelConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| GenerationError::ModelConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn layout_with(&self, num_layers: Option<usize>, num_heads: Option<usize>) -> Option<KvLayout> {
        let num_layers = num_layers?;
        let num_heads = num_heads?;
        let head_dim = match self.head_dim {
            Some(d) => d,
            None => self.hidden_size?.checked_div(num_heads)?,
        };
        Some(KvLayout {
            num_layers,
            num_kv_heads: self.num_key_value_heads.unwrap_or(num_heads),
            head_dim,
        })
    }

    /// Cache geometry of a decoder-only model, when the config carries it.
    pub fn kv_layout(&self) -> Option<KvLayout> {
        self.layout_with(self.num_hidden_layers, self.num_attention_heads)
    }

    /// Cache geometry of the decoder half of an encoder-decoder model.
    pub fn decoder_kv_layout(&self) -> Option<KvLayout> {
        self.layout_with(
            self.decoder_layers.or(self.num_hidden_layers),
            self.decoder_attention_heads.or(self.num_attention_heads),
        )
    }
}
