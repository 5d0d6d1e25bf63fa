//! Builds an engine from a resolved model directory.
//!
//! The directory holds `config.json`, the tokenizer files and whatever the
//! [`BackendFactory`] needs to open the networks.

use std::path::Path;

use kjarni_tokenizers::{load_tokenizer, Tokenizer, TokenizerOptions};
use log::info;

use crate::common::GenerationConfigBuilder;
use crate::engine::GenerationEngine;
use crate::error::{GenerationError, Result};
use crate::model_config::ModelConfig;
use crate::session::{AnySession, DecoderOnlySession, EncoderDecoderSession};
use crate::tensor::{BackendFactory, BackendRole};

pub const CONFIG_FILE: &str = "config.json";

/// Loads config, tokenizer and backends and assembles an engine.
///
/// Everything that can fail without native resources (config, tokenizer,
/// generation settings) is checked before any backend is opened. Backends
/// opened before a later failure are closed again.
pub fn load_engine(
    model_dir: impl AsRef<Path>,
    backends: &dyn BackendFactory,
    config: GenerationConfigBuilder,
    tokenizer_options: &TokenizerOptions,
) -> Result<GenerationEngine> {
    let model_dir = model_dir.as_ref();
    let model_config = ModelConfig::from_file(model_dir.join(CONFIG_FILE))?;

    let tokenizer = load_tokenizer(model_dir, tokenizer_options)?;
    info!(
        "Loaded {} tokenizer with {} tokens from {}",
        tokenizer.kind(),
        tokenizer.vocab_size(),
        model_dir.display()
    );

    let config = config.build_for_model(&model_config)?;
    let session = open_session(model_dir, backends, &model_config)?;
    GenerationEngine::new(tokenizer, session, config)
}

/// Opens a decoder-only or encoder-decoder session, as `is_encoder_decoder` says.
pub fn open_session(
    model_dir: &Path,
    backends: &dyn BackendFactory,
    model_config: &ModelConfig,
) -> Result<AnySession> {
    if model_config.is_encoder_decoder {
        let start = model_config
            .decoder_start_token_id
            .or(model_config.pad_token_id)
            .ok_or_else(|| {
                GenerationError::InvalidConfig(
                    "encoder-decoder model has no decoder_start_token_id".into(),
                )
            })?;
        info!("Opening encoder-decoder session (decoder start token {})", start);
        let session = EncoderDecoderSession::open(
            || backends.open(model_dir, BackendRole::Encoder),
            || backends.open(model_dir, BackendRole::Decoder),
            start,
            model_config.decoder_kv_layout(),
        )?;
        Ok(session.into())
    } else {
        info!("Opening decoder-only session");
        let backend = backends
            .open(model_dir, BackendRole::Decoder)
            .map_err(|e| GenerationError::backend("open decoder", e))?;
        Ok(DecoderOnlySession::new(backend, model_config.kv_layout()).into())
    }
}
