//! Loading tokenizers from Hugging Face `tokenizer.json` files and GPT-2
//! `vocab.json` + `merges.txt` pairs.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::added::AddedToken;
use crate::any::AnyTokenizer;
use crate::bpe::{read_file, ByteLevelBpe};
use crate::error::{Result, TokenizerError};
use crate::options::TokenizerOptions;
use crate::pieces::PrependScheme;
use crate::sentencepiece::{MergePriority, SentencePieceBpe};
use crate::unigram::Unigram;
use crate::vocab::Vocabulary;

/// Loads a tokenizer from a file or a model directory.
///
/// A directory is searched for `tokenizer.json` first, then for the
/// `vocab.json` + `merges.txt` pair.
pub fn load_tokenizer(path: impl AsRef<Path>, options: &TokenizerOptions) -> Result<AnyTokenizer> {
    let path = path.as_ref();
    if path.is_dir() {
        let json = path.join("tokenizer.json");
        if json.is_file() {
            return load_tokenizer(json, options);
        }
        let vocab = path.join("vocab.json");
        let merges = path.join("merges.txt");
        if vocab.is_file() && merges.is_file() {
            log::debug!("Loading byte-level BPE from {}", path.display());
            return Ok(ByteLevelBpe::from_files(vocab, merges, options.clone())?.into());
        }
        return Err(TokenizerError::Io {
            path: json,
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no tokenizer.json or vocab.json + merges.txt in directory",
            ),
        });
    }

    let content = read_file(path)?;
    from_json_str(&content, &path.display().to_string(), options)
}

/// Parses `tokenizer.json` content. `source_name` appears in error messages.
pub fn from_json_str(
    content: &str,
    source_name: &str,
    options: &TokenizerOptions,
) -> Result<AnyTokenizer> {
    let json: Value = serde_json::from_str(content).map_err(|source| TokenizerError::Json {
        source_name: source_name.to_string(),
        source,
    })?;
    let model = &json["model"];
    let added = parse_added_tokens(&json, source_name)?;

    let mut options = options.clone();
    if has_component(&json["normalizer"], "Lowercase") || bert_lowercase(&json["normalizer"]) {
        options.lowercase = true;
    }

    let model_type = match model["type"].as_str() {
        Some(t) => t,
        // Older exports omit the type; merges imply BPE.
        None if model.get("merges").is_some() => "BPE",
        None => {
            return Err(TokenizerError::malformed(source_name, "model.type is missing"));
        }
    };

    let tokenizer = match model_type {
        "BPE" => {
            let vocab = parse_vocab_map(model, source_name)?;
            let merges = parse_merges(model, source_name)?;
            let byte_fallback = model["byte_fallback"].as_bool().unwrap_or(false);
            let metaspace = has_component(&json["pre_tokenizer"], "Metaspace")
                || has_component(&json["decoder"], "Metaspace");

            if byte_fallback || metaspace {
                let scheme = prepend_scheme(&json);
                let priority = if merges.is_empty() {
                    // Without merges, earlier ids are the higher-priority pieces.
                    MergePriority::Scores(vocab_order_scores(&vocab))
                } else {
                    MergePriority::Pairs(merges)
                };
                let unk = model["unk_token"].as_str();
                log::debug!("Loading SentencePiece BPE from {source_name} ({scheme:?})");
                SentencePieceBpe::new(vocab, priority, added, unk, scheme, options)?.into()
            } else {
                if options.pattern.is_none() {
                    options.pattern = split_pattern(&json["pre_tokenizer"]);
                }
                if options.end_of_word_suffix.is_none() {
                    options.end_of_word_suffix =
                        model["end_of_word_suffix"].as_str().map(str::to_string);
                }
                log::debug!("Loading byte-level BPE from {source_name}");
                ByteLevelBpe::new(vocab, merges, added, options)?.into()
            }
        }
        "Unigram" => {
            let pieces = parse_scored_vocab(model, source_name)?;
            let unk_id = match &model["unk_id"] {
                Value::Null => None,
                v => Some(as_id(v, source_name, "model.unk_id")?),
            };
            let scheme = prepend_scheme(&json);
            log::debug!("Loading Unigram from {source_name} ({} pieces)", pieces.len());
            Unigram::new(pieces, unk_id, added, scheme, options)?.into()
        }
        other => {
            return Err(TokenizerError::Unsupported(format!(
                "model type '{}' in {}",
                other, source_name
            )))
        }
    };
    Ok(tokenizer)
}

fn as_id(value: &Value, source_name: &str, field: &str) -> Result<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            TokenizerError::malformed(source_name, format!("{} is not a token id: {}", field, value))
        })
}

fn parse_vocab_map(model: &Value, source_name: &str) -> Result<Vocabulary> {
    let entries = model["vocab"]
        .as_object()
        .ok_or_else(|| TokenizerError::malformed(source_name, "model.vocab is not an object"))?;
    let mut map = HashMap::with_capacity(entries.len());
    for (token, id) in entries {
        map.insert(token.clone(), as_id(id, source_name, "model.vocab entry")?);
    }
    Vocabulary::new(map)
}

/// Merges come either as `"a b"` strings or as `["a", "b"]` arrays.
fn parse_merges(model: &Value, source_name: &str) -> Result<Vec<(String, String)>> {
    let Some(entries) = model["merges"].as_array() else {
        return Ok(Vec::new());
    };
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let pair = match entry {
                Value::String(s) => s
                    .split_once(' ')
                    .map(|(a, b)| (a.to_string(), b.to_string())),
                Value::Array(parts) => match parts.as_slice() {
                    [Value::String(a), Value::String(b)] => Some((a.clone(), b.clone())),
                    _ => None,
                },
                _ => None,
            };
            pair.ok_or_else(|| {
                TokenizerError::malformed(source_name, format!("merge #{} is not a pair: {}", i, entry))
            })
        })
        .collect()
}

fn parse_scored_vocab(model: &Value, source_name: &str) -> Result<Vec<(String, f64)>> {
    let entries = model["vocab"]
        .as_array()
        .ok_or_else(|| TokenizerError::malformed(source_name, "model.vocab is not a list"))?;
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| match entry.as_array().map(Vec::as_slice) {
            Some([Value::String(piece), score]) => score
                .as_f64()
                .map(|s| (piece.clone(), s))
                .ok_or_else(|| {
                    TokenizerError::malformed(source_name, format!("piece #{} has no numeric score", i))
                }),
            _ => Err(TokenizerError::malformed(
                source_name,
                format!("piece #{} is not a [piece, score] pair", i),
            )),
        })
        .collect()
}

fn parse_added_tokens(json: &Value, source_name: &str) -> Result<Vec<AddedToken>> {
    let Some(entries) = json["added_tokens"].as_array() else {
        return Ok(Vec::new());
    };
    entries
        .iter()
        .map(|entry| {
            let content = entry["content"].as_str().ok_or_else(|| {
                TokenizerError::malformed(source_name, "added token without content")
            })?;
            let id = as_id(&entry["id"], source_name, "added_tokens.id")?;
            let special = entry["special"].as_bool().unwrap_or(false);
            Ok(AddedToken {
                content: content.to_string(),
                id,
                special,
            })
        })
        .collect()
}

fn vocab_order_scores(vocab: &Vocabulary) -> HashMap<String, f32> {
    (0..vocab.id_bound() as u32)
        .filter_map(|id| vocab.id_to_token(id).map(|t| (t.to_string(), -(id as f32))))
        .collect()
}

/// Finds a component of the given `type`, directly or inside a `Sequence`.
fn find_component<'a>(value: &'a Value, type_name: &str) -> Option<&'a Value> {
    if value["type"].as_str() == Some(type_name) {
        return Some(value);
    }
    ["pretokenizers", "normalizers", "decoders", "processors"]
        .iter()
        .filter_map(|key| value[*key].as_array())
        .flatten()
        .find_map(|child| find_component(child, type_name))
}

fn has_component(value: &Value, type_name: &str) -> bool {
    find_component(value, type_name).is_some()
}

fn bert_lowercase(normalizer: &Value) -> bool {
    find_component(normalizer, "BertNormalizer")
        .and_then(|n| n["lowercase"].as_bool())
        .unwrap_or(false)
}

fn split_pattern(pre_tokenizer: &Value) -> Option<String> {
    let split = find_component(pre_tokenizer, "Split")?;
    split["pattern"]["Regex"].as_str().map(str::to_string)
}

fn prepend_scheme(json: &Value) -> PrependScheme {
    let metaspace = find_component(&json["pre_tokenizer"], "Metaspace")
        .or_else(|| find_component(&json["decoder"], "Metaspace"));
    let Some(metaspace) = metaspace else {
        // Llama-style files prepend through a normalizer instead.
        return if has_component(&json["normalizer"], "Prepend") {
            PrependScheme::Always
        } else {
            PrependScheme::Never
        };
    };
    if let Some(scheme) = metaspace["prepend_scheme"].as_str() {
        return PrependScheme::parse(scheme).unwrap_or_else(|| {
            log::warn!("Unknown prepend_scheme '{}', using 'always'", scheme);
            PrependScheme::Always
        });
    }
    match metaspace["add_prefix_space"].as_bool() {
        Some(false) => PrependScheme::Never,
        _ => PrependScheme::Always,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Tokenizer;
    use std::io::Write;

    const BYTE_LEVEL: &str = r#"{
        "added_tokens": [{"id": 3, "content": "<|endoftext|>", "special": true}],
        "normalizer": null,
        "pre_tokenizer": {"type": "ByteLevel", "add_prefix_space": false},
        "decoder": {"type": "ByteLevel"},
        "model": {
            "type": "BPE",
            "vocab": {"h": 0, "i": 1, "hi": 2, "<|endoftext|>": 3},
            "merges": ["h i"]
        }
    }"#;

    const SENTENCEPIECE: &str = r#"{
        "added_tokens": [
            {"id": 0, "content": "<unk>", "special": true},
            {"id": 1, "content": "<s>", "special": true}
        ],
        "pre_tokenizer": {"type": "Metaspace", "replacement": "▁", "prepend_scheme": "first"},
        "decoder": {"type": "Sequence", "decoders": [{"type": "ByteFallback"}, {"type": "Metaspace"}]},
        "model": {
            "type": "BPE",
            "byte_fallback": true,
            "unk_token": "<unk>",
            "vocab": {"<unk>": 0, "<s>": 1, "▁": 2, "h": 3, "i": 4, "▁h": 5, "▁hi": 6},
            "merges": [["▁", "h"], ["▁h", "i"]]
        }
    }"#;

    const UNIGRAM: &str = r#"{
        "normalizer": {"type": "Sequence", "normalizers": [{"type": "Lowercase"}]},
        "pre_tokenizer": {"type": "Metaspace", "add_prefix_space": true},
        "model": {
            "type": "Unigram",
            "unk_id": 0,
            "vocab": [["<unk>", 0.0], ["▁", -1.0], ["▁hi", -2.0], ["h", -3.0], ["i", -3.0]]
        }
    }"#;

    fn load(content: &str) -> Result<AnyTokenizer> {
        from_json_str(content, "tokenizer.json", &TokenizerOptions::default())
    }

    #[test]
    fn test_selects_byte_level() {
        let tok = load(BYTE_LEVEL).unwrap();
        assert!(tok.is_byte_level());
        assert_eq!(tok.encode("hi", None).unwrap().input_ids(), &[2]);
        assert!(tok.is_special(3));
        assert_eq!(tok.decode(&[2, 3]), "hi");
    }

    #[test]
    fn test_selects_sentencepiece() {
        let tok = load(SENTENCEPIECE).unwrap();
        assert!(matches!(tok, AnyTokenizer::SentencePiece(_)));
        assert_eq!(tok.encode("<s>hi", None).unwrap().input_ids(), &[1, 3, 4]);
        assert_eq!(tok.encode("hi", None).unwrap().input_ids(), &[6]);
    }

    #[test]
    fn test_selects_unigram_with_lowercase() {
        let tok = load(UNIGRAM).unwrap();
        assert_eq!(tok.kind(), "Unigram");
        assert_eq!(tok.encode("HI", None).unwrap().input_ids(), &[2]);
        assert_eq!(tok.decode(&[2]), "hi");
    }

    #[test]
    fn test_split_pattern_is_honored() {
        let json = BYTE_LEVEL.replace(
            r#""pre_tokenizer": {"type": "ByteLevel", "add_prefix_space": false}"#,
            r#""pre_tokenizer": {"type": "Sequence", "pretokenizers": [
                {"type": "Split", "pattern": {"Regex": "\\p{L}"}, "behavior": "Isolated"},
                {"type": "ByteLevel"}
            ]}"#,
        );
        let tok = load(&json).unwrap();
        // Single-letter pre-tokens never meet, so "h i" cannot merge.
        assert_eq!(tok.encode("hi", None).unwrap().input_ids(), &[0, 1]);
    }

    #[test]
    fn test_unsupported_model_type() {
        let err = load(r#"{"model": {"type": "WordPiece", "vocab": {}}}"#).unwrap_err();
        assert!(matches!(err, TokenizerError::Unsupported(_)));
    }

    #[test]
    fn test_malformed_data_names_source() {
        let err = load(r#"{"model": {"type": "BPE", "vocab": {"a": "zero"}, "merges": []}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("tokenizer.json"));

        let err = load("{ not json").unwrap_err();
        assert!(matches!(err, TokenizerError::Json { .. }));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("tokenizer.json")).unwrap();
        file.write_all(UNIGRAM.as_bytes()).unwrap();

        let tok = load_tokenizer(dir.path(), &TokenizerOptions::default()).unwrap();
        assert_eq!(tok.kind(), "Unigram");
    }

    #[test]
    fn test_load_gpt2_file_pair() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vocab.json"), r#"{"h": 0, "i": 1, "hi": 2}"#).unwrap();
        std::fs::write(dir.path().join("merges.txt"), "#version: 0.2\nh i\n").unwrap();

        let tok = load_tokenizer(dir.path(), &TokenizerOptions::default()).unwrap();
        assert!(tok.is_byte_level());
        assert_eq!(tok.encode("hi", None).unwrap().input_ids(), &[2]);
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_tokenizer(dir.path(), &TokenizerOptions::default()).unwrap_err();
        assert!(matches!(err, TokenizerError::Io { .. }));
    }
}
