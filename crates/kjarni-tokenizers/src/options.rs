//! Construction-time tokenizer options and the shared post-processing step.

use crate::added::{AddedToken, AddedTokens};
use crate::encoding::EncodedInput;
use crate::error::{Result, TokenizerError};
use crate::vocab::Vocabulary;

/// Options applied on top of whatever the tokenizer files describe.
///
/// Every field is read once when the tokenizer is built.
#[derive(Debug, Clone, Default)]
pub struct TokenizerOptions {
    /// Replaces the pre-tokenization regex of byte-level BPE.
    pub pattern: Option<String>,
    /// Extra strings that must tokenize atomically. Missing ones get fresh ids.
    pub added_tokens: Vec<String>,
    /// Lowercase ordinary text (added tokens keep their case).
    pub lowercase: bool,
    /// Collapse whitespace runs to one space and trim the ends.
    pub normalize_whitespace: bool,
    /// Byte-level BPE: marker appended to the last symbol of every pre-token.
    pub end_of_word_suffix: Option<String>,
    /// Default truncation length when `encode` is called without one.
    pub max_length: Option<usize>,
    /// End-of-sequence token preserved by truncation.
    pub eos_token: Option<String>,
    /// Append `eos_token` to every encoding.
    pub add_eos_token: bool,
    /// Padding token used by `pad_to_max_length`.
    pub pad_token: Option<String>,
    /// Pad every encoding to the effective max length.
    pub pad_to_max_length: bool,
}

impl TokenizerOptions {
    /// Registers the configured added tokens, inserting unknown ones into the vocabulary.
    pub(crate) fn resolve_added_tokens(
        &self,
        vocab: &mut Vocabulary,
        mut declared: Vec<AddedToken>,
    ) -> Result<AddedTokens> {
        for token in &declared {
            vocab.insert_if_absent(&token.content, token.id)?;
        }
        for content in &self.added_tokens {
            if declared.iter().any(|t| &t.content == content) {
                continue;
            }
            let id = match vocab.token_to_id(content) {
                Some(id) => id,
                None => {
                    let id = vocab.next_free_id();
                    vocab.insert_if_absent(content, id)?;
                    id
                }
            };
            declared.push(AddedToken::special(content.clone(), id));
        }
        Ok(AddedTokens::new(declared))
    }

    pub(crate) fn post_processor(&self, vocab: &Vocabulary) -> Result<PostProcessor> {
        let lookup = |token: &Option<String>| -> Result<Option<u32>> {
            match token {
                Some(t) => vocab
                    .token_to_id(t)
                    .map(Some)
                    .ok_or_else(|| TokenizerError::MissingToken(t.clone())),
                None => Ok(None),
            }
        };

        let eos_id = lookup(&self.eos_token)?;
        let pad_id = lookup(&self.pad_token)?;

        if self.add_eos_token && eos_id.is_none() {
            return Err(TokenizerError::malformed(
                "tokenizer options",
                "add_eos_token is set but no eos_token is configured",
            ));
        }
        if self.pad_to_max_length && (pad_id.is_none() || self.max_length.is_none()) {
            return Err(TokenizerError::malformed(
                "tokenizer options",
                "pad_to_max_length requires both pad_token and max_length",
            ));
        }

        Ok(PostProcessor {
            eos_id,
            add_eos: self.add_eos_token,
            pad_id: if self.pad_to_max_length { pad_id } else { None },
            default_max_length: self.max_length,
        })
    }

    /// Whitespace cleanup, applied before the added-token carve-out.
    pub(crate) fn clean_whitespace<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        if self.normalize_whitespace {
            std::borrow::Cow::Owned(text.split_whitespace().collect::<Vec<_>>().join(" "))
        } else {
            std::borrow::Cow::Borrowed(text)
        }
    }
}

/// EOS appending, truncation and padding, shared by every algorithm.
#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    eos_id: Option<u32>,
    add_eos: bool,
    pad_id: Option<u32>,
    default_max_length: Option<usize>,
}

impl PostProcessor {
    pub fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }

    pub(crate) fn finish(&self, mut ids: Vec<u32>, max_length: Option<usize>) -> EncodedInput {
        if let (true, Some(eos)) = (self.add_eos, self.eos_id) {
            ids.push(eos);
        }
        let mut encoded = EncodedInput::new(ids);
        self.truncate_and_pad(&mut encoded, max_length);
        encoded
    }

    pub(crate) fn finish_pair(
        &self,
        mut first: Vec<u32>,
        mut second: Vec<u32>,
        max_length: Option<usize>,
    ) -> EncodedInput {
        if let (true, Some(eos)) = (self.add_eos, self.eos_id) {
            first.push(eos);
            second.push(eos);
        }
        let mut encoded = EncodedInput::pair(first, second);
        self.truncate_and_pad(&mut encoded, max_length);
        encoded
    }

    fn truncate_and_pad(&self, encoded: &mut EncodedInput, max_length: Option<usize>) {
        let Some(max_length) = max_length.or(self.default_max_length) else {
            return;
        };
        encoded.truncate(max_length, self.eos_id);
        if let Some(pad) = self.pad_id {
            encoded.pad_to(max_length, pad);
        }
    }
}
