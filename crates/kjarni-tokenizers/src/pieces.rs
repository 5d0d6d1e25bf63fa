//! Machinery shared by the SentencePiece-style tokenizers (BPE and Unigram):
//! the space marker, byte-fallback pieces and the streaming piece decoder.

use std::collections::HashMap;

use crate::added::AddedTokens;
use crate::bytes::{byte_fallback_piece, PendingBytes};
use crate::traits::TokenDecoder;
use crate::vocab::Vocabulary;

/// Stands in for a literal space inside pieces.
pub const SPACE_MARKER: char = '▁';

/// Where the dummy-prefix space marker is inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrependScheme {
    /// Every text span between added tokens.
    #[default]
    Always,
    /// Only a span that starts the input.
    First,
    /// Never; decode keeps leading spaces too.
    Never,
}

impl PrependScheme {
    /// Parses the `prepend_scheme` strings used in `tokenizer.json`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "always" => Some(Self::Always),
            "first" => Some(Self::First),
            "never" => Some(Self::Never),
            _ => None,
        }
    }
}

/// Replaces spaces with [`SPACE_MARKER`] and adds the dummy prefix.
pub(crate) fn normalize(span: &str, starts_input: bool, scheme: PrependScheme) -> String {
    let prepend = match scheme {
        PrependScheme::Always => true,
        PrependScheme::First => starts_input,
        PrependScheme::Never => false,
    };
    let mut out = String::with_capacity(span.len() + SPACE_MARKER.len_utf8());
    if prepend && !span.starts_with(' ') {
        out.push(SPACE_MARKER);
    }
    out.extend(span.chars().map(|c| if c == ' ' { SPACE_MARKER } else { c }));
    out
}

/// Ids of the 256 `<0xNN>` pieces, when the vocabulary has them.
#[derive(Debug, Clone)]
pub struct ByteFallback {
    ids: Vec<Option<u32>>,
    bytes: HashMap<u32, u8>,
}

impl ByteFallback {
    pub fn from_vocab(vocab: &Vocabulary) -> Self {
        let ids: Vec<Option<u32>> = (0..=255u8)
            .map(|b| vocab.token_to_id(&byte_fallback_piece(b)))
            .collect();
        let bytes = ids
            .iter()
            .enumerate()
            .filter_map(|(b, id)| id.map(|id| (id, b as u8)))
            .collect();
        Self { ids, bytes }
    }

    /// True when at least one byte piece exists.
    pub fn is_available(&self) -> bool {
        !self.bytes.is_empty()
    }

    /// Byte-fallback ids for `text`, or `None` if any byte lacks a piece.
    pub fn encode(&self, text: &str) -> Option<Vec<u32>> {
        text.bytes().map(|b| self.ids[b as usize]).collect()
    }

    #[inline]
    pub fn byte_of(&self, id: u32) -> Option<u8> {
        self.bytes.get(&id).copied()
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.bytes.contains_key(&id)
    }
}

/// Encodes a symbol the vocabulary does not hold: byte pieces first, then the
/// unknown piece, otherwise nothing.
pub(crate) fn encode_unmapped(
    symbol: &str,
    byte_fallback: &ByteFallback,
    unk_id: Option<u32>,
    ids: &mut Vec<u32>,
) {
    if let Some(bytes) = byte_fallback.encode(symbol) {
        ids.extend(bytes);
    } else if let Some(unk) = unk_id {
        ids.push(unk);
    } else {
        log::trace!("Dropping unencodable symbol {:?}", symbol);
    }
}

/// Streaming decoder for SentencePiece-style vocabularies.
///
/// Byte pieces accumulate until a UTF-8 character is complete; every other
/// piece flushes them first. One leading space is dropped from the first
/// non-empty output unless the prefix scheme is [`PrependScheme::Never`].
pub struct PieceDecoder<'a> {
    vocab: &'a Vocabulary,
    added: &'a AddedTokens,
    byte_fallback: &'a ByteFallback,
    strip_leading_space: bool,
    pending: PendingBytes,
    at_start: bool,
}

impl<'a> PieceDecoder<'a> {
    pub(crate) fn new(
        vocab: &'a Vocabulary,
        added: &'a AddedTokens,
        byte_fallback: &'a ByteFallback,
        scheme: PrependScheme,
    ) -> Self {
        Self {
            vocab,
            added,
            byte_fallback,
            strip_leading_space: scheme != PrependScheme::Never,
            pending: PendingBytes::new(),
            at_start: true,
        }
    }

    fn emit(&mut self, mut text: String) -> String {
        if self.at_start && !text.is_empty() {
            self.at_start = false;
            if self.strip_leading_space && text.starts_with(' ') {
                text.remove(0);
            }
        }
        text
    }
}

impl TokenDecoder for PieceDecoder<'_> {
    fn step(&mut self, id: u32) -> String {
        if self.added.is_special(id) {
            return String::new();
        }
        if let Some(byte) = self.byte_fallback.byte_of(id) {
            self.pending.push(byte);
            let text = self.pending.take_complete();
            return self.emit(text);
        }

        let piece = match self.added.content(id) {
            Some(content) => content,
            None => match self.vocab.id_to_token(id) {
                Some(token) => token,
                None => return String::new(),
            },
        };
        let mut text = self.pending.flush();
        text.extend(piece.chars().map(|c| if c == SPACE_MARKER { ' ' } else { c }));
        self.emit(text)
    }

    fn finish(&mut self) -> String {
        let text = self.pending.flush();
        self.emit(text)
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.at_start = true;
    }
}
