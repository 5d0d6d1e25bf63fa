//! SentencePiece-style BPE (Llama, Mistral and friends).
//!
//! No pre-tokenization regex: spaces become [`SPACE_MARKER`], each text span
//! gets the dummy prefix, and the span is merged character by character.
//! Whatever the vocabulary cannot represent after merging is spelled with
//! `<0xNN>` byte pieces.

use std::collections::HashMap;

use crate::added::{AddedToken, AddedTokens, Segment};
use crate::bpe::MergeRanks;
use crate::encoding::EncodedInput;
use crate::error::Result;
use crate::merge::merge_symbols;
use crate::options::{PostProcessor, TokenizerOptions};
use crate::pieces::{encode_unmapped, normalize, ByteFallback, PieceDecoder, PrependScheme};
use crate::traits::{TokenDecoder, Tokenizer};
use crate::vocab::Vocabulary;

/// How adjacent pieces are ranked for merging.
#[derive(Debug, Clone)]
pub enum MergePriority {
    /// An explicit merge list; position is rank.
    Pairs(Vec<(String, String)>),
    /// No merge list: a pair is mergeable when the joined piece is in the
    /// vocabulary, and higher-scoring joined pieces merge first.
    Scores(HashMap<String, f32>),
}

#[derive(Debug, Clone)]
enum Ranks {
    Pairs(MergeRanks),
    Pieces(HashMap<String, u32>),
}

impl Ranks {
    fn from_priority(priority: MergePriority, vocab: &Vocabulary) -> Self {
        match priority {
            MergePriority::Pairs(pairs) => {
                let mut ranks = MergeRanks::with_capacity(pairs.len());
                for (rank, pair) in pairs.into_iter().enumerate() {
                    ranks.entry(pair).or_insert(rank as u32);
                }
                Ranks::Pairs(ranks)
            }
            MergePriority::Scores(scores) => {
                let mut scored: Vec<(String, f32)> = scores
                    .into_iter()
                    .filter(|(piece, _)| piece.chars().count() > 1 && vocab.contains(piece))
                    .collect();
                // Highest score first; ids break ties so the order is stable.
                scored.sort_by(|(a, sa), (b, sb)| {
                    sb.total_cmp(sa)
                        .then_with(|| vocab.token_to_id(a).cmp(&vocab.token_to_id(b)))
                });
                Ranks::Pieces(
                    scored
                        .into_iter()
                        .enumerate()
                        .map(|(rank, (piece, _))| (piece, rank as u32))
                        .collect(),
                )
            }
        }
    }

    fn rank(&self, left: &str, right: &str) -> Option<u32> {
        match self {
            Ranks::Pairs(pairs) => pairs.get(&(left.to_string(), right.to_string())).copied(),
            Ranks::Pieces(pieces) => {
                let mut joined = String::with_capacity(left.len() + right.len());
                joined.push_str(left);
                joined.push_str(right);
                pieces.get(&joined).copied()
            }
        }
    }
}

#[derive(Debug)]
pub struct SentencePieceBpe {
    vocab: Vocabulary,
    ranks: Ranks,
    added: AddedTokens,
    byte_fallback: ByteFallback,
    unk_id: Option<u32>,
    prepend_scheme: PrependScheme,
    options: TokenizerOptions,
    post: PostProcessor,
}

impl SentencePieceBpe {
    pub fn new(
        mut vocab: Vocabulary,
        merges: MergePriority,
        added_tokens: Vec<AddedToken>,
        unk_token: Option<&str>,
        prepend_scheme: PrependScheme,
        options: TokenizerOptions,
    ) -> Result<Self> {
        let added = options.resolve_added_tokens(&mut vocab, added_tokens)?;
        let post = options.post_processor(&vocab)?;
        let unk_id = unk_token.and_then(|t| vocab.token_to_id(t));
        let byte_fallback = ByteFallback::from_vocab(&vocab);
        let ranks = Ranks::from_priority(merges, &vocab);

        if !byte_fallback.is_available() && unk_id.is_none() {
            log::debug!("SentencePiece vocabulary has neither byte pieces nor an unknown piece");
        }

        Ok(Self {
            vocab,
            ranks,
            added,
            byte_fallback,
            unk_id,
            prepend_scheme,
            options,
            post,
        })
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn prepend_scheme(&self) -> PrependScheme {
        self.prepend_scheme
    }

    pub fn unk_id(&self) -> Option<u32> {
        self.unk_id
    }

    fn encode_span(&self, span: &str, starts_input: bool, ids: &mut Vec<u32>) {
        let lowered;
        let span = if self.options.lowercase {
            lowered = span.to_lowercase();
            lowered.as_str()
        } else {
            span
        };
        let normalized = normalize(span, starts_input, self.prepend_scheme);
        let symbols: Vec<String> = normalized.chars().map(String::from).collect();

        for symbol in merge_symbols(symbols, |a, b| self.ranks.rank(a, b)) {
            match self.vocab.token_to_id(&symbol) {
                Some(id) if !self.added.is_special(id) => ids.push(id),
                _ => encode_unmapped(&symbol, &self.byte_fallback, self.unk_id, ids),
            }
        }
    }

    fn raw_ids(&self, text: &str) -> Vec<u32> {
        let text = self.options.clean_whitespace(text);
        let mut ids = Vec::new();
        for (index, segment) in self.added.split(&text).into_iter().enumerate() {
            match segment {
                Segment::Added(id) => ids.push(id),
                Segment::Text(span) => self.encode_span(span, index == 0, &mut ids),
            }
        }
        ids
    }
}

impl Tokenizer for SentencePieceBpe {
    fn encode(&self, text: &str, max_length: Option<usize>) -> Result<EncodedInput> {
        Ok(self.post.finish(self.raw_ids(text), max_length))
    }

    fn token_decoder(&self) -> Box<dyn TokenDecoder + '_> {
        Box::new(PieceDecoder::new(
            &self.vocab,
            &self.added,
            &self.byte_fallback,
            self.prepend_scheme,
        ))
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.token_to_id(token)
    }

    fn id_to_token(&self, id: u32) -> Option<&str> {
        self.vocab.id_to_token(id)
    }

    fn is_special(&self, id: u32) -> bool {
        self.added.is_special(id)
    }

    fn vocab_size(&self) -> usize {
        self.vocab.id_bound()
    }
}
