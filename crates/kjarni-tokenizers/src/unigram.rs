//! Unigram language-model tokenizer with Viterbi segmentation (T5, ALBERT, XLNet).

use crate::added::{AddedToken, AddedTokens, Segment};
use crate::encoding::EncodedInput;
use crate::error::{Result, TokenizerError};
use crate::options::{PostProcessor, TokenizerOptions};
use crate::pieces::{encode_unmapped, normalize, ByteFallback, PieceDecoder, PrependScheme};
use crate::traits::{TokenDecoder, Tokenizer};
use crate::vocab::Vocabulary;

/// How far below the worst piece score a one-character fallback step lands.
/// Any value > 0 keeps fallback strictly worse than a vocabulary match.
pub const UNK_PENALTY: f64 = 10.0;

#[derive(Debug)]
pub struct Unigram {
    vocab: Vocabulary,
    /// Log-probability per id; `NEG_INFINITY` for ids that never match text.
    scores: Vec<f64>,
    added: AddedTokens,
    byte_fallback: ByteFallback,
    unk_id: Option<u32>,
    fallback_score: f64,
    /// Longest matchable piece, in chars.
    max_piece_chars: usize,
    prepend_scheme: PrependScheme,
    options: TokenizerOptions,
    post: PostProcessor,
}

/// One step of the best path ending at a char position.
#[derive(Debug, Clone, Copy)]
enum Step {
    Piece { start: usize, id: u32 },
    Fallback { start: usize },
}

impl Unigram {
    /// `pieces` are listed in id order with their log-probabilities.
    pub fn new(
        pieces: Vec<(String, f64)>,
        unk_id: Option<u32>,
        added_tokens: Vec<AddedToken>,
        prepend_scheme: PrependScheme,
        options: TokenizerOptions,
    ) -> Result<Self> {
        if pieces.is_empty() {
            return Err(TokenizerError::malformed("unigram vocabulary", "no pieces"));
        }
        if let Some(unk) = unk_id {
            if unk as usize >= pieces.len() {
                return Err(TokenizerError::malformed(
                    "unigram vocabulary",
                    format!("unk_id {} is out of range for {} pieces", unk, pieces.len()),
                ));
            }
        }
        if let Some((piece, _)) = pieces.iter().find(|(_, score)| score.is_nan()) {
            return Err(TokenizerError::malformed(
                "unigram vocabulary",
                format!("piece {:?} has a NaN score", piece),
            ));
        }

        let mut scores: Vec<f64> = pieces.iter().map(|(_, s)| *s).collect();
        let mut vocab = Vocabulary::from_ordered(pieces.into_iter().map(|(p, _)| p))?;
        let added = options.resolve_added_tokens(&mut vocab, added_tokens)?;
        let post = options.post_processor(&vocab)?;
        let byte_fallback = ByteFallback::from_vocab(&vocab);

        scores.resize(vocab.id_bound(), f64::NEG_INFINITY);
        for (id, score) in scores.iter_mut().enumerate() {
            let id = id as u32;
            if Some(id) == unk_id || byte_fallback.contains_id(id) || added.content(id).is_some() {
                *score = f64::NEG_INFINITY;
            }
        }

        let min_score = scores
            .iter()
            .copied()
            .filter(|s| s.is_finite())
            .fold(f64::INFINITY, f64::min);
        let fallback_score = if min_score.is_finite() {
            min_score - UNK_PENALTY
        } else {
            -UNK_PENALTY
        };
        let max_piece_chars = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_finite())
            .filter_map(|(id, _)| vocab.id_to_token(id as u32))
            .map(|p| p.chars().count())
            .max()
            .unwrap_or(1);

        Ok(Self {
            vocab,
            scores,
            added,
            byte_fallback,
            unk_id,
            fallback_score,
            max_piece_chars,
            prepend_scheme,
            options,
            post,
        })
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn score(&self, id: u32) -> Option<f64> {
        self.scores
            .get(id as usize)
            .copied()
            .filter(|s| s.is_finite())
    }

    pub fn unk_id(&self) -> Option<u32> {
        self.unk_id
    }

    fn piece_id(&self, piece: &str) -> Option<(u32, f64)> {
        let id = self.vocab.token_to_id(piece)?;
        let score = self.score(id)?;
        Some((id, score))
    }

    /// Best-scoring segmentation of `text` as `(piece, id)` pairs; `None`
    /// ids mark fallback characters.
    pub fn segment<'t>(&self, text: &'t str) -> Vec<(&'t str, Option<u32>)> {
        // Byte offset of every char boundary, including the end.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let n = bounds.len() - 1;
        if n == 0 {
            return Vec::new();
        }

        let mut best = vec![f64::NEG_INFINITY; n + 1];
        let mut back: Vec<Option<Step>> = vec![None; n + 1];
        best[0] = 0.0;

        for end in 1..=n {
            let first = end.saturating_sub(self.max_piece_chars);
            for start in first..end {
                if !best[start].is_finite() {
                    continue;
                }
                let Some((id, score)) = self.piece_id(&text[bounds[start]..bounds[end]]) else {
                    continue;
                };
                let candidate = best[start] + score;
                if candidate > best[end] {
                    best[end] = candidate;
                    back[end] = Some(Step::Piece { start, id });
                }
            }
            if back[end].is_none() {
                best[end] = best[end - 1] + self.fallback_score;
                back[end] = Some(Step::Fallback { start: end - 1 });
            }
        }

        let mut steps = Vec::new();
        let mut end = n;
        while end > 0 {
            let (start, id) = match back[end] {
                Some(Step::Piece { start, id }) => (start, Some(id)),
                Some(Step::Fallback { start }) => (start, None),
                None => (end - 1, None),
            };
            steps.push((&text[bounds[start]..bounds[end]], id));
            end = start;
        }
        steps.reverse();
        steps
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
        for (piece, id) in self.segment(&normalized) {
            match id {
                Some(id) => ids.push(id),
                None => encode_unmapped(piece, &self.byte_fallback, self.unk_id, ids),
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

impl Tokenizer for Unigram {
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
