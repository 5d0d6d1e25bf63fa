//! Atomic added tokens, carved out of the input before any subword splitting.

use std::collections::{HashMap, HashSet};

/// A literal string that always tokenizes to exactly one id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedToken {
    pub content: String,
    pub id: u32,
    /// Special tokens are skipped when decoding.
    pub special: bool,
}

impl AddedToken {
    pub fn special(content: impl Into<String>, id: u32) -> Self {
        Self {
            content: content.into(),
            id,
            special: true,
        }
    }

    pub fn normal(content: impl Into<String>, id: u32) -> Self {
        Self {
            content: content.into(),
            id,
            special: false,
        }
    }
}

/// A piece of input text after the added-token carve-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Ordinary text that still needs subword segmentation.
    Text(&'a str),
    /// An added token, already resolved to its id.
    Added(u32),
}

/// The table of added tokens, built once per tokenizer.
#[derive(Debug, Clone, Default)]
pub struct AddedTokens {
    /// Longest content first, so overlapping tokens resolve to the longest match.
    tokens: Vec<AddedToken>,
    by_id: HashMap<u32, usize>,
    special_ids: HashSet<u32>,
    first_bytes: HashSet<u8>,
}

impl AddedTokens {
    pub fn new(tokens: impl IntoIterator<Item = AddedToken>) -> Self {
        let mut tokens: Vec<AddedToken> = tokens
            .into_iter()
            .filter(|t| !t.content.is_empty())
            .collect();
        tokens.sort_by(|a, b| {
            b.content
                .len()
                .cmp(&a.content.len())
                .then_with(|| a.content.cmp(&b.content))
        });
        tokens.dedup_by(|a, b| a.content == b.content);

        let by_id = tokens.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        let special_ids = tokens.iter().filter(|t| t.special).map(|t| t.id).collect();
        let first_bytes = tokens.iter().map(|t| t.content.as_bytes()[0]).collect();

        Self {
            tokens,
            by_id,
            special_ids,
            first_bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddedToken> {
        self.tokens.iter()
    }

    #[inline]
    pub fn is_special(&self, id: u32) -> bool {
        self.special_ids.contains(&id)
    }

    /// Literal content of an added token.
    pub fn content(&self, id: u32) -> Option<&str> {
        self.by_id
            .get(&id)
            .map(|&i| self.tokens[i].content.as_str())
    }

    pub fn id_of(&self, content: &str) -> Option<u32> {
        self.tokens.iter().find(|t| t.content == content).map(|t| t.id)
    }

    /// Splits `text` into ordinary spans and atomic added tokens, left to right,
    /// preferring the longest token at each position.
    pub fn split<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        if self.tokens.is_empty() || text.is_empty() {
            return if text.is_empty() {
                Vec::new()
            } else {
                vec![Segment::Text(text)]
            };
        }

        let bytes = text.as_bytes();
        let mut segments = Vec::new();
        let mut span_start = 0;
        let mut pos = 0;

        while pos < bytes.len() {
            if !text.is_char_boundary(pos) || !self.first_bytes.contains(&bytes[pos]) {
                pos += 1;
                continue;
            }
            let rest = &text[pos..];
            match self.tokens.iter().find(|t| rest.starts_with(t.content.as_str())) {
                Some(token) => {
                    if span_start < pos {
                        segments.push(Segment::Text(&text[span_start..pos]));
                    }
                    segments.push(Segment::Added(token.id));
                    pos += token.content.len();
                    span_start = pos;
                }
                None => pos += 1,
            }
        }

        if span_start < text.len() {
            segments.push(Segment::Text(&text[span_start..]));
        }
        segments
    }
}
