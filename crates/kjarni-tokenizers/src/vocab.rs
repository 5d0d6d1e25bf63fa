//! Bidirectional token string <-> id mapping.

use std::collections::HashMap;

use crate::error::{Result, TokenizerError};

/// Immutable vocabulary. Ids may be dense or sparse; strings are unique.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    token_to_id: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
    /// Length in chars of the longest entry, used to bound Viterbi windows.
    max_token_chars: usize,
}

impl Vocabulary {
    /// Builds a vocabulary, rejecting two strings that share one id.
    pub fn new(token_to_id: HashMap<String, u32>) -> Result<Self> {
        let mut id_to_token: HashMap<u32, String> = HashMap::with_capacity(token_to_id.len());
        let mut max_token_chars = 0;

        for (token, &id) in &token_to_id {
            if let Some(existing) = id_to_token.insert(id, token.clone()) {
                let (first, second) = if existing < *token {
                    (existing, token.clone())
                } else {
                    (token.clone(), existing)
                };
                return Err(TokenizerError::DuplicateId { id, first, second });
            }
            max_token_chars = max_token_chars.max(token.chars().count());
        }

        Ok(Self {
            token_to_id,
            id_to_token,
            max_token_chars,
        })
    }

    /// Builds a vocabulary from tokens listed in id order (id == position).
    pub fn from_ordered<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = HashMap::new();
        for (id, token) in tokens.into_iter().enumerate() {
            let token = token.into();
            if map.insert(token.clone(), id as u32).is_some() {
                return Err(TokenizerError::malformed(
                    "vocabulary",
                    format!("token '{}' appears more than once", token),
                ));
            }
        }
        Self::new(map)
    }

    #[inline]
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    #[inline]
    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    #[inline]
    pub fn contains(&self, token: &str) -> bool {
        self.token_to_id.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

    /// One past the largest id, which is the logit-vector width for sparse vocabularies.
    pub fn id_bound(&self) -> usize {
        self.id_to_token
            .keys()
            .max()
            .map(|&id| id as usize + 1)
            .unwrap_or(0)
    }

    pub fn max_token_chars(&self) -> usize {
        self.max_token_chars
    }

    /// Inserts an entry that is absent from the base vocabulary (added tokens).
    pub(crate) fn insert_if_absent(&mut self, token: &str, id: u32) -> Result<()> {
        if self.token_to_id.contains_key(token) {
            return Ok(());
        }
        if let Some(existing) = self.id_to_token.get(&id) {
            return Err(TokenizerError::DuplicateId {
                id,
                first: existing.clone(),
                second: token.to_string(),
            });
        }
        self.token_to_id.insert(token.to_string(), id);
        self.id_to_token.insert(id, token.to_string());
        self.max_token_chars = self.max_token_chars.max(token.chars().count());
        Ok(())
    }

    /// Smallest id not yet used, for added tokens that arrive without one.
    pub(crate) fn next_free_id(&self) -> u32 {
        self.id_bound() as u32
    }
}
