//! The output of `Tokenizer::encode`.

/// Token ids with a parallel attention mask and token type ids.
///
/// All three vectors always have the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedInput {
    input_ids: Vec<u32>,
    attention_mask: Vec<u32>,
    token_type_ids: Vec<u32>,
}

impl EncodedInput {
    /// Single-sequence encoding: mask of ones, type ids of zeros.
    pub fn new(input_ids: Vec<u32>) -> Self {
        let len = input_ids.len();
        Self {
            input_ids,
            attention_mask: vec![1; len],
            token_type_ids: vec![0; len],
        }
    }

    /// Pair encoding: the second sequence gets token type 1.
    pub fn pair(first: Vec<u32>, second: Vec<u32>) -> Self {
        let mut token_type_ids = vec![0; first.len()];
        token_type_ids.resize(first.len() + second.len(), 1);
        let mut input_ids = first;
        input_ids.extend(second);
        Self {
            attention_mask: vec![1; input_ids.len()],
            input_ids,
            token_type_ids,
        }
    }

    pub fn input_ids(&self) -> &[u32] {
        &self.input_ids
    }

    pub fn attention_mask(&self) -> &[u32] {
        &self.attention_mask
    }

    pub fn token_type_ids(&self) -> &[u32] {
        &self.token_type_ids
    }

    pub fn into_ids(self) -> Vec<u32> {
        self.input_ids
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Keeps the first `max_length` positions. When the sequence currently ends
    /// with `preserve_last` (the end-of-sequence id), that id is kept in the last
    /// retained slot.
    pub fn truncate(&mut self, max_length: usize, preserve_last: Option<u32>) {
        if self.input_ids.len() <= max_length {
            return;
        }
        let tail = preserve_last.filter(|&eos| self.input_ids.last() == Some(&eos));
        let tail_type = self.token_type_ids.last().copied().unwrap_or(0);

        self.input_ids.truncate(max_length);
        self.attention_mask.truncate(max_length);
        self.token_type_ids.truncate(max_length);

        if let (Some(eos), Some(last)) = (tail, max_length.checked_sub(1)) {
            self.input_ids[last] = eos;
            self.attention_mask[last] = 1;
            self.token_type_ids[last] = tail_type;
        }
    }

    /// Pads up to `length` with `pad_id`, a zero mask and zero type ids.
    pub fn pad_to(&mut self, length: usize, pad_id: u32) {
        if self.input_ids.len() >= length {
            return;
        }
        self.input_ids.resize(length, pad_id);
        self.attention_mask.resize(length, 0);
        self.token_type_ids.resize(length, 0);
    }
}
