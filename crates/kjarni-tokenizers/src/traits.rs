//! The tokenizer and streaming-decoder contracts.

use crate::encoding::EncodedInput;
use crate::error::Result;

/// Incremental decoder that turns one token id at a time into text.
///
/// Implementations hold back bytes of an incomplete multi-byte character until
/// it is complete, so every returned fragment is valid text and concatenating
/// all fragments plus [`TokenDecoder::finish`] equals `Tokenizer::decode` over
/// the same ids.
pub trait TokenDecoder {
    /// Feeds one id and returns the text it completes (possibly empty).
    fn step(&mut self, id: u32) -> String;

    /// Releases anything still buffered.
    fn finish(&mut self) -> String;

    /// Forgets all buffered state.
    fn reset(&mut self);
}

/// A subword tokenizer: text to ids and back.
pub trait Tokenizer: Send + Sync {
    /// Encodes `text`, truncating to `max_length` (or the configured default).
    fn encode(&self, text: &str, max_length: Option<usize>) -> Result<EncodedInput>;

    /// A fresh streaming decoder over this tokenizer's vocabulary.
    fn token_decoder(&self) -> Box<dyn TokenDecoder + '_>;

    fn token_to_id(&self, token: &str) -> Option<u32>;

    fn id_to_token(&self, id: u32) -> Option<&str>;

    /// Special ids never contribute decoded text.
    fn is_special(&self, id: u32) -> bool;

    /// Width of the id space (one past the largest id).
    fn vocab_size(&self) -> usize;

    /// Decodes a whole id sequence. Unknown ids contribute nothing.
    fn decode(&self, ids: &[u32]) -> String {
        let mut decoder = self.token_decoder();
        let mut text = String::new();
        for &id in ids {
            text.push_str(&decoder.step(id));
        }
        text.push_str(&decoder.finish());
        text
    }
}
