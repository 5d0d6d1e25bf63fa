use crate::bpe::ByteLevelBpe;
use crate::encoding::EncodedInput;
use crate::error::Result;
use crate::sentencepiece::SentencePieceBpe;
use crate::traits::{TokenDecoder, Tokenizer};
use crate::unigram::Unigram;

/// The closed set of tokenizer algorithms.
#[derive(Debug)]
pub enum AnyTokenizer {
    ByteLevel(ByteLevelBpe),
    SentencePiece(SentencePieceBpe),
    Unigram(Unigram),
}

impl AnyTokenizer {
    pub fn kind(&self) -> &'static str {
        match self {
            AnyTokenizer::ByteLevel(_) => "byte-level BPE",
            AnyTokenizer::SentencePiece(_) => "SentencePiece BPE",
            AnyTokenizer::Unigram(_) => "Unigram",
        }
    }

    pub fn is_byte_level(&self) -> bool {
        matches!(self, AnyTokenizer::ByteLevel(_))
    }

    fn inner(&self) -> &dyn Tokenizer {
        match self {
            AnyTokenizer::ByteLevel(t) => t,
            AnyTokenizer::SentencePiece(t) => t,
            AnyTokenizer::Unigram(t) => t,
        }
    }
}

impl Tokenizer for AnyTokenizer {
    fn encode(&self, text: &str, max_length: Option<usize>) -> Result<EncodedInput> {
        self.inner().encode(text, max_length)
    }

    fn token_decoder(&self) -> Box<dyn TokenDecoder + '_> {
        self.inner().token_decoder()
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner().token_to_id(token)
    }

    fn id_to_token(&self, id: u32) -> Option<&str> {
        self.inner().id_to_token(id)
    }

    fn is_special(&self, id: u32) -> bool {
        self.inner().is_special(id)
    }

    fn vocab_size(&self) -> usize {
        self.inner().vocab_size()
    }

    fn decode(&self, ids: &[u32]) -> String {
        self.inner().decode(ids)
    }
}

impl From<ByteLevelBpe> for AnyTokenizer {
    fn from(t: ByteLevelBpe) -> Self {
        AnyTokenizer::ByteLevel(t)
    }
}

impl From<SentencePieceBpe> for AnyTokenizer {
    fn from(t: SentencePieceBpe) -> Self {
        AnyTokenizer::SentencePiece(t)
    }
}

impl From<Unigram> for AnyTokenizer {
    fn from(t: Unigram) -> Self {
        AnyTokenizer::Unigram(t)
    }
}
