//! Byte-level BPE tokenizer (GPT-2 family).
//!
//! Text is split into pre-tokens by a regex, every pre-token's UTF-8 bytes are
//! spelled with the printable byte table from [`crate::bytes`], and the merge
//! table is applied to the resulting symbols. Byte-level encoding is total:
//! any UTF-8 input survives `decode(encode(text))` when the vocabulary holds
//! all 256 byte symbols.

use std::collections::HashMap;
use std::path::Path;

use fancy_regex::Regex;
use once_cell::sync::Lazy;

use crate::added::{AddedToken, AddedTokens, Segment};
use crate::bytes::{bytes_to_symbols, symbols_to_bytes, PendingBytes};
use crate::encoding::EncodedInput;
use crate::error::{Result, TokenizerError};
use crate::merge::merge_symbols;
use crate::options::{PostProcessor, TokenizerOptions};
use crate::traits::{TokenDecoder, Tokenizer};
use crate::vocab::Vocabulary;

/// The GPT-2 pre-tokenization pattern: contractions, letter runs, digit runs,
/// punctuation runs and whitespace runs.
pub const GPT2_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

static GPT2_REGEX: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(GPT2_PATTERN).ok());

fn compile_pattern(pattern: Option<&str>) -> Result<Regex> {
    match pattern {
        Some(p) if p != GPT2_PATTERN => Ok(Regex::new(p)?),
        _ => match GPT2_REGEX.as_ref() {
            Some(re) => Ok(re.clone()),
            None => Ok(Regex::new(GPT2_PATTERN)?),
        },
    }
}

/// Merge table keyed by symbol pair; lower rank merges first.
pub type MergeRanks = HashMap<(String, String), u32>;

pub struct ByteLevelBpe {
    vocab: Vocabulary,
    merges: MergeRanks,
    added: AddedTokens,
    pattern: Regex,
    lowercase: bool,
    end_of_word_suffix: Option<String>,
    options: TokenizerOptions,
    post: PostProcessor,
}

impl std::fmt::Debug for ByteLevelBpe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteLevelBpe")
            .field("vocab_size", &self.vocab.len())
            .field("merges", &self.merges.len())
            .field("added_tokens", &self.added.len())
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

impl ByteLevelBpe {
    /// Builds the tokenizer from an ordered merge list (position = rank).
    pub fn new(
        mut vocab: Vocabulary,
        merges: Vec<(String, String)>,
        added_tokens: Vec<AddedToken>,
        options: TokenizerOptions,
    ) -> Result<Self> {
        let mut ranks = MergeRanks::with_capacity(merges.len());
        for (rank, pair) in merges.into_iter().enumerate() {
            // Duplicated pairs keep their first (highest priority) rank.
            ranks.entry(pair).or_insert(rank as u32);
        }

        let added = options.resolve_added_tokens(&mut vocab, added_tokens)?;
        let post = options.post_processor(&vocab)?;
        let pattern = compile_pattern(options.pattern.as_deref())?;

        Ok(Self {
            vocab,
            merges: ranks,
            added,
            pattern,
            lowercase: options.lowercase,
            end_of_word_suffix: options.end_of_word_suffix.clone().filter(|s| !s.is_empty()),
            options,
            post,
        })
    }

    /// Loads the GPT-2 file pair: `vocab.json` (token -> id) and `merges.txt`.
    pub fn from_files(
        vocab_path: impl AsRef<Path>,
        merges_path: impl AsRef<Path>,
        options: TokenizerOptions,
    ) -> Result<Self> {
        let vocab_path = vocab_path.as_ref();
        let merges_path = merges_path.as_ref();

        let vocab_json = read_file(vocab_path)?;
        let token_to_id: HashMap<String, u32> =
            serde_json::from_str(&vocab_json).map_err(|source| TokenizerError::Json {
                source_name: vocab_path.display().to_string(),
                source,
            })?;
        let vocab = Vocabulary::new(token_to_id)?;

        let merges_txt = read_file(merges_path)?;
        let merges = parse_merges_txt(&merges_txt, &merges_path.display().to_string())?;

        Self::new(vocab, merges, Vec::new(), options)
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn added_tokens(&self) -> &AddedTokens {
        &self.added
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Runs the merge loop over explicit symbols (no byte spelling applied).
    pub fn merge_word(&self, symbols: &[&str]) -> Vec<String> {
        merge_symbols(
            symbols.iter().map(|s| s.to_string()).collect(),
            |a, b| self.rank(a, b),
        )
    }

    fn rank(&self, left: &str, right: &str) -> Option<u32> {
        self.merges
            .get(&(left.to_string(), right.to_string()))
            .copied()
    }

    /// Ids for one text span free of added tokens.
    fn encode_span(&self, span: &str, ids: &mut Vec<u32>) {
        let lowered;
        let span = if self.lowercase {
            lowered = span.to_lowercase();
            lowered.as_str()
        } else {
            span
        };

        let mut last_end = 0;
        for found in self.pattern.find_iter(span) {
            match found {
                Ok(m) => {
                    if m.start() > last_end {
                        // Text the pattern skipped over still has to be encoded.
                        self.encode_piece(&span[last_end..m.start()], ids);
                    }
                    self.encode_piece(m.as_str(), ids);
                    last_end = m.end();
                }
                Err(e) => {
                    log::warn!("Pre-tokenization pattern failed ({e}); encoding the remainder whole");
                    break;
                }
            }
        }
        if last_end < span.len() {
            self.encode_piece(&span[last_end..], ids);
        }
    }

    fn encode_piece(&self, piece: &str, ids: &mut Vec<u32>) {
        if piece.is_empty() {
            return;
        }
        let mut symbols: Vec<String> = bytes_to_symbols(piece.as_bytes())
            .chars()
            .map(String::from)
            .collect();
        if let (Some(suffix), Some(last)) = (&self.end_of_word_suffix, symbols.last_mut()) {
            last.push_str(suffix);
        }

        for symbol in merge_symbols(symbols, |a, b| self.rank(a, b)) {
            match self.vocab.token_to_id(&symbol) {
                Some(id) => ids.push(id),
                None => log::trace!("Dropping unmapped symbol {:?}", symbol),
            }
        }
    }

    fn raw_ids(&self, text: &str) -> Vec<u32> {
        let text = self.options.clean_whitespace(text);
        let mut ids = Vec::new();
        for segment in self.added.split(&text) {
            match segment {
                Segment::Added(id) => ids.push(id),
                Segment::Text(span) => self.encode_span(span, &mut ids),
            }
        }
        ids
    }

    /// Encodes a sentence pair; ids of `second` carry token type 1.
    pub fn encode_pair(
        &self,
        first: &str,
        second: &str,
        max_length: Option<usize>,
    ) -> Result<EncodedInput> {
        Ok(self
            .post
            .finish_pair(self.raw_ids(first), self.raw_ids(second), max_length))
    }
}

impl Tokenizer for ByteLevelBpe {
    fn encode(&self, text: &str, max_length: Option<usize>) -> Result<EncodedInput> {
        Ok(self.post.finish(self.raw_ids(text), max_length))
    }

    fn token_decoder(&self) -> Box<dyn TokenDecoder + '_> {
        Box::new(ByteLevelDecoder::new(self))
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

/// Streaming decoder for byte-level BPE.
///
/// Tokens are mapped back through the byte table into a pending buffer; text is
/// released one complete UTF-8 character at a time. With an end-of-word suffix,
/// the suffix becomes a space that is emitted lazily before the next word, so no
/// trailing space is produced.
pub struct ByteLevelDecoder<'a> {
    tokenizer: &'a ByteLevelBpe,
    pending: PendingBytes,
    space_due: bool,
}

impl<'a> ByteLevelDecoder<'a> {
    fn new(tokenizer: &'a ByteLevelBpe) -> Self {
        Self {
            tokenizer,
            pending: PendingBytes::new(),
            space_due: false,
        }
    }

    fn emit(&mut self, mut text: String) -> String {
        if self.space_due && !text.is_empty() {
            text.insert(0, ' ');
            self.space_due = false;
        }
        text
    }
}

impl TokenDecoder for ByteLevelDecoder<'_> {
    fn step(&mut self, id: u32) -> String {
        let tok = self.tokenizer;
        if tok.added.is_special(id) {
            return String::new();
        }
        if let Some(content) = tok.added.content(id) {
            let mut text = self.pending.flush();
            text.push_str(content);
            return self.emit(text);
        }
        let Some(token) = tok.vocab.id_to_token(id) else {
            return String::new();
        };

        let (core, ends_word) = match &tok.end_of_word_suffix {
            Some(suffix) => match token.strip_suffix(suffix.as_str()) {
                Some(core) => (core, true),
                None => (token, false),
            },
            None => (token, false),
        };

        let mut bytes = Vec::with_capacity(core.len());
        symbols_to_bytes(core, &mut bytes);
        self.pending.extend(&bytes);
        let text = self.pending.take_complete();
        let text = self.emit(text);
        if ends_word {
            self.space_due = true;
        }
        text
    }

    fn finish(&mut self) -> String {
        let text = self.pending.flush();
        let text = self.emit(text);
        self.space_due = false;
        text
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.space_due = false;
    }
}

pub(crate) fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| TokenizerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses `merges.txt`: one space-separated pair per line, `#` header lines skipped.
pub(crate) fn parse_merges_txt(content: &str, source_name: &str) -> Result<Vec<(String, String)>> {
    let mut merges = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.starts_with("#version") || line.trim().is_empty() {
            continue;
        }
        let mut parts = line.split(' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty() => {
                merges.push((a.to_string(), b.to_string()))
            }
            _ => {
                return Err(TokenizerError::malformed(
                    source_name,
                    format!("line {} is not a symbol pair: {:?}", line_no + 1, line),
                ))
            }
        }
    }
    Ok(merges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::BYTES_TO_UNICODE;

    /// All 256 byte symbols plus a handful of merged tokens.
    fn byte_vocab(extra: &[&str]) -> Vocabulary {
        let mut tokens: Vec<String> = BYTES_TO_UNICODE.iter().map(|c| c.to_string()).collect();
        tokens.extend(extra.iter().map(|s| s.to_string()));
        Vocabulary::from_ordered(tokens).unwrap()
    }

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
    }

    fn tokenizer() -> ByteLevelBpe {
        let vocab = byte_vocab(&["he", "ll", "hell", "hello", "or", "ld", "Ġw", "Ġwor", "Ġworld", "<|endoftext|>"]);
        let merges = pairs(&[
            ("h", "e"),
            ("l", "l"),
            ("he", "ll"),
            ("hell", "o"),
            ("Ġ", "w"),
            ("o", "r"),
            ("Ġw", "or"),
            ("Ġwor", "ld"),
            ("l", "d"),
        ]);
        let eos = vocab.token_to_id("<|endoftext|>").unwrap();
        ByteLevelBpe::new(
            vocab,
            merges,
            vec![AddedToken::special("<|endoftext|>", eos)],
            TokenizerOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_merge_priority() {
        let vocab = Vocabulary::from_ordered(["a", "b", "c", "ab", "bc", "abc"]).unwrap();
        let tok = ByteLevelBpe::new(
            vocab,
            pairs(&[("a", "b"), ("ab", "c")]),
            Vec::new(),
            TokenizerOptions::default(),
        )
        .unwrap();
        assert_eq!(tok.merge_word(&["a", "b", "c"]), vec!["abc"]);
    }

    #[test]
    fn test_encode_uses_merges() {
        let tok = tokenizer();
        let ids = tok.encode("hello world", None).unwrap();
        let pieces: Vec<&str> = ids
            .input_ids()
            .iter()
            .map(|&id| tok.id_to_token(id).unwrap())
            .collect();
        assert_eq!(pieces, vec!["hello", "Ġworld"]);
        assert_eq!(ids.attention_mask(), &[1, 1]);
        assert_eq!(ids.token_type_ids(), &[0, 0]);
    }

    #[test]
    fn test_round_trip_arbitrary_utf8() {
        let tok = tokenizer();
        for text in [
            "hello world",
            "  leading and trailing  ",
            "tabs\tand\nnewlines\r\n",
            "naïve café · 東京 😀🚀",
            "it's we'll 1234 !!!",
            "",
        ] {
            let ids = tok.encode(text, None).unwrap();
            assert_eq!(tok.decode(ids.input_ids()), text, "round trip of {text:?}");
        }
    }

    #[test]
    fn test_encoding_is_idempotent() {
        let tok = tokenizer();
        let a = tok.encode("hello wörld, hello!", None).unwrap();
        let b = tok.encode("hello wörld, hello!", None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_special_tokens_are_atomic_and_skipped_on_decode() {
        let tok = tokenizer();
        let eos = tok.token_to_id("<|endoftext|>").unwrap();
        let ids = tok.encode("hello<|endoftext|>hello", None).unwrap();
        assert_eq!(ids.input_ids().iter().filter(|&&id| id == eos).count(), 1);
        assert_eq!(ids.len(), 3);
        assert_eq!(tok.decode(ids.input_ids()), "hellohello");
    }

    #[test]
    fn test_unknown_ids_decode_to_nothing() {
        let tok = tokenizer();
        let hello = tok.token_to_id("hello").unwrap();
        assert_eq!(tok.decode(&[hello, 999_999, hello]), "hellohello");
    }

    #[test]
    fn test_streaming_never_splits_characters() {
        let tok = tokenizer();
        let ids = tok.encode("é😀", None).unwrap();
        // No merges cover these bytes: one id per byte.
        assert_eq!(ids.len(), 6);

        let mut decoder = tok.token_decoder();
        let fragments: Vec<String> = ids.input_ids().iter().map(|&id| decoder.step(id)).collect();
        assert_eq!(fragments, vec!["", "é", "", "", "", "😀"]);
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_truncation_preserves_eos() {
        let vocab = byte_vocab(&["</s>"]);
        let options = TokenizerOptions {
            eos_token: Some("</s>".into()),
            add_eos_token: true,
            ..Default::default()
        };
        let tok = ByteLevelBpe::new(vocab, Vec::new(), Vec::new(), options).unwrap();
        let eos = tok.token_to_id("</s>").unwrap();
        let enc = tok.encode("abcdef", Some(4)).unwrap();
        assert_eq!(enc.len(), 4);
        assert_eq!(enc.input_ids()[3], eos);
    }

    #[test]
    fn test_fixed_length_padding() {
        let vocab = byte_vocab(&["<pad>"]);
        let options = TokenizerOptions {
            pad_token: Some("<pad>".into()),
            pad_to_max_length: true,
            max_length: Some(5),
            ..Default::default()
        };
        let tok = ByteLevelBpe::new(vocab, Vec::new(), Vec::new(), options).unwrap();
        let pad = tok.token_to_id("<pad>").unwrap();
        let enc = tok.encode("ab", None).unwrap();
        assert_eq!(&enc.input_ids()[2..], &[pad, pad, pad]);
        assert_eq!(enc.attention_mask(), &[1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_encode_pair_token_types() {
        let tok = tokenizer();
        let enc = tok.encode_pair("hello", " world", None).unwrap();
        assert_eq!(enc.token_type_ids(), &[0, 1]);
    }

    #[test]
    fn test_lowercase_and_end_of_word_suffix() {
        let vocab = Vocabulary::from_ordered([
            "h", "i", "t", "e", "r", "i</w>", "e</w>", "hi</w>", "the", "ther", "there</w>",
        ])
        .unwrap();
        let merges = pairs(&[("h", "i</w>"), ("t", "h"), ("th", "e"), ("the", "r"), ("ther", "e</w>")]);
        let options = TokenizerOptions {
            lowercase: true,
            normalize_whitespace: true,
            end_of_word_suffix: Some("</w>".into()),
            pattern: Some(r"\p{L}+".into()),
            ..Default::default()
        };
        let tok = ByteLevelBpe::new(vocab, merges, Vec::new(), options).unwrap();
        let enc = tok.encode("  Hi   THERE ", None).unwrap();
        let pieces: Vec<&str> = enc
            .input_ids()
            .iter()
            .map(|&id| tok.id_to_token(id).unwrap())
            .collect();
        assert_eq!(pieces, vec!["hi</w>", "there</w>"]);
        assert_eq!(tok.decode(enc.input_ids()), "hi there");
    }

    #[test]
    fn test_custom_pattern_is_used() {
        let vocab = byte_vocab(&[]);
        let options = TokenizerOptions {
            pattern: Some(r"\d{1,3}".into()),
            ..Default::default()
        };
        let tok = ByteLevelBpe::new(vocab, Vec::new(), Vec::new(), options).unwrap();
        assert_eq!(tok.pattern(), r"\d{1,3}");
        let enc = tok.encode("12345 x", None).unwrap();
        assert_eq!(tok.decode(enc.input_ids()), "12345 x");
    }

    #[test]
    fn test_invalid_pattern_fails_construction() {
        let options = TokenizerOptions {
            pattern: Some("(".into()),
            ..Default::default()
        };
        let result = ByteLevelBpe::new(byte_vocab(&[]), Vec::new(), Vec::new(), options);
        assert!(matches!(result, Err(TokenizerError::Regex(_))));
    }

    #[test]
    fn test_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let vocab_path = dir.path().join("vocab.json");
        let merges_path = dir.path().join("merges.txt");
        std::fs::write(&vocab_path, r#"{"a": 0, "b": 1, "ab": 2}"#).unwrap();
        std::fs::write(&merges_path, "#version: 0.2\na b\n").unwrap();

        let tok = ByteLevelBpe::from_files(&vocab_path, &merges_path, TokenizerOptions::default())
            .unwrap();
        assert_eq!(tok.encode("ab", None).unwrap().input_ids(), &[2]);
    }

    #[test]
    fn test_malformed_merges_names_file() {
        let err = parse_merges_txt("a b\nabc\n", "merges.txt").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("merges.txt"));
        assert!(msg.contains("line 2"));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = ByteLevelBpe::from_files(
            "/nonexistent/vocab.json",
            "/nonexistent/merges.txt",
            TokenizerOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("vocab.json"));
    }
}
