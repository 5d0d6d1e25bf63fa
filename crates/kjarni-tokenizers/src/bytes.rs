//! Byte-level machinery shared by all tokenizers: the GPT-2 byte <-> printable
//! character table, `<0xNN>` byte-fallback pieces, and a pending-byte buffer that
//! only releases structurally complete UTF-8 sequences.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Byte -> printable character. Printable Latin-1 bytes map to themselves; the
/// remaining 68 bytes (controls, space, 0x7F-0xA0, 0xAD) map to U+0100 onward.
pub static BYTES_TO_UNICODE: Lazy<[char; 256]> = Lazy::new(|| {
    let mut table = ['\0'; 256];
    let mut shift = 0u32;
    for b in 0..=255u8 {
        let printable = matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
        table[b as usize] = if printable {
            char::from(b)
        } else {
            let c = char::from_u32(256 + shift).unwrap_or(char::REPLACEMENT_CHARACTER);
            shift += 1;
            c
        };
    }
    table
});

/// Inverse of [`BYTES_TO_UNICODE`].
pub static UNICODE_TO_BYTES: Lazy<HashMap<char, u8>> = Lazy::new(|| {
    BYTES_TO_UNICODE
        .iter()
        .enumerate()
        .map(|(b, &c)| (c, b as u8))
        .collect()
});

/// Maps raw bytes to their printable-character spelling.
pub fn bytes_to_symbols(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| BYTES_TO_UNICODE[b as usize]).collect()
}

/// Appends the raw bytes spelled by a byte-level token string. Characters outside
/// the table (added tokens stored verbatim) contribute their own UTF-8 encoding.
pub fn symbols_to_bytes(symbols: &str, out: &mut Vec<u8>) {
    for c in symbols.chars() {
        match UNICODE_TO_BYTES.get(&c) {
            Some(&b) => out.push(b),
            None => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

/// Vocabulary spelling of a byte-fallback piece.
pub fn byte_fallback_piece(byte: u8) -> String {
    format!("<0x{:02X}>", byte)
}

/// Parses `<0xNN>` back to its byte value.
pub fn parse_byte_fallback(piece: &str) -> Option<u8> {
    let hex = piece.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

/// Expected length of a UTF-8 sequence given its leading byte, `None` if the
/// byte cannot start a sequence.
#[inline]
fn utf8_sequence_len(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

/// Accumulates raw bytes and releases text only for complete UTF-8 sequences,
/// so a streamed multi-byte character is never split across fragments.
#[derive(Debug, Clone, Default)]
pub struct PendingBytes {
    buf: Vec<u8>,
}

impl PendingBytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decodes and removes every complete sequence at the front of the buffer.
    /// Bytes that can never start a sequence become U+FFFD. An incomplete tail
    /// stays buffered.
    pub fn take_complete(&mut self) -> String {
        let mut out = String::new();
        let mut pos = 0;

        while pos < self.buf.len() {
            let Some(len) = utf8_sequence_len(self.buf[pos]) else {
                out.push(char::REPLACEMENT_CHARACTER);
                pos += 1;
                continue;
            };
            if pos + len > self.buf.len() {
                // Wait for more bytes unless the tail is already malformed.
                let tail_ok = self.buf[pos + 1..].iter().all(|&b| (0x80..=0xBF).contains(&b));
                if tail_ok {
                    break;
                }
                out.push(char::REPLACEMENT_CHARACTER);
                pos += 1;
                continue;
            }
            match std::str::from_utf8(&self.buf[pos..pos + len]) {
                Ok(s) => out.push_str(s),
                Err(_) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    pos += 1;
                    continue;
                }
            }
            pos += len;
        }

        self.buf.drain(..pos);
        out
    }

    /// Releases everything, substituting U+FFFD for an incomplete tail.
    pub fn flush(&mut self) -> String {
        let mut out = self.take_complete();
        if !self.buf.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.buf));
            self.buf.clear();
        }
        out
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
