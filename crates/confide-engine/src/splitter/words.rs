//! Bytes ↔ word-sequence codec over the BIP-39 English list.
//!
//! Each word carries 11 bits. The first word is not data: its list index
//! (0..=10) is the number of zero bits appended to fill the last group.
//! Words are joined with `-`.
use bip39::Language;

use super::SplitError;

const BITS_PER_WORD: usize = 11;
const WORD_MASK: u32 = (1 << BITS_PER_WORD) - 1;
const SEPARATOR: &str = "-";

/// Encode bytes as a `-`-joined word sequence.
pub fn encode(bytes: &[u8]) -> String {
    let list = Language::English.word_list();
    let total_bits = bytes.len() * 8;
    let padding = (BITS_PER_WORD - total_bits % BITS_PER_WORD) % BITS_PER_WORD;

    let mut out: Vec<&str> = Vec::with_capacity(1 + (total_bits + padding) / BITS_PER_WORD);
    out.push(list[padding]);

    let mut acc: u32 = 0;
    let mut acc_bits = 0usize;
    for &byte in bytes {
        acc = (acc << 8) | u32::from(byte);
        acc_bits += 8;
        while acc_bits >= BITS_PER_WORD {
            acc_bits -= BITS_PER_WORD;
            out.push(list[((acc >> acc_bits) & WORD_MASK) as usize]);
        }
        acc &= (1 << acc_bits) - 1;
    }
    if acc_bits > 0 {
        out.push(list[((acc << (BITS_PER_WORD - acc_bits)) & WORD_MASK) as usize]);
    }

    out.join(SEPARATOR)
}

/// Decode a word sequence produced by [`encode`].
///
/// Accepts `-` or whitespace between words, case-insensitively.
pub fn decode(text: &str) -> Result<Vec<u8>, SplitError> {
    let mut words = text
        .split(|c: char| c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty());

    let first = words
        .next()
        .ok_or_else(|| SplitError::Decoding("empty word sequence".into()))?;
    let padding = word_index(first)? as usize;
    if padding >= BITS_PER_WORD {
        return Err(SplitError::Decoding(format!(
            "padding word '{first}' out of range"
        )));
    }

    let mut out = Vec::new();
    let mut acc: u32 = 0;
    let mut acc_bits = 0usize;
    let mut data_words = 0usize;
    for word in words {
        acc = (acc << BITS_PER_WORD) | u32::from(word_index(word)?);
        acc_bits += BITS_PER_WORD;
        data_words += 1;
        while acc_bits >= 8 {
            acc_bits -= 8;
            out.push((acc >> acc_bits) as u8);
        }
        acc &= (1 << acc_bits) - 1;
    }

    let total_bits = data_words * BITS_PER_WORD;
    if padding > total_bits {
        return Err(SplitError::Decoding("padding exceeds data".into()));
    }
    let data_bits = total_bits - padding;
    if data_bits % 8 != 0 {
        return Err(SplitError::Decoding(format!(
            "{data_bits} data bits is not a whole number of bytes"
        )));
    }

    // Everything past the data bits is padding and must be zero.
    let data_len = data_bits / 8;
    if acc != 0 || out[data_len..].iter().any(|&b| b != 0) {
        return Err(SplitError::Decoding("non-zero padding bits".into()));
    }
    out.truncate(data_len);
    Ok(out)
}

fn word_index(word: &str) -> Result<u16, SplitError> {
    Language::English
        .find_word(&word.to_ascii_lowercase())
        .ok_or_else(|| SplitError::Decoding(format!("unknown word '{word}'")))
}
