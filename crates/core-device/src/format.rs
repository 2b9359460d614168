//! Word decoding into display strings.
//!
//! Single-word modes only look at the row's own word. Paired modes (`U32`,
//! `I32`, `F32`) read the even row as the low half and the following odd row as
//! the high half; the odd row itself renders as a blank continuation.
//!
//! Decoding never fails. A missing partner word yields an empty display with
//! the single-word hex still shown in the raw column.

use crate::{BitConfig, bit_config};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FormatMode {
    #[default]
    U16,
    I16,
    U32,
    I32,
    F32,
    Hex,
    Bin,
    Ascii,
}

impl FormatMode {
    pub const ALL: [FormatMode; 8] = [
        FormatMode::U16,
        FormatMode::I16,
        FormatMode::U32,
        FormatMode::I32,
        FormatMode::F32,
        FormatMode::Hex,
        FormatMode::Bin,
        FormatMode::Ascii,
    ];

    /// True for modes that combine an even/odd word pair into 32 bits.
    pub fn is_paired(self) -> bool {
        matches!(self, FormatMode::U32 | FormatMode::I32 | FormatMode::F32)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FormatMode::U16 => "U16",
            FormatMode::I16 => "I16",
            FormatMode::U32 => "U32",
            FormatMode::I32 => "I32",
            FormatMode::F32 => "F32",
            FormatMode::Hex => "HEX",
            FormatMode::Bin => "BIN",
            FormatMode::Ascii => "ASCII",
        }
    }
}

impl fmt::Display for FormatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown display format `{0}`")]
pub struct FormatModeError(pub String);

impl FromStr for FormatMode {
    type Err = FormatModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        FormatMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| FormatModeError(s.to_string()))
    }
}

/// Read access to last-known words, used to find the partner of a paired row.
pub trait WordLookup {
    fn word(&self, key: &str, addr: u32) -> Option<u16>;
}

/// One decoded row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedWord {
    /// Bit columns, most significant first, `bits` entries wide.
    pub bits: Vec<bool>,
    pub display: String,
    pub raw: String,
    /// Odd row under a paired mode; rendered blank.
    pub continuation: bool,
}

/// Decode the word at `(key, addr)` under `mode`. Returns `None` only when the
/// row's own word is absent from `lookup`.
pub fn decode<L: WordLookup + ?Sized>(
    lookup: &L,
    key: &str,
    addr: u32,
    mode: FormatMode,
) -> Option<DecodedWord> {
    let word = lookup.word(key, addr)?;
    let partner = if mode.is_paired() && addr % 2 == 0 {
        addr.checked_add(1).and_then(|odd| lookup.word(key, odd))
    } else {
        None
    };
    Some(decode_word(word, partner, addr, bit_config(key), mode))
}

/// Pure decoding core: `partner` is the high half for an even row under a
/// paired mode and is ignored otherwise.
pub fn decode_word(
    word: u16,
    partner: Option<u16>,
    addr: u32,
    config: BitConfig,
    mode: FormatMode,
) -> DecodedWord {
    let bits = bit_vector(word, config);
    let hex = hex16(word, config);

    if mode.is_paired() {
        if addr % 2 == 1 {
            return DecodedWord {
                bits,
                display: String::new(),
                raw: String::new(),
                continuation: true,
            };
        }
        let Some(high) = partner else {
            return DecodedWord {
                bits,
                display: String::new(),
                raw: hex,
                continuation: false,
            };
        };
        let pair = (u32::from(high) << 16) | u32::from(word);
        let display = match mode {
            FormatMode::I32 => (pair as i32).to_string(),
            FormatMode::F32 => format_f32(f32::from_bits(pair)),
            _ => pair.to_string(),
        };
        return DecodedWord {
            bits,
            display,
            raw: format!("0x{pair:08X}"),
            continuation: false,
        };
    }

    let display = match mode {
        FormatMode::I16 => (word as i16).to_string(),
        FormatMode::Hex => hex.clone(),
        FormatMode::Bin => format!("0b{word:0width$b}", width = usize::from(config.bits)),
        FormatMode::Ascii => {
            let [hi, lo] = word.to_be_bytes();
            format!("{}{}", printable(hi), printable(lo))
        }
        _ => word.to_string(),
    };
    DecodedWord {
        bits,
        display,
        raw: hex,
        continuation: false,
    }
}

fn bit_vector(word: u16, config: BitConfig) -> Vec<bool> {
    (0..u32::from(config.bits))
        .rev()
        .map(|b| (u32::from(word) >> b) & 1 == 1)
        .collect()
}

fn hex16(word: u16, config: BitConfig) -> String {
    if config.bits == 16 {
        format!("0x{word:04X}")
    } else {
        format!("0x{:X}", word & config.mask())
    }
}

fn printable(byte: u8) -> char {
    if (32..=126).contains(&byte) {
        char::from(byte)
    } else {
        '.'
    }
}

// Shortest text that reads back as the same f32 (0.1 prints as `0.1`, not its
// widened double). Plain notation for ordinary magnitudes, exponent notation
// for the rest so a denormal bit pattern does not print fifty zeros.
fn format_f32(value: f32) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if value == 0.0 || (1e-6..1e21).contains(&magnitude) {
        value.to_string()
    } else {
        format!("{value:e}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Words(HashMap<(String, u32), u16>);

    impl Words {
        fn with(mut self, key: &str, addr: u32, word: u16) -> Self {
            self.0.insert((key.to_string(), addr), word);
            self
        }
    }

    impl WordLookup for Words {
        fn word(&self, key: &str, addr: u32) -> Option<u16> {
            self.0.get(&(key.to_string(), addr)).copied()
        }
    }

    fn single(word: u16, mode: FormatMode) -> DecodedWord {
        decode_word(word, None, 0, BitConfig::HEX16, mode)
    }

    #[test]
    fn single_word_modes() {
        assert_eq!(single(0xFFFF, FormatMode::U16).display, "65535");
        assert_eq!(single(0xFFFF, FormatMode::I16).display, "-1");
        assert_eq!(single(0x00AB, FormatMode::Hex).display, "0x00AB");
        assert_eq!(single(0x0005, FormatMode::Bin).display, "0b0000000000000101");
        assert_eq!(single(0x4142, FormatMode::Ascii).display, "AB");
        assert_eq!(single(0x0041, FormatMode::Ascii).display, ".A");
        assert_eq!(single(0x7F20, FormatMode::Ascii).display, ". ");
        assert_eq!(single(0x1234, FormatMode::U16).raw, "0x1234");
    }

    #[test]
    fn ten_bit_classes_use_unpadded_masked_hex() {
        let d = decode_word(0x0C05, None, 0, BitConfig::DEC10, FormatMode::Hex);
        assert_eq!(d.display, "0x5");
        assert_eq!(d.raw, "0x5");
        assert_eq!(d.bits.len(), 10);
        let b = decode_word(0x0003, None, 0, BitConfig::DEC10, FormatMode::Bin);
        assert_eq!(b.display, "0b0000000011");
    }

    #[test]
    fn bit_vector_is_msb_first() {
        let d = single(0x8001, FormatMode::U16);
        assert_eq!(d.bits.len(), 16);
        assert!(d.bits[0]);
        assert!(d.bits[15]);
        assert_eq!(d.bits.iter().filter(|b| **b).count(), 2);
    }

    #[test]
    fn u32_pairs_low_even_with_high_odd() {
        let words = Words::default().with("D", 4, 0x1234).with("D", 5, 0x0000);
        let d = decode(&words, "D", 4, FormatMode::U32).unwrap();
        assert_eq!(d.display, "4660");
        assert_eq!(d.raw, "0x00001234");
        assert!(!d.continuation);

        let odd = decode(&words, "D", 5, FormatMode::U32).unwrap();
        assert!(odd.continuation);
        assert_eq!(odd.display, "");
        assert_eq!(odd.raw, "");
    }

    #[test]
    fn i32_and_f32_reinterpret_the_pair() {
        let words = Words::default().with("D", 0, 0xFFFE).with("D", 1, 0xFFFF);
        assert_eq!(decode(&words, "D", 0, FormatMode::I32).unwrap().display, "-2");

        let one = 1.0f32.to_bits();
        let words = Words::default()
            .with("D", 2, (one & 0xFFFF) as u16)
            .with("D", 3, (one >> 16) as u16);
        let d = decode(&words, "D", 2, FormatMode::F32).unwrap();
        assert_eq!(d.display, "1");
        assert_eq!(d.raw, "0x3F800000");
    }

    #[test]
    fn missing_partner_shows_raw_only() {
        let words = Words::default().with("D", 6, 0x00FF);
        let d = decode(&words, "D", 6, FormatMode::U32).unwrap();
        assert_eq!(d.display, "");
        assert_eq!(d.raw, "0x00FF");
    }

    #[test]
    fn absent_row_decodes_to_none() {
        let words = Words::default();
        assert!(decode(&words, "D", 0, FormatMode::U16).is_none());
    }

    #[test]
    fn float_formatting_edges() {
        assert_eq!(format_f32(f32::NAN), "NaN");
        assert_eq!(format_f32(f32::NEG_INFINITY), "-Infinity");
        assert_eq!(format_f32(0.0), "0");
        assert_eq!(format_f32(2.5), "2.5");
        assert_eq!(format_f32(0.1), "0.1");
        assert_eq!(format_f32(-1.1), "-1.1");
        assert!(format_f32(f32::from_bits(1)).contains('e'));
    }

    #[test]
    fn format_mode_names_parse_case_insensitively() {
        assert_eq!("u32".parse::<FormatMode>(), Ok(FormatMode::U32));
        assert_eq!("Ascii".parse::<FormatMode>(), Ok(FormatMode::Ascii));
        assert_eq!(FormatMode::Hex.to_string(), "HEX");
        assert!("U64".parse::<FormatMode>().is_err());
    }
}
