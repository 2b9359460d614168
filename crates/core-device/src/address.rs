//! Address text codec.
//!
//! `parse` turns operator input such as `X1F`, `M125` or `D0x10` into a
//! `(key, word index)` pair; `format_label` renders a word index back into the
//! label shown next to each row. The mapping is only reversible at word
//! granularity: `X1F` and `X10` both name word 1 of class `X`, and the label
//! for that word is `X10`.

use crate::{AddressBase, DECADE_ALIGNED_KEYS, HEX_ALIGNED_KEYS};
use std::fmt;
use thiserror::Error;

/// A device class key plus a zero-based word index within that class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub key: String,
    pub addr: u32,
}

impl DeviceAddress {
    pub fn new(key: impl Into<String>, addr: u32) -> Self {
        Self {
            key: key.into(),
            addr,
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_label(&self.key, self.addr))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address `{0}` does not start with a device key")]
    MissingPrefix(String),
    #[error("address `{0}` has no numeric part")]
    EmptyNumber(String),
    #[error("address `{0}` has an invalid numeric part")]
    InvalidNumber(String),
}

/// Parse address text, returning `None` for anything malformed.
pub fn parse(text: &str) -> Option<DeviceAddress> {
    parse_detailed(text).ok()
}

/// Parse address text, reporting why it was rejected.
pub fn parse_detailed(text: &str) -> Result<DeviceAddress, AddressError> {
    let upper = text.trim().to_ascii_uppercase();
    let run_len = upper.bytes().take_while(u8::is_ascii_uppercase).count();
    if run_len == 0 {
        return Err(AddressError::MissingPrefix(text.to_string()));
    }
    let (run, rest) = upper.split_at(run_len);
    let (key, field) = split_key(run, rest.trim());
    if field.is_empty() {
        return Err(AddressError::EmptyNumber(text.to_string()));
    }

    let base = AddressBase::for_key(key);
    let (digits, hex) = match field.strip_prefix("0X") {
        Some(stripped) => (stripped, true),
        None => (
            field.as_str(),
            base == AddressBase::HexAligned || field.bytes().any(|b| (b'A'..=b'F').contains(&b)),
        ),
    };
    let raw = parse_number(digits, hex)
        .ok_or_else(|| AddressError::InvalidNumber(text.to_string()))?;
    let addr = u32::try_from(raw / base.scale())
        .map_err(|_| AddressError::InvalidNumber(text.to_string()))?;
    Ok(DeviceAddress {
        key: key.to_string(),
        addr,
    })
}

/// Label for word `addr` of class `key`: hex-aligned classes show the first bit
/// address of the word in uppercase hex, decade-aligned classes the first coil
/// number in decimal, plain classes the word index itself.
pub fn format_label(key: &str, addr: u32) -> String {
    let addr = u64::from(addr);
    match AddressBase::for_key(key) {
        AddressBase::HexAligned => format!("{key}{:X}", addr * 16),
        AddressBase::DecadeAligned => format!("{key}{}", addr * 10),
        AddressBase::Plain => format!("{key}{addr}"),
    }
}

fn is_known_key(run: &str) -> bool {
    HEX_ALIGNED_KEYS.contains(&run) || DECADE_ALIGNED_KEYS.contains(&run)
}

// The leading letter run can swallow hex digits (`XF`, `XA0`). When the run is
// not a known key but starts with a hex-aligned key followed only by `A`-`F`,
// those letters belong to the number.
fn split_key<'a>(run: &'a str, rest: &str) -> (&'a str, String) {
    if !is_known_key(run) {
        let hex_split = HEX_ALIGNED_KEYS
            .iter()
            .filter(|k| run.len() > k.len() && run.starts_with(**k))
            .filter(|k| run[k.len()..].bytes().all(|b| (b'A'..=b'F').contains(&b)))
            .max_by_key(|k| k.len());
        if let Some(k) = hex_split {
            return (&run[..k.len()], format!("{}{rest}", &run[k.len()..]));
        }
    }
    if rest.is_empty() && run.len() > 1 {
        return (&run[..1], run[1..].to_string());
    }
    (run, rest.to_string())
}

fn parse_number(digits: &str, hex: bool) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }
    if hex {
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u64::from_str_radix(digits, 16).ok()
    } else {
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(key: &str, addr: u32) -> Option<DeviceAddress> {
        Some(DeviceAddress::new(key, addr))
    }

    #[test]
    fn hex_aligned_classes_divide_by_sixteen() {
        assert_eq!(parse("X0"), addr("X", 0));
        assert_eq!(parse("X1"), addr("X", 0));
        assert_eq!(parse("X10"), addr("X", 1));
        assert_eq!(parse("x11"), addr("X", 1));
        assert_eq!(parse("W1F0"), addr("W", 31));
    }

    #[test]
    fn decade_aligned_classes_divide_by_ten() {
        assert_eq!(parse("M0"), addr("M", 0));
        assert_eq!(parse("M9"), addr("M", 0));
        assert_eq!(parse("M10"), addr("M", 1));
        assert_eq!(parse("M11"), addr("M", 1));
    }

    #[test]
    fn plain_classes_use_word_index() {
        assert_eq!(parse("D0"), addr("D", 0));
        assert_eq!(parse("D125"), addr("D", 125));
        assert_eq!(parse(" d7 "), addr("D", 7));
    }

    #[test]
    fn hex_prefix_and_letters_switch_radix() {
        assert_eq!(parse("D0x10"), addr("D", 16));
        assert_eq!(parse("D1A"), addr("D", 26));
    }

    #[test]
    fn hex_letters_after_known_key_belong_to_number() {
        assert_eq!(parse("XF"), addr("X", 0));
        assert_eq!(parse("XA0"), addr("X", 10));
        assert_eq!(parse("DX1"), addr("DX", 0));
        assert_eq!(parse("DXA0"), addr("DX", 10));
        assert_eq!(parse("SB20"), addr("SB", 2));
    }

    #[test]
    fn single_letter_key_split_when_number_missing() {
        assert_eq!(parse("DA"), addr("D", 10));
    }

    #[test]
    fn rejects_malformed_text() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("123"), None);
        assert_eq!(parse("D"), None);
        assert_eq!(parse("D1.5"), None);
        assert!(matches!(
            parse_detailed("42"),
            Err(AddressError::MissingPrefix(_))
        ));
        assert!(matches!(
            parse_detailed("D"),
            Err(AddressError::EmptyNumber(_))
        ));
        assert!(matches!(
            parse_detailed("X0x"),
            Err(AddressError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_detailed("D99999999999"),
            Err(AddressError::InvalidNumber(_))
        ));
    }

    #[test]
    fn labels_per_class() {
        assert_eq!(format_label("X", 0), "X0");
        assert_eq!(format_label("X", 1), "X10");
        assert_eq!(format_label("X", 10), "XA0");
        assert_eq!(format_label("M", 0), "M0");
        assert_eq!(format_label("M", 1), "M10");
        assert_eq!(format_label("D", 42), "D42");
        assert_eq!(DeviceAddress::new("Y", 2).to_string(), "Y20");
    }
}
