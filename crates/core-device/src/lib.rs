//! Device classes, address codec and word decoding for the register monitor.
//!
//! A device class is identified by its key (`X`, `M`, `D`, ...). The key fixes
//! two things:
//! * the addressing base used to turn a raw device (bit) address into a word
//!   index (hex-aligned classes divide by 16, decade-aligned classes by 10,
//!   everything else uses the address verbatim);
//! * the bit width shown by the monitor (16 columns, or 10 for decade-aligned
//!   coils).
//!
//! Words are always stored as full 16-bit values; the bit width only affects
//! how many bit columns are rendered and how the hex column is padded.

pub mod address;
pub mod format;

pub use address::{AddressError, DeviceAddress, format_label, parse, parse_detailed};
pub use format::{DecodedWord, FormatMode, FormatModeError, WordLookup, decode};

/// Device keys whose raw addresses are hexadecimal bit numbers packed 16 per word.
pub const HEX_ALIGNED_KEYS: &[&str] = &["X", "Y", "B", "W", "SB", "SW", "DX", "DY"];
/// Device keys whose raw addresses are decimal coil numbers packed 10 per word.
pub const DECADE_ALIGNED_KEYS: &[&str] = &["M"];

/// How a class numbers its raw device addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressBase {
    /// Raw address is hex; word index = raw / 16.
    HexAligned,
    /// Raw address is decimal; word index = raw / 10.
    DecadeAligned,
    /// Raw address is the word index.
    Plain,
}

impl AddressBase {
    pub fn for_key(key: &str) -> Self {
        if HEX_ALIGNED_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) {
            AddressBase::HexAligned
        } else if DECADE_ALIGNED_KEYS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(key))
        {
            AddressBase::DecadeAligned
        } else {
            AddressBase::Plain
        }
    }

    /// Raw addresses per word index (1 for plain classes).
    pub const fn scale(self) -> u64 {
        match self {
            AddressBase::HexAligned => 16,
            AddressBase::DecadeAligned => 10,
            AddressBase::Plain => 1,
        }
    }
}

/// Label numbering used in headers and bit columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelBase {
    Hex,
    Dec,
}

impl LabelBase {
    pub fn as_str(self) -> &'static str {
        match self {
            LabelBase::Hex => "hex",
            LabelBase::Dec => "dec",
        }
    }
}

/// Bit width and label base of a device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitConfig {
    pub bits: u8,
    pub base: LabelBase,
}

impl BitConfig {
    pub const HEX16: BitConfig = BitConfig {
        bits: 16,
        base: LabelBase::Hex,
    };
    pub const DEC10: BitConfig = BitConfig {
        bits: 10,
        base: LabelBase::Dec,
    };

    /// Mask selecting the bits relevant to this class.
    pub fn mask(self) -> u16 {
        if self.bits >= 16 {
            u16::MAX
        } else {
            (1u16 << self.bits) - 1
        }
    }
}

/// Bit width for `key`: 10/dec for decade-aligned classes, 16/hex for
/// everything else (hex-aligned and unknown classes alike).
pub fn bit_config(key: &str) -> BitConfig {
    match AddressBase::for_key(key) {
        AddressBase::DecadeAligned => BitConfig::DEC10,
        AddressBase::HexAligned | AddressBase::Plain => BitConfig::HEX16,
    }
}

/// Column labels for the bit columns, most significant first (`F..0` or `9..0`).
pub fn bit_labels(config: BitConfig) -> Vec<char> {
    (0..u32::from(config.bits))
        .rev()
        .filter_map(|b| char::from_digit(b, 16))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}
