//! Protocol commands
//!
//! Defines the command set, the command encodings the device may accept, and
//! the wake-up prefixes sent ahead of a command.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single-opcode device command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    /// Command opcode byte
    pub opcode: u8,
    /// Never send this command without its XOR byte
    #[serde(default)]
    pub requires_checksum: bool,
}

impl Command {
    /// Read the firmware/version identifier
    pub const VERSION: Command = Command::new(0xC2);

    /// Create a command that may be sent in any encoding
    pub const fn new(opcode: u8) -> Self {
        Self {
            opcode,
            requires_checksum: false,
        }
    }

    /// Create a command that is always sent with its checksum byte
    pub const fn checksummed(opcode: u8) -> Self {
        Self {
            opcode,
            requires_checksum: true,
        }
    }

    /// The checksum byte for this command
    pub fn checksum(&self) -> u8 {
        self.opcode ^ super::XOR_KEY
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode {
            0xC2 => write!(f, "VERSION"),
            op => write!(f, "0x{:02x}", op),
        }
    }
}

/// How a command is laid out on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingVariant {
    /// `[opcode]`
    Bare,
    /// `[opcode, opcode ^ 0xA5]`
    XorChecksummed,
    /// `[opcode ^ 0xA5, opcode]`
    XorInverted,
    /// Wake bytes followed by the base encoding
    WakePrefixed {
        /// Prefix bytes
        wake: WakeSequence,
        /// Encoding of the command itself
        base: Box<EncodingVariant>,
    },
}

impl EncodingVariant {
    /// Variants tried by the handshake when none are configured
    pub fn defaults() -> Vec<EncodingVariant> {
        vec![EncodingVariant::Bare, EncodingVariant::XorChecksummed]
    }

    /// Prefix this encoding with a wake sequence.
    ///
    /// An empty wake sequence leaves the encoding unchanged.
    pub fn with_wake(self, wake: WakeSequence) -> EncodingVariant {
        if wake.is_empty() {
            return self;
        }
        EncodingVariant::WakePrefixed {
            wake,
            base: Box::new(self),
        }
    }

    /// The encoding without any wake prefix
    pub fn base(&self) -> &EncodingVariant {
        match self {
            EncodingVariant::WakePrefixed { base, .. } => base.base(),
            other => other,
        }
    }
}

impl fmt::Display for EncodingVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingVariant::Bare => write!(f, "bare"),
            EncodingVariant::XorChecksummed => write!(f, "xor"),
            EncodingVariant::XorInverted => write!(f, "xor-inverted"),
            EncodingVariant::WakePrefixed { wake, base } => write!(f, "{}+{}", wake, base),
        }
    }
}

/// Byte prefix sent before a command to rouse a dormant interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeSequence {
    /// No prefix
    None,
    /// ESC (0x1B)
    Esc,
    /// 0x55 0xAA
    DualByte,
    /// 0x10 0x10, seen with IconHD-family firmware
    IconHd,
    /// Arbitrary bytes from configuration
    Custom(Vec<u8>),
}

impl WakeSequence {
    /// Fixed candidates in priority order
    pub fn candidates() -> [WakeSequence; 4] {
        [
            WakeSequence::None,
            WakeSequence::Esc,
            WakeSequence::DualByte,
            WakeSequence::IconHd,
        ]
    }

    /// Raw bytes of the prefix
    pub fn bytes(&self) -> &[u8] {
        match self {
            WakeSequence::None => &[],
            WakeSequence::Esc => &[0x1B],
            WakeSequence::DualByte => &[0x55, 0xAA],
            WakeSequence::IconHd => &[0x10, 0x10],
            WakeSequence::Custom(bytes) => bytes.as_slice(),
        }
    }

    /// True if no bytes are sent
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }
}

impl fmt::Display for WakeSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WakeSequence::None => write!(f, "none"),
            WakeSequence::Esc => write!(f, "esc"),
            WakeSequence::DualByte => write!(f, "dual-byte"),
            WakeSequence::IconHd => write!(f, "icon-hd"),
            WakeSequence::Custom(bytes) => write!(f, "custom{:02x?}", bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_command() {
        assert_eq!(Command::VERSION.opcode, 0xC2);
        assert!(!Command::VERSION.requires_checksum);
        assert_eq!(Command::VERSION.checksum(), 0x67);
        assert_eq!(Command::VERSION.to_string(), "VERSION");
    }

    #[test]
    fn test_wake_bytes() {
        assert!(WakeSequence::None.is_empty());
        assert_eq!(WakeSequence::Esc.bytes(), &[0x1B]);
        assert_eq!(WakeSequence::DualByte.bytes(), &[0x55, 0xAA]);
        assert_eq!(WakeSequence::IconHd.bytes(), &[0x10, 0x10]);
        assert_eq!(WakeSequence::Custom(vec![1, 2, 3]).bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_with_empty_wake_is_identity() {
        let variant = EncodingVariant::XorChecksummed.with_wake(WakeSequence::None);
        assert_eq!(variant, EncodingVariant::XorChecksummed);
    }

    #[test]
    fn test_base_unwraps_prefix() {
        let variant = EncodingVariant::Bare.with_wake(WakeSequence::Esc);
        assert_eq!(variant.base(), &EncodingVariant::Bare);
        assert_eq!(variant.to_string(), "esc+bare");
    }

    #[test]
    fn test_wake_sequence_serde_tags() {
        let json = serde_json::to_string(&WakeSequence::DualByte).unwrap();
        assert_eq!(json, "\"dual_byte\"");
        let custom: WakeSequence = serde_json::from_str(r#"{"custom":[16,16,16]}"#).unwrap();
        assert_eq!(custom, WakeSequence::Custom(vec![0x10, 0x10, 0x10]));
    }
}
