//! Frame encoding/decoding
//!
//! Request layout: optional wake bytes, then `opcode` or `opcode, opcode ^ 0xA5`.
//!
//! Response layout:
//! - 1 byte: ACK (0xAA)
//! - N bytes: Payload
//! - 1 byte: END (0xEA)
//!
//! A device that rejects a command answers with the literal `0x8F 0x02`.

use serde::Serialize;

use super::{Command, EncodingVariant, FrameError, ACK, DEVICE_ERROR, END};

/// A decoded response frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    /// Bytes between ACK and END
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame around the given payload
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 2);
        bytes.push(ACK);
        bytes.extend_from_slice(&self.payload);
        bytes.push(END);
        bytes
    }

    /// Lowercase hex rendering of the payload
    pub fn payload_hex(&self) -> String {
        self.payload.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Encode a command for the wire
pub fn encode_command(cmd: Command, variant: &EncodingVariant) -> Vec<u8> {
    match variant {
        EncodingVariant::Bare if cmd.requires_checksum => vec![cmd.opcode, cmd.checksum()],
        EncodingVariant::Bare => vec![cmd.opcode],
        EncodingVariant::XorChecksummed => vec![cmd.opcode, cmd.checksum()],
        EncodingVariant::XorInverted => vec![cmd.checksum(), cmd.opcode],
        EncodingVariant::WakePrefixed { wake, base } => {
            let mut bytes = wake.bytes().to_vec();
            bytes.extend(encode_command(cmd, base));
            bytes
        }
    }
}

/// Decode one response unit.
///
/// Checks run in a fixed order: empty, too short, error sentinel, ACK, END.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }
    if bytes.len() < 2 {
        return Err(FrameError::TooShort);
    }
    if bytes == DEVICE_ERROR.as_slice() {
        return Err(FrameError::DeviceError);
    }
    if bytes[0] != ACK {
        return Err(FrameError::MissingAck);
    }
    if bytes[bytes.len() - 1] != END {
        return Err(FrameError::MissingEnd);
    }

    Ok(Frame {
        payload: bytes[1..bytes.len() - 1].to_vec(),
    })
}

/// Role of a single response byte, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ByteRole {
    /// 0xAA
    Ack(u8),
    /// 0xEA
    End(u8),
    /// Anything else
    Data(u8),
}

/// Label every byte of a raw response as ACK, END or data
pub fn annotate_response(bytes: &[u8]) -> Vec<ByteRole> {
    bytes
        .iter()
        .map(|&b| match b {
            ACK => ByteRole::Ack(b),
            END => ByteRole::End(b),
            _ => ByteRole::Data(b),
        })
        .collect()
}
