//! Serial Protocol Communication
//!
//! Implements the Mares IconHD-family download protocol: a half-duplex
//! command/response exchange where commands are authenticated with an XOR
//! byte and responses are framed by ACK/END sentinels.

pub mod commands;
mod error;
pub mod frame;
pub mod handshake;
pub mod retry;
pub mod serial;
mod session;
pub mod transport;

pub use commands::{Command, EncodingVariant, WakeSequence};
pub use error::{
    ExchangeError, FrameError, HandshakeError, LineError, ResponseError, SendError,
    SessionError, TransportError,
};
pub use frame::{annotate_response, decode_frame, encode_command, ByteRole, Frame};
pub use handshake::{condition_line, select_wake_sequence, Line, LineWarning};
pub use retry::{
    attempt_order, run_handshake, Attempt, AttemptOutcome, AttemptRecord, HandshakePlan,
    HandshakeReport, HandshakeSuccess,
};
pub use serial::{list_ports, PortInfo, SerialPortFactory, SerialTransport};
pub use session::{ReadPolicy, Session, SessionState, SessionTiming};
pub use transport::{Parity, SerialConfig, StopBits, Transport, TransportFactory};

/// Response frame start marker
pub const ACK: u8 = 0xAA;

/// Response frame end marker
pub const END: u8 = 0xEA;

/// Key XORed with the opcode to form the command checksum byte
pub const XOR_KEY: u8 = 0xA5;

/// Literal two-byte response the device sends when it rejects a command
pub const DEVICE_ERROR: [u8; 2] = [0x8F, 0x02];

/// Baud rates tried by default, in order
pub const DEFAULT_BAUD_RATES: [u32; 2] = [9600, 4800];

/// Default per-attempt response timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default pause after each line-control change in milliseconds
pub const DEFAULT_SETTLE_MS: u64 = 500;

/// Default quiet interval between handshake attempts in milliseconds
pub const DEFAULT_QUIET_MS: u64 = 500;

/// Default interval between `bytes_available` polls in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Default silence that ends a burst response in milliseconds, about twenty
/// byte times at 9600 baud
pub const DEFAULT_BURST_GAP_MS: u64 = 20;

/// Most bytes collected for one response or listen window
pub const MAX_READ_SIZE: usize = 4096;
