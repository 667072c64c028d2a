//! Protocol errors

use serde::Serialize;
use thiserror::Error;

use super::retry::AttemptRecord;
use super::session::SessionState;

/// Errors raised by a transport binding
#[derive(Error, Debug)]
pub enum TransportError {
    /// The device could not be opened
    #[error("Failed to open transport '{path}': {reason}")]
    Open {
        /// Device path
        path: String,
        /// Driver message
        reason: String,
    },

    /// The binding cannot perform this operation
    #[error("Operation not supported by transport")]
    Unsupported,

    /// The handle was already released
    #[error("Transport closed")]
    Closed,

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the line-conditioning step
#[derive(Error, Debug)]
pub enum LineError {
    /// Flushing a buffer failed
    #[error("Buffer purge failed: {0}")]
    Purge(#[source] TransportError),
}

/// Reasons a received buffer is not a valid frame
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameError {
    /// No bytes at all
    #[error("empty response")]
    Empty,

    /// A single byte
    #[error("response shorter than two bytes")]
    TooShort,

    /// First byte is not 0xAA
    #[error("response does not start with ACK")]
    MissingAck,

    /// Last byte is not 0xEA
    #[error("response does not end with END")]
    MissingEnd,

    /// Exactly `0x8F 0x02`
    #[error("device returned error sentinel 8f02")]
    DeviceError,
}

/// Errors from writing a command
#[derive(Error, Debug)]
pub enum SendError {
    /// The transport rejected the write
    #[error("Write failed: {0}")]
    WriteError(#[source] TransportError),

    /// Fewer bytes were accepted than encoded
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes accepted
        written: usize,
        /// Bytes in the encoded command
        expected: usize,
    },

    /// The session is not ready for a command
    #[error("Cannot send in state {0:?}")]
    InvalidState(SessionState),
}

/// Errors from waiting on a response
#[derive(Error, Debug)]
pub enum ResponseError {
    /// Nothing arrived before the deadline
    #[error("Response timeout")]
    Timeout,

    /// Bytes arrived but do not form a frame
    #[error("Invalid frame: {reason}")]
    FrameInvalid {
        /// First check that failed
        reason: FrameError,
    },

    /// The device answered with the error sentinel
    #[error("Device rejected the command")]
    DeviceError,

    /// No command is outstanding
    #[error("Cannot await response in state {0:?}")]
    InvalidState(SessionState),

    /// Reading from the transport failed
    #[error("Read failed: {0}")]
    Transport(#[source] TransportError),
}

impl From<FrameError> for ResponseError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::DeviceError => ResponseError::DeviceError,
            reason => ResponseError::FrameInvalid { reason },
        }
    }
}

/// Errors from opening a session
#[derive(Error, Debug)]
pub enum SessionError {
    /// The factory could not open a transport
    #[error("Transport open failed: {0}")]
    TransportOpenError(#[source] TransportError),

    /// Line conditioning failed and the transport was closed
    #[error("Line conditioning failed: {0}")]
    Line(#[from] LineError),
}

/// Errors from a purge, send and await round trip
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Purge before the send failed
    #[error(transparent)]
    Line(#[from] LineError),

    /// Writing the command failed
    #[error(transparent)]
    Send(#[from] SendError),

    /// No valid response
    #[error(transparent)]
    Response(#[from] ResponseError),
}

/// Final errors from a handshake run
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// A plan dimension is empty
    #[error("Handshake plan has no {0} to try")]
    EmptyPlan(&'static str),

    /// A transport could not be opened; the run stopped
    #[error("Transport open failed after {attempts_tried} attempts: {source}")]
    TransportOpen {
        /// Attempts made before the failure
        attempts_tried: usize,
        /// Every attempt made, in order
        history: Vec<AttemptRecord>,
        /// Open failure
        #[source]
        source: TransportError,
    },

    /// Every attempt failed
    #[error("Handshake exhausted after {attempts_tried} attempts")]
    Exhausted {
        /// Attempts made
        attempts_tried: usize,
        /// Every attempt made, in order
        history: Vec<AttemptRecord>,
    },
}
