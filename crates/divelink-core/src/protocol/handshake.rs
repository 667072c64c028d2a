//! Handshake negotiation
//!
//! Conditions the control lines before the first command and picks the wake
//! prefix for an attempt. The device only processes a purge reliably once RTS
//! and then DTR have been deasserted and allowed to settle.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::session::SessionTiming;
use super::transport::Transport;
use super::{LineError, TransportError, WakeSequence};

/// A modem control line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Line {
    /// Request To Send
    Rts,
    /// Data Terminal Ready
    Dtr,
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Rts => write!(f, "RTS"),
            Line::Dtr => write!(f, "DTR"),
        }
    }
}

/// Non-fatal condition raised while conditioning the line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LineWarning {
    /// The transport could not drive this line; negotiation continued
    LineControlUnsupported {
        /// Line that could not be cleared
        line: Line,
        /// Why
        reason: String,
    },
}

fn settle(interval: Duration) {
    if !interval.is_zero() {
        std::thread::sleep(interval);
    }
}

fn clear_line(
    transport: &mut dyn Transport,
    line: Line,
    warnings: &mut Vec<LineWarning>,
) {
    let result = match line {
        Line::Rts => transport.set_rts(false),
        Line::Dtr => transport.set_dtr(false),
    };
    match result {
        Ok(()) => tracing::debug!("condition_line: {} cleared", line),
        Err(e) => {
            let reason = match e {
                TransportError::Unsupported => "unsupported".to_string(),
                other => other.to_string(),
            };
            tracing::warn!(
                "condition_line: cannot clear {} ({}), continuing",
                line,
                reason
            );
            warnings.push(LineWarning::LineControlUnsupported { line, reason });
        }
    }
}

/// Prepare the line for a command exchange.
///
/// Order: RTS clear, settle, DTR clear, settle, purge input and output.
/// Line control is best-effort and only produces warnings; a failed purge is
/// an error.
pub fn condition_line(
    transport: &mut dyn Transport,
    timing: &SessionTiming,
) -> Result<Vec<LineWarning>, LineError> {
    let mut warnings = Vec::new();

    clear_line(transport, Line::Rts, &mut warnings);
    settle(timing.settle);
    clear_line(transport, Line::Dtr, &mut warnings);
    settle(timing.settle);

    purge(transport)?;
    tracing::debug!("condition_line: buffers purged");

    Ok(warnings)
}

/// Discard both directions of buffered data
pub(crate) fn purge(transport: &mut dyn Transport) -> Result<(), LineError> {
    transport.flush_input().map_err(LineError::Purge)?;
    transport.flush_output().map_err(LineError::Purge)?;
    Ok(())
}

/// Wake prefix for a zero-based attempt counter.
///
/// Fixed priority: none, ESC, 0x55 0xAA, 0x10 0x10; wraps past the end.
pub fn select_wake_sequence(attempt_index: usize) -> WakeSequence {
    let candidates = WakeSequence::candidates();
    candidates[attempt_index % candidates.len()].clone()
}
