//! Handshake retry policy
//!
//! Walks the attempt space baud × wake sequence × encoding × command until the
//! device answers with a valid frame. Baud is the outer loop because changing
//! it means reopening the transport; the command is the innermost dimension.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

use super::frame::Frame;
use super::session::{Session, SessionTiming};
use super::transport::{SerialConfig, TransportFactory};
use super::{
    Command, EncodingVariant, ExchangeError, FrameError, HandshakeError, ResponseError,
    SessionError, WakeSequence, DEFAULT_BAUD_RATES, DEFAULT_QUIET_MS, DEFAULT_TIMEOUT_MS,
};

/// Everything a handshake run may try
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePlan {
    /// Line settings; the baud rate is replaced per attempt
    pub serial: SerialConfig,
    /// Baud rates, outermost loop
    pub bauds: Vec<u32>,
    /// Wake prefixes, tried at every baud
    pub wake_sequences: Vec<WakeSequence>,
    /// Command encodings, tried with every wake prefix
    pub variants: Vec<EncodingVariant>,
    /// Commands, innermost loop
    pub commands: Vec<Command>,
    /// How long each attempt waits for a response
    pub response_timeout: Duration,
    /// Pause between attempts so the device returns to idle
    pub quiet_interval: Duration,
    /// Session timing
    pub timing: SessionTiming,
}

impl Default for HandshakePlan {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            bauds: DEFAULT_BAUD_RATES.to_vec(),
            wake_sequences: WakeSequence::candidates().to_vec(),
            variants: EncodingVariant::defaults(),
            commands: vec![Command::VERSION],
            response_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            quiet_interval: Duration::from_millis(DEFAULT_QUIET_MS),
            timing: SessionTiming::default(),
        }
    }
}

impl HandshakePlan {
    fn validate(&self) -> Result<(), HandshakeError> {
        if self.bauds.is_empty() {
            return Err(HandshakeError::EmptyPlan("baud rates"));
        }
        if self.wake_sequences.is_empty() {
            return Err(HandshakeError::EmptyPlan("wake sequences"));
        }
        if self.variants.is_empty() {
            return Err(HandshakeError::EmptyPlan("encoding variants"));
        }
        if self.commands.is_empty() {
            return Err(HandshakeError::EmptyPlan("commands"));
        }
        Ok(())
    }

    /// Total number of attempts in the plan
    pub fn attempt_count(&self) -> usize {
        self.bauds.len() * self.wake_sequences.len() * self.variants.len() * self.commands.len()
    }
}

/// One (baud, wake, variant, command) combination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    /// Position in the attempt order
    pub index: usize,
    /// Line speed
    pub baud: u32,
    /// Prefix sent before the command
    pub wake: WakeSequence,
    /// Command layout, without the wake prefix
    pub variant: EncodingVariant,
    /// Command sent
    pub command: Command,
}

impl Attempt {
    /// The wire encoding, wake prefix included
    pub fn encoding(&self) -> EncodingVariant {
        self.variant.clone().with_wake(self.wake.clone())
    }
}

/// The attempts of a plan, in the order they are tried
pub fn attempt_order(plan: &HandshakePlan) -> Vec<Attempt> {
    let mut attempts = Vec::with_capacity(plan.attempt_count());
    for &baud in &plan.bauds {
        for wake in &plan.wake_sequences {
            for variant in &plan.variants {
                for &command in &plan.commands {
                    attempts.push(Attempt {
                        index: attempts.len(),
                        baud,
                        wake: wake.clone(),
                        variant: variant.clone(),
                        command,
                    });
                }
            }
        }
    }
    attempts
}

/// How a single attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// A valid frame came back
    Decoded {
        /// Lowercase hex payload
        payload_hex: String,
    },
    /// Nothing arrived in time
    Timeout,
    /// The error sentinel came back
    DeviceError,
    /// Bytes arrived but did not decode
    FrameInvalid {
        /// First check that failed
        reason: FrameError,
    },
    /// The command could not be written
    WriteFailed {
        /// Error text
        message: String,
    },
    /// Purging or conditioning the line failed
    LineFault {
        /// Error text
        message: String,
    },
    /// Reading from the transport failed
    TransportFault {
        /// Error text
        message: String,
    },
}

impl From<ExchangeError> for AttemptOutcome {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Line(e) => AttemptOutcome::LineFault {
                message: e.to_string(),
            },
            ExchangeError::Send(e) => AttemptOutcome::WriteFailed {
                message: e.to_string(),
            },
            ExchangeError::Response(e) => e.into(),
        }
    }
}

impl From<ResponseError> for AttemptOutcome {
    fn from(err: ResponseError) -> Self {
        match err {
            ResponseError::Timeout => AttemptOutcome::Timeout,
            ResponseError::DeviceError => AttemptOutcome::DeviceError,
            ResponseError::FrameInvalid { reason } => AttemptOutcome::FrameInvalid { reason },
            other => AttemptOutcome::TransportFault {
                message: other.to_string(),
            },
        }
    }
}

/// History entry for one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// What was tried
    pub attempt: Attempt,
    /// How it ended
    pub outcome: AttemptOutcome,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Duration, quiet interval excluded
    pub elapsed_ms: u64,
}

/// Result of a successful handshake
#[derive(Debug, Clone)]
pub struct HandshakeSuccess {
    /// The decoded response
    pub frame: Frame,
    /// The attempt that produced it
    pub attempt: Attempt,
    /// Attempts made, the successful one included
    pub attempts_tried: usize,
    /// Every attempt made, in order
    pub history: Vec<AttemptRecord>,
}

fn quiet(interval: Duration) {
    if !interval.is_zero() {
        std::thread::sleep(interval);
    }
}

fn run_attempt(
    session: &mut Session,
    attempt: &Attempt,
    timeout: Duration,
) -> Result<Frame, AttemptOutcome> {
    session
        .exchange(attempt.command, &attempt.encoding(), timeout)
        .map_err(AttemptOutcome::from)
}

/// Try every attempt of `plan` in order until one decodes.
///
/// Timeouts, device errors, malformed frames, write failures and line faults
/// move on to the next attempt. Failing to open a transport ends the run.
/// Every session opened here is closed before returning.
pub fn run_handshake(
    factory: &mut dyn TransportFactory,
    plan: &HandshakePlan,
) -> Result<HandshakeSuccess, HandshakeError> {
    plan.validate()?;

    let mut history: Vec<AttemptRecord> = Vec::new();
    let mut session: Option<Session> = None;
    let mut dead_baud: Option<u32> = None;

    tracing::info!(
        "handshake: {} attempts planned over bauds {:?}",
        plan.attempt_count(),
        plan.bauds
    );

    for attempt in attempt_order(plan) {
        if dead_baud == Some(attempt.baud) {
            continue;
        }
        if !history.is_empty() {
            quiet(plan.quiet_interval);
        }

        let started_at = Utc::now();
        let started = Instant::now();

        let reopen = session
            .as_ref()
            .map(|s| s.config().baud_rate != attempt.baud)
            .unwrap_or(true);
        if reopen {
            if let Some(mut old) = session.take() {
                old.close();
            }
            match Session::open(factory, plan.serial.with_baud(attempt.baud), plan.timing.clone())
            {
                Ok(s) => session = Some(s),
                Err(SessionError::TransportOpenError(source)) => {
                    tracing::error!(
                        "handshake: cannot open transport at {} baud: {}",
                        attempt.baud,
                        source
                    );
                    return Err(HandshakeError::TransportOpen {
                        attempts_tried: history.len(),
                        history,
                        source,
                    });
                }
                Err(SessionError::Line(e)) => {
                    tracing::warn!(
                        "handshake: line conditioning failed at {} baud, skipping it: {}",
                        attempt.baud,
                        e
                    );
                    dead_baud = Some(attempt.baud);
                    history.push(AttemptRecord {
                        attempt,
                        outcome: AttemptOutcome::LineFault {
                            message: e.to_string(),
                        },
                        started_at,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                    continue;
                }
            }
        }

        let Some(active) = session.as_mut() else {
            continue;
        };

        let result = run_attempt(active, &attempt, plan.response_timeout);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(frame) => {
                tracing::info!(
                    "handshake: attempt {} ({} baud, {}, {}) decoded payload {}",
                    attempt.index,
                    attempt.baud,
                    attempt.encoding(),
                    attempt.command,
                    frame.payload_hex()
                );
                active.close();
                history.push(AttemptRecord {
                    attempt: attempt.clone(),
                    outcome: AttemptOutcome::Decoded {
                        payload_hex: frame.payload_hex(),
                    },
                    started_at,
                    elapsed_ms,
                });
                return Ok(HandshakeSuccess {
                    frame,
                    attempt,
                    attempts_tried: history.len(),
                    history,
                });
            }
            Err(outcome) => {
                tracing::info!(
                    "handshake: attempt {} ({} baud, {}, {}) failed: {:?}",
                    attempt.index,
                    attempt.baud,
                    attempt.encoding(),
                    attempt.command,
                    outcome
                );
                history.push(AttemptRecord {
                    attempt,
                    outcome,
                    started_at,
                    elapsed_ms,
                });
            }
        }
    }

    if let Some(mut last) = session.take() {
        last.close();
    }

    tracing::warn!("handshake: exhausted after {} attempts", history.len());
    Err(HandshakeError::Exhausted {
        attempts_tried: history.len(),
        history,
    })
}

/// JSON-friendly summary of a handshake run
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeReport {
    /// True if some attempt decoded
    pub succeeded: bool,
    /// Attempts made
    pub attempts_tried: usize,
    /// Payload of the winning frame
    pub payload_hex: Option<String>,
    /// The attempt that decoded
    pub winning_attempt: Option<Attempt>,
    /// Final error text on failure
    pub error: Option<String>,
    /// Every attempt made, in order
    pub history: Vec<AttemptRecord>,
}

impl HandshakeReport {
    /// Summarise the result of [`run_handshake`]
    pub fn from_result(result: &Result<HandshakeSuccess, HandshakeError>) -> Self {
        match result {
            Ok(success) => Self {
                succeeded: true,
                attempts_tried: success.attempts_tried,
                payload_hex: Some(success.frame.payload_hex()),
                winning_attempt: Some(success.attempt.clone()),
                error: None,
                history: success.history.clone(),
            },
            Err(err) => {
                let (attempts_tried, history) = match err {
                    HandshakeError::EmptyPlan(_) => (0, Vec::new()),
                    HandshakeError::TransportOpen {
                        attempts_tried,
                        history,
                        ..
                    }
                    | HandshakeError::Exhausted {
                        attempts_tried,
                        history,
                    } => (*attempts_tried, history.clone()),
                };
                Self {
                    succeeded: false,
                    attempts_tried,
                    payload_hex: None,
                    winning_attempt: None,
                    error: Some(err.to_string()),
                    history,
                }
            }
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(bauds: Vec<u32>, wakes: Vec<WakeSequence>) -> HandshakePlan {
        HandshakePlan {
            bauds,
            wake_sequences: wakes,
            ..HandshakePlan::default()
        }
    }

    #[test]
    fn test_attempt_order_baud_outermost() {
        let p = plan(vec![9600, 4800], vec![WakeSequence::None, WakeSequence::Esc]);
        let order: Vec<(u32, WakeSequence, EncodingVariant)> = attempt_order(&p)
            .into_iter()
            .map(|a| (a.baud, a.wake, a.variant))
            .collect();

        assert_eq!(
            order,
            vec![
                (9600, WakeSequence::None, EncodingVariant::Bare),
                (9600, WakeSequence::None, EncodingVariant::XorChecksummed),
                (9600, WakeSequence::Esc, EncodingVariant::Bare),
                (9600, WakeSequence::Esc, EncodingVariant::XorChecksummed),
                (4800, WakeSequence::None, EncodingVariant::Bare),
                (4800, WakeSequence::None, EncodingVariant::XorChecksummed),
                (4800, WakeSequence::Esc, EncodingVariant::Bare),
                (4800, WakeSequence::Esc, EncodingVariant::XorChecksummed),
            ]
        );
    }

    #[test]
    fn test_attempt_indices_are_sequential() {
        let attempts = attempt_order(&HandshakePlan::default());
        assert_eq!(attempts.len(), 2 * 4 * 2);
        for (i, a) in attempts.iter().enumerate() {
            assert_eq!(a.index, i);
        }
    }

    #[test]
    fn test_attempt_encoding_includes_wake() {
        let attempts = attempt_order(&plan(vec![9600], vec![WakeSequence::Esc]));
        assert_eq!(
            attempts[1].encoding(),
            EncodingVariant::XorChecksummed.with_wake(WakeSequence::Esc)
        );
    }

    #[test]
    fn test_empty_plan_rejected() {
        let p = plan(vec![], vec![WakeSequence::None]);
        assert!(matches!(
            p.validate(),
            Err(HandshakeError::EmptyPlan("baud rates"))
        ));

        let p = HandshakePlan {
            commands: vec![],
            ..HandshakePlan::default()
        };
        assert!(matches!(
            p.validate(),
            Err(HandshakeError::EmptyPlan("commands"))
        ));
    }

    #[test]
    fn test_outcome_from_response_error() {
        assert_eq!(
            AttemptOutcome::from(ResponseError::Timeout),
            AttemptOutcome::Timeout
        );
        assert_eq!(
            AttemptOutcome::from(ResponseError::FrameInvalid {
                reason: FrameError::MissingEnd
            }),
            AttemptOutcome::FrameInvalid {
                reason: FrameError::MissingEnd
            }
        );
    }

    #[test]
    fn test_report_for_empty_plan() {
        let result: Result<HandshakeSuccess, HandshakeError> =
            Err(HandshakeError::EmptyPlan("commands"));
        let report = HandshakeReport::from_result(&result);
        assert!(!report.succeeded);
        assert_eq!(report.attempts_tried, 0);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"succeeded\": false"));
    }
}
