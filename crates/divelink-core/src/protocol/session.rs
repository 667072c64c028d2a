//! Session management
//!
//! A [`Session`] owns one transport handle and walks it through the
//! command/response lifecycle:
//!
//! ```text
//! Created -> LineConditioned -> Purged -> Sent -> AwaitingResponse
//!         -> Decoded | TimedOut | DeviceRejected | FrameInvalid | Faulted
//!         -> Closed
//! ```
//!
//! The transport is released by [`Session::close`] or on drop, whichever
//! comes first.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::frame::{decode_frame, encode_command, Frame};
use super::handshake::{self, condition_line, LineWarning};
use super::transport::{duration_ms, SerialConfig, Transport, TransportFactory};
use super::{
    Command, EncodingVariant, ExchangeError, FrameError, LineError, ResponseError, SendError,
    SessionError, TransportError, DEFAULT_BURST_GAP_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_SETTLE_MS, MAX_READ_SIZE,
};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Transport acquired, line untouched
    Created,
    /// RTS/DTR cleared and settled
    LineConditioned,
    /// Buffers purged, ready to send
    Purged,
    /// Command written
    Sent,
    /// Waiting for the device
    AwaitingResponse,
    /// Last response decoded as a frame
    Decoded,
    /// No response before the deadline
    TimedOut,
    /// Device answered with the error sentinel
    DeviceRejected,
    /// Device answered with something that is not a frame
    FrameInvalid,
    /// Transport I/O failed mid-exchange
    Faulted,
    /// Transport released
    Closed,
}

/// How a response is collected once bytes start arriving.
///
/// `Burst` is the base protocol: the device sends a whole frame back to back,
/// so the response is everything received until the line has been quiet for
/// [`SessionTiming::burst_gap`]. `UntilIdle` also returns as soon as the
/// buffer decodes as a frame or the error sentinel, and otherwise waits for
/// `idle` of silence.
///
/// Either way collection ends at the deadline or after [`MAX_READ_SIZE`]
/// bytes, whichever comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ReadPolicy {
    /// Read until the line goes quiet
    #[default]
    Burst,
    /// Read until a complete frame or `idle` of silence
    UntilIdle {
        /// Silence that ends collection
        #[serde(with = "duration_ms")]
        idle: Duration,
    },
}

/// Timing knobs for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTiming {
    /// Pause after each control-line change
    pub settle: Duration,
    /// Interval between `bytes_available` polls
    pub poll_interval: Duration,
    /// Silence that ends a [`ReadPolicy::Burst`] response
    pub burst_gap: Duration,
    /// Response collection policy
    pub read_policy: ReadPolicy,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            burst_gap: Duration::from_millis(DEFAULT_BURST_GAP_MS),
            read_policy: ReadPolicy::Burst,
        }
    }
}

/// Read what is buffered into `buf`, returning how many bytes arrived.
///
/// Stops at `deadline` or once `buf` holds `limit` bytes, so a line that never
/// stops talking cannot keep the caller here.
fn drain(
    transport: &mut dyn Transport,
    buf: &mut Vec<u8>,
    deadline: Instant,
    limit: usize,
) -> Result<usize, TransportError> {
    let mut total = 0;
    while buf.len() < limit && Instant::now() < deadline {
        let available = transport.bytes_available()?;
        if available == 0 {
            break;
        }
        let chunk = transport.read(available.min(limit - buf.len()))?;
        if chunk.is_empty() {
            break;
        }
        total += chunk.len();
        buf.extend_from_slice(&chunk);
    }
    Ok(total)
}

fn frame_complete(buf: &[u8]) -> bool {
    matches!(decode_frame(buf), Ok(_) | Err(FrameError::DeviceError))
}

/// Poll for a response until `deadline`. `None` means nothing arrived.
fn collect_response(
    transport: &mut dyn Transport,
    timing: &SessionTiming,
    deadline: Instant,
) -> Result<Option<Vec<u8>>, TransportError> {
    let mut response = Vec::new();
    let mut last_data = Instant::now();
    let poll = timing.poll_interval.max(Duration::from_millis(1));

    loop {
        if drain(transport, &mut response, deadline, MAX_READ_SIZE)? > 0 {
            last_data = Instant::now();
            tracing::debug!(
                "await_response: {} bytes buffered: {:02x?}",
                response.len(),
                response
            );
        }
        let now = Instant::now();

        if response.is_empty() {
            if now >= deadline {
                return Ok(None);
            }
        } else {
            let quiet = now.duration_since(last_data);
            let done = match timing.read_policy {
                ReadPolicy::Burst => quiet >= timing.burst_gap,
                ReadPolicy::UntilIdle { idle } => frame_complete(&response) || quiet >= idle,
            };
            if done || now >= deadline || response.len() >= MAX_READ_SIZE {
                return Ok(Some(response));
            }
        }

        let remaining = deadline.saturating_duration_since(now);
        std::thread::sleep(poll.min(remaining).max(Duration::from_millis(1)));
    }
}

/// One exclusively owned command/response channel to the device
pub struct Session {
    transport: Option<Box<dyn Transport>>,
    config: SerialConfig,
    timing: SessionTiming,
    state: SessionState,
    warnings: Vec<LineWarning>,
    tx_bytes: u64,
    rx_bytes: u64,
}

impl Session {
    /// Acquire a transport from `factory` and prepare it for commands
    pub fn open(
        factory: &mut dyn TransportFactory,
        config: SerialConfig,
        timing: SessionTiming,
    ) -> Result<Self, SessionError> {
        let transport = factory
            .open(&config)
            .map_err(SessionError::TransportOpenError)?;
        Self::with_transport(transport, config, timing)
    }

    /// Prepare an already acquired transport for commands.
    ///
    /// On failure the transport is closed before returning.
    pub fn with_transport(
        transport: Box<dyn Transport>,
        config: SerialConfig,
        timing: SessionTiming,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            transport: Some(transport),
            config,
            timing,
            state: SessionState::Created,
            warnings: Vec::new(),
            tx_bytes: 0,
            rx_bytes: 0,
        };

        tracing::info!("session: opened at {} baud", session.config.baud_rate);

        if let Some(transport) = session.transport.as_mut() {
            // Dropping `session` on error closes the transport
            session.warnings = condition_line(transport.as_mut(), &session.timing)?;
        }
        session.set_state(SessionState::LineConditioned);
        session.set_state(SessionState::Purged);

        Ok(session)
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Line settings this session was opened with
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Warnings raised while conditioning the line
    pub fn warnings(&self) -> &[LineWarning] {
        &self.warnings
    }

    /// Cumulative (tx, rx) byte counters
    pub fn counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    /// True once the transport has been released
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!("session: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }

    /// Flush both buffers and return to `Purged` so the next command starts clean
    pub fn purge(&mut self) -> Result<(), LineError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(LineError::Purge(TransportError::Closed))?;
        if let Err(e) = handshake::purge(transport.as_mut()) {
            self.set_state(SessionState::Faulted);
            return Err(e);
        }
        self.set_state(SessionState::Purged);
        Ok(())
    }

    /// Write one encoded command. Allowed from `Purged` or `Decoded`.
    pub fn send_command(
        &mut self,
        cmd: Command,
        variant: &EncodingVariant,
    ) -> Result<(), SendError> {
        if !matches!(self.state, SessionState::Purged | SessionState::Decoded) {
            return Err(SendError::InvalidState(self.state));
        }
        let transport = self
            .transport
            .as_mut()
            .ok_or(SendError::InvalidState(SessionState::Closed))?;

        let bytes = encode_command(cmd, variant);
        tracing::debug!(
            "send_command: {} as {}, {} bytes: {:02x?}",
            cmd,
            variant,
            bytes.len(),
            bytes
        );

        let written = match transport.write(&bytes) {
            Ok(n) => n,
            Err(e) => {
                self.set_state(SessionState::Faulted);
                return Err(SendError::WriteError(e));
            }
        };
        self.tx_bytes = self.tx_bytes.saturating_add(written as u64);

        if written != bytes.len() {
            self.set_state(SessionState::Faulted);
            return Err(SendError::ShortWrite {
                written,
                expected: bytes.len(),
            });
        }

        self.set_state(SessionState::Sent);
        Ok(())
    }

    /// Wait up to `timeout` for the response to the last command
    pub fn await_response(&mut self, timeout: Duration) -> Result<Frame, ResponseError> {
        self.await_response_until(Instant::now() + timeout)
    }

    /// Wait until `deadline` for the response to the last command
    pub fn await_response_until(&mut self, deadline: Instant) -> Result<Frame, ResponseError> {
        if self.state != SessionState::Sent {
            return Err(ResponseError::InvalidState(self.state));
        }
        self.set_state(SessionState::AwaitingResponse);

        let transport = self
            .transport
            .as_mut()
            .ok_or(ResponseError::InvalidState(SessionState::Closed))?;

        let response = match collect_response(transport.as_mut(), &self.timing, deadline) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!("await_response: no response before deadline");
                self.set_state(SessionState::TimedOut);
                return Err(ResponseError::Timeout);
            }
            Err(e) => {
                tracing::warn!("await_response: transport error: {}", e);
                self.set_state(SessionState::Faulted);
                return Err(ResponseError::Transport(e));
            }
        };
        self.rx_bytes = self.rx_bytes.saturating_add(response.len() as u64);

        match decode_frame(&response) {
            Ok(frame) => {
                tracing::debug!("await_response: frame payload {}", frame.payload_hex());
                self.set_state(SessionState::Decoded);
                Ok(frame)
            }
            Err(FrameError::DeviceError) => {
                tracing::debug!("await_response: device error sentinel");
                self.set_state(SessionState::DeviceRejected);
                Err(ResponseError::DeviceError)
            }
            Err(reason) => {
                tracing::debug!("await_response: invalid frame ({}): {:02x?}", reason, response);
                self.set_state(SessionState::FrameInvalid);
                Err(reason.into())
            }
        }
    }

    /// Purge, send `cmd` and wait up to `timeout` for its response
    pub fn exchange(
        &mut self,
        cmd: Command,
        variant: &EncodingVariant,
        timeout: Duration,
    ) -> Result<Frame, ExchangeError> {
        self.purge()?;
        self.send_command(cmd, variant)?;
        Ok(self.await_response(timeout)?)
    }

    /// Collect whatever the device sends on its own for `duration`.
    ///
    /// At most [`MAX_READ_SIZE`] bytes are kept. Nothing is written and the
    /// lifecycle state is left unchanged.
    pub fn listen(&mut self, duration: Duration) -> Result<Vec<u8>, ResponseError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ResponseError::InvalidState(SessionState::Closed))?;

        let deadline = Instant::now() + duration;
        let poll = self.timing.poll_interval.max(Duration::from_millis(1));
        let mut received = Vec::new();

        loop {
            drain(transport.as_mut(), &mut received, deadline, MAX_READ_SIZE)
                .map_err(ResponseError::Transport)?;
            let now = Instant::now();
            if now >= deadline || received.len() >= MAX_READ_SIZE {
                break;
            }
            std::thread::sleep(poll.min(deadline - now));
        }

        self.rx_bytes = self.rx_bytes.saturating_add(received.len() as u64);
        tracing::debug!("listen: {} spontaneous bytes", received.len());
        Ok(received)
    }

    /// Release the transport. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                tracing::warn!("session: transport close failed: {}", e);
            }
            tracing::info!(
                "session: closed (tx {} bytes, rx {} bytes)",
                self.tx_bytes,
                self.rx_bytes
            );
        }
        self.set_state(SessionState::Closed);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
