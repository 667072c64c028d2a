//! Scripted transport shared by the integration tests
#![allow(dead_code)]

use divelink_core::protocol::{
    SerialConfig, SessionTiming, Transport, TransportError, TransportFactory,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Every call made against a mock transport, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(u32),
    Rts(bool),
    Dtr(bool),
    FlushInput,
    FlushOutput,
    Write(Vec<u8>),
    Close,
}

/// What the simulated device does after a write
#[derive(Debug, Clone)]
pub enum Reply {
    Silence,
    Bytes(Vec<u8>),
    Delayed(Duration, Vec<u8>),
    Chunks(Vec<(Duration, Vec<u8>)>),
}

type Responder = Box<dyn FnMut(u32, &[u8]) -> Reply + Send>;

pub struct MockState {
    pub log: Vec<Call>,
    pub rts_unsupported: bool,
    pub dtr_unsupported: bool,
    pub fail_writes: bool,
    pub short_writes: bool,
    pub fail_purge: bool,
    pub fail_open: bool,
    /// Byte the line repeats forever, regardless of purges
    pub babble: Option<u8>,
    pub closes: usize,
    responder: Responder,
    incoming: Vec<(Instant, Vec<u8>)>,
}

impl MockState {
    /// Every buffer written, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.log
            .iter()
            .filter_map(|c| match c {
                Call::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn opens(&self) -> Vec<u32> {
        self.log
            .iter()
            .filter_map(|c| match c {
                Call::Open(baud) => Some(*baud),
                _ => None,
            })
            .collect()
    }

    /// Make bytes readable right away, as if sent unprompted
    pub fn inject(&mut self, bytes: &[u8]) {
        self.incoming.push((Instant::now(), bytes.to_vec()));
    }

    fn ready(&self) -> usize {
        let now = Instant::now();
        self.incoming
            .iter()
            .filter(|(at, _)| *at <= now)
            .map(|(_, bytes)| bytes.len())
            .sum()
    }
}

/// Factory handing out transports that share one [`MockState`]
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(u32, &[u8]) -> Reply + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(MockState {
                log: Vec::new(),
                rts_unsupported: false,
                dtr_unsupported: false,
                fail_writes: false,
                short_writes: false,
                fail_purge: false,
                fail_open: false,
                babble: None,
                closes: 0,
                responder: Box::new(responder),
                incoming: Vec::new(),
            })),
        }
    }

    /// A device that never answers
    pub fn silent() -> Self {
        Self::new(|_, _| Reply::Silence)
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn transport(&self, baud: u32) -> Box<dyn Transport> {
        self.state().log.push(Call::Open(baud));
        Box::new(MockTransport {
            baud,
            state: Arc::clone(&self.state),
        })
    }
}

impl TransportFactory for MockDevice {
    fn open(&mut self, config: &SerialConfig) -> Result<Box<dyn Transport>, TransportError> {
        if self.state().fail_open {
            return Err(TransportError::Open {
                path: "mock".to_string(),
                reason: "no such device".to_string(),
            });
        }
        Ok(self.transport(config.baud_rate))
    }
}

pub struct MockTransport {
    baud: u32,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl Transport for MockTransport {
    fn set_rts(&mut self, level: bool) -> Result<(), TransportError> {
        let mut s = self.lock();
        s.log.push(Call::Rts(level));
        if s.rts_unsupported {
            return Err(TransportError::Unsupported);
        }
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), TransportError> {
        let mut s = self.lock();
        s.log.push(Call::Dtr(level));
        if s.dtr_unsupported {
            return Err(TransportError::Unsupported);
        }
        Ok(())
    }

    fn flush_input(&mut self) -> Result<(), TransportError> {
        let mut s = self.lock();
        s.log.push(Call::FlushInput);
        if s.fail_purge {
            return Err(TransportError::Io(std::io::Error::other("purge failed")));
        }
        s.incoming.clear();
        Ok(())
    }

    fn flush_output(&mut self) -> Result<(), TransportError> {
        self.lock().log.push(Call::FlushOutput);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let baud = self.baud;
        let mut s = self.lock();
        s.log.push(Call::Write(bytes.to_vec()));
        if s.fail_writes {
            return Err(TransportError::Io(std::io::Error::other("write rejected")));
        }
        let reply = (s.responder)(baud, bytes);
        let now = Instant::now();
        match reply {
            Reply::Silence => {}
            Reply::Bytes(data) => s.incoming.push((now, data)),
            Reply::Delayed(delay, data) => s.incoming.push((now + delay, data)),
            Reply::Chunks(chunks) => {
                for (delay, data) in chunks {
                    s.incoming.push((now + delay, data));
                }
            }
        }
        if s.short_writes {
            return Ok(bytes.len().saturating_sub(1));
        }
        Ok(bytes.len())
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        let s = self.lock();
        Ok(s.ready() + usize::from(s.babble.is_some()))
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut s = self.lock();
        let now = Instant::now();
        let mut out = Vec::new();
        while out.len() < max_len {
            let Some(pos) = s.incoming.iter().position(|(at, _)| *at <= now) else {
                break;
            };
            let room = max_len - out.len();
            let chunk = &mut s.incoming[pos].1;
            if chunk.len() <= room {
                out.extend_from_slice(chunk);
                s.incoming.remove(pos);
            } else {
                out.extend(chunk.drain(..room));
            }
        }
        if let Some(byte) = s.babble {
            if out.len() < max_len {
                out.push(byte);
            }
        }
        Ok(out)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut s = self.lock();
        s.log.push(Call::Close);
        s.closes += 1;
        Ok(())
    }
}

/// Reply sending `bytes` one at a time, `spacing` apart
pub fn paced(bytes: &[u8], spacing: Duration) -> Reply {
    Reply::Chunks(
        bytes
            .iter()
            .enumerate()
            .map(|(i, &b)| (spacing * i as u32, vec![b]))
            .collect(),
    )
}

/// Timing with no settle delay and a tight poll
pub fn fast_timing() -> SessionTiming {
    SessionTiming {
        settle: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
        ..SessionTiming::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
