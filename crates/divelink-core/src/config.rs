//! Download configuration
//!
//! JSON file describing which port to use and which handshake variations to
//! try. Every field has a default, so an empty object is a valid config.
//!
//! ```json
//! {
//!   "port": "/dev/cu.usbserial-00085C7C",
//!   "bauds": [9600, 4800],
//!   "wake_sequences": ["none", "esc", {"custom": [16, 16]}],
//!   "variants": ["bare", "xor_checksummed"],
//!   "response_timeout_ms": 1500,
//!   "read_policy": {"mode": "until_idle", "idle": 100}
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{
    Command, EncodingVariant, HandshakePlan, ReadPolicy, SerialConfig, SessionTiming,
    WakeSequence, DEFAULT_BAUD_RATES, DEFAULT_BURST_GAP_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_QUIET_MS, DEFAULT_SETTLE_MS, DEFAULT_TIMEOUT_MS,
};

/// Errors loading or validating a config file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("Cannot read config {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Not valid JSON for a config
    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Parsed, but cannot produce any attempt
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for a download run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Serial device path
    pub port: String,
    /// Line settings (baud rate is taken from `bauds`)
    pub serial: SerialConfig,
    /// Baud rates to try, in order
    pub bauds: Vec<u32>,
    /// Wake prefixes to try, in order
    pub wake_sequences: Vec<WakeSequence>,
    /// Command encodings to try, in order
    pub variants: Vec<EncodingVariant>,
    /// Commands to send
    pub commands: Vec<Command>,
    /// Per-attempt response timeout
    pub response_timeout_ms: u64,
    /// Pause after each control-line change
    pub settle_ms: u64,
    /// Pause between attempts
    pub quiet_ms: u64,
    /// Interval between input polls
    pub poll_interval_ms: u64,
    /// Silence that ends a burst response
    pub burst_gap_ms: u64,
    /// Response collection policy
    pub read_policy: ReadPolicy,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            serial: SerialConfig::default(),
            bauds: DEFAULT_BAUD_RATES.to_vec(),
            wake_sequences: WakeSequence::candidates().to_vec(),
            variants: EncodingVariant::defaults(),
            commands: vec![Command::VERSION],
            response_timeout_ms: DEFAULT_TIMEOUT_MS,
            settle_ms: DEFAULT_SETTLE_MS,
            quiet_ms: DEFAULT_QUIET_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            burst_gap_ms: DEFAULT_BURST_GAP_MS,
            read_policy: ReadPolicy::Burst,
        }
    }
}

impl DownloadConfig {
    /// Load and validate a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON document
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: DownloadConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject configs that can never produce an attempt
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bauds.is_empty() {
            return Err(ConfigError::Invalid("no baud rates".into()));
        }
        if let Some(zero) = self.bauds.iter().find(|&&b| b == 0) {
            return Err(ConfigError::Invalid(format!("baud rate {} is not valid", zero)));
        }
        if self.wake_sequences.is_empty() {
            return Err(ConfigError::Invalid("no wake sequences".into()));
        }
        if self.variants.is_empty() {
            return Err(ConfigError::Invalid("no encoding variants".into()));
        }
        if self.commands.is_empty() {
            return Err(ConfigError::Invalid("no commands".into()));
        }
        if self.response_timeout_ms == 0 {
            return Err(ConfigError::Invalid("response timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Session timing derived from this config
    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            settle: Duration::from_millis(self.settle_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            burst_gap: Duration::from_millis(self.burst_gap_ms),
            read_policy: self.read_policy,
        }
    }

    /// Handshake plan derived from this config
    pub fn plan(&self) -> HandshakePlan {
        HandshakePlan {
            serial: self.serial.clone(),
            bauds: self.bauds.clone(),
            wake_sequences: self.wake_sequences.clone(),
            variants: self.variants.clone(),
            commands: self.commands.clone(),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            quiet_interval: Duration::from_millis(self.quiet_ms),
            timing: self.timing(),
        }
    }
}
