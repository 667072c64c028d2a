//! # divelink Core Library
//!
//! Serial download protocol client for Mares IconHD-family dive computers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Command encoding with the XOR checksum scheme and ACK/END frame decoding
//! - RTS/DTR line conditioning and wake-up prefixes
//! - A session state machine with bounded, cancellable response waits
//! - A deterministic retry policy over baud rate, wake prefix and encoding
//! - JSON configuration and attempt-history reports
//!
//! ## Supported devices
//!
//! - Mares Puck Pro
//! - Mares Icon HD and compatible firmware
//!
//! ## Example
//!
//! ```rust,ignore
//! use divelink_core::prelude::*;
//!
//! let config = DownloadConfig::load("divelink.json")?;
//! let mut factory = SerialPortFactory::new(&config.port);
//!
//! let success = run_handshake(&mut factory, &config.plan())?;
//! println!("version: {}", success.frame.payload_hex());
//! ```

pub mod config;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, DownloadConfig};
    pub use crate::protocol::{
        decode_frame, encode_command, run_handshake, Command, EncodingVariant, Frame,
        HandshakeError, HandshakePlan, HandshakeReport, ReadPolicy, SerialConfig,
        SerialPortFactory, Session, SessionState, SessionTiming, Transport, TransportFactory,
        WakeSequence,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
