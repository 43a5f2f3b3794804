//! Configuration management
//!
//! Settings come from built-in defaults, then an optional TOML file
//! (`serialserver.toml` in the working directory), then the command line.
//!
//! ```toml
//! [serialserver]
//! device = "/dev/ttyUSB0"
//! timeout = 5000
//! port = 8232
//!
//! [serial]
//! baud_rate = 9600
//! flow_control = "hardware"
//! write_timeout_ms = 1000
//! ```
//!
//! Keys under `[serialserver]` may also be written as dotted keys
//! (`serialserver.port = 8232`).

use crate::constants::{
    DEFAULT_ACCEPT_WAIT_MS, DEFAULT_BAUD_RATE, DEFAULT_BIND_ADDRESS, DEFAULT_BUFFER_SIZE,
    DEFAULT_DATA_BITS, DEFAULT_DRAIN_PAUSE_MS, DEFAULT_OPEN_TIMEOUT_MS, DEFAULT_SHUTDOWN_GRACE_MS,
    DEFAULT_STOP_BITS, DEFAULT_TCP_PORT, DEFAULT_WRITE_TIMEOUT_MS, MAX_BUFFER_SIZE,
};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "serialserver.toml";

// =============================================================================
// Application Configuration
// =============================================================================

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "serialserver")]
    pub server: ServerConfig,
    pub serial: SerialConfig,
}

// =============================================================================
// Server Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serial device bridged to every client
    pub device: String,

    /// Device open timeout (milliseconds)
    pub timeout: u64,

    /// TCP port for client connections
    pub port: u16,

    /// Address the listener binds to
    pub bind: IpAddr,

    /// Upper bound on one accept wait before re-checking shutdown (milliseconds)
    pub accept_wait_ms: u64,

    /// Delay between shutdown and closing the listener (milliseconds)
    pub shutdown_grace_ms: u64,

    /// Scratch buffer capacity, i.e. the largest burst
    pub buffer_size: usize,

    /// Pause between device drains (milliseconds)
    pub drain_pause_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            device: default_device().to_string(),
            timeout: DEFAULT_OPEN_TIMEOUT_MS,
            port: DEFAULT_TCP_PORT,
            bind: DEFAULT_BIND_ADDRESS
                .parse()
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            accept_wait_ms: DEFAULT_ACCEPT_WAIT_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            drain_pause_ms: DEFAULT_DRAIN_PAUSE_MS,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn accept_wait(&self) -> Duration {
        Duration::from_millis(self.accept_wait_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn drain_pause(&self) -> Duration {
        Duration::from_millis(self.drain_pause_ms)
    }
}

/// Platform default serial device
fn default_device() -> &'static str {
    #[cfg(windows)]
    {
        "COM1"
    }
    #[cfg(not(windows))]
    {
        "/dev/ttyS0"
    }
}

// =============================================================================
// Serial Line Configuration
// =============================================================================

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    #[default]
    Hardware,
}

/// Serial line parameters (9600 8N1 RTS/CTS unless overridden)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Time one write may wait for the line (ms), also the flush limit on close
    pub write_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: DEFAULT_STOP_BITS,
            parity: Parity::None,
            flow_control: FlowControl::Hardware,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl SerialConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

// =============================================================================
// Loading and validation
// =============================================================================

/// Parse config from TOML text
pub fn parse(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| BridgeError::ConfigInvalid {
        field: "config",
        reason: e.message().to_string(),
    })
}

/// Load config from `path`, or from `serialserver.toml` if no path is given
///
/// A missing default file is not an error: a warning is logged and defaults
/// are used. A missing explicit file is an error.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let (path, explicit) = match path {
        Some(p) => (p, true),
        None => (Path::new(DEFAULT_CONFIG_FILE), false),
    };

    if !explicit && !path.exists() {
        warn!("{} not found, using default values", path.display());
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path).map_err(|e| BridgeError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse(&content)
}

impl Config {
    /// Check value ranges after all sources have been merged
    pub fn validate(&self) -> Result<()> {
        let invalid = |field, reason: &str| {
            Err(BridgeError::ConfigInvalid {
                field,
                reason: reason.to_string(),
            })
        };

        let server = &self.server;
        if server.device.trim().is_empty() {
            return invalid("device", "must not be empty");
        }
        if server.timeout == 0 {
            return invalid("timeout", "must be greater than 0");
        }
        if server.accept_wait_ms == 0 {
            return invalid("accept_wait_ms", "must be greater than 0");
        }
        if server.buffer_size == 0 || server.buffer_size > MAX_BUFFER_SIZE {
            return Err(BridgeError::ConfigInvalid {
                field: "buffer_size",
                reason: format!("must be between 1 and {}", MAX_BUFFER_SIZE),
            });
        }

        let serial = &self.serial;
        if serial.baud_rate == 0 {
            return invalid("baud_rate", "must be greater than 0");
        }
        if !(5..=8).contains(&serial.data_bits) {
            return invalid("data_bits", "must be 5, 6, 7 or 8");
        }
        if !(1..=2).contains(&serial.stop_bits) {
            return invalid("stop_bits", "must be 1 or 2");
        }
        if serial.write_timeout_ms == 0 {
            return invalid("write_timeout_ms", "must be greater than 0");
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
