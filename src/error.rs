//! Centralized error types for the serial server
//!
//! All errors are represented by the `BridgeError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, BridgeError>`.

use std::fmt;
use std::path::PathBuf;

/// All serial server errors
#[derive(Debug)]
pub enum BridgeError {
    // === Device ===
    /// Named serial device does not exist
    DeviceNotFound { device: String },
    /// Serial device is held by another owner
    DeviceBusy { device: String, reason: String },
    /// Configure/read/write/close failure after a successful open
    DeviceIo {
        device: String,
        source: std::io::Error,
    },

    // === Network ===
    /// Read/write/shutdown failure on a client connection
    SocketIo { source: std::io::Error },
    /// Failed to bind the listening socket
    ListenerBind { port: u16, source: std::io::Error },

    // === Config ===
    /// Config file could not be read
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Invalid or malformed config value
    ConfigInvalid { field: &'static str, reason: String },

    // === Diagnostics ===
    /// Byte range passed to the escape formatter is out of bounds
    InvalidRange {
        offset: usize,
        length: usize,
        available: usize,
    },

    // === Runtime ===
    /// Tokio runtime creation failed
    Runtime { source: std::io::Error },
}

impl BridgeError {
    /// Wrap an I/O error raised by the named device
    pub fn device_io(device: impl Into<String>, source: std::io::Error) -> Self {
        Self::DeviceIo {
            device: device.into(),
            source,
        }
    }

    /// Wrap an I/O error raised by a client socket
    pub fn socket_io(source: std::io::Error) -> Self {
        Self::SocketIo { source }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DeviceIo { source, .. }
            | Self::SocketIo { source }
            | Self::ListenerBind { source, .. }
            | Self::ConfigRead { source, .. }
            | Self::Runtime { source } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotFound { device } => write!(f, "Port {} not found", device),
            Self::DeviceBusy { device, reason } => write!(f, "Port {} in use: {}", device, reason),
            Self::DeviceIo { device, source } => write!(f, "I/O error on {}: {}", device, source),
            Self::SocketIo { source } => write!(f, "Socket error: {}", source),
            Self::ListenerBind { port, .. } => write!(f, "Cannot bind TCP port {}", port),
            Self::ConfigRead { path, .. } => write!(f, "Cannot read config: {}", path.display()),
            Self::ConfigInvalid { field, reason } => write!(f, "Invalid {}: {}", field, reason),
            Self::InvalidRange {
                offset,
                length,
                available,
            } => {
                if offset > length {
                    write!(f, "offset {} is greater than length {}", offset, length)
                } else {
                    write!(
                        f,
                        "range {}+{} exceeds buffer of {} bytes",
                        offset, length, available
                    )
                }
            }
            Self::Runtime { .. } => write!(f, "Failed to create runtime"),
        }
    }
}

/// Alias for Result with BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_device_errors() {
        let err = BridgeError::DeviceNotFound {
            device: "/dev/ttyS9".into(),
        };
        assert_eq!(err.to_string(), "Port /dev/ttyS9 not found");

        let err = BridgeError::DeviceBusy {
            device: "/dev/ttyS0".into(),
            reason: "locked".into(),
        };
        assert_eq!(err.to_string(), "Port /dev/ttyS0 in use: locked");
    }

    #[test]
    fn test_display_invalid_range() {
        let err = BridgeError::InvalidRange {
            offset: 4,
            length: 2,
            available: 8,
        };
        assert_eq!(err.to_string(), "offset 4 is greater than length 2");

        let err = BridgeError::InvalidRange {
            offset: 1,
            length: 4,
            available: 3,
        };
        assert_eq!(err.to_string(), "range 1+4 exceeds buffer of 3 bytes");
    }

    #[test]
    fn test_source_chain() {
        let err = BridgeError::socket_io(std::io::Error::other("reset"));
        assert!(err.source().is_some());

        let err = BridgeError::ConfigInvalid {
            field: "port",
            reason: "bad".into(),
        };
        assert!(err.source().is_none());
    }
}
