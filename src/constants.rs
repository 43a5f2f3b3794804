//! Application-wide constants
//!
//! Centralized defaults to avoid duplication and ensure consistency.

// =============================================================================
// Network
// =============================================================================

/// Default TCP port for client connections
pub const DEFAULT_TCP_PORT: u16 = 8232;

/// Default bind address (all interfaces)
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Listen backlog for the TCP socket
pub const LISTEN_BACKLOG: i32 = 128;

/// Reply sent to connections arriving after shutdown was requested
pub const SERVICE_UNAVAILABLE: &[u8] = b"Service unavailable";

// =============================================================================
// Timing
// =============================================================================

/// Default device open timeout (milliseconds)
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 5000;

/// Default upper bound on a single accept wait (milliseconds)
pub const DEFAULT_ACCEPT_WAIT_MS: u64 = 10_000;

/// Default grace period between shutdown and closing the listener (milliseconds)
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 3000;

/// Default pause between device drains (milliseconds)
pub const DEFAULT_DRAIN_PAUSE_MS: u64 = 50;

// =============================================================================
// Buffers
// =============================================================================

/// Default scratch buffer capacity (one burst)
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Largest accepted scratch buffer capacity
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Chunk size used by the device reader thread
pub const DEVICE_READ_CHUNK: usize = 512;

/// Channel capacity between device threads and the session
pub const CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Serial
// =============================================================================

/// Fixed line defaults: 9600 8N1, RTS/CTS
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_DATA_BITS: u8 = 8;
pub const DEFAULT_STOP_BITS: u8 = 1;

/// Read timeout for the device reader thread (milliseconds)
pub const SERIAL_READ_TIMEOUT_MS: u64 = 10;

/// Consecutive zero-byte reads before assuming port disconnected
pub const SERIAL_DISCONNECT_THRESHOLD: u32 = 10;

/// Time a single device write may wait for the line (milliseconds)
///
/// Also bounds how long closing a device waits for queued output.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;

/// Largest slice handed to one device write
pub const DEVICE_WRITE_CHUNK: usize = 256;

/// Interval between output discards while a stalled writer is shut down
pub const DISCARD_POLL_MS: u64 = 10;
