//! Serial Server - expose a local serial port to TCP clients
//!
//! Each accepted connection opens the configured device exclusively and
//! relays bytes in both directions until the client disconnects or sends
//! `quit`. A client sending `kill` stops the listener.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod escape;
pub mod listener;
pub mod logging;

pub use error::{BridgeError, Result};
