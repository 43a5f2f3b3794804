//! Serial <-> TCP bridging
//!
//! One [`Session`] per client connection. Sessions share nothing but the
//! shutdown token handed to them by the listener.

pub mod command;
pub mod session;
pub mod stats;

pub use command::ControlCommand;
pub use session::{Session, Termination};
pub use stats::Stats;
