//! In-band control commands
//!
//! A command is recognized when the buffered burst *starts with* its ASCII
//! token. There is no delimiter: `quit`, `quit\r\n` and `quit123` all match,
//! and a token split across two bursts is never recognized.

const QUIT: &[u8] = b"quit";
const KILL: &[u8] = b"kill";

/// Commands interpreted by the bridge instead of being relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Close the issuing session
    Quit,
    /// Close the issuing session and stop accepting new connections
    Kill,
}

impl ControlCommand {
    /// Match a burst against the command set (`Quit` is checked first)
    pub fn match_burst(burst: &[u8]) -> Option<Self> {
        if burst.starts_with(QUIT) {
            Some(Self::Quit)
        } else if burst.starts_with(KILL) {
            Some(Self::Kill)
        } else {
            None
        }
    }

    /// ASCII token for this command
    pub fn token(&self) -> &'static str {
        match self {
            Self::Quit => "quit",
            Self::Kill => "kill",
        }
    }
}
