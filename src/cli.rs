//! Command-line interface definition using clap
//!
//! Positional arguments keep the historical `DEVICE TIMEOUT PORT` order and
//! override values from the config file.

use crate::config::Config;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// Expose a local serial port to a TCP client
#[derive(Parser, Debug, Default)]
#[command(name = "serial-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Serial device to bridge (e.g. /dev/ttyS0)
    #[arg(value_name = "DEVICE")]
    pub device: Option<String>,

    /// Device open timeout in milliseconds
    #[arg(value_name = "TIMEOUT")]
    pub timeout: Option<u64>,

    /// TCP port to listen on
    #[arg(value_name = "PORT")]
    pub port: Option<u16>,

    /// Config file (default: ./serialserver.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v debug, -vv trace with escaped traffic)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Override config values with those given on the command line
    pub fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.server.device = device.clone();
        }
        if let Some(timeout) = self.timeout {
            config.server.timeout = timeout;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::parse_from(["serial-server"]);
        assert_eq!(cli.verbose, 0);
        assert!(cli.device.is_none());
        assert!(cli.timeout.is_none());
        assert!(cli.port.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_parse_positional() {
        let cli = Cli::parse_from(["serial-server", "/dev/ttyUSB0", "2000", "9000"]);
        assert_eq!(cli.device.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.timeout, Some(2000));
        assert_eq!(cli.port, Some(9000));
    }

    #[test]
    fn test_cli_parse_verbose() {
        let cli = Cli::parse_from(["serial-server", "-v"]);
        assert_eq!(cli.verbose, 1);

        let cli = Cli::parse_from(["serial-server", "-vv"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_parse_config() {
        let cli = Cli::parse_from(["serial-server", "--config", "/etc/serialserver.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/serialserver.toml")));
    }

    #[test]
    fn test_cli_rejects_malformed_port() {
        assert!(Cli::try_parse_from(["serial-server", "/dev/ttyS0", "5000", "port"]).is_err());
        assert!(Cli::try_parse_from(["serial-server", "/dev/ttyS0", "soon"]).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config = Config::default();
        config.server.device = "/dev/ttyS1".into();
        config.server.port = 9100;

        let cli = Cli::parse_from(["serial-server", "/dev/ttyACM0"]);
        cli.apply(&mut config);

        assert_eq!(config.server.device, "/dev/ttyACM0");
        // Not given on the command line: file value kept
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.timeout, 5000);
    }
}
