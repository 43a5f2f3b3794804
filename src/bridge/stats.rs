//! Per-session traffic statistics
//!
//! Counters are owned by a single session task, so plain integers suffice.
//! They are reported once when the session closes.

use std::fmt;
use std::time::{Duration, Instant};

/// Traffic counters for one session
#[derive(Debug)]
pub struct Stats {
    /// Total bytes transmitted (client -> serial)
    tx_total: u64,
    /// Total bytes received (serial -> client)
    rx_total: u64,
    /// Bursts written to the device
    tx_bursts: u64,
    /// Bursts written to the client
    rx_bursts: u64,
    start_time: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            tx_total: 0,
            rx_total: 0,
            tx_bursts: 0,
            rx_bursts: 0,
            start_time: Instant::now(),
        }
    }

    /// Add a burst written to the device
    #[inline]
    pub fn add_tx(&mut self, bytes: usize) {
        self.tx_total += bytes as u64;
        self.tx_bursts += 1;
    }

    /// Add a burst written to the client
    #[inline]
    pub fn add_rx(&mut self, bytes: usize) {
        self.rx_total += bytes as u64;
        self.rx_bursts += 1;
    }

    /// Time since the session started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes to device in {} bursts, {} bytes to client in {} bursts, {:.1}s",
            self.tx_total,
            self.tx_bursts,
            self.rx_total,
            self.rx_bursts,
            self.elapsed().as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = Stats::new();
        assert_eq!(stats.tx_total, 0);
        assert_eq!(stats.rx_total, 0);
        assert_eq!(stats.tx_bursts, 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let mut stats = Stats::new();
        stats.add_tx(4);
        stats.add_tx(6);
        stats.add_rx(3);

        assert_eq!(stats.tx_total, 10);
        assert_eq!(stats.tx_bursts, 2);
        assert_eq!(stats.rx_total, 3);

        let line = stats.to_string();
        assert!(line.starts_with("10 bytes to device in 2 bursts, 3 bytes to client in 1 bursts"));
    }
}
