//! Bridge session - relay logic between one client socket and the device
//!
//! The session handles:
//! - Bidirectional byte relay, one burst at a time
//! - In-band command detection on client bursts
//! - Symmetric teardown of socket and device on every exit path
//!
//! Both directions run in one task and share one scratch buffer. Only one
//! `select!` branch body runs at a time, so the two paths never touch the
//! buffer concurrently.

use super::command::ControlCommand;
use super::stats::Stats;
use crate::config::Config;
use crate::device::{self, DeviceAdapter, DeviceHandle};
use crate::error::{BridgeError, Result};
use crate::escape::escape_burst;
use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, enabled, error, info, trace, warn, Level};

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Client sent a control command
    Command(ControlCommand),
    /// Client closed its end
    ClientClosed,
    /// Device backend stopped
    DeviceClosed,
}

/// Bridge session between a TCP client and the serial device
///
/// # Example
///
/// ```ignore
/// let session = Session::open(stream, &config, &adapter, shutdown).await?;
/// session.run().await;
/// ```
pub struct Session {
    stream: TcpStream,
    device: DeviceHandle,
    /// Shared by both directions, holds one burst
    scratch: BytesMut,
    capacity: usize,
    drain_pause: Duration,
    shutdown: CancellationToken,
    stats: Stats,
}

impl Session {
    /// Open the configured device for a freshly accepted connection
    ///
    /// On failure the connection is closed before the error is returned.
    pub async fn open(
        stream: TcpStream,
        config: &Config,
        adapter: &Arc<dyn DeviceAdapter>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let server = &config.server;
        let device = match device::open(
            adapter,
            &server.device,
            server.open_timeout(),
            &config.serial,
        )
        .await
        {
            Ok(device) => device,
            Err(e) => {
                close_stream(stream).await;
                return Err(e);
            }
        };
        debug!("Serial port {} opened", device.name());

        Ok(Self {
            stream,
            device,
            scratch: BytesMut::with_capacity(server.buffer_size),
            capacity: server.buffer_size,
            drain_pause: server.drain_pause(),
            shutdown,
            stats: Stats::new(),
        })
    }

    /// Relay until a command, EOF or I/O error, then release both ends
    pub async fn run(mut self) {
        match self.relay().await {
            Ok(Termination::Command(command)) => {
                info!("Client sent {}, closing session", command.token());
            }
            Ok(Termination::ClientClosed) => debug!("Client closed connection"),
            Ok(Termination::DeviceClosed) => warn!("Serial port {} closed", self.device.name()),
            Err(e) => error!("{}", e),
        }
        self.teardown().await;
    }

    async fn relay(&mut self) -> Result<Termination> {
        loop {
            tokio::select! {
                // Client -> Device
                ready = self.stream.readable() => {
                    ready.map_err(BridgeError::socket_io)?;
                    if let Some(termination) = self.relay_client_to_device().await? {
                        return Ok(termination);
                    }
                }

                // Device -> Client
                available = self.device.data_available() => {
                    if !available? {
                        return Ok(Termination::DeviceClosed);
                    }
                    self.relay_device_to_client().await?;
                }
            }
        }
    }

    /// Drain one client burst and act on it
    ///
    /// Returns `Some` when the session must end.
    async fn relay_client_to_device(&mut self) -> Result<Option<Termination>> {
        let eof = self.drain_socket()?;

        if !self.scratch.is_empty() {
            if let Some(command) = ControlCommand::match_burst(&self.scratch) {
                if command == ControlCommand::Kill {
                    self.shutdown.cancel();
                }
                return Ok(Some(Termination::Command(command)));
            }

            let burst = Bytes::copy_from_slice(&self.scratch);
            self.device.write(burst).await?;
            self.stats.add_tx(self.scratch.len());
            debug!("Wrote {} bytes to {}", self.scratch.len(), self.device.name());
            if enabled!(Level::TRACE) {
                trace!("> {}", escape_burst(&self.scratch));
            }
        }

        Ok(eof.then_some(Termination::ClientClosed))
    }

    /// Read everything immediately available on the socket into `scratch`
    ///
    /// Stops at `WouldBlock`, EOF or a full buffer. Bytes beyond capacity stay
    /// in the socket and form the next burst. Returns `true` on EOF.
    fn drain_socket(&mut self) -> Result<bool> {
        self.scratch.clear();
        self.scratch.resize(self.capacity, 0);
        let mut filled = 0;
        let mut eof = false;

        while filled < self.capacity {
            match self.stream.try_read(&mut self.scratch[filled..]) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.scratch.clear();
                    return Err(BridgeError::socket_io(e));
                }
            }
        }

        self.scratch.truncate(filled);
        if filled == self.capacity {
            trace!("Burst reached buffer capacity ({} bytes)", self.capacity);
        }
        Ok(eof)
    }

    /// Drain the device and forward the burst to the client
    ///
    /// Pauses between drains so bytes trickling in at line speed are sent
    /// together.
    async fn relay_device_to_client(&mut self) -> Result<()> {
        self.scratch.clear();
        loop {
            let room = self.capacity - self.scratch.len();
            if room == 0 || self.device.read(&mut self.scratch, room) == 0 {
                break;
            }
            tokio::time::sleep(self.drain_pause).await;
        }

        if self.scratch.is_empty() {
            return Ok(());
        }

        self.stream
            .write_all(&self.scratch)
            .await
            .map_err(BridgeError::socket_io)?;
        self.stats.add_rx(self.scratch.len());
        debug!("Wrote {} bytes to client", self.scratch.len());
        if enabled!(Level::TRACE) {
            trace!("< {}", escape_burst(&self.scratch));
        }
        Ok(())
    }

    /// Release socket and device; failures are logged, never escalated
    async fn teardown(self) {
        let Session {
            stream,
            device,
            stats,
            ..
        } = self;

        close_stream(stream).await;

        let name = device.name().to_string();
        match device.close().await {
            Ok(()) => debug!("Serial port {} closed", name),
            Err(e) => warn!("Error closing serial port: {}", e),
        }

        info!("Session closed: {}", stats);
    }
}

/// Shut down the write half and drop the connection
async fn close_stream(mut stream: TcpStream) {
    if let Err(e) = stream.shutdown().await {
        // Peer may already be gone
        if e.kind() != io::ErrorKind::NotConnected {
            warn!("Error closing connection: {}", e);
        }
    }
}
