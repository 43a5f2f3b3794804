//! TCP listener
//!
//! Accepts clients and spawns one detached [`Session`] per connection.
//! Acceptance stops once the shutdown token is cancelled (by a `kill`
//! command or a signal); sessions already running are left alone.

use crate::bridge::Session;
use crate::config::Config;
use crate::constants::{LISTEN_BACKLOG, SERVICE_UNAVAILABLE};
use crate::device::DeviceAdapter;
use crate::error::{BridgeError, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Listening socket plus everything a session needs
pub struct Listener {
    listener: TcpListener,
    config: Arc<Config>,
    adapter: Arc<dyn DeviceAdapter>,
    shutdown: CancellationToken,
    sessions: TaskTracker,
}

impl Listener {
    /// Bind the configured address
    ///
    /// # Errors
    ///
    /// `ListenerBind` if the port cannot be bound.
    pub fn bind(
        config: Arc<Config>,
        adapter: Arc<dyn DeviceAdapter>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = create_reusable_tcp_listener(config.server.listen_addr())?;
        Ok(Self {
            listener,
            config,
            adapter,
            shutdown,
            sessions: TaskTracker::new(),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| BridgeError::ListenerBind {
            port: self.config.server.port,
            source: e,
        })
    }

    /// Tracker of spawned sessions, to wait for them after `run` returns
    pub fn sessions(&self) -> TaskTracker {
        self.sessions.clone()
    }

    /// Accept connections until shutdown, then close the listening socket
    ///
    /// Connections arriving during the shutdown grace period are told the
    /// service is unavailable.
    pub async fn run(self) {
        let server = &self.config.server;
        match self.listener.local_addr() {
            Ok(addr) => info!("Serial server listening on {}", addr),
            Err(_) => info!("Serial server listening on port {}", server.port),
        }

        let mut next_id: u64 = 0;
        loop {
            let accepted = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                // Bounded wait, so shutdown is re-checked even without clients
                r = tokio::time::timeout(server.accept_wait(), self.listener.accept()) => r,
            };

            match accepted {
                Ok(Ok((stream, peer))) => {
                    next_id += 1;
                    self.spawn_session(next_id, stream, peer);
                }
                Ok(Err(e)) => warn!("Accept failed: {}", e),
                Err(_) => {
                    // Accept wait elapsed
                }
            }
        }

        info!(
            "Shutdown requested, closing listener in {}ms",
            server.shutdown_grace_ms
        );
        let deadline = tokio::time::Instant::now() + server.shutdown_grace();
        while let Ok(accepted) = tokio::time::timeout_at(deadline, self.listener.accept()).await {
            if let Ok((stream, peer)) = accepted {
                debug!("Rejecting connection from {}", peer);
                reject(stream).await;
            }
        }

        self.sessions.close();
        info!("Listener closed");
    }

    fn spawn_session(&self, id: u64, stream: TcpStream, peer: SocketAddr) {
        let span = info_span!("session", id, %peer);
        let config = self.config.clone();
        let adapter = self.adapter.clone();
        let shutdown = self.shutdown.clone();

        self.sessions.spawn(
            async move {
                info!("Accepted connection");
                match Session::open(stream, &config, &adapter, shutdown).await {
                    Ok(session) => session.run().await,
                    Err(e) => error!("{}", e),
                }
            }
            .instrument(span),
        );
    }
}

/// Tell a late client the server is going away
async fn reject(mut stream: TcpStream) {
    let _ = stream.write_all(SERVICE_UNAVAILABLE).await;
    let _ = stream.shutdown().await;
}

/// Create a TCP listener with SO_REUSEADDR for quick rebind after restart
fn create_reusable_tcp_listener(addr: SocketAddr) -> Result<TcpListener> {
    let map_err = |e| BridgeError::ListenerBind {
        port: addr.port(),
        source: e,
    };

    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(map_err)?;
    socket.set_reuse_address(true).map_err(map_err)?;
    socket.set_nonblocking(true).map_err(map_err)?;
    socket.bind(&addr.into()).map_err(map_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(map_err)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(map_err)
}
