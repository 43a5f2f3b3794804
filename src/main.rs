//! Serial Server - serial port to TCP bridge
//!
//! Usage:
//!   serial-server                          Use ./serialserver.toml or defaults
//!   serial-server /dev/ttyUSB0 5000 8232   Device, open timeout (ms), TCP port
//!   serial-server -c bridge.toml -v        Explicit config, debug output

use clap::Parser;
use serial_server::cli::Cli;
use serial_server::config;
use serial_server::device::{DeviceAdapter, SerialAdapter};
use serial_server::error::{BridgeError, Result};
use serial_server::listener::Listener;
use serial_server::logging;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let rt = tokio::runtime::Runtime::new().map_err(|e| BridgeError::Runtime { source: e })?;
    rt.block_on(serve(config))
}

async fn serve(config: config::Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let adapter: Arc<dyn DeviceAdapter> = Arc::new(SerialAdapter);

    info!(
        "Bridging {} (open timeout {}ms)",
        config.server.device, config.server.timeout
    );
    let listener = Listener::bind(Arc::new(config), adapter, shutdown.clone())?;
    let sessions = listener.sessions();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Signal received, shutting down");
        signal_token.cancel();
    });

    listener.run().await;

    if !sessions.is_empty() {
        info!("Waiting for {} open session(s)", sessions.len());
    }
    tokio::select! {
        _ = sessions.wait() => {}
        _ = shutdown_signal() => warn!("Second signal, dropping open sessions"),
    }

    info!("Serial server stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM (Ctrl+C on Windows)
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
