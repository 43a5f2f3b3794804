//! Tracing setup
//!
//! Sessions log inside their own span (`session{id=.. peer=..}`), so no
//! logger handle is passed around.

use tracing::Level;

/// Level selected by the `-v` count
pub fn level_for(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialize tracing output
///
/// Call early in main() before any logging occurs. `RUST_LOG` takes
/// precedence over the `-v` count when set.
pub fn init_tracing(verbose: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbose).as_str().to_lowercase()));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(false)
                .compact(),
        )
        .with(filter)
        .try_init();
}
