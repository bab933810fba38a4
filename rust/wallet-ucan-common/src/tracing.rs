//! Helpers to wrangle logging across the wallet-ucan crates
//! NOTE: [initialize_tracing] should only ever be called in tests or binaries;
//! a library should only concern itself with instrumentation and logging.
use std::sync::Once;

static INITIALIZE_TRACING: Once = Once::new();

/// The filter applied when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "wallet_ucan,wallet_ucan_storage=info";

#[cfg(target_arch = "wasm32")]
/// Logging is left to the host page on web targets
pub fn initialize_tracing() {
    INITIALIZE_TRACING.call_once(|| ());
}

#[cfg(not(target_arch = "wasm32"))]
/// Install a global `fmt` subscriber filtered by `RUST_LOG`. Safe to call
/// more than once; only the first call has an effect.
pub fn initialize_tracing() {
    use tracing_subscriber::prelude::*;
    INITIALIZE_TRACING.call_once(|| {
        let installed = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(
                std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
            ))
            .with(tracing_subscriber::fmt::layer())
            .try_init();

        if let Err(error) = installed {
            ::tracing::debug!("Tracing subscriber already installed: {}", error);
        }
    });
}
