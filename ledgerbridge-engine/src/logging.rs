//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber that honours `RUST_LOG`.
///
/// Without `RUST_LOG` the bridge crates log at `info`, or `debug` when
/// `verbose` is set. Calling it twice is harmless.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,ledgerbridge_fingerprint={default_level},ledgerbridge_acquire={default_level},\
             ledgerbridge_isolation={default_level},ledgerbridge_engine={default_level}"
        ))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
