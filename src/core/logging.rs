//! Logging bootstrap.
//!
//! All lifecycle events go through `tracing` with a `connection` field so
//! that logs from several gateway processes can be told apart.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,uagw=debug"
    } else {
        "info"
    }
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over the verbose flag. Calling this twice is harmless:
/// the second install fails and is ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
