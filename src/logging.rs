//! Diagnostic tracing for the patcher.
//!
//! Reports meant for the user (status tables, verdicts, diffs) are printed by
//! the binary. This is the `RUST_LOG`-controlled event stream on stderr.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn`, or `info` for this crate when
/// `verbose` is set.
///
/// ```bash
/// RUST_LOG=lod2_patcher=debug lod2-patcher apply --tree ./SFCGAL
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("warn,lod2_patcher=info")
        } else {
            EnvFilter::new("warn")
        }
    });

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
