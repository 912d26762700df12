// ── Logging bootstrap ────────────────────────────────────────────────────────
//
// Library crates log through the `log` facade; the subscriber installed here
// picks those records up through the `tracing-log` bridge. Output goes to
// stderr so stdout stays free for the caller.

use rscp_core::TransferOptions;
use tracing_subscriber::EnvFilter;

/// Filter derived from options; `RUST_LOG` wins when set.
pub fn create_env_filter(options: &TransferOptions) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(default_directive(options))
}

fn default_directive(options: &TransferOptions) -> &'static str {
    if options.verbose {
        "debug"
    } else if options.quiet {
        "warn"
    } else {
        "info"
    }
}

/// Install the global subscriber. Returns `false` when one was already
/// installed; that is not an error.
pub fn init_logging(options: &TransferOptions) -> bool {
    let filter = create_env_filter(options);

    #[cfg(feature = "logs-json")]
    let result = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    #[cfg(not(feature = "logs-json"))]
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    match result {
        Ok(()) => {
            tracing::debug!(level = default_directive(options), "logging initialised");
            true
        }
        Err(_) => false,
    }
}
