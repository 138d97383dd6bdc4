use tracing_subscriber::EnvFilter;

/// Process-wide tracing setup, filtered by `RUST_LOG` (default `info`).
///
/// Writes to stderr so stdout stays free for command output. Calling it
/// again is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
