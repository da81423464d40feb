use tracing_subscriber::EnvFilter;

/// Initialize process-wide logging. Filter comes from `RUST_LOG` (default `info`).
///
/// Logs go to stderr; stdout carries protocol responses only.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
