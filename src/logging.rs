use tracing_subscriber::EnvFilter;

/// Environment variable holding the trace filter directives.
pub const LOG_ENV: &str = "FAS_LOG";

/// Install a stderr subscriber filtered by [`LOG_ENV`], falling back to
/// `warn`. Stdout is left to the binaries' results.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
