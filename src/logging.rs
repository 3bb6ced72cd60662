use tracing_subscriber::{fmt, EnvFilter};

/// Install the tracing subscriber for binaries. The library itself never
/// installs one; tests run without it.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("messmate=info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
