use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber that also captures records emitted
/// through the `log` facade by the library crates.
pub fn initialize_logger() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_absent| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| anyhow::anyhow!(error))
}
