//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Filter directives are read from this variable, e.g. `TASKER_LOG=tasker_core=debug`.
pub const LOG_ENV: &str = "TASKER_LOG";

/// Install the fmt subscriber unless one is already set. Safe to call twice.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
