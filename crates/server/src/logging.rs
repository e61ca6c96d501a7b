//! Installing the global `tracing` subscriber.
//!
//! The library only emits events; an embedding application either installs
//! its own subscriber or calls one of these once at startup.

use thiserror::Error;
use tracing::Level;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Error, Debug)]
#[error("can't install logger: {source}")]
pub struct LoggingError {
    #[from]
    source: SetGlobalDefaultError,
}

/// Logs everything at `level` and above to stdout.
pub fn init(level: Level) -> Result<(), LoggingError> {
    let subscriber = FmtSubscriber::builder().with_max_level(level).with_thread_names(true).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Filters by the `RUST_LOG` directives, `info` when unset or invalid.
pub fn init_from_env() -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).with_thread_names(true).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_fails() {
        init(Level::DEBUG).unwrap();
        assert!(init_from_env().is_err());
        assert!(init(Level::INFO).is_err());
    }
}
