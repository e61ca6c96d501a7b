use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::handler::HandlerError;
use crate::transport::TransportError;

/// What the error handler of a server is told about.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The dispatch queue was over its limit, the connection is dropped.
    #[error("too many requests, {queued} connections already waiting")]
    Overload { queued: usize },

    /// The request handler returned an error or panicked.
    #[error("handler failed: {source}")]
    Handler { source: HandlerError },
}

impl DispatchError {
    pub fn handler<E: Into<HandlerError>>(e: E) -> Self {
        Self::Handler { source: e.into() }
    }

    pub fn is_overload(&self) -> bool {
        matches!(self, Self::Overload { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("server is already started")]
    AlreadyStarted,

    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("can't parse config: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    #[error("can't read config file {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl ConfigError {
    pub fn invalid<S: ToString>(field: &'static str, reason: S) -> Self {
        Self::Invalid { field, reason: reason.to_string() }
    }
}

/// Failure of [`ServerCore::start`](crate::server::ServerCore::start).
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("config error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },

    #[error("can't spawn worker thread: {source}")]
    Worker { source: io::Error },
}
