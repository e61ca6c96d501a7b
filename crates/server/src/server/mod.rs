//! The server core: configuration, lifecycle and the per-connection state
//! machine.

mod config;
mod error;
mod processor;
mod server_core;

pub use config::{
    DEFAULT_MAX_REQUESTS_IN_QUEUE, DEFAULT_PIPELINE_BUDGET, DEFAULT_PORT, DEFAULT_POST_BODY_LIMIT, DEFAULT_SESSION_TIMEOUT_SECS,
    DEFAULT_WEBSOCKET_FRAME_LENGTH_LIMIT, ServerConfig, TlsFiles,
};
pub use error::{ConfigError, DispatchError, ServerError};
pub(crate) use processor::Processor;
pub use processor::{ConnectionFactory, IoThreadFactory};
pub use server_core::{HttpServer, ServerCore, ServerCoreBuilder};
