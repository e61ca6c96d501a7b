//! Server configuration.
//!
//! Every field has a default, so a TOML file only lists what it changes:
//!
//! ```toml
//! port = 9000
//! workers = 8
//! max_requests_in_queue = 512
//! ttl_millis = 30000
//!
//! [tls]
//! cert_file = "cert.pem"
//! key_file = "key.pem"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::buffer::DEFAULT_READ_BUFFER_SIZE;
use crate::connection::ConnectionLimits;
use crate::server::ConfigError;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_POST_BODY_LIMIT: u64 = 2 * 1024 * 1024;
pub const DEFAULT_WEBSOCKET_FRAME_LENGTH_LIMIT: usize = 64 * 1024;
pub const DEFAULT_MAX_REQUESTS_IN_QUEUE: i64 = 1000;
pub const DEFAULT_PIPELINE_BUDGET: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to bind, all interfaces when unset.
    pub host: Option<String>,
    pub port: u16,
    /// Pooled worker threads, `0` processes connections on the I/O threads.
    pub workers: usize,
    pub session_timeout_secs: u64,
    pub post_body_limit: u64,
    pub websocket_frame_length_limit: usize,
    /// Soft limit of the dispatch queue, zero or negative means unbounded.
    pub max_requests_in_queue: i64,
    pub io_threads: usize,
    /// Idle connections are closed after this long, never when unset.
    pub ttl_millis: Option<u64>,
    pub context: Option<String>,
    pub tls: Option<TlsFiles>,
    /// Requests handled for one connection before it yields its worker.
    pub pipeline_budget: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsFiles {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            workers: 0,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            post_body_limit: DEFAULT_POST_BODY_LIMIT,
            websocket_frame_length_limit: DEFAULT_WEBSOCKET_FRAME_LENGTH_LIMIT,
            max_requests_in_queue: DEFAULT_MAX_REQUESTS_IN_QUEUE,
            io_threads: default_io_threads(),
            ttl_millis: None,
            context: None,
            tls: None,
            pipeline_budget: DEFAULT_PIPELINE_BUDGET,
        }
    }
}

fn default_io_threads() -> usize {
    std::thread::available_parallelism().map(usize::from).unwrap_or(1)
}

impl ServerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.io_threads == 0 {
            return Err(ConfigError::invalid("io_threads", "must be at least 1"));
        }
        if self.pipeline_budget == 0 {
            return Err(ConfigError::invalid("pipeline_budget", "must be at least 1"));
        }
        if self.websocket_frame_length_limit == 0 {
            return Err(ConfigError::invalid("websocket_frame_length_limit", "must be at least 1"));
        }
        if self.ttl_millis == Some(0) {
            return Err(ConfigError::invalid("ttl_millis", "must be positive when set"));
        }
        Ok(())
    }

    /// The effective dispatch queue limit.
    pub fn queue_limit(&self) -> usize {
        usize::try_from(self.max_requests_in_queue).ok().filter(|limit| *limit > 0).unwrap_or(usize::MAX)
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_millis.map(Duration::from_millis)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            buffer_size: DEFAULT_READ_BUFFER_SIZE,
            post_body_limit: self.post_body_limit,
            websocket_frame_length_limit: self.websocket_frame_length_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.workers, 0);
        assert_eq!(config.session_timeout_secs, 1800);
        assert_eq!(config.post_body_limit, 2 * 1024 * 1024);
        assert_eq!(config.websocket_frame_length_limit, 64 * 1024);
        assert_eq!(config.queue_limit(), 1000);
        assert!(config.io_threads >= 1);
        assert!(config.ttl().is_none());
    }

    #[test]
    fn non_positive_queue_limit_is_unbounded() {
        for limit in [0, -1] {
            let config = ServerConfig { max_requests_in_queue: limit, ..ServerConfig::default() };
            assert_eq!(config.queue_limit(), usize::MAX);
        }
    }

    #[test]
    fn parses_partial_toml() {
        let config = ServerConfig::from_toml_str(indoc! {r#"
            host = "127.0.0.1"
            port = 9000
            workers = 4
            ttl_millis = 1500
            context = "/app"

            [tls]
            cert_file = "cert.pem"
            key_file = "key.pem"
        "#})
        .unwrap();

        assert_eq!(config.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.ttl(), Some(Duration::from_millis(1500)));
        assert_eq!(config.tls.unwrap().key_file, PathBuf::from("key.pem"));
        assert_eq!(config.pipeline_budget, DEFAULT_PIPELINE_BUDGET);
    }

    #[test]
    fn rejects_unknown_and_invalid_fields() {
        assert!(matches!(ServerConfig::from_toml_str("prot = 1"), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            ServerConfig::from_toml_str("pipeline_budget = 0"),
            Err(ConfigError::Invalid { field: "pipeline_budget", .. })
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 0\nworkers = 2").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 0);
        assert_eq!(config.workers, 2);

        assert!(matches!(ServerConfig::from_file("/definitely/not/here.toml"), Err(ConfigError::Io { .. })));
    }
}
