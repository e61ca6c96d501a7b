//! Server lifecycle: configuration, transport selection, workers.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionLimits, HttpConnection, TcpSocket};
use crate::dispatch::{DispatchQueue, Job, Worker};
use crate::ensure;
use crate::handler::{ErrorHandler, Handler, LoggingErrorHandler};
use crate::mime::MimeProvider;
use crate::server::config::TlsFiles;
use crate::server::processor::{ConnectionFactory, IoThreadFactory, Processor, ProcessorParts};
use crate::server::{ConfigError, ServerConfig, ServerError};
use crate::session::SessionStore;
use crate::transport::{ReadinessSink, TlsConfig, Transport, TransportError, TransportKind};

/// The server over [`HttpConnection`]s.
pub type HttpServer = ServerCore<HttpConnection<TcpSocket>>;

impl HttpServer {
    /// A builder with the `HttpConnection` factory already set.
    pub fn builder() -> ServerCoreBuilder<HttpConnection<TcpSocket>> {
        ServerCoreBuilder::new().connection_factory(|socket, peer_addr, limits: &ConnectionLimits| {
            HttpConnection::new(socket, peer_addr, *limits)
        })
    }
}

pub struct ServerCoreBuilder<C> {
    handler: Option<Arc<dyn Handler<C>>>,
    error_handler: Arc<dyn ErrorHandler<C>>,
    factory: Option<Arc<ConnectionFactory<C>>>,
    io_thread_factory: Option<Arc<IoThreadFactory>>,
    config: ServerConfig,
    transport_kind: Option<TransportKind>,
    mime: Option<MimeProvider>,
}

impl<C: Connection> ServerCoreBuilder<C> {
    pub fn new() -> Self {
        Self {
            handler: None,
            error_handler: Arc::new(LoggingErrorHandler),
            factory: None,
            io_thread_factory: None,
            config: ServerConfig::default(),
            transport_kind: None,
            mime: None,
        }
    }

    pub fn handler(mut self, handler: impl Handler<C>) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Replaces the default [`LoggingErrorHandler`].
    pub fn error_handler(mut self, error_handler: impl ErrorHandler<C>) -> Self {
        self.error_handler = Arc::new(error_handler);
        self
    }

    pub fn connection_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(TcpSocket, SocketAddr, &ConnectionLimits) -> C + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Builds the reactor's I/O threads, given the thread number and count.
    pub fn io_thread_builder<F>(mut self, factory: F) -> Self
    where
        F: Fn(usize, usize) -> thread::Builder + Send + Sync + 'static,
    {
        self.io_thread_factory = Some(Arc::new(factory));
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Forces a transport instead of [`TransportKind::select`].
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.transport_kind = Some(kind);
        self
    }

    /// Starts from `mime` instead of the default table.
    pub fn mime_provider(mut self, mime: MimeProvider) -> Self {
        self.mime = Some(mime);
        self
    }

    pub fn build(self) -> Result<ServerCore<C>, ConfigError> {
        let handler = self.handler.ok_or(ConfigError::Missing("handler"))?;
        let factory = self.factory.ok_or(ConfigError::Missing("connection factory"))?;
        self.config.validate()?;

        let transport_kind = self.transport_kind.unwrap_or_else(TransportKind::select);
        debug!(?transport_kind, "transport selected");

        let mime = self.mime.map_or_else(OnceCell::new, OnceCell::with_value);

        Ok(ServerCore {
            config: Mutex::new(self.config),
            started: AtomicBool::new(false),
            handler,
            error_handler: self.error_handler,
            factory,
            io_thread_factory: self.io_thread_factory,
            transport_kind,
            transport: Mutex::new(transport_kind.create()),
            sessions: OnceCell::new(),
            mime: Arc::new(mime),
            running: Mutex::new(None),
        })
    }
}

impl<C: Connection> Default for ServerCoreBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for ServerCoreBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCoreBuilder")
            .field("config", &self.config)
            .field("transport_kind", &self.transport_kind)
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

/// The running parts, present between `start` and `close`.
struct Running<C> {
    queue: Option<Arc<DispatchQueue<C>>>,
    workers: Vec<Worker>,
}

impl<C> Running<C> {
    fn stop(self) {
        if let Some(queue) = &self.queue {
            for _ in &self.workers {
                queue.push(Job::Shutdown);
            }
        }
        for worker in self.workers {
            worker.join();
        }
    }
}

/// An embedded HTTP server.
///
/// Configured through its setters until [`start`](ServerCore::start), which
/// latches the configuration: every setter fails with
/// [`ConfigError::AlreadyStarted`] from then on, including after
/// [`close`](ServerCore::close). A failed start releases the latch again.
///
/// With `workers == 0` every pass runs on the transport thread that saw the
/// readiness. Otherwise passes go through a [`DispatchQueue`] holding at
/// most `max_requests_in_queue` connections; a connection arriving when it is
/// full is reported to the error handler as
/// [`DispatchError::Overload`](crate::server::DispatchError::Overload) and
/// closed.
pub struct ServerCore<C: Connection> {
    config: Mutex<ServerConfig>,
    started: AtomicBool,
    handler: Arc<dyn Handler<C>>,
    error_handler: Arc<dyn ErrorHandler<C>>,
    factory: Arc<ConnectionFactory<C>>,
    io_thread_factory: Option<Arc<IoThreadFactory>>,
    transport_kind: TransportKind,
    transport: Mutex<Box<dyn Transport<C>>>,
    sessions: OnceCell<Arc<SessionStore>>,
    mime: Arc<OnceCell<MimeProvider>>,
    running: Mutex<Option<Running<C>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: Connection> ServerCore<C> {
    pub fn start(&self) -> Result<(), ServerError> {
        let config = {
            let config = locked(&self.config);
            ensure!(!self.started.load(Ordering::Acquire), ConfigError::AlreadyStarted.into());
            config.validate()?;
            self.started.store(true, Ordering::Release);
            config.clone()
        };

        match self.launch(&config) {
            Ok(running) => {
                *locked(&self.running) = Some(running);
                Ok(())
            }
            Err(e) => {
                self.started.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn launch(&self, config: &ServerConfig) -> Result<Running<C>, ServerError> {
        let mut transport = locked(&self.transport);
        transport.set_hostname(config.host.clone());
        transport.set_port(config.port);
        transport.set_io_threads_count(config.io_threads);
        transport.set_ttl(config.ttl());
        if let Some(TlsFiles { cert_file, key_file }) = &config.tls {
            let tls = TlsConfig::from_pem_files(cert_file, key_file).map_err(TransportError::from)?;
            transport.load_certificates(tls);
        }

        let sessions = self.sessions.get_or_init(|| Arc::new(SessionStore::new(config.session_timeout())));

        info!(workers = config.workers, transport = ?self.transport_kind, "starting server");
        let queue = (config.workers > 0).then(|| Arc::new(DispatchQueue::new(config.queue_limit())));
        let processor = Processor::new(ProcessorParts {
            handler: Arc::clone(&self.handler),
            error_handler: Arc::clone(&self.error_handler),
            factory: Arc::clone(&self.factory),
            io_thread_factory: self.io_thread_factory.clone(),
            queue: queue.clone(),
            limits: config.connection_limits(),
            pipeline_budget: config.pipeline_budget,
            sessions: Arc::clone(sessions),
            context: config.context.clone(),
            mime: Arc::clone(&self.mime),
        });

        let mut running = Running { queue, workers: Vec::with_capacity(config.workers) };
        if let Some(queue) = &running.queue {
            for index in 0..config.workers {
                match Worker::spawn(index, Arc::clone(queue), Arc::clone(&processor)) {
                    Ok(worker) => running.workers.push(worker),
                    Err(source) => {
                        running.stop();
                        return Err(ServerError::Worker { source });
                    }
                }
            }
        }

        let sink: Arc<dyn ReadinessSink<C>> = processor;
        if let Err(e) = transport.start(sink) {
            running.stop();
            return Err(e.into());
        }
        Ok(running)
    }

    /// Stops the transport, then lets the workers finish what is queued.
    pub fn close(&self) {
        locked(&self.transport).close();
        if let Some(running) = locked(&self.running).take() {
            running.stop();
            info!("server closed");
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn configure(&self, f: impl FnOnce(&mut ServerConfig)) -> Result<(), ConfigError> {
        let mut config = locked(&self.config);
        ensure!(!self.started.load(Ordering::Acquire), ConfigError::AlreadyStarted);
        f(&mut config);
        Ok(())
    }

    pub fn set_hostname(&self, hostname: Option<String>) -> Result<(), ConfigError> {
        self.configure(|config| config.host = hostname)
    }

    pub fn set_port(&self, port: u16) -> Result<(), ConfigError> {
        self.configure(|config| config.port = port)
    }

    pub fn set_workers(&self, workers: usize) -> Result<(), ConfigError> {
        self.configure(|config| config.workers = workers)
    }

    pub fn set_session_timeout_secs(&self, secs: u64) -> Result<(), ConfigError> {
        self.configure(|config| config.session_timeout_secs = secs)
    }

    pub fn set_post_body_limit(&self, limit: u64) -> Result<(), ConfigError> {
        self.configure(|config| config.post_body_limit = limit)
    }

    pub fn set_websocket_frame_length_limit(&self, limit: usize) -> Result<(), ConfigError> {
        self.configure(|config| config.websocket_frame_length_limit = limit)
    }

    /// Zero or negative means unbounded.
    pub fn set_max_requests_in_queue(&self, limit: i64) -> Result<(), ConfigError> {
        self.configure(|config| config.max_requests_in_queue = limit)
    }

    pub fn set_io_threads(&self, count: usize) -> Result<(), ConfigError> {
        self.configure(|config| config.io_threads = count)
    }

    pub fn set_ttl_millis(&self, ttl_millis: Option<u64>) -> Result<(), ConfigError> {
        self.configure(|config| config.ttl_millis = ttl_millis)
    }

    pub fn set_context(&self, context: Option<String>) -> Result<(), ConfigError> {
        self.configure(|config| config.context = context)
    }

    pub fn set_pipeline_budget(&self, budget: usize) -> Result<(), ConfigError> {
        self.configure(|config| config.pipeline_budget = budget)
    }

    /// PEM files loaded when the server starts.
    pub fn set_tls_files(&self, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let files = TlsFiles { cert_file: cert_file.into(), key_file: key_file.into() };
        self.configure(|config| config.tls = Some(files))
    }

    /// Secures the transport with certificate material already in memory.
    pub fn load_certificates(&self, tls: TlsConfig) -> Result<(), ConfigError> {
        // checked under the config lock, like every setter
        let _config = locked(&self.config);
        ensure!(!self.started.load(Ordering::Acquire), ConfigError::AlreadyStarted);
        locked(&self.transport).load_certificates(tls);
        Ok(())
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> ServerConfig {
        locked(&self.config).clone()
    }

    pub fn hostname(&self) -> Option<String> {
        locked(&self.config).host.clone()
    }

    pub fn port(&self) -> u16 {
        locked(&self.config).port
    }

    pub fn workers(&self) -> usize {
        locked(&self.config).workers
    }

    pub fn context(&self) -> Option<String> {
        locked(&self.config).context.clone()
    }

    pub fn post_body_limit(&self) -> u64 {
        locked(&self.config).post_body_limit
    }

    pub fn websocket_frame_length_limit(&self) -> usize {
        locked(&self.config).websocket_frame_length_limit
    }

    /// The effective queue limit, `usize::MAX` when unbounded.
    pub fn max_requests_in_queue(&self) -> usize {
        locked(&self.config).queue_limit()
    }

    /// Connections currently waiting for a worker.
    pub fn queued(&self) -> usize {
        locked(&self.running).as_ref().and_then(|running| running.queue.as_ref()).map_or(0, |queue| queue.len())
    }

    pub fn is_secured(&self) -> bool {
        locked(&self.transport).is_secured() || locked(&self.config).tls.is_some()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport_kind
    }

    /// The address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        locked(&self.transport).local_addr()
    }

    /// The session store, created by the first start.
    pub fn sessions(&self) -> Option<Arc<SessionStore>> {
        self.sessions.get().cloned()
    }

    /// Created on first access and kept for the server's lifetime.
    pub fn mime_provider(&self) -> &MimeProvider {
        self.mime.get_or_init(MimeProvider::new)
    }
}

impl<C: Connection> Drop for ServerCore<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: Connection> fmt::Debug for ServerCore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCore")
            .field("config", &*locked(&self.config))
            .field("started", &self.is_started())
            .field("transport_kind", &self.transport_kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Exchange, make_handler};

    fn server() -> HttpServer {
        HttpServer::builder()
            .handler(make_handler(|exchange: &mut Exchange<'_, HttpConnection<TcpSocket>>| {
                exchange.response_mut().body("ok");
                Ok(())
            }))
            .transport(TransportKind::Fallback)
            .build()
            .unwrap()
    }

    #[test]
    fn handler_is_required() {
        let result = ServerCoreBuilder::<HttpConnection<TcpSocket>>::new().build();
        assert!(matches!(result, Err(ConfigError::Missing("handler"))));
    }

    #[test]
    fn factory_is_required() {
        let result = ServerCoreBuilder::<HttpConnection<TcpSocket>>::new()
            .handler(make_handler(|_: &mut Exchange<'_, HttpConnection<TcpSocket>>| Ok(())))
            .build();
        assert!(matches!(result, Err(ConfigError::Missing("connection factory"))));
    }

    #[test]
    fn setters_apply_before_start() {
        let server = server();
        server.set_hostname(Some("127.0.0.1".into())).unwrap();
        server.set_port(0).unwrap();
        server.set_workers(3).unwrap();
        server.set_max_requests_in_queue(-1).unwrap();
        server.set_context(Some("/app".into())).unwrap();

        assert_eq!(server.hostname().as_deref(), Some("127.0.0.1"));
        assert_eq!(server.workers(), 3);
        assert_eq!(server.max_requests_in_queue(), usize::MAX);
        assert_eq!(server.context().as_deref(), Some("/app"));
        assert!(!server.is_started());
        assert!(!server.is_secured());
        assert!(server.sessions().is_none());
    }

    #[test]
    fn configuration_is_latched_by_start() {
        let server = server();
        server.set_hostname(Some("127.0.0.1".into())).unwrap();
        server.set_port(0).unwrap();
        server.set_io_threads(1).unwrap();
        server.set_workers(2).unwrap();
        server.start().unwrap();

        assert!(server.is_started());
        assert!(server.local_addr().is_some());
        assert!(matches!(server.set_port(9999), Err(ConfigError::AlreadyStarted)));
        assert!(matches!(server.set_workers(8), Err(ConfigError::AlreadyStarted)));
        assert!(matches!(server.set_ttl_millis(Some(5)), Err(ConfigError::AlreadyStarted)));
        assert_eq!(server.port(), 0);
        assert_eq!(server.workers(), 2);
        assert!(matches!(server.start(), Err(ServerError::Config { source: ConfigError::AlreadyStarted })));

        let sessions = server.sessions().unwrap();
        assert_eq!(sessions.timeout().as_secs(), 1800);

        server.close();
        assert!(server.local_addr().is_none());
        assert!(matches!(server.set_port(1), Err(ConfigError::AlreadyStarted)));
    }

    #[test]
    fn failed_start_releases_latch() {
        let server = server();
        server.set_hostname(Some("127.0.0.1".into())).unwrap();
        server.set_tls_files("/definitely/not/here.pem", "/definitely/not/here.key").unwrap();
        assert!(server.is_secured());

        assert!(matches!(server.start(), Err(ServerError::Transport { source: TransportError::Tls { .. } })));
        assert!(!server.is_started());
        server.set_port(0).unwrap();
    }

    #[test]
    fn mime_provider_is_created_once() {
        let server = server();
        let first: *const MimeProvider = server.mime_provider();
        server.mime_provider().register("avif", "image/avif".parse().unwrap());
        assert!(std::ptr::eq(first, server.mime_provider()));
        assert_eq!(server.mime_provider().get("AVIF").unwrap().essence_str(), "image/avif");
    }

    #[test]
    fn builder_mime_provider_is_used() {
        let mime = MimeProvider::new();
        mime.register("webmanifest", "application/manifest+json".parse().unwrap());
        let server = HttpServer::builder()
            .handler(make_handler(|_: &mut Exchange<'_, HttpConnection<TcpSocket>>| Ok(())))
            .transport(TransportKind::Fallback)
            .mime_provider(mime)
            .build()
            .unwrap();

        assert_eq!(server.mime_provider().get("webmanifest").unwrap().essence_str(), "application/manifest+json");
    }
}
