//! Transports accept connections and report socket readiness to the core.
//!
//! Two implementations share the [`Transport`] contract:
//!
//! - [`ReactorTransport`]: `mio` based event loop, one acceptor thread and a
//!   configurable number of partition threads each polling its share of the
//!   connections
//! - [`FallbackTransport`]: a `tokio` runtime watching every connection with a
//!   task of its own, for platforms without a usable poller
//!
//! The choice is made once per server by [`TransportKind::select`]. Whatever
//! the transport, readiness goes to the same [`ReadinessSink`], so the
//! dispatch queue, the workers and the per-connection state machine are
//! shared by both.

mod error;
mod fallback;
mod reactor;
mod tls;

pub use error::{TlsError, TransportError};
pub use fallback::FallbackTransport;
pub use reactor::ReactorTransport;
pub use tls::TlsConfig;

use std::env;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::buffer::BufferProvider;
use crate::connection::{Connection, TcpSocket};
use crate::dispatch::ConnectionRef;

const LISTEN_BACKLOG: i32 = 1024;

/// Environment variable that, set to `true`, forces the fallback transport.
pub const REACTOR_DISABLED_ENV: &str = "REACTOR_DISABLED";

/// Where a transport delivers connections and readiness.
pub trait ReadinessSink<C>: Send + Sync + 'static {
    /// The connection has bytes to read, or its peer went away.
    ///
    /// `buffers` belongs to the calling thread and is used when the pass runs
    /// inline.
    fn on_readable(&self, conn: &ConnectionRef<C>, buffers: &mut BufferProvider);

    /// Wraps a freshly accepted socket.
    fn create_connection(&self, socket: TcpSocket, peer_addr: SocketAddr) -> ConnectionRef<C>;

    /// Builder for the I/O thread `number` of `divider`.
    fn io_thread_builder(&self, number: usize, divider: usize) -> thread::Builder {
        thread::Builder::new().name(format!("io-thread-{number}-of-{divider}"))
    }
}

pub trait Transport<C>: Send {
    /// Binds and starts delivering readiness to `sink`.
    fn start(&mut self, sink: Arc<dyn ReadinessSink<C>>) -> Result<(), TransportError>;

    /// Stops accepting and polling. Open connections are dropped.
    fn close(&mut self);

    fn hostname(&self) -> Option<&str>;

    fn set_hostname(&mut self, hostname: Option<String>);

    fn port(&self) -> u16;

    fn set_port(&mut self, port: u16);

    fn set_io_threads_count(&mut self, count: usize);

    /// Idle connections are closed after `ttl`, `None` keeps them forever.
    fn set_ttl(&mut self, ttl: Option<Duration>);

    fn load_certificates(&mut self, tls: TlsConfig);

    fn is_started(&self) -> bool;

    fn is_secured(&self) -> bool;

    /// The bound address, once started.
    fn local_addr(&self) -> Option<SocketAddr>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Reactor,
    Fallback,
}

impl TransportKind {
    /// The reactor where the platform has a poller and it is not disabled
    /// through [`REACTOR_DISABLED_ENV`], the fallback otherwise.
    pub fn select() -> Self {
        let flag = env::var(REACTOR_DISABLED_ENV).ok();
        Self::select_with(flag.as_deref(), cfg!(any(unix, windows)))
    }

    pub fn select_with(disabled_flag: Option<&str>, reactor_supported: bool) -> Self {
        let disabled = disabled_flag.is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));
        if reactor_supported && !disabled { TransportKind::Reactor } else { TransportKind::Fallback }
    }

    pub fn create<C: Connection>(self) -> Box<dyn Transport<C>> {
        match self {
            TransportKind::Reactor => Box::new(ReactorTransport::new()),
            TransportKind::Fallback => Box::new(FallbackTransport::new()),
        }
    }
}

/// Settings both transports carry until started.
#[derive(Debug)]
struct TransportSettings {
    hostname: Option<String>,
    port: u16,
    io_threads: usize,
    ttl: Option<Duration>,
    tls: Option<TlsConfig>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self { hostname: None, port: 0, io_threads: 1, ttl: None, tls: None }
    }
}

impl TransportSettings {
    fn bind_addr(&self) -> Result<SocketAddr, TransportError> {
        let host = self.hostname.as_deref().unwrap_or("0.0.0.0");
        let resolve_error = |source| TransportError::Resolve { addr: format!("{host}:{}", self.port), source };
        (host, self.port)
            .to_socket_addrs()
            .map_err(resolve_error)?
            .next()
            .ok_or_else(|| resolve_error(std::io::ErrorKind::AddrNotAvailable.into()))
    }

    /// A non-blocking listener on the configured address.
    fn bind(&self) -> Result<TcpListener, TransportError> {
        let addr = self.bind_addr()?;
        let listen = || -> std::io::Result<TcpListener> {
            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
            socket.set_reuse_address(true)?;
            socket.set_nonblocking(true)?;
            socket.bind(&addr.into())?;
            socket.listen(LISTEN_BACKLOG)?;
            Ok(socket.into())
        };
        listen().map_err(|source| TransportError::Bind { addr, source })
    }
}
