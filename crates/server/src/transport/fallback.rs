//! The portable transport, built on a `tokio` runtime.
//!
//! Every accepted connection gets a task that waits for the socket to become
//! readable (or writable, while output is pending) and then calls the sink
//! directly. The connection itself reads and writes through a duplicate of the
//! socket handle, so the task only ever observes readiness. Passes run
//! elsewhere, such as a resume, wake the task so it picks up output they
//! could not write.

use std::future;
use std::io;
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::SockRef;
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::BufferProvider;
use crate::connection::{Connection, TcpSocket};
use crate::dispatch::ConnectionRef;
use crate::ensure;
use crate::transport::{ReadinessSink, TlsConfig, Transport, TransportError, TransportSettings};

#[derive(Debug, Default)]
pub struct FallbackTransport {
    settings: TransportSettings,
    running: Option<Running>,
}

#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    thread: JoinHandle<()>,
}

impl Running {
    fn stop(self) {
        self.cancel.cancel();
        if self.thread.join().is_err() {
            error!("fallback transport thread panicked");
        }
    }
}

impl FallbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn runtime(&self) -> Result<Runtime, TransportError> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.settings.io_threads.max(1))
            .thread_name("fallback-io")
            .enable_all()
            .build()
            .map_err(|source| TransportError::Runtime { source })
    }
}

impl<C: Connection> Transport<C> for FallbackTransport {
    fn start(&mut self, sink: Arc<dyn ReadinessSink<C>>) -> Result<(), TransportError> {
        ensure!(self.running.is_none(), TransportError::AlreadyStarted);

        let listener = self.settings.bind()?;
        let local_addr = listener.local_addr()?;
        let runtime = self.runtime()?;
        let cancel = CancellationToken::new();

        let ttl = self.settings.ttl;
        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name("fallback-acceptor".into())
            .spawn(move || {
                runtime.block_on(async move {
                    match TcpListener::from_std(listener) {
                        Ok(listener) => accept_loop(listener, sink, ttl, token).await,
                        Err(e) => error!(cause = %e, "can't register listener"),
                    }
                });
            })
            .map_err(|source| TransportError::Spawn { name: "fallback-acceptor".into(), source })?;

        info!(%local_addr, io_threads = self.settings.io_threads, secured = self.settings.tls.is_some(), "fallback transport started");
        self.running = Some(Running { local_addr, cancel, thread });
        Ok(())
    }

    fn close(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop();
            info!("fallback transport closed");
        }
    }

    fn hostname(&self) -> Option<&str> {
        self.settings.hostname.as_deref()
    }

    fn set_hostname(&mut self, hostname: Option<String>) {
        self.settings.hostname = hostname;
    }

    fn port(&self) -> u16 {
        self.settings.port
    }

    fn set_port(&mut self, port: u16) {
        self.settings.port = port;
    }

    fn set_io_threads_count(&mut self, count: usize) {
        self.settings.io_threads = count;
    }

    fn set_ttl(&mut self, ttl: Option<Duration>) {
        self.settings.ttl = ttl;
    }

    fn load_certificates(&mut self, tls: TlsConfig) {
        self.settings.tls = Some(tls);
    }

    fn is_started(&self) -> bool {
        self.running.is_some()
    }

    fn is_secured(&self) -> bool {
        self.settings.tls.is_some()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }
}

impl Drop for FallbackTransport {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop();
        }
    }
}

async fn accept_loop<C: Connection>(
    listener: TcpListener,
    sink: Arc<dyn ReadinessSink<C>>,
    ttl: Option<Duration>,
    cancel: CancellationToken,
) {
    let tracker = TaskTracker::new();
    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer_addr)) => {
                trace!(%peer_addr, "accepted connection");
                tracker.spawn(watch(stream, peer_addr, Arc::clone(&sink), ttl, cancel.child_token()));
            }
            Err(e) => warn!(cause = %e, "failed to accept"),
        }
    }

    tracker.close();
    tracker.wait().await;
    debug!("fallback acceptor stopped");
}

/// Watches one connection until it is closed or the transport stops.
async fn watch<C: Connection>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    sink: Arc<dyn ReadinessSink<C>>,
    ttl: Option<Duration>,
    cancel: CancellationToken,
) {
    let socket = match SockRef::from(&stream).try_clone() {
        Ok(socket) => TcpSocket::Fallback(socket.into()),
        Err(e) => {
            warn!(cause = %e, %peer_addr, "can't duplicate socket");
            return;
        }
    };
    let conn = sink.create_connection(socket, peer_addr);
    let mut buffers = BufferProvider::new();

    while !conn.is_closed() {
        // taken before the interest, so a pass ending in between still wakes us
        let passed = conn.idle_notified();
        let interest = if conn.lock().has_pending_output() { Interest::READABLE | Interest::WRITABLE } else { Interest::READABLE };

        tokio::select! {
            () = cancel.cancelled() => break,
            // a resume ran elsewhere and may have left output behind
            () = passed => continue,
            () = expiry(&conn, ttl) => {
                if expired(&conn, ttl) {
                    debug!(connection = conn.id(), %peer_addr, "connection expired");
                    conn.lock().close();
                    break;
                }
                continue;
            }
            ready = stream.ready(interest) => {
                if let Err(e) = ready {
                    debug!(cause = %e, %peer_addr, "connection failed");
                    conn.lock().close();
                    break;
                }
            }
        }

        tokio::task::block_in_place(|| sink.on_readable(&conn, &mut buffers));

        // a pooled pass may still be running
        if !wait_while(&conn, &cancel, || !conn.is_idle()).await {
            break;
        }
        if conn.lock().has_pending_output() {
            clear_writable(&stream);
        }
        // input left while suspended is for the handler once it resumes
        if has_unread(&stream) && conn.is_suspended() && !wait_while(&conn, &cancel, || conn.is_suspended()).await {
            break;
        }
    }

    if cancel.is_cancelled() {
        conn.lock().close();
    }
    trace!(connection = conn.id(), %peer_addr, "connection task finished");
}

/// Waits until `busy` turns false, re-checked whenever the connection goes
/// idle. Returns `false` when cancelled first.
async fn wait_while<C>(conn: &ConnectionRef<C>, cancel: &CancellationToken, busy: impl Fn() -> bool) -> bool {
    loop {
        let idle = conn.idle_notified();
        if !busy() {
            return true;
        }
        tokio::select! {
            () = cancel.cancelled() => return false,
            () = idle => {}
        }
    }
}

/// Whether bytes or an end of stream wait to be read. Clears the cached read
/// readiness when the socket has nothing.
fn has_unread(stream: &TcpStream) -> bool {
    let mut probe = [MaybeUninit::<u8>::uninit()];
    stream.try_io(Interest::READABLE, || SockRef::from(stream).peek(&mut probe)).is_ok()
}

/// The connection's own write just stalled, forget the cached write readiness.
fn clear_writable(stream: &TcpStream) {
    let _ = stream.try_io(Interest::WRITABLE, || Err::<(), _>(io::ErrorKind::WouldBlock.into()));
}

async fn expiry<C>(conn: &ConnectionRef<C>, ttl: Option<Duration>) {
    let Some(ttl) = ttl else {
        return future::pending().await;
    };
    let left = if conn.is_idle() && !conn.is_suspended() { ttl.saturating_sub(conn.idle_for()) } else { ttl };
    tokio::time::sleep(left).await;
}

fn expired<C>(conn: &ConnectionRef<C>, ttl: Option<Duration>) -> bool {
    ttl.is_some_and(|ttl| conn.is_idle() && !conn.is_suspended() && conn.idle_for() >= ttl)
}
