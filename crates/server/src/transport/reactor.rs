//! The `mio` event loop transport.
//!
//! One acceptor thread owns the listener and deals accepted streams out
//! round-robin to the partitions. Each partition is an I/O thread with a
//! poller of its own; it registers the streams it is given, forwards their
//! readable and writable events to the sink, and sweeps out closed and
//! expired connections.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::BufferProvider;
use crate::connection::{Connection, TcpSocket};
use crate::dispatch::ConnectionRef;
use crate::ensure;
use crate::transport::{ReadinessSink, TlsConfig, Transport, TransportError, TransportSettings};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(usize::MAX);
const EVENTS_CAPACITY: usize = 1024;
/// Upper bound between two sweeps of a partition.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct ReactorTransport {
    settings: TransportSettings,
    running: Option<Running>,
}

#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    wakers: Vec<Arc<Waker>>,
    threads: Vec<JoinHandle<()>>,
}

impl Running {
    fn stop(self) {
        self.shutdown.store(true, Ordering::Release);
        for waker in &self.wakers {
            if let Err(e) = waker.wake() {
                warn!(cause = %e, "can't wake reactor thread");
            }
        }
        for thread in self.threads {
            let name = thread.thread().name().map(str::to_owned);
            if thread.join().is_err() {
                error!(thread = ?name, "reactor thread panicked");
            }
        }
    }
}

impl ReactorTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn_partitions<C: Connection>(
        &self,
        running: &mut Running,
        sink: &Arc<dyn ReadinessSink<C>>,
    ) -> Result<Vec<PartitionHandle>, TransportError> {
        let count = self.settings.io_threads.max(1);
        let mut handles = Vec::with_capacity(count);

        for number in 1..=count {
            let poll = Poll::new()?;
            let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
            let (sender, receiver) = channel::unbounded();

            let partition = Partition {
                poll,
                receiver,
                sink: Arc::clone(sink),
                connections: HashMap::new(),
                next_token: 0,
                ttl: self.settings.ttl,
                shutdown: Arc::clone(&running.shutdown),
            };
            let thread = sink
                .io_thread_builder(number, count)
                .spawn(move || partition.run())
                .map_err(|source| TransportError::Spawn { name: format!("io-thread-{number}-of-{count}"), source })?;

            running.threads.push(thread);
            running.wakers.push(Arc::clone(&waker));
            handles.push(PartitionHandle { sender, waker });
        }
        Ok(handles)
    }

    fn spawn_acceptor(&self, running: &mut Running, mut listener: TcpListener, partitions: Vec<PartitionHandle>) -> Result<(), TransportError> {
        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let acceptor = Acceptor { poll, listener, partitions, next: 0, shutdown: Arc::clone(&running.shutdown) };
        let thread = thread::Builder::new()
            .name("reactor-acceptor".into())
            .spawn(move || acceptor.run())
            .map_err(|source| TransportError::Spawn { name: "reactor-acceptor".into(), source })?;

        running.threads.push(thread);
        running.wakers.push(waker);
        Ok(())
    }
}

impl<C: Connection> Transport<C> for ReactorTransport {
    fn start(&mut self, sink: Arc<dyn ReadinessSink<C>>) -> Result<(), TransportError> {
        ensure!(self.running.is_none(), TransportError::AlreadyStarted);

        let listener = self.settings.bind()?;
        let local_addr = listener.local_addr()?;
        let listener = TcpListener::from_std(listener);

        let mut running = Running { local_addr, shutdown: Arc::new(AtomicBool::new(false)), wakers: Vec::new(), threads: Vec::new() };
        let started = self
            .spawn_partitions(&mut running, &sink)
            .and_then(|partitions| self.spawn_acceptor(&mut running, listener, partitions));
        if let Err(e) = started {
            running.stop();
            return Err(e);
        }

        info!(%local_addr, io_threads = self.settings.io_threads, secured = self.settings.tls.is_some(), "reactor transport started");
        self.running = Some(running);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop();
            info!("reactor transport closed");
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

impl Drop for ReactorTransport {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop();
        }
    }
}

/// The acceptor's end of a partition.
struct PartitionHandle {
    sender: Sender<(TcpStream, SocketAddr)>,
    waker: Arc<Waker>,
}

impl PartitionHandle {
    fn hand_over(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if self.sender.send((stream, peer_addr)).is_err() {
            warn!(%peer_addr, "partition is gone, dropping connection");
            return;
        }
        if let Err(e) = self.waker.wake() {
            warn!(cause = %e, "can't wake partition");
        }
    }
}

struct Acceptor {
    poll: Poll,
    listener: TcpListener,
    partitions: Vec<PartitionHandle>,
    next: usize,
    shutdown: Arc<AtomicBool>,
}

impl Acceptor {
    fn run(mut self) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!(cause = %e, "acceptor poll failed");
                break;
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            if events.iter().any(|event| event.token() == LISTENER) {
                self.accept();
            }
        }
        debug!("acceptor stopped");
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    trace!(%peer_addr, "accepted connection");
                    let partition = &self.partitions[self.next % self.partitions.len()];
                    self.next = self.next.wrapping_add(1);
                    partition.hand_over(stream, peer_addr);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    return;
                }
            }
        }
    }
}

struct Partition<C> {
    poll: Poll,
    receiver: Receiver<(TcpStream, SocketAddr)>,
    sink: Arc<dyn ReadinessSink<C>>,
    connections: HashMap<Token, ConnectionRef<C>>,
    next_token: usize,
    ttl: Option<Duration>,
    shutdown: Arc<AtomicBool>,
}

impl<C: Connection> Partition<C> {
    fn run(mut self) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut buffers = BufferProvider::new();
        let tick = self.ttl.map_or(SWEEP_INTERVAL, |ttl| ttl.min(SWEEP_INTERVAL));
        let mut last_sweep = Instant::now();

        loop {
            if let Err(e) = self.poll.poll(&mut events, Some(tick)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!(cause = %e, "partition poll failed");
                break;
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            for event in &events {
                match event.token() {
                    WAKER => self.register_handed_over(),
                    token => self.on_event(token, &mut buffers),
                }
            }

            if last_sweep.elapsed() >= tick {
                self.sweep();
                last_sweep = Instant::now();
            }
        }

        for conn in self.connections.values() {
            conn.lock().close();
        }
        debug!(connections = self.connections.len(), "partition stopped");
    }

    fn register_handed_over(&mut self) {
        while let Ok((mut stream, peer_addr)) = self.receiver.try_recv() {
            let token = Token(self.next_token);
            self.next_token += 1;

            if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE | Interest::WRITABLE) {
                warn!(cause = %e, %peer_addr, "can't register connection");
                continue;
            }
            let conn = self.sink.create_connection(TcpSocket::Reactor(stream), peer_addr);
            trace!(connection = conn.id(), %peer_addr, "connection registered");
            self.connections.insert(token, conn);
        }
    }

    fn on_event(&mut self, token: Token, buffers: &mut BufferProvider) {
        let Some(conn) = self.connections.get(&token) else {
            return;
        };
        self.sink.on_readable(conn, buffers);
        if conn.is_closed() {
            trace!(connection = conn.id(), "connection closed");
            self.connections.remove(&token);
        }
    }

    /// Drops closed connections and closes the ones idle for longer than the
    /// ttl. Suspended connections and those with a pass in flight are kept.
    fn sweep(&mut self) {
        let ttl = self.ttl;
        self.connections.retain(|_, conn| {
            if conn.is_closed() {
                return false;
            }
            if let Some(ttl) = ttl
                && conn.is_idle()
                && !conn.is_suspended()
                && conn.idle_for() >= ttl
                && let Some(mut connection) = conn.try_lock()
            {
                debug!(connection = conn.id(), peer = %connection.peer_addr(), "connection expired");
                connection.close();
                return false;
            }
            true
        });
    }
}
