//! The per-connection state machine.
//!
//! One pass over a connection goes
//!
//! ```text
//! read -> parse -> handle -> suspended
//!                         -> commit -> next pipelined request (handle again)
//!                                   -> idle, or closed after the final flush
//! ```
//!
//! Passes are claimed through the connection's [`ConnectionRef`] latch, run
//! either inline on the thread that saw the readiness or on a worker, and
//! never overlap for one connection.

use std::any::Any;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use http::header::CONNECTION;
use http::{HeaderValue, StatusCode};
use once_cell::sync::OnceCell;
use tracing::{debug, error, trace, warn};

use crate::buffer::BufferProvider;
use crate::connection::{Connection, ConnectionLimits, TcpSocket};
use crate::dispatch::{Completion, ConnectionRef, DispatchQueue, Job};
use crate::handler::{ErrorHandler, Exchange, Handler};
use crate::mime::MimeProvider;
use crate::protocol::{ParseError, SendError};
use crate::server::DispatchError;
use crate::session::SessionStore;
use crate::transport::ReadinessSink;

thread_local! {
    static RESUME_BUFFERS: RefCell<BufferProvider> = RefCell::new(BufferProvider::new());
}

/// Builds the connection for an accepted socket.
pub type ConnectionFactory<C> = dyn Fn(TcpSocket, SocketAddr, &ConnectionLimits) -> C + Send + Sync;

/// Builds the thread for I/O thread `number` of `divider`.
pub type IoThreadFactory = dyn Fn(usize, usize) -> thread::Builder + Send + Sync;

/// Everything a processor is assembled from when the server starts.
pub(crate) struct ProcessorParts<C> {
    pub(crate) handler: Arc<dyn Handler<C>>,
    pub(crate) error_handler: Arc<dyn ErrorHandler<C>>,
    pub(crate) factory: Arc<ConnectionFactory<C>>,
    pub(crate) io_thread_factory: Option<Arc<IoThreadFactory>>,
    pub(crate) queue: Option<Arc<DispatchQueue<C>>>,
    pub(crate) limits: ConnectionLimits,
    pub(crate) pipeline_budget: usize,
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) context: Option<String>,
    pub(crate) mime: Arc<OnceCell<MimeProvider>>,
}

pub(crate) struct Processor<C> {
    me: Weak<Processor<C>>,
    handler: Arc<dyn Handler<C>>,
    error_handler: Arc<dyn ErrorHandler<C>>,
    factory: Arc<ConnectionFactory<C>>,
    io_thread_factory: Option<Arc<IoThreadFactory>>,
    /// `None` when passes run inline
    queue: Option<Arc<DispatchQueue<C>>>,
    limits: ConnectionLimits,
    pipeline_budget: usize,
    sessions: Arc<SessionStore>,
    context: Option<String>,
    mime: Arc<OnceCell<MimeProvider>>,
    next_id: AtomicU64,
}

impl<C: Connection> Processor<C> {
    pub(crate) fn new(parts: ProcessorParts<C>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: Weak::clone(me),
            handler: parts.handler,
            error_handler: parts.error_handler,
            factory: parts.factory,
            io_thread_factory: parts.io_thread_factory,
            queue: parts.queue,
            limits: parts.limits,
            pipeline_budget: parts.pipeline_budget.max(1),
            sessions: parts.sessions,
            context: parts.context,
            mime: parts.mime,
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn downgrade(&self) -> Weak<Self> {
        Weak::clone(&self.me)
    }

    pub(crate) fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub(crate) fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub(crate) fn mime(&self) -> &MimeProvider {
        self.mime.get_or_init(MimeProvider::new)
    }

    /// Entry point for readiness: runs the pass inline, or queues it unless
    /// the queue is over its limit.
    pub(crate) fn dispatch(&self, conn_ref: &ConnectionRef<C>, buffers: &mut BufferProvider) {
        if !conn_ref.schedule() {
            trace!(connection = conn_ref.id(), "pass already in flight");
            return;
        }

        let Some(queue) = &self.queue else {
            self.run_pass(conn_ref, buffers);
            return;
        };

        if let Err(rejected) = queue.offer(conn_ref.clone()) {
            self.reject(&rejected, queue.len(), buffers);
        }
    }

    /// Schedules the pass applying a resume completion.
    ///
    /// Without a worker pool the pass runs right away on the resuming thread,
    /// with buffers kept per thread for further resumes.
    pub(crate) fn resume(&self, conn_ref: &ConnectionRef<C>) {
        if !conn_ref.schedule() {
            // the pass in flight goes around once more and picks it up
            return;
        }
        match &self.queue {
            Some(queue) => queue.push(Job::Pass(conn_ref.clone())),
            None => RESUME_BUFFERS.with(|buffers| match buffers.try_borrow_mut() {
                Ok(mut buffers) => self.run_pass(conn_ref, &mut buffers),
                // resumed from within a completion
                Err(_) => self.run_pass(conn_ref, &mut BufferProvider::new()),
            }),
        }
    }

    /// Runs passes until the connection is released, or hands it back to the
    /// queue once it used up its pipeline budget.
    pub(crate) fn run_pass(&self, conn_ref: &ConnectionRef<C>, buffers: &mut BufferProvider) {
        loop {
            let yielded = {
                let mut connection = conn_ref.lock();
                let yielded = self.process(conn_ref, &mut *connection, buffers);
                conn_ref.record_state(connection.is_closed(), is_suspended(&*connection));
                yielded
            };

            if yielded {
                if let Some(queue) = &self.queue {
                    trace!(connection = conn_ref.id(), "pipeline budget used up, requeue");
                    queue.push(Job::Pass(conn_ref.clone()));
                    return;
                }
                continue;
            }

            if !conn_ref.release() {
                return;
            }
        }
    }

    /// One pass. Returns `true` when the pipeline budget ran out with a
    /// request still ready.
    fn process(&self, conn_ref: &ConnectionRef<C>, connection: &mut C, buffers: &mut BufferProvider) -> bool {
        if connection.has_pending_output()
            && let Err(e) = connection.flush_output()
        {
            debug!(cause = %e, peer = %connection.peer_addr(), "can't flush pending output");
        }

        let mut ready = match conn_ref.take_completion() {
            Some(completion) => self.complete(conn_ref, connection, completion, buffers),
            None if is_suspended(connection) => {
                // the request stays with the handler until it resumes
                connection.process_input_listener(buffers);
                false
            }
            None if connection.is_request_ready() => true,
            None => self.check_data(connection, buffers),
        };

        let mut handled = 0;
        while ready {
            if handled == self.pipeline_budget {
                return true;
            }
            handled += 1;
            ready = self.process_connection(conn_ref, connection, buffers);
        }

        if connection.is_close_on_finish_writing()
            && !connection.is_closed()
            && let Err(e) = connection.flush_output()
        {
            debug!(cause = %e, peer = %connection.peer_addr(), "final flush failed");
        }
        false
    }

    /// Reads what is available and reports whether a request is ready.
    fn check_data(&self, connection: &mut C, buffers: &mut BufferProvider) -> bool {
        if connection.process_input_listener(buffers) {
            return false;
        }

        match read_request(connection, buffers) {
            Ok(()) => connection.is_request_ready(),
            Err(e) => {
                let status = e.status().unwrap_or(StatusCode::BAD_REQUEST);
                warn!(cause = %e, %status, peer = %connection.peer_addr(), "can't read request, closing connection");
                close_connection(connection, status, buffers);
                false
            }
        }
    }

    fn process_connection(&self, conn_ref: &ConnectionRef<C>, connection: &mut C, buffers: &mut BufferProvider) -> bool {
        let result = {
            let mut exchange = Exchange::new(&mut *connection, conn_ref, self);
            guard(|| self.handler.handle(&mut exchange))
        };
        self.after_handle(connection, result, buffers)
    }

    /// Applies a resume completion to a suspended response.
    fn complete(&self, conn_ref: &ConnectionRef<C>, connection: &mut C, completion: Completion<C>, buffers: &mut BufferProvider) -> bool {
        let response = connection.response();
        if connection.is_closed() || !response.is_async() || response.is_committed() {
            debug!(connection = conn_ref.id(), "response is not suspended, completion dropped");
            return !connection.is_closed() && self.check_data(connection, buffers);
        }

        connection.response_mut().set_async(false);
        let result = guard(|| {
            completion(&mut *connection);
            Ok(())
        });
        self.after_handle(connection, result, buffers)
    }

    fn after_handle(&self, connection: &mut C, result: Result<(), DispatchError>, buffers: &mut BufferProvider) -> bool {
        match result {
            Ok(()) if connection.response().is_async() => {
                connection.notify_input_listener();
                return false;
            }
            Ok(()) => {}
            Err(e) => {
                self.safe_on_error(connection, &e);
                if !connection.response().is_modified() {
                    connection.set_close_on_finish_writing(true);
                    return false;
                }
                connection.response_mut().set_async(false);
            }
        }
        self.finish_handling(connection, buffers)
    }

    /// Commits and flushes, then reports whether another request is ready.
    fn finish_handling(&self, connection: &mut C, buffers: &mut BufferProvider) -> bool {
        match connection.commit_response(buffers) {
            Ok(()) | Err(SendError::AlreadyCommitted) => {}
            Err(e) => {
                error!(cause = %e, peer = %connection.peer_addr(), "can't commit response");
                connection.set_close_on_finish_writing(true);
                return false;
            }
        }

        if let Err(e) = connection.flush_output() {
            warn!(cause = %e, peer = %connection.peer_addr(), "can't flush response");
            return false;
        }

        if !connection.on_finishing_handling() {
            return false;
        }

        connection.is_request_ready() || (connection.is_ready_to_read() && self.check_data(connection, buffers))
    }

    /// Drops a connection the queue had no room for.
    fn reject(&self, conn_ref: &ConnectionRef<C>, queued: usize, buffers: &mut BufferProvider) {
        {
            let mut connection = conn_ref.lock();
            self.safe_on_error(&mut *connection, &DispatchError::Overload { queued });

            let response = connection.response();
            if response.is_modified()
                && !response.is_committed()
                && let Err(e) = connection.commit_response(buffers)
            {
                debug!(cause = %e, "can't commit overload response");
            }
            connection.set_close_on_finish_writing(true);
            if let Err(e) = connection.flush_output() {
                debug!(cause = %e, "can't flush overload response");
            }
            conn_ref.record_state(connection.is_closed(), false);
        }

        // readiness that arrived meanwhile goes with the connection
        while conn_ref.release() {}
    }

    fn safe_on_error(&self, connection: &mut C, e: &DispatchError) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.error_handler.on_error(connection, e))) {
            Ok(Ok(())) => {}
            Ok(Err(cause)) => error!(%cause, error = %e, "error handler failed"),
            Err(payload) => error!(cause = panic_message(payload.as_ref()), error = %e, "error handler panicked"),
        }
    }
}

impl<C: Connection> ReadinessSink<C> for Processor<C> {
    fn on_readable(&self, conn: &ConnectionRef<C>, buffers: &mut BufferProvider) {
        self.dispatch(conn, buffers);
    }

    fn create_connection(&self, socket: TcpSocket, peer_addr: SocketAddr) -> ConnectionRef<C> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        ConnectionRef::new(id, (self.factory)(socket, peer_addr, &self.limits))
    }

    fn io_thread_builder(&self, number: usize, divider: usize) -> thread::Builder {
        match &self.io_thread_factory {
            Some(factory) => factory(number, divider),
            None => thread::Builder::new().name(format!("io-thread-{number}-of-{divider}")),
        }
    }
}

fn is_suspended<C: Connection>(connection: &C) -> bool {
    let response = connection.response();
    response.is_async() && !response.is_committed()
}

fn read_request<C: Connection>(connection: &mut C, buffers: &mut BufferProvider) -> Result<(), ParseError> {
    loop {
        let size = connection.buffer_size();
        let bytes = connection.read(size, buffers)?;
        if bytes.is_empty() || connection.feed(bytes)? {
            return Ok(());
        }
    }
}

/// Answers with `status` and closes once the answer is written.
fn close_connection<C: Connection>(connection: &mut C, status: StatusCode, buffers: &mut BufferProvider) {
    connection.response_mut().status(status).append_header(CONNECTION, HeaderValue::from_static("close"));
    if let Err(e) = connection.commit_response(buffers) {
        debug!(cause = %e, %status, "can't commit closing response");
    }
    connection.set_close_on_finish_writing(true);
}

/// Runs handler code, turning a panic into a handler error.
fn guard(f: impl FnOnce() -> Result<(), crate::handler::HandlerError>) -> Result<(), DispatchError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(DispatchError::handler),
        Err(payload) => Err(DispatchError::handler(format!("handler panicked: {}", panic_message(payload.as_ref())))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{HttpConnection, MemorySocket};
    use crate::handler::{AsyncResponse, HandlerError, LoggingErrorHandler, make_error_handler, make_handler};
    use std::sync::Mutex;
    use std::time::Duration;

    type Conn = HttpConnection<MemorySocket>;

    fn no_sockets(_: TcpSocket, _: SocketAddr, _: &ConnectionLimits) -> Conn {
        unreachable!("tests register memory connections directly")
    }

    /// Errors seen by the error handler, formatted.
    type Seen = Arc<Mutex<Vec<String>>>;

    fn processor(
        handler: impl Handler<Conn>,
        queue: Option<Arc<DispatchQueue<Conn>>>,
        pipeline_budget: usize,
    ) -> (Arc<Processor<Conn>>, Seen) {
        let seen = Seen::default();
        let recorded = Arc::clone(&seen);
        let error_handler = make_error_handler(move |conn: &mut Conn, e: &DispatchError| {
            recorded.lock().unwrap().push(e.to_string());
            LoggingErrorHandler.on_error(conn, e)
        });
        let processor = Processor::new(ProcessorParts {
            handler: Arc::new(handler),
            error_handler: Arc::new(error_handler),
            factory: Arc::new(no_sockets),
            io_thread_factory: None,
            queue,
            limits: ConnectionLimits::default(),
            pipeline_budget,
            sessions: Arc::new(SessionStore::new(Duration::from_secs(60))),
            context: Some("/app".to_owned()),
            mime: Arc::default(),
        });
        (processor, seen)
    }

    fn hello() -> impl Handler<Conn> {
        make_handler(|exchange: &mut Exchange<'_, Conn>| {
            exchange.response_mut().body("hello");
            Ok(())
        })
    }

    fn register(id: u64, socket: &MemorySocket) -> ConnectionRef<Conn> {
        register_with_limits(id, socket, ConnectionLimits::default())
    }

    fn register_with_limits(id: u64, socket: &MemorySocket, limits: ConnectionLimits) -> ConnectionRef<Conn> {
        ConnectionRef::new(id, HttpConnection::new(socket.clone(), "127.0.0.1:40000".parse().unwrap(), limits))
    }

    fn output_text(socket: &MemorySocket) -> String {
        String::from_utf8(socket.output()).unwrap()
    }

    fn take_pass(queue: &DispatchQueue<Conn>) -> ConnectionRef<Conn> {
        match queue.try_take() {
            Some(Job::Pass(conn)) => conn,
            other => panic!("expected a queued pass, got {other:?}"),
        }
    }

    const GET: &str = "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

    #[test]
    fn inline_request_is_answered_and_flushed_once() {
        let (processor, seen) = processor(hello(), None, 64);
        let socket = MemorySocket::with_input(GET);
        let conn = register(1, &socket);

        processor.dispatch(&conn, &mut BufferProvider::new());

        let text = output_text(&socket);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hello"));
        assert_eq!(socket.flush_count(), 1);
        assert!(conn.is_idle());
        assert!(!conn.is_closed());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn pipelined_requests_are_all_answered() {
        let (processor, _) = processor(hello(), None, 64);
        let socket = MemorySocket::with_input(format!("{GET}{GET}{GET}"));
        let conn = register(1, &socket);

        processor.dispatch(&conn, &mut BufferProvider::new());

        assert_eq!(output_text(&socket).matches("HTTP/1.1 200 OK").count(), 3);
        assert!(conn.is_idle());
    }

    #[test]
    fn exhausted_pipeline_budget_requeues_connection() {
        let queue = Arc::new(DispatchQueue::new(10));
        let (processor, _) = processor(hello(), Some(Arc::clone(&queue)), 1);
        let socket = MemorySocket::with_input(format!("{GET}{GET}"));
        let conn = register(1, &socket);
        let mut buffers = BufferProvider::new();

        processor.dispatch(&conn, &mut buffers);
        processor.run_pass(&take_pass(&queue), &mut buffers);
        assert_eq!(output_text(&socket).matches("HTTP/1.1 200 OK").count(), 1);
        assert!(!conn.is_idle());

        processor.run_pass(&take_pass(&queue), &mut buffers);
        assert_eq!(output_text(&socket).matches("HTTP/1.1 200 OK").count(), 2);
        assert!(conn.is_idle());
        assert!(queue.is_empty());
    }

    #[test]
    fn stalled_output_is_flushed_by_next_pass() {
        let (processor, _) = processor(hello(), None, 64);
        let socket = MemorySocket::with_input(GET);
        socket.set_write_budget(Some(16));
        let conn = register(1, &socket);

        processor.dispatch(&conn, &mut BufferProvider::new());
        assert_eq!(socket.output().len(), 16);
        assert_eq!(socket.flush_count(), 0);

        // the writable event reaches the core like a readable one
        socket.set_write_budget(None);
        processor.dispatch(&conn, &mut BufferProvider::new());
        assert!(output_text(&socket).ends_with("hello"));
        assert_eq!(socket.flush_count(), 1);
    }

    #[test]
    fn malformed_request_gets_400_and_close() {
        let (processor, _) = processor(hello(), None, 64);
        let socket = MemorySocket::with_input("\x01\x02 nonsense\r\n\r\n");
        let conn = register(1, &socket);

        processor.dispatch(&conn, &mut BufferProvider::new());

        let text = output_text(&socket);
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("connection: close\r\n"));
        assert!(socket.is_shutdown());
        assert!(conn.is_closed());
    }

    #[test]
    fn oversized_body_gets_413() {
        let (processor, _) = processor(hello(), None, 64);
        let socket = MemorySocket::with_input("POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789");
        let limits = ConnectionLimits { post_body_limit: 4, ..ConnectionLimits::default() };
        let conn = register_with_limits(1, &socket, limits);

        processor.dispatch(&conn, &mut BufferProvider::new());

        assert!(output_text(&socket).starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(socket.is_shutdown());
    }

    #[test]
    fn overload_rejects_and_closes_connection() {
        let queue = Arc::new(DispatchQueue::new(2));
        let (processor, seen) = processor(hello(), Some(Arc::clone(&queue)), 64);
        let mut buffers = BufferProvider::new();

        let sockets: Vec<_> = (0..3).map(|_| MemorySocket::with_input(GET)).collect();
        let conns: Vec<_> = sockets.iter().zip(1..).map(|(socket, id)| register(id, socket)).collect();
        for conn in &conns {
            processor.dispatch(conn, &mut buffers);
        }

        assert_eq!(queue.len(), 2);
        assert_eq!(seen.lock().unwrap().as_slice(), ["too many requests, 2 connections already waiting"]);
        assert!(sockets[2].is_shutdown());
        assert!(sockets[2].output().is_empty());
        assert!(conns[2].is_idle());
        assert!(conns[2].is_closed());

        // the accepted ones are served normally
        processor.run_pass(&take_pass(&queue), &mut buffers);
        assert!(output_text(&sockets[0]).ends_with("hello"));
    }

    type Parked = Arc<Mutex<Option<AsyncResponse<Conn>>>>;

    fn suspending(parked: &Parked, calls: &Arc<Mutex<usize>>) -> impl Handler<Conn> {
        let parked = Arc::clone(parked);
        let calls = Arc::clone(calls);
        make_handler(move |exchange: &mut Exchange<'_, Conn>| {
            *calls.lock().unwrap() += 1;
            *parked.lock().unwrap() = Some(exchange.suspend());
            Ok(())
        })
    }

    #[test]
    fn suspended_response_is_committed_once_on_resume() {
        let parked = Parked::default();
        let calls = Arc::new(Mutex::new(0));
        let (processor, _) = processor(suspending(&parked, &calls), None, 64);
        let socket = MemorySocket::with_input(GET);
        let conn = register(1, &socket);

        processor.dispatch(&conn, &mut BufferProvider::new());
        assert!(socket.output().is_empty());
        assert!(conn.is_suspended());
        assert!(conn.is_idle());

        // readiness while suspended doesn't run the handler again
        processor.dispatch(&conn, &mut BufferProvider::new());
        assert_eq!(*calls.lock().unwrap(), 1);

        let response = parked.lock().unwrap().take().unwrap();
        assert_eq!(response.connection_id(), 1);
        response.resume(|conn: &mut Conn| {
            conn.response_mut().body("later");
        });

        let text = output_text(&socket);
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 1);
        assert!(text.ends_with("later"));
        assert_eq!(socket.flush_count(), 1);
        assert!(!conn.is_suspended());
        assert!(conn.is_idle());
    }

    #[test]
    fn resume_from_within_a_completion_runs_both_passes() {
        let parked = Arc::new(Mutex::new(Vec::<AsyncResponse<Conn>>::new()));
        let parking = Arc::clone(&parked);
        let handler = make_handler(move |exchange: &mut Exchange<'_, Conn>| {
            parking.lock().unwrap().push(exchange.suspend());
            Ok(())
        });
        let (processor, _) = processor(handler, None, 64);
        let sockets = [MemorySocket::with_input(GET), MemorySocket::with_input(GET)];
        let conns = [register(1, &sockets[0]), register(2, &sockets[1])];
        let mut buffers = BufferProvider::new();
        for conn in &conns {
            processor.dispatch(conn, &mut buffers);
        }

        let mut responses = std::mem::take(&mut *parked.lock().unwrap());
        let second = responses.pop().unwrap();
        let first = responses.pop().unwrap();
        first.resume(move |conn: &mut Conn| {
            second.resume(|conn: &mut Conn| {
                conn.response_mut().body("second");
            });
            conn.response_mut().body("first");
        });

        assert!(output_text(&sockets[0]).ends_with("first"));
        assert!(output_text(&sockets[1]).ends_with("second"));
        assert!(conns.iter().all(|conn| conn.is_idle() && !conn.is_suspended()));
    }

    #[test]
    fn pooled_resume_bypasses_queue_limit() {
        let queue = Arc::new(DispatchQueue::new(1));
        let parked = Parked::default();
        let calls = Arc::new(Mutex::new(0));
        let (processor, seen) = processor(suspending(&parked, &calls), Some(Arc::clone(&queue)), 64);
        let socket = MemorySocket::with_input(GET);
        let conn = register(1, &socket);
        let mut buffers = BufferProvider::new();

        processor.dispatch(&conn, &mut buffers);
        processor.run_pass(&take_pass(&queue), &mut buffers);
        assert!(conn.is_suspended());

        let other = MemorySocket::with_input(GET);
        processor.dispatch(&register(2, &other), &mut buffers);
        assert_eq!(queue.len(), 1);

        parked.lock().unwrap().take().unwrap().resume(|conn: &mut Conn| {
            conn.response_mut().body("later");
        });
        assert_eq!(queue.len(), 2);
        assert!(seen.lock().unwrap().is_empty());

        let _ = take_pass(&queue);
        processor.run_pass(&take_pass(&queue), &mut buffers);
        assert!(output_text(&socket).ends_with("later"));
        assert!(conn.is_idle());
    }

    #[test]
    fn handler_error_gets_500() {
        let handler = make_handler(|_: &mut Exchange<'_, Conn>| -> Result<(), HandlerError> { Err("database is down".into()) });
        let (processor, seen) = processor(handler, None, 64);
        let socket = MemorySocket::with_input(GET);
        let conn = register(1, &socket);

        processor.dispatch(&conn, &mut BufferProvider::new());

        assert!(output_text(&socket).starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert_eq!(seen.lock().unwrap().as_slice(), ["handler failed: database is down"]);
        assert!(!conn.is_closed());
    }

    #[test]
    fn handler_panic_gets_500() {
        let handler = make_handler(|_: &mut Exchange<'_, Conn>| -> Result<(), HandlerError> { panic!("boom") });
        let (processor, seen) = processor(handler, None, 64);
        let socket = MemorySocket::with_input(GET);
        let conn = register(1, &socket);

        processor.dispatch(&conn, &mut BufferProvider::new());

        assert!(output_text(&socket).starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert_eq!(seen.lock().unwrap().as_slice(), ["handler failed: handler panicked: boom"]);
        assert!(conn.is_idle());
    }

    #[test]
    fn failing_error_handler_closes_connection() {
        let handler = make_handler(|_: &mut Exchange<'_, Conn>| -> Result<(), HandlerError> { Err("nope".into()) });
        let processor = Processor::new(ProcessorParts {
            handler: Arc::new(handler),
            error_handler: Arc::new(make_error_handler(|_: &mut Conn, _: &DispatchError| -> Result<(), HandlerError> {
                Err("error handler is broken too".into())
            })),
            factory: Arc::new(no_sockets),
            io_thread_factory: None,
            queue: None,
            limits: ConnectionLimits::default(),
            pipeline_budget: 64,
            sessions: Arc::new(SessionStore::new(Duration::from_secs(60))),
            context: None,
            mime: Arc::default(),
        });
        let socket = MemorySocket::with_input(GET);
        let conn = register(1, &socket);

        processor.dispatch(&conn, &mut BufferProvider::new());

        assert!(socket.output().is_empty());
        assert!(socket.is_shutdown());
        assert!(conn.is_closed());
        assert!(conn.is_idle());
    }

    #[test]
    fn exchange_exposes_server_services() {
        let handler = make_handler(|exchange: &mut Exchange<'_, Conn>| {
            let id = exchange.sessions().create();
            let mime = exchange.mime().for_path("index.html").essence_str().to_owned();
            let context = exchange.context().unwrap_or_default().to_owned();
            exchange.response_mut().body(format!("{context} {mime} {}", id.len()));
            Ok(())
        });
        let (processor, _) = processor(handler, None, 64);
        let socket = MemorySocket::with_input(GET);

        processor.dispatch(&register(1, &socket), &mut BufferProvider::new());

        assert!(output_text(&socket).ends_with("/app text/html 32"));
        assert_eq!(processor.sessions().len(), 1);
    }

    #[test]
    fn io_threads_are_named_by_default() {
        let (processor, _) = processor(hello(), None, 64);
        let builder = ReadinessSink::io_thread_builder(&*processor, 2, 4);
        let handle = builder.spawn(|| thread::current().name().map(str::to_owned)).unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("io-thread-2-of-4"));
    }
}
