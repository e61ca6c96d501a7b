//! Per-client connection state and the contract the dispatch core drives.
//!
//! A [`Connection`] is owned by the transport that accepted it and lent to
//! exactly one processing pass at a time. The core never touches sockets or
//! the wire format directly; it only calls the operations of this trait, in
//! this order per pass:
//!
//! 1. [`process_input_listener`](Connection::process_input_listener), then
//!    [`read`](Connection::read) / [`feed`](Connection::feed) until no more
//!    bytes are available or the parser asks to stop
//! 2. once [`is_request_ready`](Connection::is_request_ready), the handler
//!    runs and builds the [`response`](Connection::response_mut)
//! 3. [`commit_response`](Connection::commit_response),
//!    [`flush_output`](Connection::flush_output) and
//!    [`on_finishing_handling`](Connection::on_finishing_handling) before the
//!    next pipelined request
//!
//! [`HttpConnection`] is the HTTP/1.x implementation over any [`Socket`].

mod http_connection;
mod input;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod socket;

pub use http_connection::HttpConnection;
pub use input::{InputListener, InputStatus};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemorySocket;
pub use socket::{Socket, TcpSocket};

use crate::buffer::{BufferProvider, DEFAULT_READ_BUFFER_SIZE};
use crate::protocol::{HttpResponse, ParseError, SendError};
use std::io;
use std::net::SocketAddr;

/// Size limits a connection enforces, taken from the server configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// bytes asked for by a single socket read
    pub buffer_size: usize,
    pub post_body_limit: u64,
    pub websocket_frame_length_limit: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self { buffer_size: DEFAULT_READ_BUFFER_SIZE, post_body_limit: 2 * 1024 * 1024, websocket_frame_length_limit: 64 * 1024 }
    }
}

pub trait Connection: Send + 'static {
    fn peer_addr(&self) -> SocketAddr;

    /// Preferred size of a single read.
    fn buffer_size(&self) -> usize;

    /// Reads what the socket has right now into a buffer of `buffers`.
    ///
    /// An empty slice means nothing is available at the moment, or the peer
    /// closed its side (the connection then marks itself to close).
    fn read<'b>(&mut self, size: usize, buffers: &'b mut BufferProvider) -> Result<&'b [u8], ParseError>;

    /// Feeds read bytes to the incremental parser.
    ///
    /// Returns `true` when reading should stop early for this pass, typically
    /// because a complete request is available.
    fn feed(&mut self, bytes: &[u8]) -> Result<bool, ParseError>;

    fn is_request_ready(&self) -> bool;

    fn response(&self) -> &HttpResponse;

    fn response_mut(&mut self) -> &mut HttpResponse;

    /// Serializes the response into the output. A response is committed at
    /// most once per request, a second commit fails with
    /// [`SendError::AlreadyCommitted`].
    fn commit_response(&mut self, buffers: &mut BufferProvider) -> Result<(), SendError>;

    /// Lets a pending input listener consume incoming bytes first.
    ///
    /// Returns `true` while the listener stays attached, the pass then ends
    /// without parsing.
    fn process_input_listener(&mut self, buffers: &mut BufferProvider) -> bool;

    /// Tells a newly attached input listener that it may start.
    fn notify_input_listener(&mut self);

    fn set_close_on_finish_writing(&mut self, close: bool);

    fn is_close_on_finish_writing(&self) -> bool;

    /// Writes pending output. When everything is written and the connection
    /// is marked to close, the socket is shut down.
    fn flush_output(&mut self) -> io::Result<()>;

    /// Whether committed output is still waiting for the socket to accept it.
    fn has_pending_output(&self) -> bool;

    /// Prepares for the next request once the current one is committed.
    ///
    /// Returns `false` when handling can't be considered finished, e.g. the
    /// response is still pending or the connection is closing.
    fn on_finishing_handling(&mut self) -> bool;

    fn is_ready_to_read(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// Closes the socket immediately, dropping pending output.
    fn close(&mut self);
}
