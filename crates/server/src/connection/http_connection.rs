use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONNECTION, DATE, EXPECT};
use http::{HeaderValue, Request, Version};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::buffer::BufferProvider;
use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::connection::{Connection, ConnectionLimits, InputListener, InputStatus, Socket};
use crate::date::DateService;
use crate::protocol::{HttpResponse, Message, ParseError, PayloadItem, RequestHeader, SendError};

const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// An HTTP/1.x connection over a non-blocking [`Socket`].
///
/// Incoming bytes are buffered and decoded incrementally; a request becomes
/// ready once its header and complete body are available. Bytes of further
/// pipelined requests stay buffered until the current one is finished.
///
/// Responses are written straight to the socket on commit; whatever the
/// socket does not accept is kept and written by later
/// [`flush_output`](Connection::flush_output) calls, in order.
pub struct HttpConnection<S> {
    socket: S,
    peer_addr: SocketAddr,
    limits: ConnectionLimits,

    decoder: RequestDecoder,
    encoder: ResponseEncoder,
    input: BytesMut,
    /// header and body received so far of the request being decoded
    partial: Option<(RequestHeader, BytesMut)>,
    request: Option<Request<Bytes>>,
    version: Version,
    keep_alive: bool,
    /// parse failure of buffered pipelined input, reported by the next read
    deferred_error: Option<ParseError>,

    response: HttpResponse,
    output: BytesMut,
    unflushed: bool,

    input_listener: Option<Box<dyn InputListener>>,
    listener_notified: bool,

    close_on_finish_writing: bool,
    peer_closed: bool,
    closed: bool,
}

impl<S: Socket> HttpConnection<S> {
    pub fn new(socket: S, peer_addr: SocketAddr, limits: ConnectionLimits) -> Self {
        Self {
            socket,
            peer_addr,
            limits,
            decoder: RequestDecoder::with_body_limit(limits.post_body_limit),
            encoder: ResponseEncoder::new(),
            input: BytesMut::with_capacity(limits.buffer_size),
            partial: None,
            request: None,
            version: Version::HTTP_11,
            keep_alive: true,
            deferred_error: None,
            response: HttpResponse::new(),
            output: BytesMut::new(),
            unflushed: false,
            input_listener: None,
            listener_notified: false,
            close_on_finish_writing: false,
            peer_closed: false,
            closed: false,
        }
    }

    /// The request currently being handled.
    pub fn request(&self) -> Option<&Request<Bytes>> {
        self.request.as_ref()
    }

    pub fn limits(&self) -> &ConnectionLimits {
        &self.limits
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Routes further input to `listener` instead of the request parser.
    pub fn set_input_listener(&mut self, listener: impl InputListener) {
        self.input_listener = Some(Box::new(listener));
        self.listener_notified = false;
    }

    pub fn has_input_listener(&self) -> bool {
        self.input_listener.is_some()
    }

    fn parse(&mut self) -> Result<(), ParseError> {
        while self.request.is_none() {
            let Some(message) = self.decoder.decode(&mut self.input)? else {
                return Ok(());
            };

            match message {
                Message::Header((header, payload_size)) => {
                    trace!(method = %header.method(), uri = %header.uri(), "decoded request header");
                    self.version = header.version();
                    self.keep_alive = header.is_keep_alive();
                    if !payload_size.is_empty() && expects_continue(&header) {
                        self.send_continue();
                    }
                    self.partial = Some((header, BytesMut::new()));
                }
                Message::Payload(PayloadItem::Chunk(bytes)) => {
                    if let Some((_, body)) = self.partial.as_mut() {
                        body.extend_from_slice(&bytes);
                    }
                }
                Message::Payload(PayloadItem::Eof) => {
                    if let Some((header, body)) = self.partial.take() {
                        self.request = Some(header.body(body.freeze()));
                    }
                }
            }
        }
        Ok(())
    }

    fn send_continue(&mut self) {
        self.output.extend_from_slice(CONTINUE_RESPONSE);
        match write_some(&mut self.socket, &self.output) {
            Ok(written) => {
                self.output.advance(written);
                debug!(peer = %self.peer_addr, "sent 100 continue");
            }
            Err(e) => warn!(cause = %e, peer = %self.peer_addr, "failed to send 100 continue"),
        }
    }

    fn awaits_async_response(&self) -> bool {
        self.response.is_async() && !self.response.is_committed()
    }

    fn pump_listener(&mut self, listener: &mut dyn InputListener, buffers: &mut BufferProvider) -> InputStatus {
        // what follows a completing chunk stays buffered for the parser
        let frame = self.limits.websocket_frame_length_limit.max(1);
        while !self.input.is_empty() {
            let chunk = self.input.split_to(frame.min(self.input.len()));
            if listener.on_data(&chunk) == InputStatus::Complete {
                return InputStatus::Complete;
            }
        }

        let size = self.limits.buffer_size.min(self.limits.websocket_frame_length_limit).max(1);
        loop {
            match self.read(size, buffers) {
                Ok([]) if self.peer_closed => {
                    listener.on_eof();
                    return InputStatus::Complete;
                }
                Ok([]) => return InputStatus::Continue,
                Ok(bytes) => {
                    if listener.on_data(bytes) == InputStatus::Complete {
                        return InputStatus::Complete;
                    }
                }
                Err(e) => {
                    warn!(cause = %e, peer = %self.peer_addr, "input listener read failed");
                    listener.on_eof();
                    return InputStatus::Complete;
                }
            }
        }
    }
}

impl<S: Socket> Connection for HttpConnection<S> {
    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn buffer_size(&self) -> usize {
        self.limits.buffer_size
    }

    fn read<'b>(&mut self, size: usize, buffers: &'b mut BufferProvider) -> Result<&'b [u8], ParseError> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }
        if self.closed || self.peer_closed {
            return Ok(&[]);
        }

        let buf = buffers.buffer(size);
        let n = loop {
            match self.socket.read(buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(&[]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(ParseError::io(e)),
            }
        };

        if n == 0 {
            debug!(peer = %self.peer_addr, "peer closed connection");
            self.peer_closed = true;
            self.close_on_finish_writing = true;
            return Ok(&[]);
        }
        Ok(&buf[..n])
    }

    fn feed(&mut self, bytes: &[u8]) -> Result<bool, ParseError> {
        self.input.extend_from_slice(bytes);
        self.parse()?;
        Ok(self.request.is_some())
    }

    fn is_request_ready(&self) -> bool {
        self.request.is_some()
    }

    fn response(&self) -> &HttpResponse {
        &self.response
    }

    fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    fn commit_response(&mut self, buffers: &mut BufferProvider) -> Result<(), SendError> {
        let Some((mut head, body)) = self.response.take_for_commit() else {
            return Err(SendError::AlreadyCommitted);
        };

        *head.version_mut() = if self.version == Version::HTTP_10 { Version::HTTP_10 } else { Version::HTTP_11 };
        let headers = head.headers_mut();
        let close_requested = headers.get_all(CONNECTION).iter().any(|value| value.as_bytes().eq_ignore_ascii_case(b"close"));
        if close_requested || !self.keep_alive || self.close_on_finish_writing {
            self.close_on_finish_writing = true;
            if !close_requested {
                headers.insert(CONNECTION, HeaderValue::from_static("close"));
            }
        } else if self.version == Version::HTTP_10 {
            headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }
        if !headers.contains_key(DATE) {
            headers.insert(DATE, DateService::get_global_instance().http_date());
        }

        let scratch = buffers.scratch();
        self.encoder.encode((head, body), scratch)?;
        trace!(peer = %self.peer_addr, size = scratch.len(), "encoded response");

        if self.output.is_empty() {
            let written = write_some(&mut self.socket, scratch).inspect_err(|_| self.closed = true)?;
            scratch.advance(written);
        }
        self.output.extend_from_slice(scratch);
        self.unflushed = true;
        Ok(())
    }

    fn process_input_listener(&mut self, buffers: &mut BufferProvider) -> bool {
        let Some(mut listener) = self.input_listener.take() else {
            return false;
        };

        match self.pump_listener(listener.as_mut(), buffers) {
            InputStatus::Continue => {
                self.input_listener = Some(listener);
                true
            }
            InputStatus::Complete => {
                self.listener_notified = false;
                false
            }
        }
    }

    fn notify_input_listener(&mut self) {
        if self.listener_notified {
            return;
        }
        if let Some(listener) = self.input_listener.as_mut() {
            listener.on_ready();
            self.listener_notified = true;
        }
    }

    fn set_close_on_finish_writing(&mut self, close: bool) {
        self.close_on_finish_writing = close;
    }

    fn is_close_on_finish_writing(&self) -> bool {
        self.close_on_finish_writing
    }

    fn flush_output(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }

        match write_some(&mut self.socket, &self.output) {
            Ok(written) => self.output.advance(written),
            Err(e) => {
                self.close();
                return Err(e);
            }
        }
        if !self.output.is_empty() {
            return Ok(());
        }

        if self.unflushed {
            self.socket.flush()?;
            self.unflushed = false;
        }
        if self.close_on_finish_writing && !self.awaits_async_response() {
            self.close();
        }
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        !self.closed && !self.output.is_empty()
    }

    fn on_finishing_handling(&mut self) -> bool {
        if self.closed || self.close_on_finish_writing || !self.response.is_committed() {
            return false;
        }

        self.response.reset();
        self.request = None;
        if self.input_listener.is_some() {
            return false;
        }

        if let Err(e) = self.parse() {
            debug!(cause = %e, peer = %self.peer_addr, "buffered pipelined input is malformed");
            self.deferred_error = Some(e);
        }
        true
    }

    fn is_ready_to_read(&self) -> bool {
        !self.closed && !self.close_on_finish_writing && self.request.is_none() && self.input_listener.is_none()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.socket.shutdown() {
            debug!(cause = %e, peer = %self.peer_addr, "socket shutdown failed");
        }
        self.output.clear();
        self.closed = true;
    }
}

impl<S> fmt::Debug for HttpConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection")
            .field("peer_addr", &self.peer_addr)
            .field("request_ready", &self.request.is_some())
            .field("pending_output", &self.output.len())
            .field("close_on_finish_writing", &self.close_on_finish_writing)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn expects_continue(header: &RequestHeader) -> bool {
    header.headers().get(EXPECT).is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
}

/// Writes as much of `buf` as the socket accepts without blocking.
fn write_some<W: io::Write>(socket: &mut W, buf: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        match socket.write(&buf[written..]) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}
