//! The connection dispatch core of an embedded HTTP server.
//!
//! Connections are accepted by a transport, driven through a non-blocking
//! read / parse / handle / respond cycle, and spread over a fixed pool of
//! worker threads with an explicit backpressure limit.
//!
//! # Example
//!
//! ```no_run
//! use micro_server::connection::{Connection, HttpConnection, TcpSocket};
//! use micro_server::handler::{Exchange, make_handler};
//! use micro_server::server::HttpServer;
//! use http::header::CONTENT_TYPE;
//! use http::HeaderValue;
//!
//! let server = HttpServer::builder()
//!     .handler(make_handler(|exchange: &mut Exchange<'_, HttpConnection<TcpSocket>>| {
//!         let path = exchange.request().map(|request| request.uri().path().to_owned()).unwrap_or_default();
//!         exchange
//!             .response_mut()
//!             .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
//!             .body(format!("hello from {path}\r\n"));
//!         Ok(())
//!     }))
//!     .build()?;
//!
//! server.set_port(8080)?;
//! server.set_workers(4)?;
//! server.start()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! - [`transport`]: accepts connections and reports readiness, either from a
//!   `mio` reactor or from the portable `tokio` based fallback
//! - [`dispatch`]: the per-connection scheduling latch, the dispatch queue and
//!   the worker threads
//! - [`server`]: configuration, lifecycle and the per-connection state
//!   machine
//! - [`connection`]: the contract the state machine drives and its HTTP/1.x
//!   implementation
//! - [`handler`]: request and error handler traits, suspension of responses
//! - [`codec`] and [`protocol`]: the wire format
//!
//! # Processing a connection
//!
//! A readiness signal claims a pass over the connection. Without workers the
//! pass runs right away on the transport thread; with workers the connection
//! is queued, or rejected when the queue is full. A pass reads what is
//! available, hands every complete request to the handler, commits and flushes
//! the response, and goes on with pipelined requests until no complete
//! request is left, the handler suspends the response or the connection
//! closes. Passes over one connection never overlap.
//!
//! Malformed input closes the connection with the status the parser reports,
//! `400 Bad Request` when it reports none.

pub mod buffer;
pub mod codec;
pub mod connection;
pub mod date;
pub mod dispatch;
pub mod handler;
pub mod logging;
pub mod mime;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

mod utils;
pub(crate) use utils::ensure;
