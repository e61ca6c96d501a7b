//! Request handling seams of the server.
//!
//! The server is wired with two values: a [`Handler`] answering every ready
//! request, and an [`ErrorHandler`] told about everything that goes wrong
//! around it. Both are plain traits, closures can be adapted with
//! [`make_handler`] and [`make_error_handler`].
//!
//! A handler sees the connection through an [`Exchange`]. To answer later,
//! outside of the current pass, it calls [`Exchange::suspend`] and keeps the
//! returned [`AsyncResponse`] until the answer is known.

use std::error::Error;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Weak;

use http::StatusCode;
use tracing::{error, warn};

use crate::connection::Connection;
use crate::dispatch::ConnectionRef;
use crate::mime::MimeProvider;
use crate::server::{DispatchError, Processor};
use crate::session::SessionStore;

pub type HandlerError = Box<dyn Error + Send + Sync>;

pub trait Handler<C>: Send + Sync + 'static {
    /// Answers the ready request of the connection by filling its response.
    fn handle(&self, exchange: &mut Exchange<'_, C>) -> Result<(), HandlerError>;
}

/// Receives processing and overload errors.
///
/// A failure returned from here is logged and otherwise ignored.
pub trait ErrorHandler<C>: Send + Sync + 'static {
    fn on_error(&self, connection: &mut C, error: &DispatchError) -> Result<(), HandlerError>;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<C, F> Handler<C> for HandlerFn<F>
where
    F: Fn(&mut Exchange<'_, C>) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, exchange: &mut Exchange<'_, C>) -> Result<(), HandlerError> {
        (self.f)(exchange)
    }
}

pub fn make_handler<C, F>(f: F) -> HandlerFn<F>
where
    F: Fn(&mut Exchange<'_, C>) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    HandlerFn { f }
}

#[derive(Debug)]
pub struct ErrorHandlerFn<F> {
    f: F,
}

impl<C, F> ErrorHandler<C> for ErrorHandlerFn<F>
where
    F: Fn(&mut C, &DispatchError) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn on_error(&self, connection: &mut C, error: &DispatchError) -> Result<(), HandlerError> {
        (self.f)(connection, error)
    }
}

pub fn make_error_handler<C, F>(f: F) -> ErrorHandlerFn<F>
where
    F: Fn(&mut C, &DispatchError) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    ErrorHandlerFn { f }
}

/// Logs every error. A failed handler gets a `500 Internal Server Error`
/// response, an overloaded connection is dropped without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHandler;

impl<C: Connection> ErrorHandler<C> for LoggingErrorHandler {
    fn on_error(&self, connection: &mut C, error: &DispatchError) -> Result<(), HandlerError> {
        match error {
            DispatchError::Overload { queued } => {
                warn!(peer = %connection.peer_addr(), queued, "too many requests, dropping connection");
            }
            DispatchError::Handler { source } => {
                error!(peer = %connection.peer_addr(), cause = %source, "handler failed");
                connection.response_mut().status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
        Ok(())
    }
}

/// A handler's view of the connection whose request is ready.
///
/// Dereferences to the connection itself.
pub struct Exchange<'a, C> {
    connection: &'a mut C,
    conn_ref: &'a ConnectionRef<C>,
    processor: &'a Processor<C>,
}

impl<'a, C: Connection> Exchange<'a, C> {
    pub(crate) fn new(connection: &'a mut C, conn_ref: &'a ConnectionRef<C>, processor: &'a Processor<C>) -> Self {
        Self { connection, conn_ref, processor }
    }

    pub fn connection(&mut self) -> &mut C {
        self.connection
    }

    /// Marks the response asynchronous: the current pass ends without
    /// committing it, and the returned handle completes it later.
    pub fn suspend(&mut self) -> AsyncResponse<C> {
        self.connection.response_mut().set_async(true);
        AsyncResponse { conn_ref: self.conn_ref.clone(), processor: self.processor.downgrade() }
    }

    pub fn sessions(&self) -> &SessionStore {
        self.processor.sessions()
    }

    /// The application base path.
    pub fn context(&self) -> Option<&str> {
        self.processor.context()
    }

    pub fn mime(&self) -> &MimeProvider {
        self.processor.mime()
    }
}

impl<C> Deref for Exchange<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.connection
    }
}

impl<C> DerefMut for Exchange<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.connection
    }
}

impl<C> fmt::Debug for Exchange<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange").field("connection", &self.conn_ref).finish_non_exhaustive()
    }
}

/// Handle to a suspended response.
///
/// It can be sent to any thread. [`resume`](AsyncResponse::resume) applies the
/// completion in a new pass over the connection, which never overlaps with
/// another pass, and commits the response exactly once.
pub struct AsyncResponse<C> {
    conn_ref: ConnectionRef<C>,
    processor: Weak<Processor<C>>,
}

impl<C: Connection> AsyncResponse<C> {
    pub fn connection_id(&self) -> u64 {
        self.conn_ref.id()
    }

    /// Completes the response with `f` and sends it.
    ///
    /// With pooled workers the pass is queued, bypassing the queue limit,
    /// otherwise it runs on the calling thread.
    pub fn resume<F>(self, f: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let Some(processor) = self.processor.upgrade() else {
            warn!(connection = self.conn_ref.id(), "server is gone, dropping async response");
            return;
        };
        self.conn_ref.set_completion(Box::new(f));
        processor.resume(&self.conn_ref);
    }
}

impl<C> fmt::Debug for AsyncResponse<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResponse").field("connection", &self.conn_ref).finish_non_exhaustive()
    }
}
