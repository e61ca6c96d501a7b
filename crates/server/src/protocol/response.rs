//! HTTP response handling implementation.
//!
//! [`ResponseHead`] is the header portion of a response, `http::Response<()>`,
//! as it goes through the encoder. [`HttpResponse`] is the response being built
//! by a handler for the request currently owned by a connection: it records
//! whether the handler suspended it and whether it was already committed, so
//! the dispatch core can guarantee a single commit per request.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Response, StatusCode, Version};

/// Type alias for HTTP response headers.
pub type ResponseHead = Response<()>;

/// The response in progress for the current request of a connection.
#[derive(Debug)]
pub struct HttpResponse {
    head: ResponseHead,
    body: Bytes,
    is_async: bool,
    committed: bool,
    modified: bool,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self { head: ResponseHead::default(), body: Bytes::new(), is_async: false, committed: false, modified: false }
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        *self.head.status_mut() = status;
        self.modified = true;
        self
    }

    pub fn version(&mut self, version: Version) -> &mut Self {
        *self.head.version_mut() = version;
        self
    }

    /// Sets a header, replacing any previous values with the same name.
    pub fn header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.head.headers_mut().insert(name, value);
        self.modified = true;
        self
    }

    /// Appends a header value, keeping previous values with the same name.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.head.headers_mut().append(name, value);
        self.modified = true;
        self
    }

    pub fn body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.body = body.into();
        self.modified = true;
        self
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn status_code(&self) -> StatusCode {
        self.head.status()
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Marks the response as completed later, outside of the current pass.
    pub fn set_async(&mut self, is_async: bool) -> &mut Self {
        self.is_async = is_async;
        self
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Whether anything was written into the response since the last reset.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Takes the head and body out for encoding, at most once per request.
    pub fn take_for_commit(&mut self) -> Option<(ResponseHead, Bytes)> {
        if self.committed {
            return None;
        }
        self.committed = true;
        let head = std::mem::take(&mut self.head);
        let body = std::mem::take(&mut self.body);
        Some((head, body))
    }

    /// Prepares the response for the next request on a keep-alive connection.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
