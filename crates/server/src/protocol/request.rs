//! The parsed head of a request, waiting for its body.

use http::{HeaderMap, Method, Request, Uri, Version, header};

#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl RequestHeader {
    /// Completes the request with the body read after the head.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|()| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// `false` for methods whose requests carry no body unless they declare one.
    pub fn need_body(&self) -> bool {
        !matches!(*self.method(), Method::GET | Method::HEAD | Method::DELETE | Method::OPTIONS | Method::CONNECT)
    }

    /// HTTP/1.1 keeps the connection open unless the client sent `close`,
    /// HTTP/1.0 closes it unless the client asked for `keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        let connection = self.headers().get(header::CONNECTION).map(|value| value.as_bytes());
        let has_token = |token: &[u8]| {
            connection.is_some_and(|value| value.split(|b| *b == b',').any(|item| item.trim_ascii().eq_ignore_ascii_case(token)))
        };

        match self.version() {
            Version::HTTP_11 => !has_token(b"close"),
            Version::HTTP_10 => has_token(b"keep-alive"),
            _ => false,
        }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: Version, connection: Option<&str>) -> RequestHeader {
        let mut builder = Request::builder().method(Method::GET).uri("/").version(version);
        if let Some(value) = connection {
            builder = builder.header(header::CONNECTION, value);
        }
        RequestHeader::from(builder.body(()).unwrap())
    }

    #[test]
    fn http_11_defaults_to_keep_alive() {
        assert!(header(Version::HTTP_11, None).is_keep_alive());
        assert!(header(Version::HTTP_11, Some("keep-alive")).is_keep_alive());
        assert!(!header(Version::HTTP_11, Some("close")).is_keep_alive());
        assert!(!header(Version::HTTP_11, Some("Upgrade, Close")).is_keep_alive());
    }

    #[test]
    fn http_10_defaults_to_close() {
        assert!(!header(Version::HTTP_10, None).is_keep_alive());
        assert!(header(Version::HTTP_10, Some("Keep-Alive")).is_keep_alive());
    }

    #[test]
    fn need_body_depends_on_method() {
        assert!(!header(Version::HTTP_11, None).need_body());

        let post = RequestHeader::from(Request::builder().method(Method::POST).uri("/").body(()).unwrap());
        assert!(post.need_body());
    }
}
