//! HTTP response header encoder.
//!
//! Serializes the status line and header fields of a [`ResponseHead`]. The
//! body of a committed response is always fully buffered, so the encoder
//! writes `Content-Length` itself and never emits chunked transfer coding.

use crate::protocol::{ResponseHead, SendError};

use bytes::{BufMut, BytesMut};

use http::{HeaderValue, Version, header};
use std::io;
use std::io::{ErrorKind, Write};
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Encoder for HTTP response headers implementing the [`Encoder`] trait.
///
/// The item is the head plus the exact length of the body that follows it.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, u64)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, u64), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, content_length) = item;

        let version = match head.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        };

        dst.reserve(INIT_HEADER_SIZE);
        let status = head.status();
        write!(FastWrite(dst), "{} {} {}\r\n", version, status.as_str(), status.canonical_reason().unwrap_or("Unknown"))?;

        head.headers_mut().remove(header::TRANSFER_ENCODING);
        head.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));

        for (header_name, header_value) in head.headers().iter() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// `io::Write` over `BytesMut` so the status line can use `write!`.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Response, StatusCode};

    #[test]
    fn writes_status_line_and_length() {
        let head = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(header::CONTENT_LENGTH, "999")
            .header(header::TRANSFER_ENCODING, "chunked")
            .body(())
            .unwrap();

        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, 5), &mut dst).unwrap();

        let text = std::str::from_utf8(&dst).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(!text.contains("transfer-encoding"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn keeps_http_10() {
        let head = Response::builder().version(Version::HTTP_10).body(()).unwrap();

        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, 0), &mut dst).unwrap();
        assert!(dst.starts_with(b"HTTP/1.0 200 OK\r\n"));
    }

    #[test]
    fn rejects_http_2() {
        let head = Response::builder().version(Version::HTTP_2).body(()).unwrap();
        assert!(HeaderEncoder.encode((head, 0), &mut BytesMut::new()).is_err());
    }
}
