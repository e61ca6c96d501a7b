//! Decoder for `Transfer-Encoding: chunked` request bodies.
//!
//! The decoder works line by line: a hex size line (extensions after `;` are
//! ignored), the chunk data followed by CRLF, and after the zero sized chunk an
//! optional trailer section terminated by an empty line. Trailers are skipped.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadItem};

/// Longest size or trailer line accepted before the body is rejected.
const MAX_LINE_BYTES: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(2).position(|window| window == b"\r\n")
}

/// Splits the next CRLF terminated line off `src`, without its terminator.
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
    match find_crlf(src) {
        Some(pos) => {
            let line = src.split_to(pos);
            src.advance(2);
            Ok(Some(line))
        }
        None => {
            ensure!(src.len() <= MAX_LINE_BYTES, ParseError::invalid_body("chunk line too long"));
            Ok(None)
        }
    }
}

fn parse_size(line: &[u8]) -> Result<u64, ParseError> {
    let size = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii();
    let size = std::str::from_utf8(size).map_err(|_| ParseError::invalid_body("chunk size is not ascii"))?;
    u64::from_str_radix(size, 16).map_err(|e| ParseError::invalid_body(format!("invalid chunk size {size:?}: {e}")))
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Size => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    let size = parse_size(&line)?;
                    trace!(size, "read chunk size");
                    self.state = if size == 0 { State::Trailer } else { State::Data(size) };
                }
                State::Data(remaining) => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let len = remaining.min(src.len() as u64);
                    // bounded by src.len()
                    let bytes = src.split_to(len as usize).freeze();
                    let remaining = remaining - len;
                    self.state = if remaining == 0 { State::DataEnd } else { State::Data(remaining) };
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
                State::DataEnd => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    ensure!(&src[..2] == b"\r\n", ParseError::invalid_body("chunk data not terminated by CRLF"));
                    src.advance(2);
                    self.state = State::Size;
                }
                State::Trailer => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = State::Done;
                    }
                }
                State::Done => return Ok(Some(PayloadItem::Eof)),
            }
        }
    }
}
