//! Decoder for request bodies delimited by a `Content-Length` header.

use std::cmp;

use crate::protocol::{ParseError, PayloadItem};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Hands out at most `length` bytes, then a single [`PayloadItem::Eof`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    /// The number of bytes remaining to be read from the payload
    length: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.length == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let len = cmp::min(self.length, src.len() as u64);
        // len never exceeds src.len(), so the cast back is lossless
        let bytes = src.split_to(len as usize).freeze();

        self.length -= len;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_content_length() {
        let mut buffer = BytesMut::from(&b"hello worldGET / HTTP/1.1"[..]);
        let mut decoder = LengthDecoder::new(11);

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(item.as_bytes().unwrap().as_ref(), b"hello world");
        assert_eq!(&buffer[..], b"GET / HTTP/1.1");

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn waits_for_more_bytes() {
        let mut buffer = BytesMut::from(&b"abc"[..]);
        let mut decoder = LengthDecoder::new(5);

        assert_eq!(decoder.decode(&mut buffer).unwrap().unwrap().as_bytes().unwrap().as_ref(), b"abc");
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"de");
        assert_eq!(decoder.decode(&mut buffer).unwrap().unwrap().as_bytes().unwrap().as_ref(), b"de");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }
}
