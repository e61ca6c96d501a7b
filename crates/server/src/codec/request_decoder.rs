//! Incremental request decoder.
//!
//! Combines [`HeaderDecoder`] and [`PayloadDecoder`] into one
//! [`Decoder`] producing a stream of [`Message`]s: one header, then zero or
//! more payload chunks, then [`PayloadItem::Eof`]. Bytes belonging to the
//! next pipelined request are left in the source buffer.
//!
//! The decoder also enforces the accepted body size. A `Content-Length`
//! above the limit is rejected as soon as the header is parsed, chunked
//! bodies are rejected once the received bytes cross it.

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::ensure;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

#[derive(Debug)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    /// `Some` while the body of the current request is being decoded
    payload_decoder: Option<PayloadDecoder>,
    body_limit: u64,
    body_received: u64,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::with_body_limit(u64::MAX)
    }

    pub fn with_body_limit(body_limit: u64) -> Self {
        Self { header_decoder: HeaderDecoder, payload_decoder: None, body_limit, body_received: 0 }
    }

    /// Whether a header was decoded and its body is not complete yet.
    pub fn is_in_body(&self) -> bool {
        self.payload_decoder.is_some()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            return match payload_decoder.decode(src)? {
                Some(PayloadItem::Chunk(bytes)) => {
                    self.body_received += bytes.len() as u64;
                    ensure!(self.body_received <= self.body_limit, ParseError::too_large_body(self.body_received, self.body_limit));
                    Ok(Some(Message::Payload(PayloadItem::Chunk(bytes))))
                }
                Some(PayloadItem::Eof) => {
                    self.payload_decoder = None;
                    Ok(Some(Message::Payload(PayloadItem::Eof)))
                }
                None => Ok(None),
            };
        }

        let Some((header, payload_size)) = self.header_decoder.decode(src)? else {
            return Ok(None);
        };

        if let Some(length) = payload_size.declared_length() {
            ensure!(length <= self.body_limit, ParseError::too_large_body(length, self.body_limit));
        }

        self.body_received = 0;
        self.payload_decoder = Some(payload_size.into());
        Ok(Some(Message::Header((header, payload_size))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn drain(decoder: &mut RequestDecoder, buffer: &mut BytesMut) -> Result<Vec<Message<(RequestHeader, PayloadSize)>>, ParseError> {
        let mut messages = Vec::new();
        while let Some(message) = decoder.decode(buffer)? {
            messages.push(message);
        }
        Ok(messages)
    }

    #[test]
    fn pipelined_requests_are_decoded_in_order() {
        let str = indoc! {r##"
        POST /a HTTP/1.1
        Content-Length: 2

        okGET /b HTTP/1.1
        Host: localhost

        "##};

        let mut buffer = BytesMut::from(str);
        let mut decoder = RequestDecoder::new();
        let messages = drain(&mut decoder, &mut buffer).unwrap();

        let paths: Vec<_> = messages
            .iter()
            .filter_map(|message| match message {
                Message::Header((header, _)) => Some(header.uri().path().to_string()),
                Message::Payload(_) => None,
            })
            .collect();
        assert_eq!(paths, vec!["/a", "/b"]);
        assert_eq!(messages.iter().filter(|message| matches!(message, Message::Payload(PayloadItem::Eof))).count(), 2);
        assert!(!decoder.is_in_body());
    }

    #[test]
    fn declared_length_over_limit_is_rejected() {
        let mut buffer = BytesMut::from(&b"POST / HTTP/1.1\r\nContent-Length: 11\r\n\r\n"[..]);
        let mut decoder = RequestDecoder::with_body_limit(10);

        let error = decoder.decode(&mut buffer).unwrap_err();
        assert!(matches!(error, ParseError::TooLargeBody { current_size: 11, max_size: 10 }));
    }

    #[test]
    fn chunked_body_over_limit_is_rejected() {
        let mut buffer = BytesMut::from(&b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nabcd\r\n4\r\nefgh\r\n0\r\n\r\n"[..]);
        let mut decoder = RequestDecoder::with_body_limit(6);

        let error = drain(&mut decoder, &mut buffer).err().unwrap();
        assert!(matches!(error, ParseError::TooLargeBody { .. }));
    }
}
