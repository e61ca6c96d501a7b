//! Picks the body decoder matching the framing the header decoder derived.

use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::codec::body::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadDecoder {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    /// ends right away
    NoBody,
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(size) => PayloadDecoder::Length(LengthDecoder::new(size)),
            PayloadSize::Chunked => PayloadDecoder::Chunked(ChunkedDecoder::new()),
            PayloadSize::Empty => PayloadDecoder::NoBody,
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            PayloadDecoder::Length(decoder) => decoder.decode(src),
            PayloadDecoder::Chunked(decoder) => decoder.decode(src),
            PayloadDecoder::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }
}
