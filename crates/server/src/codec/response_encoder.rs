//! Encoder for a complete response: head followed by the buffered body.

use crate::codec::header::HeaderEncoder;
use crate::protocol::{ResponseHead, SendError};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Encoder<(ResponseHead, Bytes)> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, Bytes), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (head, body) = item;
        self.header_encoder.encode((head, body.len() as u64), dst)?;
        dst.reserve(body.len());
        dst.put_slice(&body);
        Ok(())
    }
}
