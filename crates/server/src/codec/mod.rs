//! HTTP/1.x wire codec.
//!
//! - [`RequestDecoder`]: incremental request decoding, header then body, with
//!   the post body limit enforced while decoding
//! - [`ResponseEncoder`]: serializes a committed response
//!
//! Both implement the `tokio_util::codec` traits so they can be driven over a
//! plain `BytesMut` by the connection as well as wrapped in a framed stream.
//!
//! ```
//! use bytes::BytesMut;
//! use micro_server::codec::RequestDecoder;
//! use micro_server::protocol::Message;
//! use tokio_util::codec::Decoder;
//!
//! let mut buffer = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n"[..]);
//! let message = RequestDecoder::new().decode(&mut buffer).unwrap();
//! assert!(matches!(message, Some(Message::Header(_))));
//! ```

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
