//! Request body decoding.
//!
//! - [`LengthDecoder`](length_decoder::LengthDecoder): bodies delimited by `Content-Length`
//! - [`ChunkedDecoder`](chunked_decoder::ChunkedDecoder): `Transfer-Encoding: chunked` bodies
//! - [`PayloadDecoder`]: picks one of the above from the parsed [`PayloadSize`](crate::protocol::PayloadSize)

mod chunked_decoder;
mod length_decoder;
mod payload_decoder;

pub use payload_decoder::PayloadDecoder;
