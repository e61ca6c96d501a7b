//! Request header decoding and response header encoding.
//!
//! - [`HeaderDecoder`]: request line and fields via `httparse`, with size and
//!   count limits, and the body framing derived from them
//! - [`HeaderEncoder`]: status line and fields, `Content-Length` always set

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
