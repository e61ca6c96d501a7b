//! Core HTTP protocol abstractions.
//!
//! This module provides the message types exchanged between the codec and the
//! connection, the response a handler builds, and the protocol level errors.
//!
//! - **Payload** ([`Message`], [`PayloadItem`], [`PayloadSize`]): how a body is delimited and
//!   the pieces the body decoders produce
//! - **Request Processing** ([`RequestHeader`]): parsed request head plus
//!   keep-alive negotiation
//! - **Response Processing** ([`HttpResponse`], [`ResponseHead`]): the response in
//!   progress and its encoded head
//! - **Error Handling** ([`ParseError`], [`SendError`]): parse errors carry the
//!   status the connection is closed with

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::HttpResponse;
pub use response::ResponseHead;

mod error;
pub use error::ParseError;
pub use error::SendError;
