//! Streaming consumer for bytes received while a response is suspended.

/// What an [`InputListener`] wants after consuming a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    /// Keep delivering input to the listener.
    Continue,
    /// Detach the listener, the connection parses requests again.
    Complete,
}

/// Receives raw input bytes instead of the request parser.
///
/// A handler attaches a listener while suspending the response, for instance
/// to stream a large upload or to take over an upgraded connection. Each
/// chunk handed to [`on_data`](InputListener::on_data) is at most the
/// configured websocket frame length limit and is consumed entirely.
pub trait InputListener: Send + 'static {
    /// Called once the response was suspended and input may start flowing.
    fn on_ready(&mut self) {}

    fn on_data(&mut self, data: &[u8]) -> InputStatus;

    /// The peer closed the connection or reading failed.
    fn on_eof(&mut self) {}
}
