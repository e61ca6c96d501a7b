//! Worker-local buffers.
//!
//! Every thread that drives connections (a worker, a reactor partition, the
//! fallback transport when processing inline, or a thread resuming responses
//! inline) owns exactly one [`BufferProvider`] and passes it by `&mut` down into the connection. The
//! borrow checker then guarantees a buffer is never used by two passes at
//! once, and since the provider is not shared it never crosses threads while
//! in use.

use bytes::BytesMut;

/// Default size of a single socket read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

const INIT_SCRATCH_SIZE: usize = 8 * 1024;

/// Reusable read buffer plus an encoding scratch area.
#[derive(Debug)]
pub struct BufferProvider {
    read: Vec<u8>,
    scratch: BytesMut,
}

impl BufferProvider {
    pub fn new() -> Self {
        Self { read: vec![0; DEFAULT_READ_BUFFER_SIZE], scratch: BytesMut::with_capacity(INIT_SCRATCH_SIZE) }
    }

    /// A zero-initialised slice of at least `size` bytes, reused between calls.
    pub fn buffer(&mut self, size: usize) -> &mut [u8] {
        if self.read.len() < size {
            self.read.resize(size, 0);
        }
        &mut self.read[..size]
    }

    /// An empty scratch buffer for encoding, keeping previously grown capacity.
    pub fn scratch(&mut self) -> &mut BytesMut {
        self.scratch.clear();
        &mut self.scratch
    }
}

impl Default for BufferProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_reuses() {
        let mut provider = BufferProvider::new();
        assert_eq!(provider.buffer(16).len(), 16);
        assert_eq!(provider.buffer(DEFAULT_READ_BUFFER_SIZE * 2).len(), DEFAULT_READ_BUFFER_SIZE * 2);
        assert_eq!(provider.buffer(4).len(), 4);
    }

    #[test]
    fn scratch_starts_empty() {
        let mut provider = BufferProvider::new();
        provider.scratch().extend_from_slice(b"leftover");
        assert!(provider.scratch().is_empty());
    }
}
