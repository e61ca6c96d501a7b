//! An in-memory [`Socket`] for driving connections without the network.
//!
//! Only built for tests, or with the `test-util` feature.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;

use crate::connection::Socket;

/// An in-memory socket, for driving connections without the network.
///
/// Clones share the same buffers, so a test can keep one handle to feed input
/// and inspect output while the connection owns the other.
#[derive(Debug, Clone, Default)]
pub struct MemorySocket {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    input: BytesMut,
    input_closed: bool,
    output: Vec<u8>,
    /// bytes accepted before writes start returning `WouldBlock`
    write_budget: Option<usize>,
    shutdown: bool,
    flushes: usize,
}

impl MemorySocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(input: impl AsRef<[u8]>) -> Self {
        let socket = Self::new();
        socket.push_input(input);
        socket
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_input(&self, input: impl AsRef<[u8]>) {
        self.state().input.extend_from_slice(input.as_ref());
    }

    /// Further reads past the buffered input report end of stream.
    pub fn close_input(&self) {
        self.state().input_closed = true;
    }

    pub fn output(&self) -> Vec<u8> {
        self.state().output.clone()
    }

    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.state().output)
    }

    /// Limits how many more bytes are written before the socket stalls,
    /// `None` removes the limit.
    pub fn set_write_budget(&self, budget: Option<usize>) {
        self.state().write_budget = budget;
    }

    pub fn is_shutdown(&self) -> bool {
        self.state().shutdown
    }

    /// Number of `flush` calls, one per successful output flush.
    pub fn flush_count(&self) -> usize {
        self.state().flushes
    }
}

impl Read for MemorySocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.input.is_empty() {
            return if state.input_closed || state.shutdown { Ok(0) } else { Err(io::ErrorKind::WouldBlock.into()) };
        }
        let len = buf.len().min(state.input.len());
        buf[..len].copy_from_slice(&state.input.split_to(len));
        Ok(len)
    }
}

impl Write for MemorySocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.shutdown {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let len = match state.write_budget {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(budget) => budget.min(buf.len()),
            None => buf.len(),
        };
        if let Some(budget) = state.write_budget.as_mut() {
            *budget -= len;
        }
        state.output.extend_from_slice(&buf[..len]);
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state().flushes += 1;
        Ok(())
    }
}

impl Socket for MemorySocket {
    fn shutdown(&mut self) -> io::Result<()> {
        self.state().shutdown = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_socket_would_block_until_closed() {
        let mut socket = MemorySocket::with_input("ab");
        let mut buf = [0u8; 8];

        assert_eq!(socket.read(&mut buf).unwrap(), 2);
        assert_eq!(socket.read(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);

        socket.close_input();
        assert_eq!(socket.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_budget_stalls_writes() {
        let mut socket = MemorySocket::new();
        socket.set_write_budget(Some(3));

        assert_eq!(socket.write(b"hello").unwrap(), 3);
        assert_eq!(socket.write(b"lo").unwrap_err().kind(), io::ErrorKind::WouldBlock);

        socket.set_write_budget(None);
        assert_eq!(socket.write(b"lo").unwrap(), 2);
        assert_eq!(socket.output(), b"hello");
    }
}
