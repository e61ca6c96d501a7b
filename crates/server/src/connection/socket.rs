//! Byte stream sockets a connection can be driven over.
//!
//! Sockets are always non-blocking: a read or write that cannot make progress
//! returns [`io::ErrorKind::WouldBlock`], and a read of `0` bytes means the
//! peer closed its side.

use std::io::{self, Read, Write};
use std::net::Shutdown;

/// A non-blocking, full duplex byte stream.
pub trait Socket: Read + Write + Send + 'static {
    /// Shuts both directions down, the peer observes end of stream.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// The TCP stream a transport accepted, in the flavour of that transport.
#[derive(Debug)]
pub enum TcpSocket {
    /// A stream registered with the reactor's poller.
    Reactor(mio::net::TcpStream),
    /// A std stream in non-blocking mode, watched by the fallback transport.
    Fallback(std::net::TcpStream),
}

impl Read for TcpSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TcpSocket::Reactor(stream) => stream.read(buf),
            TcpSocket::Fallback(stream) => stream.read(buf),
        }
    }
}

impl Write for TcpSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TcpSocket::Reactor(stream) => stream.write(buf),
            TcpSocket::Fallback(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TcpSocket::Reactor(stream) => stream.flush(),
            TcpSocket::Fallback(stream) => stream.flush(),
        }
    }
}

impl Socket for TcpSocket {
    fn shutdown(&mut self) -> io::Result<()> {
        let result = match self {
            TcpSocket::Reactor(stream) => stream.shutdown(Shutdown::Both),
            TcpSocket::Fallback(stream) => stream.shutdown(Shutdown::Both),
        };
        // the peer may already be gone
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
