//! The byte-stream abstraction [`crate::Client`] reads and writes
//! through, and a `std::net::TcpStream`-backed implementation of it.
use std::io;
use std::net::TcpStream;

use mqtt_core::Error;

/// The outcome of one non-blocking transport attempt.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Progress {
    /// `n` bytes were sent or received.
    Some(usize),
    /// The transport would have blocked; no bytes moved this tick.
    WouldBlock,
}

/// A non-blocking byte-stream transport.
///
/// Implementations must never block: a call that cannot make progress
/// immediately returns `Ok(Progress::WouldBlock)`. Any other failure,
/// including a half-closed peer, is `Err(Error::SocketError(_))`.
pub trait Transport {
    /// Attempts to write as much of `buf` as possible without blocking.
    fn send(&mut self, buf: &[u8]) -> Result<Progress, Error>;

    /// Attempts to read into `buf` without blocking.
    fn recv(&mut self, buf: &mut [u8]) -> Result<Progress, Error>;
}

/// Adapts a non-blocking `std::net::TcpStream` to [`Transport`].
///
/// This adapter only translates I/O outcomes; it does not retry,
/// buffer, or interpret packets. A zero-byte read is always treated as
/// a half-closed peer and reported as `SocketError`, since a
/// non-blocking stream with no data available raises `WouldBlock`
/// rather than returning `Ok(0)`.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wraps `stream`, switching it into non-blocking mode.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(TcpTransport { stream })
    }
}

fn classify(result: io::Result<usize>) -> Result<Progress, Error> {
    match result {
        Ok(0) => Err(Error::SocketError(
            "transport closed (zero-byte read/write)".to_owned(),
        )),
        Ok(n) => Ok(Progress::Some(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Progress::WouldBlock),
        Err(e) => Err(Error::SocketError(e.to_string())),
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, buf: &[u8]) -> Result<Progress, Error> {
        use io::Write;
        if buf.is_empty() {
            return Ok(Progress::Some(0));
        }
        classify(self.stream.write(buf))
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Progress, Error> {
        use io::Read;
        classify(self.stream.read(buf))
    }
}
