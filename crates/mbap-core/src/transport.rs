//! Non-blocking byte-stream seam between the protocol core and its host.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const READ_CHUNK: usize = 512;

/// Queued output above which [`TcpByteStream::write`] refuses new frames.
pub const MAX_PENDING_OUTPUT: usize = 64 * crate::frame::MAX_ADU_LEN;

/// Transport collaborator consumed by poll-driven connections.
///
/// `read_available` never blocks: it returns whatever has arrived, possibly
/// nothing. Failures are reported to the caller, which logs and drops.
pub trait ByteStream {
    fn is_connected(&self) -> bool;
    fn read_available(&mut self) -> io::Result<Vec<u8>>;
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

impl<T> ByteStream for Box<T>
where
    T: ByteStream + ?Sized,
{
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        (**self).read_available()
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// [`ByteStream`] over a non-blocking `std::net::TcpStream`.
///
/// A write is accepted whole or not at all. Whatever the kernel does not
/// take immediately stays queued and goes out, in order, on later
/// `write`/`flush` calls, so a full send buffer never leaves a torn frame
/// on the wire.
#[derive(Debug)]
pub struct TcpByteStream {
    stream: TcpStream,
    connected: bool,
    pending: Vec<u8>,
}

impl TcpByteStream {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            connected: true,
            pending: Vec::new(),
        })
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    /// Accepted bytes the kernel has not taken yet.
    pub fn pending_output(&self) -> usize {
        self.pending.len()
    }

    fn drain_pending(&mut self) -> io::Result<()> {
        let mut sent = 0;
        while sent < self.pending.len() {
            match self.stream.write(&self.pending[sent..]) {
                Ok(0) => {
                    self.connected = false;
                    return Err(io::ErrorKind::WriteZero.into());
                }
                Ok(n) => sent += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.connected = false;
                    self.pending.clear();
                    return Err(err);
                }
            }
        }
        self.pending.drain(..sent);
        Ok(())
    }
}

impl ByteStream for TcpByteStream {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        while self.connected {
            match self.stream.read(&mut chunk) {
                Ok(0) => self.connected = false,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.connected = false;
                    return Err(err);
                }
            }
        }
        Ok(out)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.drain_pending()?;
        if self.pending.len() + bytes.len() > MAX_PENDING_OUTPUT {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.pending.extend_from_slice(bytes);
        self.drain_pending()
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.drain_pending()?;
        self.stream.flush()
    }
}

#[derive(Debug)]
struct MemoryState {
    inbound: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    connected: bool,
    fail_writes: bool,
}

/// In-memory [`ByteStream`]; clones share the same pipe.
///
/// One clone is handed to a connection, the other stays with the test or
/// simulator to feed inbound bytes and inspect what was written.
#[derive(Debug, Clone)]
pub struct MemoryStream {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStream {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                inbound: VecDeque::new(),
                written: Vec::new(),
                connected: true,
                fail_writes: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues bytes to be returned by the next `read_available`.
    pub fn feed(&self, bytes: &[u8]) {
        self.lock().inbound.push_back(bytes.to_vec());
    }

    /// Drains everything written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().written)
    }

    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }
}

impl ByteStream for MemoryStream {
    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut state = self.lock();
        let mut out = Vec::new();
        while let Some(chunk) = state.inbound.pop_front() {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory stream write failure"));
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
