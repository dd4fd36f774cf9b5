//! # Byte-stream transports
//!
//! The message codec never touches sockets directly. It talks to a
//! [`Transport`], a buffered byte stream it can ask three questions of:
//! how many bytes are ready, what do the first `n` look like, and give me
//! exactly `n`. That is all frame reassembly needs.
//!
//! | Transport | Backing | Use |
//! |-----------|---------|-----|
//! | [`TcpTransport`] | tokio `TcpStream` + `BytesMut` | Modbus/TCP devices |
//! | [`TestTransport`] | in-memory | tests, simulations |
//!
//! Checking and peeking never block: they move whatever the socket has
//! ready into the receive buffer and report on it.

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{ModbusError, ModbusResult};

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub writes: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
}

/// Buffered, connection-oriented byte stream.
///
/// Implementations must be `Send + Sync`; the codec shares one instance
/// between its receive loop and senders behind an async mutex.
pub trait Transport: Send + Sync + 'static {
    /// Open the connection. Connecting an open transport is a no-op.
    fn connect(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Close the connection and drop buffered input.
    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    fn is_connected(&self) -> bool;

    /// Number of bytes that can be read right now without waiting.
    fn num_readable_bytes(&mut self) -> impl Future<Output = ModbusResult<usize>> + Send;

    /// Up to `n` buffered bytes, without consuming them.
    fn peek_readable_bytes(&mut self, n: usize)
        -> impl Future<Output = ModbusResult<Bytes>> + Send;

    /// Consume exactly `n` bytes.
    fn read(&mut self, n: usize) -> impl Future<Output = ModbusResult<Bytes>> + Send;

    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> impl Future<Output = ModbusResult<()>> + Send;

    fn stats(&self) -> TransportStats;
}

// ============================================================================
// TCP
// ============================================================================

/// Modbus TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    pub address: SocketAddr,
    stream: Option<TcpStream>,
    buffer: BytesMut,
    connect_timeout: Duration,
    stats: TransportStats,
}

impl TcpTransport {
    /// Create a disconnected transport for `address`.
    pub fn new(address: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            address,
            stream: None,
            buffer: BytesMut::with_capacity(crate::constants::MAX_FRAME_SIZE * 4),
            connect_timeout,
            stats: TransportStats::default(),
        }
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream) -> ModbusResult<Self> {
        let address = stream.peer_addr()?;
        let mut transport = Self::new(address, Duration::from_secs(5));
        transport.stream = Some(stream);
        Ok(transport)
    }

    /// Move everything the socket has ready into the receive buffer.
    fn fill(&mut self) -> ModbusResult<()> {
        let Some(stream) = self.stream.as_ref() else {
            if self.buffer.is_empty() {
                return Err(ModbusError::connection(format!(
                    "Not connected to {}",
                    self.address
                )));
            }
            return Ok(());
        };

        loop {
            match stream.try_read_buf(&mut self.buffer) {
                Ok(0) => {
                    warn!("Connection to {} closed by peer", self.address);
                    self.stream = None;
                    break;
                }
                Ok(n) => {
                    self.stats.bytes_received += n as u64;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.stats.errors += 1;
                    self.stream = None;
                    return Err(ModbusError::connection(format!(
                        "Read from {} failed: {}",
                        self.address, e
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    async fn connect(&mut self) -> ModbusResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.address))
            .await
            .map_err(|_| {
                ModbusError::timeout(
                    format!("connect to {}", self.address),
                    self.connect_timeout.as_millis() as u64,
                )
            })?
            .map_err(|e| {
                ModbusError::connection(format!("Failed to connect to {}: {}", self.address, e))
            })?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", self.address);
        self.buffer.clear();
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.buffer.clear();
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
            debug!("Closed connection to {}", self.address);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn num_readable_bytes(&mut self) -> ModbusResult<usize> {
        self.fill()?;
        Ok(self.buffer.len())
    }

    async fn peek_readable_bytes(&mut self, n: usize) -> ModbusResult<Bytes> {
        self.fill()?;
        let n = n.min(self.buffer.len());
        Ok(Bytes::copy_from_slice(&self.buffer[..n]))
    }

    async fn read(&mut self, n: usize) -> ModbusResult<Bytes> {
        while self.buffer.len() < n {
            let stream = self.stream.as_mut().ok_or_else(|| {
                ModbusError::connection(format!("Not connected to {}", self.address))
            })?;
            let read = stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                self.stream = None;
                return Err(ModbusError::connection(format!(
                    "Connection to {} closed mid-frame",
                    self.address
                )));
            }
            self.stats.bytes_received += read as u64;
        }
        Ok(self.buffer.split_to(n).freeze())
    }

    async fn write(&mut self, data: &[u8]) -> ModbusResult<()> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            ModbusError::connection(format!("Not connected to {}", self.address))
        })?;
        if let Err(e) = stream.write_all(data).await {
            self.stats.errors += 1;
            return Err(e.into());
        }
        stream.flush().await?;
        self.stats.writes += 1;
        self.stats.bytes_sent += data.len() as u64;
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Reply hook of a [`TestTransport`]: sees every written frame and may
/// return bytes to queue as incoming data.
pub type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct TestState {
    connected: bool,
    /// Data that has "arrived" and can be read
    readable: BytesMut,
    /// Chunks that arrive one per poll
    pending: VecDeque<Bytes>,
    written: Vec<Bytes>,
    responder: Option<Responder>,
    fail_next_write: Option<ModbusError>,
    stats: TransportStats,
}

impl TestState {
    fn arrive(&mut self) {
        if let Some(chunk) = self.pending.pop_front() {
            self.stats.bytes_received += chunk.len() as u64;
            self.readable.extend_from_slice(&chunk);
        }
    }
}

/// Scriptable in-memory transport.
///
/// Clones share state, so a test keeps one handle to feed input and
/// inspect output while the codec owns another. Input queued with
/// [`push_chunks`](Self::push_chunks) becomes readable one chunk per poll,
/// which exercises reassembly of frames split across reads.
#[derive(Clone, Default)]
pub struct TestTransport {
    state: Arc<Mutex<TestState>>,
}

impl TestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TestState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Make `data` readable as a single chunk.
    pub fn push_incoming(&self, data: &[u8]) {
        self.with_state(|s| s.pending.push_back(Bytes::copy_from_slice(data)));
    }

    /// Queue `data` split into chunks of `chunk_size` bytes.
    pub fn push_chunks(&self, data: &[u8], chunk_size: usize) {
        let chunk_size = chunk_size.max(1);
        self.with_state(|s| {
            for chunk in data.chunks(chunk_size) {
                s.pending.push_back(Bytes::copy_from_slice(chunk));
            }
        });
    }

    /// Install a reply hook invoked on every write.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.with_state(|s| s.responder = Some(Box::new(responder)));
    }

    /// Make the next write fail with `err`.
    pub fn fail_next_write(&self, err: ModbusError) {
        self.with_state(|s| s.fail_next_write = Some(err));
    }

    /// Every frame written so far.
    pub fn written(&self) -> Vec<Bytes> {
        self.with_state(|s| s.written.clone())
    }

    pub fn take_written(&self) -> Vec<Bytes> {
        self.with_state(|s| std::mem::take(&mut s.written))
    }

    /// Bytes queued or readable but not yet consumed.
    pub fn unread_len(&self) -> usize {
        self.with_state(|s| s.readable.len() + s.pending.iter().map(Bytes::len).sum::<usize>())
    }
}

impl std::fmt::Debug for TestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with_state(|s| {
            f.debug_struct("TestTransport")
                .field("connected", &s.connected)
                .field("readable", &s.readable.len())
                .field("pending_chunks", &s.pending.len())
                .field("written", &s.written.len())
                .finish()
        })
    }
}

impl Transport for TestTransport {
    async fn connect(&mut self) -> ModbusResult<()> {
        self.with_state(|s| s.connected = true);
        Ok(())
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.with_state(|s| {
            s.connected = false;
            s.readable.clear();
            s.pending.clear();
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.with_state(|s| s.connected)
    }

    async fn num_readable_bytes(&mut self) -> ModbusResult<usize> {
        self.with_state(|s| {
            if !s.connected {
                return Err(ModbusError::connection("Test transport not connected"));
            }
            s.arrive();
            Ok(s.readable.len())
        })
    }

    async fn peek_readable_bytes(&mut self, n: usize) -> ModbusResult<Bytes> {
        self.with_state(|s| {
            let n = n.min(s.readable.len());
            Ok(Bytes::copy_from_slice(&s.readable[..n]))
        })
    }

    async fn read(&mut self, n: usize) -> ModbusResult<Bytes> {
        self.with_state(|s| {
            while s.readable.len() < n && !s.pending.is_empty() {
                s.arrive();
            }
            if s.readable.len() < n {
                return Err(ModbusError::io(format!(
                    "Requested {} bytes but only {} available",
                    n,
                    s.readable.len()
                )));
            }
            Ok(s.readable.split_to(n).freeze())
        })
    }

    async fn write(&mut self, data: &[u8]) -> ModbusResult<()> {
        self.with_state(|s| {
            if !s.connected {
                return Err(ModbusError::connection("Test transport not connected"));
            }
            if let Some(err) = s.fail_next_write.take() {
                s.stats.errors += 1;
                return Err(err);
            }
            s.stats.writes += 1;
            s.stats.bytes_sent += data.len() as u64;
            s.written.push(Bytes::copy_from_slice(data));
            let reply = s.responder.as_ref().and_then(|respond| respond(data));
            if let Some(reply) = reply {
                s.pending.push_back(Bytes::from(reply));
            }
            Ok(())
        })
    }

    fn stats(&self) -> TransportStats {
        self.with_state(|s| s.stats.clone())
    }
}
