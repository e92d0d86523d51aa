//! Connection traits and the TCP connection.
//!
//! The secure channel consumes only two operations from its transport:
//! write these bytes in full, and read exactly this many bytes. They are
//! expressed as [`ConnectionWrite::send`] and [`ConnectionRead::recv`] and
//! implemented for every tokio byte stream, so TCP halves, in-memory
//! duplex pipes and test buffers all work unchanged.

use crate::TransportConfig;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the stream before any byte of the requested read arrived
    #[error("connection closed by peer")]
    Closed,

    /// Fewer bytes were transferred than requested
    #[error("incomplete transfer: expected {expected} bytes, got {actual}")]
    Incomplete {
        /// Requested byte count
        expected: usize,
        /// Bytes actually transferred
        actual: usize,
    },

    /// Address binding failed
    #[error("failed to bind to address: {0}")]
    BindFailed(String),

    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connect did not complete in time
    #[error("connection timed out")]
    Timeout,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Write side of a raw ordered byte stream.
#[async_trait]
pub trait ConnectionWrite: Send {
    /// Write all of `buf` and flush it.
    ///
    /// Returns the number of bytes written, which is `buf.len()` on success.
    ///
    /// # Errors
    /// Returns `TransportError` if the stream fails before every byte is written
    async fn send(&mut self, buf: &[u8]) -> TransportResult<usize>;

    /// Shut down the write direction so the peer observes end of stream.
    ///
    /// # Errors
    /// Returns `TransportError` if shutting down fails
    async fn close(&mut self) -> TransportResult<()>;
}

/// Read side of a raw ordered byte stream.
#[async_trait]
pub trait ConnectionRead: Send {
    /// Read until `buf` is full or the peer closes the stream.
    ///
    /// Returns the number of bytes read. A count below `buf.len()` means
    /// the stream ended early; it is never returned while more data may
    /// still arrive.
    ///
    /// # Errors
    /// Returns `TransportError` if the underlying read fails
    async fn recv(&mut self, buf: &mut [u8]) -> TransportResult<usize>;
}

#[async_trait]
impl<W> ConnectionWrite for W
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, buf: &[u8]) -> TransportResult<usize> {
        self.write_all(buf).await?;
        self.flush().await?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl<R> ConnectionRead for R
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// A TCP connection to a single peer.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    /// Connect to a remote address.
    ///
    /// # Errors
    /// Returns `TransportError::Timeout` if `config.connect_timeout` elapses,
    /// or `TransportError::ConnectionFailed` if the connect itself fails
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        config: &TransportConfig,
    ) -> TransportResult<Self> {
        let connect = TcpStream::connect(addr);
        let stream = match config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => connect.await,
        }
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Self::from_stream(stream, config)
    }

    /// Wrap an already connected TCP stream.
    ///
    /// # Errors
    /// Returns `TransportError::Io` if socket options cannot be applied
    pub fn from_stream(stream: TcpStream, config: &TransportConfig) -> TransportResult<Self> {
        stream.set_nodelay(config.nodelay)?;
        let peer = stream.peer_addr()?;
        tracing::debug!("Connection established with {}", peer);
        Ok(Self { stream, peer })
    }

    /// Remote address of this connection
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Split into independently owned read and write halves.
    #[must_use]
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Listening TCP socket producing [`Connection`]s.
#[derive(Debug)]
pub struct ConnectionListener {
    listener: TcpListener,
    config: TransportConfig,
}

impl ConnectionListener {
    /// Bind to a local address.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the address cannot be bound
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: TransportConfig) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        tracing::info!("Listening on {}", listener.local_addr()?);
        Ok(Self { listener, config })
    }

    /// Wait for the next inbound connection.
    ///
    /// # Errors
    /// Returns `TransportError::Io` if accepting fails
    pub async fn accept(&self) -> TransportResult<Connection> {
        let (stream, _) = self.listener.accept().await?;
        Connection::from_stream(stream, &self.config)
    }

    /// Local address the listener is bound to.
    ///
    /// # Errors
    /// Returns `TransportError::Io` if the address cannot be determined
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
