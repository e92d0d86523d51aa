//! The secure channel.
//!
//! A [`SecureChannel`] owns one [`ChannelSender`] and one
//! [`ChannelReceiver`]. Each half keeps its own cipher state, sequence
//! counter and buffers, so the halves can be split off and driven from
//! different tasks without sharing any mutable state.
//!
//! ## Send pipeline
//!
//! 1. Reject plaintext larger than the configured maximum (no state change)
//! 2. Seal a header frame over `length || sequence`
//! 3. Encrypt the plaintext with the persistent encrypt state
//! 4. Seal a payload frame over `sequence || ciphertext`
//! 5. Write header, payload frame and ciphertext, in that order
//!
//! ## Receive pipeline
//!
//! When the decode buffer is drained, the next message is pulled off the
//! wire: header MAC, declared length and header sequence are checked before
//! anything else is read; then the payload frame and ciphertext are read and
//! the payload MAC and sequence are checked. Only a fully verified message is
//! fed through the decrypt state. Callers then drain the plaintext in
//! whatever sizes they ask for.
//!
//! Any failure moves the direction to a terminal faulted state. On an
//! unsplit channel a failure in either direction faults both.

use crate::error::{ChannelError, FrameKind};
use crate::frame::{HeaderFrame, PayloadFrame};
use crate::sequence::SequenceCounter;
use crate::{HEADER_FRAME_SIZE, MAX_PAYLOAD_SIZE, MESSAGE_OVERHEAD, PAYLOAD_FRAME_SIZE};
use tether_crypto::{Authenticator, SessionSecrets, StreamDecryptor, StreamEncryptor};
use tether_transport::{ConnectionRead, ConnectionWrite, TransportError};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use zeroize::Zeroizing;

/// Channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Largest plaintext per message, enforced on send and on receive.
    /// Must be between 1 and [`MAX_PAYLOAD_SIZE`].
    pub max_payload: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }
}

impl ChannelConfig {
    /// Check the payload bound.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::InvalidConfig` if `max_payload` is zero or
    /// above [`MAX_PAYLOAD_SIZE`].
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.max_payload == 0 || self.max_payload > MAX_PAYLOAD_SIZE {
            return Err(ChannelError::InvalidConfig {
                max_payload: self.max_payload,
                limit: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(())
    }
}

/// Per-direction traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Messages sent or accepted
    pub messages: u64,
    /// Plaintext bytes carried by those messages
    pub payload_bytes: u64,
    /// Bytes on the wire including both sub-frames
    pub wire_bytes: u64,
}

impl ChannelStats {
    fn record(&mut self, payload_len: usize) {
        self.messages += 1;
        self.payload_bytes += payload_len as u64;
        self.wire_bytes += (payload_len + MESSAGE_OVERHEAD) as u64;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionState {
    Open,
    Faulted,
}

#[cfg(feature = "trace-frames")]
fn trace_frame(direction: &str, label: &str, bytes: &[u8]) {
    tracing::trace!("{} {} ({} bytes): {}", direction, label, bytes.len(), hex::encode(bytes));
}

#[cfg(not(feature = "trace-frames"))]
fn trace_frame(_direction: &str, _label: &str, _bytes: &[u8]) {}

async fn write_frame<W: ConnectionWrite>(conn: &mut W, bytes: &[u8]) -> Result<usize, ChannelError> {
    let written = conn.send(bytes).await.map_err(ChannelError::Send)?;
    if written != bytes.len() {
        return Err(ChannelError::Send(TransportError::Incomplete {
            expected: bytes.len(),
            actual: written,
        }));
    }
    Ok(written)
}

async fn read_frame<R: ConnectionRead>(conn: &mut R, buf: &mut [u8]) -> Result<(), ChannelError> {
    let read = conn.recv(buf).await.map_err(ChannelError::Receive)?;
    if read != buf.len() {
        return Err(ChannelError::Receive(TransportError::Incomplete {
            expected: buf.len(),
            actual: read,
        }));
    }
    Ok(())
}

/// Sending half: encrypt state, outbound counter and auth key.
pub struct ChannelSender<W> {
    conn: W,
    encryptor: StreamEncryptor,
    auth: Authenticator,
    sequence: SequenceCounter,
    max_payload: usize,
    ciphertext: Vec<u8>,
    state: DirectionState,
    stats: ChannelStats,
}

impl<W: ConnectionWrite> ChannelSender<W> {
    /// Create a sending half over `conn`.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::InvalidConfig` for a bad payload bound, or
    /// `ChannelError::CryptoComputation` if the secrets have the wrong
    /// sizes or the cipher cannot be initialized.
    pub fn new(
        conn: W,
        secrets: &SessionSecrets,
        config: &ChannelConfig,
    ) -> Result<Self, ChannelError> {
        config.validate()?;
        Ok(Self {
            conn,
            encryptor: StreamEncryptor::new(secrets.session_key(), secrets.iv())?,
            auth: Authenticator::new(secrets.auth_key().clone())?,
            sequence: SequenceCounter::new(),
            max_payload: config.max_payload,
            ciphertext: Vec::with_capacity(config.max_payload),
            state: DirectionState::Open,
            stats: ChannelStats::default(),
        })
    }

    /// Encrypt, authenticate and transmit one message.
    ///
    /// Returns the total number of bytes written to the connection
    /// (`76 + plaintext.len()`).
    ///
    /// # Errors
    ///
    /// - `PayloadTooLarge` if `plaintext` exceeds the maximum; nothing is
    ///   sent and the channel stays usable
    /// - `Send` if the transport fails; the sender is faulted
    /// - `CryptoComputation` / `SequenceExhausted`; the sender is faulted
    /// - `Faulted` if an earlier call already failed
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<usize, ChannelError> {
        if self.state == DirectionState::Faulted {
            return Err(ChannelError::Faulted);
        }

        let too_large = ChannelError::PayloadTooLarge {
            size: plaintext.len(),
            max: self.max_payload,
        };
        if plaintext.len() > self.max_payload {
            return Err(too_large);
        }
        let length = u32::try_from(plaintext.len()).map_err(|_| too_large)?;

        match self.transmit(length, plaintext).await {
            Ok(sent) => {
                self.stats.record(plaintext.len());
                Ok(sent)
            }
            Err(e) => {
                tracing::debug!("Send direction faulted: {}", e);
                self.state = DirectionState::Faulted;
                Err(e)
            }
        }
    }

    async fn transmit(&mut self, length: u32, plaintext: &[u8]) -> Result<usize, ChannelError> {
        let header = HeaderFrame::seal(length, self.sequence.advance()?, &self.auth)?;

        self.ciphertext.clear();
        self.ciphertext.extend_from_slice(plaintext);
        self.encryptor.apply(&mut self.ciphertext);

        let payload = PayloadFrame::seal(self.sequence.advance()?, &self.ciphertext, &self.auth)?;

        let header_bytes = header.encode();
        let payload_bytes = payload.encode();
        trace_frame("send", "header", &header_bytes);
        trace_frame("send", "payload", &payload_bytes);
        trace_frame("send", "ciphertext", &self.ciphertext);

        let mut sent = write_frame(&mut self.conn, &header_bytes).await?;
        sent += write_frame(&mut self.conn, &payload_bytes).await?;
        sent += write_frame(&mut self.conn, &self.ciphertext).await?;
        Ok(sent)
    }

    /// Send `data` as consecutive messages of at most `max_payload` bytes.
    ///
    /// Sends nothing for empty `data`. Returns total bytes written.
    ///
    /// # Errors
    ///
    /// Stops at the first failing message; see [`ChannelSender::send`].
    pub async fn send_all(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        let mut sent = 0;
        for chunk in data.chunks(self.max_payload) {
            sent += self.send(chunk).await?;
        }
        Ok(sent)
    }

    /// Shut down the underlying write direction.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Send` if the transport cannot be shut down.
    pub async fn close(&mut self) -> Result<(), ChannelError> {
        self.conn.close().await.map_err(ChannelError::Send)
    }
}

impl<W> ChannelSender<W> {
    /// Next outbound sequence number; `2k` after `k` messages.
    #[must_use]
    pub fn outbound_sequence(&self) -> u64 {
        self.sequence.value()
    }

    /// Traffic counters
    #[must_use]
    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Whether this half refuses further use
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.state == DirectionState::Faulted
    }

    /// Configured maximum payload
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Borrow the underlying connection
    #[must_use]
    pub fn get_ref(&self) -> &W {
        &self.conn
    }
}

/// Receiving half: decrypt state, inbound counter and decode buffer.
pub struct ChannelReceiver<R> {
    conn: R,
    decryptor: StreamDecryptor,
    auth: Authenticator,
    sequence: SequenceCounter,
    max_payload: usize,
    ciphertext: Vec<u8>,
    plaintext: Zeroizing<Vec<u8>>,
    consumed: usize,
    state: DirectionState,
    stats: ChannelStats,
}

impl<R: ConnectionRead> ChannelReceiver<R> {
    /// Create a receiving half over `conn`.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::InvalidConfig` for a bad payload bound, or
    /// `ChannelError::CryptoComputation` if the secrets have the wrong
    /// sizes or the cipher cannot be initialized.
    pub fn new(
        conn: R,
        secrets: &SessionSecrets,
        config: &ChannelConfig,
    ) -> Result<Self, ChannelError> {
        config.validate()?;
        Ok(Self {
            conn,
            decryptor: StreamDecryptor::new(secrets.session_key(), secrets.iv())?,
            auth: Authenticator::new(secrets.auth_key().clone())?,
            sequence: SequenceCounter::new(),
            max_payload: config.max_payload,
            ciphertext: Vec::with_capacity(config.max_payload),
            plaintext: Zeroizing::new(Vec::with_capacity(config.max_payload)),
            consumed: 0,
            state: DirectionState::Open,
            stats: ChannelStats::default(),
        })
    }

    /// Copy up to `buf.len()` plaintext bytes into `buf`.
    ///
    /// Serves bytes left over from the current message first; only when
    /// that is drained does it block on the connection for the next one.
    /// Returns the number of bytes copied, which is `0` only for an empty
    /// message or an empty `buf`.
    ///
    /// # Errors
    ///
    /// - `Receive` if the transport fails or ends mid-message
    ///   (`is_closed()` is true when it ended cleanly between messages)
    /// - `Authentication`, `Sequence`, `ProtocolViolation` for a bad frame
    /// - `Faulted` if an earlier call already failed
    ///
    /// All of these leave the receiver faulted.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        self.fill().await?;

        let n = self.buffered().min(buf.len());
        buf[..n].copy_from_slice(&self.plaintext[self.consumed..self.consumed + n]);
        self.consumed += n;
        Ok(n)
    }

    /// Receive until `buf` is full, across as many messages as needed.
    ///
    /// # Errors
    ///
    /// See [`ChannelReceiver::recv`].
    pub async fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.recv(&mut buf[filled..]).await?;
        }
        Ok(())
    }

    /// Take the rest of the current message, fetching a new one if the
    /// buffer is drained.
    ///
    /// # Errors
    ///
    /// See [`ChannelReceiver::recv`].
    pub async fn recv_message(&mut self) -> Result<Vec<u8>, ChannelError> {
        self.fill().await?;

        let message = self.plaintext[self.consumed..].to_vec();
        self.consumed = self.plaintext.len();
        Ok(message)
    }

    async fn fill(&mut self) -> Result<(), ChannelError> {
        if self.state == DirectionState::Faulted {
            return Err(ChannelError::Faulted);
        }
        if self.buffered() > 0 {
            return Ok(());
        }

        if let Err(e) = self.fetch().await {
            if e.is_closed() {
                tracing::debug!("Peer closed the connection");
            } else {
                tracing::debug!("Receive direction faulted: {}", e);
            }
            self.state = DirectionState::Faulted;
            return Err(e);
        }
        Ok(())
    }

    async fn fetch(&mut self) -> Result<(), ChannelError> {
        let mut header_bytes = [0u8; HEADER_FRAME_SIZE];
        let read = self
            .conn
            .recv(&mut header_bytes)
            .await
            .map_err(ChannelError::Receive)?;
        if read == 0 {
            return Err(ChannelError::Receive(TransportError::Closed));
        }
        if read != HEADER_FRAME_SIZE {
            return Err(ChannelError::Receive(TransportError::Incomplete {
                expected: HEADER_FRAME_SIZE,
                actual: read,
            }));
        }
        trace_frame("recv", "header", &header_bytes);

        let header = HeaderFrame::decode(&header_bytes);
        if !header.verify(&self.auth)? {
            tracing::warn!("Rejected {}: bad hmac", FrameKind::Header);
            return Err(ChannelError::Authentication {
                frame: FrameKind::Header,
            });
        }
        if header.length as usize > self.max_payload {
            tracing::warn!(
                "Rejected {}: length {} exceeds {}",
                FrameKind::Header,
                header.length,
                self.max_payload
            );
            return Err(ChannelError::ProtocolViolation {
                length: header.length,
                max: self.max_payload,
            });
        }
        self.sequence
            .expect(FrameKind::Header, header.sequence_number)
            .inspect_err(|e| tracing::warn!("Rejected {}", e))?;

        let mut payload_bytes = [0u8; PAYLOAD_FRAME_SIZE];
        read_frame(&mut self.conn, &mut payload_bytes).await?;
        trace_frame("recv", "payload", &payload_bytes);
        let payload = PayloadFrame::decode(&payload_bytes);

        self.ciphertext.resize(header.length as usize, 0);
        read_frame(&mut self.conn, &mut self.ciphertext).await?;
        trace_frame("recv", "ciphertext", &self.ciphertext);

        if !payload.verify(&self.auth, &self.ciphertext)? {
            tracing::warn!("Rejected {}: bad hmac", FrameKind::Payload);
            return Err(ChannelError::Authentication {
                frame: FrameKind::Payload,
            });
        }
        self.sequence
            .expect(FrameKind::Payload, payload.sequence_number)
            .inspect_err(|e| tracing::warn!("Rejected {}", e))?;

        // Verified: only now may the ciphertext advance the decrypt state
        self.plaintext.clear();
        self.plaintext.extend_from_slice(&self.ciphertext);
        self.decryptor.apply(&mut self.plaintext);
        self.consumed = 0;
        self.stats.record(self.plaintext.len());
        trace_frame("recv", "plaintext", &self.plaintext);

        Ok(())
    }
}

impl<R> ChannelReceiver<R> {
    /// Plaintext bytes of the current message not yet handed out
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.plaintext.len() - self.consumed
    }

    /// Next expected inbound sequence number; `2k` after `k` messages.
    #[must_use]
    pub fn inbound_sequence(&self) -> u64 {
        self.sequence.value()
    }

    /// Traffic counters
    #[must_use]
    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Whether this half refuses further use
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.state == DirectionState::Faulted
    }

    /// Configured maximum payload
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

/// Duplex secure channel over one connection.
///
/// Created once per connection from the session secrets and discarded with
/// it. Dropping the channel wipes both cipher states, the auth key copies
/// and the decode buffer.
pub struct SecureChannel<R, W> {
    sender: ChannelSender<W>,
    receiver: ChannelReceiver<R>,
}

impl<R: ConnectionRead, W: ConnectionWrite> SecureChannel<R, W> {
    /// Create a channel from separate read and write halves.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::CryptoComputation` if the secrets are malformed.
    pub fn new(reader: R, writer: W, secrets: &SessionSecrets) -> Result<Self, ChannelError> {
        Self::with_config(reader, writer, secrets, &ChannelConfig::default())
    }

    /// Create a channel with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::InvalidConfig` if `config.max_payload` is out
    /// of range, or `ChannelError::CryptoComputation` if the secrets are
    /// malformed.
    pub fn with_config(
        reader: R,
        writer: W,
        secrets: &SessionSecrets,
        config: &ChannelConfig,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            sender: ChannelSender::new(writer, secrets, config)?,
            receiver: ChannelReceiver::new(reader, secrets, config)?,
        })
    }

    /// Send one message. See [`ChannelSender::send`].
    ///
    /// # Errors
    ///
    /// Fails with `Faulted` if either direction has failed before.
    pub async fn send(&mut self, plaintext: &[u8]) -> Result<usize, ChannelError> {
        self.ensure_open()?;
        let result = self.sender.send(plaintext).await;
        self.poison_on_fatal(&result);
        result
    }

    /// Send `data` split into maximum-size messages. See [`ChannelSender::send_all`].
    ///
    /// # Errors
    ///
    /// Fails with `Faulted` if either direction has failed before.
    pub async fn send_all(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        self.ensure_open()?;
        let result = self.sender.send_all(data).await;
        self.poison_on_fatal(&result);
        result
    }

    /// Receive up to `buf.len()` bytes. See [`ChannelReceiver::recv`].
    ///
    /// # Errors
    ///
    /// Fails with `Faulted` if either direction has failed before.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        self.ensure_open()?;
        let result = self.receiver.recv(buf).await;
        self.poison_on_fatal(&result);
        result
    }

    /// Receive exactly `buf.len()` bytes. See [`ChannelReceiver::recv_exact`].
    ///
    /// # Errors
    ///
    /// Fails with `Faulted` if either direction has failed before.
    pub async fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let result = self.receiver.recv_exact(buf).await;
        self.poison_on_fatal(&result);
        result
    }

    /// Take the rest of the current message. See [`ChannelReceiver::recv_message`].
    ///
    /// # Errors
    ///
    /// Fails with `Faulted` if either direction has failed before.
    pub async fn recv_message(&mut self) -> Result<Vec<u8>, ChannelError> {
        self.ensure_open()?;
        let result = self.receiver.recv_message().await;
        self.poison_on_fatal(&result);
        result
    }

    /// Shut down the write direction so the peer sees end of stream.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Send` if the transport cannot be shut down.
    pub async fn close(&mut self) -> Result<(), ChannelError> {
        self.sender.close().await
    }

    /// Separate the two directions so they can be driven concurrently.
    ///
    /// After splitting, a failure faults only the half that raised it.
    #[must_use]
    pub fn into_split(self) -> (ChannelSender<W>, ChannelReceiver<R>) {
        (self.sender, self.receiver)
    }
}

impl<R, W> SecureChannel<R, W> {
    /// Whether either direction has failed
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.sender.is_faulted() || self.receiver.is_faulted()
    }

    /// Sending half
    #[must_use]
    pub fn sender(&self) -> &ChannelSender<W> {
        &self.sender
    }

    /// Receiving half
    #[must_use]
    pub fn receiver(&self) -> &ChannelReceiver<R> {
        &self.receiver
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.is_faulted() {
            return Err(ChannelError::Faulted);
        }
        Ok(())
    }

    fn poison_on_fatal<T>(&mut self, result: &Result<T, ChannelError>) {
        if matches!(result, Err(e) if e.is_fatal()) {
            self.sender.state = DirectionState::Faulted;
            self.receiver.state = DirectionState::Faulted;
        }
    }
}

impl<S> SecureChannel<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Create a channel over a single bidirectional byte stream.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::CryptoComputation` if the secrets are malformed.
    pub fn from_stream(stream: S, secrets: &SessionSecrets) -> Result<Self, ChannelError> {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, secrets)
    }
}
