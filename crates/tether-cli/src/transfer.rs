//! Streaming file bodies over a secure channel.

use crate::progress::TransferProgress;
use std::io;
use std::path::Path;
use tempfile::TempPath;
use tether_core::{ChannelError, MAX_PAYLOAD_SIZE, SecureChannel};
use tether_transport::{ConnectionRead, ConnectionWrite};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read exactly `size` bytes from `source` and send them in messages of at
/// most [`MAX_PAYLOAD_SIZE`] bytes.
///
/// # Errors
///
/// Returns an error if `source` fails or ends early, or if the channel
/// fails. Either way the peer is left expecting more bytes, so the
/// connection must be dropped.
pub async fn send_body<R, W, S>(
    channel: &mut SecureChannel<R, W>,
    source: &mut S,
    size: u64,
    progress: &TransferProgress,
) -> anyhow::Result<()>
where
    R: ConnectionRead,
    W: ConnectionWrite,
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; MAX_PAYLOAD_SIZE];
    let mut remaining = size;

    while remaining > 0 {
        let want = chunk_len(remaining, buf.len());
        source.read_exact(&mut buf[..want]).await?;
        channel.send(&buf[..want]).await?;
        remaining -= want as u64;
        progress.advance(want as u64);
    }
    Ok(())
}

/// Receive exactly `size` body bytes and write them to `sink`.
///
/// A failing sink does not stop the transfer: the remaining bytes are
/// still pulled off the channel so the session stays in step, and the sink
/// error is handed back in the inner result.
///
/// # Errors
///
/// The outer error is a channel failure; the connection is unusable.
pub async fn recv_body<R, W, S>(
    channel: &mut SecureChannel<R, W>,
    sink: &mut S,
    size: u64,
    progress: &TransferProgress,
) -> Result<io::Result<()>, ChannelError>
where
    R: ConnectionRead,
    W: ConnectionWrite,
    S: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_PAYLOAD_SIZE];
    let mut remaining = size;
    let mut written = Ok(());

    while remaining > 0 {
        let want = chunk_len(remaining, buf.len());
        let n = channel.recv(&mut buf[..want]).await?;
        if written.is_ok() {
            written = sink.write_all(&buf[..n]).await;
            if let Err(e) = &written {
                tracing::warn!("Discarding rest of body after write error: {}", e);
            }
        }
        remaining -= n as u64;
        progress.advance(n as u64);
    }

    if written.is_ok() {
        written = sink.flush().await;
    }
    Ok(written)
}

/// Create a hidden partial file for `name` inside `dir`.
///
/// Every call gets its own uniquely named `.{name}.XXXXXX.part` file, so
/// concurrent transfers of the same name never share one. The file is
/// removed when the returned [`TempPath`] is dropped without being
/// persisted.
///
/// # Errors
///
/// Returns an error if the file cannot be created.
pub fn partial_file(dir: &Path, name: &str) -> io::Result<(tokio::fs::File, TempPath)> {
    let (file, path) = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".part")
        .tempfile_in(dir)?
        .into_parts();
    Ok((tokio::fs::File::from_std(file), path))
}

fn chunk_len(remaining: u64, max: usize) -> usize {
    usize::try_from(remaining).map_or(max, |r| r.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tether_crypto::SessionSecrets;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    type DuplexChannel = SecureChannel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn pair() -> (DuplexChannel, DuplexChannel) {
        let secrets = SessionSecrets::generate().unwrap();
        let (a, b) = tokio::io::duplex(256 * 1024);
        (
            SecureChannel::from_stream(a, &secrets).unwrap(),
            SecureChannel::from_stream(b, &secrets).unwrap(),
        )
    }

    /// Sink that fails every write
    struct BrokenSink;

    impl AsyncWrite for BrokenSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::other("disk full")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_chunk_len() {
        assert_eq!(chunk_len(10, 4096), 10);
        assert_eq!(chunk_len(10_000, 4096), 4096);
        assert_eq!(chunk_len(u64::MAX, 4096), 4096);
    }

    #[test]
    fn test_partial_files_are_distinct_and_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let (_a, first) = partial_file(dir.path(), "same.bin").unwrap();
        let (_b, second) = partial_file(dir.path(), "same.bin").unwrap();
        assert_ne!(first.to_path_buf(), second.to_path_buf());

        let name = first.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with(".same.bin."));
        assert!(name.ends_with(".part"));

        drop(first);
        drop(second);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_body_roundtrip() {
        let (mut alice, mut bob) = pair();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7) as u8).collect();

        let progress = TransferProgress::hidden(data.len() as u64);
        send_body(&mut alice, &mut data.as_slice(), data.len() as u64, &progress)
            .await
            .unwrap();
        assert_eq!(alice.sender().stats().messages, 3);

        let mut out = Vec::new();
        let received = TransferProgress::hidden(data.len() as u64);
        recv_body(&mut bob, &mut out, data.len() as u64, &received)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out, data);
        assert_eq!(received.position(), 10_000);
    }

    #[tokio::test]
    async fn test_short_source_fails() {
        let (mut alice, _bob) = pair();
        let progress = TransferProgress::hidden(100);
        let result = send_body(&mut alice, &mut &b"only ten b"[..], 100, &progress).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_broken_sink_still_drains() {
        let (mut alice, mut bob) = pair();
        let progress = TransferProgress::hidden(0);

        send_body(&mut alice, &mut &[1u8; 5000][..], 5000, &progress)
            .await
            .unwrap();
        alice.send(b"next").await.unwrap();

        let written = recv_body(&mut bob, &mut BrokenSink, 5000, &progress)
            .await
            .unwrap();
        assert!(written.is_err());
        assert_eq!(bob.recv_message().await.unwrap(), b"next");
    }
}
