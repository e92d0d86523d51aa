//! File-transfer client.

use crate::progress::TransferProgress;
use crate::protocol::{Request, Response, validate_file_name};
use crate::transfer::{partial_file, recv_body, send_body};
use anyhow::Context;
use std::path::{Path, PathBuf};
use tether_core::SecureChannel;
use tether_crypto::SessionSecrets;
use tether_transport::{Connection, ConnectionRead, ConnectionWrite, TransportConfig};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncRead;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// The server answered `ERR`
#[derive(Debug, Error)]
#[error("server refused request: {0}")]
pub struct Refused(pub String);

/// One entry of a remote listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// Client session over one secure channel
pub struct Client<R, W> {
    channel: SecureChannel<R, W>,
    show_progress: bool,
    max_file_size: u64,
    out_of_step: bool,
}

impl Client<OwnedReadHalf, OwnedWriteHalf> {
    /// Connect to a server over TCP.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the
    /// secrets are malformed.
    pub async fn connect(
        addr: &str,
        transport: &TransportConfig,
        secrets: &SessionSecrets,
    ) -> anyhow::Result<Self> {
        let conn = Connection::connect(addr, transport)
            .await
            .with_context(|| format!("Cannot connect to {addr}"))?;
        tracing::info!("Connected to {}", conn.peer_addr());
        let (reader, writer) = conn.into_split();
        Ok(Self::new(SecureChannel::new(reader, writer, secrets)?))
    }
}

impl<R: ConnectionRead, W: ConnectionWrite> Client<R, W> {
    /// Wrap an established channel. Progress bars are off and the file
    /// size limit is 1 GiB until configured otherwise.
    #[must_use]
    pub fn new(channel: SecureChannel<R, W>) -> Self {
        Self {
            channel,
            show_progress: false,
            max_file_size: 1 << 30,
            out_of_step: false,
        }
    }

    /// Draw progress bars for file transfers
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Refuse files larger than `bytes` in either direction
    #[must_use]
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    fn progress(&self, size: u64, name: &str) -> TransferProgress {
        if self.show_progress {
            TransferProgress::new(size, name)
        } else {
            TransferProgress::hidden(size)
        }
    }

    /// Whether further requests can be made on this session.
    ///
    /// False once the channel is faulted, or once an upload stopped part way
    /// through its body and the session was closed.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.out_of_step && !self.channel.is_faulted()
    }

    /// The server is still expecting body bytes that will never come, so
    /// anything sent next would be read as body. Close the write side so the
    /// server drops the session and refuse all further requests.
    async fn abandon_session(&mut self) {
        self.out_of_step = true;
        if let Err(e) = self.channel.close().await {
            tracing::debug!("Close after failed upload: {}", e);
        }
    }

    async fn request(&mut self, request: &Request) -> anyhow::Result<Response> {
        if !self.is_usable() {
            anyhow::bail!("session is closed; reconnect to continue");
        }
        tracing::debug!("> {}", request);
        self.channel.send(&request.encode()).await?;
        let response = Response::parse(&self.channel.recv_message().await?)?;
        tracing::debug!("< {:?}", response);
        Ok(response)
    }

    /// List files on the server.
    ///
    /// # Errors
    ///
    /// Returns [`Refused`] if the server answers `ERR`, or any channel or
    /// protocol error.
    pub async fn list(&mut self) -> anyhow::Result<Vec<RemoteFile>> {
        let size = match self.request(&Request::List).await? {
            Response::Ok(Some(size)) => size,
            Response::Ok(None) => anyhow::bail!("LIST response is missing a size"),
            Response::Err(reason) => return Err(Refused(reason).into()),
        };
        if size > self.max_file_size {
            anyhow::bail!("listing of {} bytes exceeds the size limit", size);
        }

        let mut body = Vec::new();
        recv_body(&mut self.channel, &mut body, size, &TransferProgress::hidden(size)).await??;
        let text = String::from_utf8(body).context("listing is not valid UTF-8")?;

        text.lines()
            .map(|line| -> anyhow::Result<RemoteFile> {
                let (name, size) = line
                    .rsplit_once(' ')
                    .with_context(|| format!("malformed listing line {line:?}"))?;
                Ok(RemoteFile {
                    name: name.to_string(),
                    size: size
                        .parse()
                        .with_context(|| format!("malformed listing line {line:?}"))?,
                })
            })
            .collect()
    }

    /// Download `name` into `dir`, returning the path written.
    ///
    /// The body goes to a hidden partial file first and is renamed into
    /// place only once complete.
    ///
    /// # Errors
    ///
    /// Returns [`Refused`] if the server answers `ERR`, or an error if the
    /// file is too large, cannot be written, or the channel fails.
    pub async fn retrieve(&mut self, name: &str, dir: &Path) -> anyhow::Result<PathBuf> {
        validate_file_name(name)?;
        let size = match self.request(&Request::Retr { name: name.to_string() }).await? {
            Response::Ok(Some(size)) => size,
            Response::Ok(None) => anyhow::bail!("RETR response is missing a size"),
            Response::Err(reason) => return Err(Refused(reason).into()),
        };

        let progress = self.progress(size, name);
        if size > self.max_file_size {
            recv_body(&mut self.channel, &mut tokio::io::sink(), size, &progress).await??;
            progress.abandon();
            anyhow::bail!(
                "{} is {} bytes, above the limit of {}",
                name,
                size,
                self.max_file_size
            );
        }

        let target = dir.join(name);
        let created = match fs::create_dir_all(dir).await {
            Ok(()) => partial_file(dir, name),
            Err(e) => Err(e),
        };
        let (mut file, partial) = match created {
            Ok(created) => created,
            Err(e) => {
                // The body is already on its way; consume it to stay in step
                recv_body(&mut self.channel, &mut tokio::io::sink(), size, &progress).await??;
                progress.abandon();
                return Err(anyhow::Error::from(e)
                    .context(format!("Cannot create a partial file in {}", dir.display())));
            }
        };

        // Dropping `partial` removes the hidden file on every failure path
        let written = recv_body(&mut self.channel, &mut file, size, &progress).await;
        drop(file);
        let finished: anyhow::Result<()> = match written {
            Ok(Ok(())) => partial.persist(&target).map_err(|e| e.error.into()),
            Ok(Err(e)) => Err(anyhow::Error::from(e)),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = finished {
            progress.abandon();
            return Err(e.context(format!("Download of {name} failed")));
        }

        progress.finish_with_message(format!("Downloaded {name}"));
        tracing::info!("Retrieved {} ({} bytes)", name, size);
        Ok(target)
    }

    /// Upload the file at `path` under its own file name.
    ///
    /// Returns the number of bytes the server stored.
    ///
    /// # Errors
    ///
    /// Returns [`Refused`] if the server answers `ERR`, or an error if the
    /// path is not a regular file, cannot be read, is too large, or the
    /// channel fails.
    pub async fn store(&mut self, path: &Path) -> anyhow::Result<u64> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no usable file name", path.display()))?
            .to_string();
        validate_file_name(&name)?;

        let mut file = fs::File::open(path)
            .await
            .with_context(|| format!("Cannot open {}", path.display()))?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            anyhow::bail!("{} is not a regular file", path.display());
        }

        self.upload(&name, &mut file, metadata.len()).await
    }

    /// Upload exactly `size` bytes read from `source` as `name`.
    ///
    /// If `source` fails once the server has accepted the upload, the
    /// session is closed and [`Client::is_usable`] turns false.
    ///
    /// # Errors
    ///
    /// Returns [`Refused`] if the server answers `ERR`, or an error if
    /// `size` is above the limit, `source` fails or ends early, or the
    /// channel fails.
    pub async fn upload<S>(&mut self, name: &str, source: &mut S, size: u64) -> anyhow::Result<u64>
    where
        S: AsyncRead + Unpin,
    {
        validate_file_name(name)?;
        if size > self.max_file_size {
            anyhow::bail!(
                "{} is {} bytes, above the limit of {}",
                name,
                size,
                self.max_file_size
            );
        }

        let request = Request::Stor {
            name: name.to_string(),
            size,
        };
        match self.request(&request).await? {
            Response::Ok(_) => {}
            Response::Err(reason) => return Err(Refused(reason).into()),
        }

        let progress = self.progress(size, name);
        if let Err(e) = send_body(&mut self.channel, source, size, &progress).await {
            progress.abandon();
            self.abandon_session().await;
            return Err(e.context(format!("Upload of {name} stopped part way; session closed")));
        }

        let response = Response::parse(&self.channel.recv_message().await?)?;
        match response {
            Response::Ok(stored) => {
                progress.finish_with_message(format!("Uploaded {name}"));
                tracing::info!("Stored {} ({} bytes)", name, size);
                Ok(stored.unwrap_or(size))
            }
            Response::Err(reason) => {
                progress.abandon();
                Err(Refused(reason).into())
            }
        }
    }

    /// Delete `name` on the server.
    ///
    /// # Errors
    ///
    /// Returns [`Refused`] if the server answers `ERR`, or any channel or
    /// protocol error.
    pub async fn delete(&mut self, name: &str) -> anyhow::Result<()> {
        validate_file_name(name)?;
        match self.request(&Request::Dele { name: name.to_string() }).await? {
            Response::Ok(_) => Ok(()),
            Response::Err(reason) => Err(Refused(reason).into()),
        }
    }

    /// End the session so the server sees a clean close.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be shut down.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.channel.close().await?;
        Ok(())
    }

    /// Underlying channel
    #[must_use]
    pub fn channel(&self) -> &SecureChannel<R, W> {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{Storage, serve_session};
    use std::time::Duration;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    type DuplexClient = Client<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn start(storage: Storage) -> (DuplexClient, JoinHandle<anyhow::Result<()>>) {
        let secrets = SessionSecrets::generate().unwrap();
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut server = SecureChannel::from_stream(b, &secrets).unwrap();
        let serving = tokio::spawn(async move { serve_session(&mut server, &storage).await });
        let client = Client::new(SecureChannel::from_stream(a, &secrets).unwrap());
        (client, serving)
    }

    #[tokio::test]
    async fn test_upload_list_download_delete() {
        let served = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let (mut client, serving) = start(Storage::open(served.path(), 1 << 20).unwrap());

        let data: Vec<u8> = (0..9_000u32).map(|i| (i % 253) as u8).collect();
        let source = local.path().join("data.bin");
        std::fs::write(&source, &data).unwrap();

        assert_eq!(client.store(&source).await.unwrap(), 9_000);
        assert_eq!(
            client.list().await.unwrap(),
            vec![RemoteFile {
                name: "data.bin".to_string(),
                size: 9_000
            }]
        );

        let downloads = local.path().join("downloads");
        let target = client.retrieve("data.bin", &downloads).await.unwrap();
        assert_eq!(target, downloads.join("data.bin"));
        assert_eq!(std::fs::read(&target).unwrap(), data);

        client.delete("data.bin").await.unwrap();
        assert!(client.list().await.unwrap().is_empty());

        client.close().await.unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_refusals_keep_session_alive() {
        let served = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let (mut client, serving) = start(Storage::open(served.path(), 1 << 20).unwrap());

        let err = client.retrieve("absent.txt", local.path()).await.unwrap_err();
        assert_eq!(err.downcast_ref::<Refused>().unwrap().0, "no such file");

        let err = client.delete("absent.txt").await.unwrap_err();
        assert!(err.downcast_ref::<Refused>().is_some());

        assert!(client.list().await.unwrap().is_empty());
        assert!(!client.channel().is_faulted());

        client.close().await.unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_empty_file_roundtrip() {
        let served = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let (mut client, serving) = start(Storage::open(served.path(), 1 << 20).unwrap());

        let source = local.path().join("empty");
        std::fs::write(&source, b"").unwrap();
        assert_eq!(client.store(&source).await.unwrap(), 0);

        let target = client.retrieve("empty", &local.path().join("out")).await.unwrap();
        assert_eq!(std::fs::read(target).unwrap(), b"");

        client.close().await.unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversize_download_is_drained() {
        let served = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        std::fs::write(served.path().join("big.bin"), vec![0u8; 5000]).unwrap();

        let (client, serving) = start(Storage::open(served.path(), 1 << 20).unwrap());
        let mut client = client.with_max_file_size(1000);

        assert!(client.retrieve("big.bin", local.path()).await.is_err());
        assert!(!local.path().join("big.bin").exists());

        // Still in step with the server
        assert_eq!(client.list().await.unwrap().len(), 1);

        client.close().await.unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_directory_is_not_uploaded() {
        let served = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let folder = local.path().join("folder");
        std::fs::create_dir(&folder).unwrap();
        let (mut client, serving) = start(Storage::open(served.path(), 1 << 20).unwrap());

        assert!(client.store(&folder).await.is_err());
        assert!(client.is_usable());
        assert!(client.list().await.unwrap().is_empty());

        client.close().await.unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_upload_closes_session() {
        let served = tempfile::tempdir().unwrap();
        let (mut client, serving) = start(Storage::open(served.path(), 1 << 20).unwrap());

        // Source ends after 9 of the announced 100 bytes
        let err = client
            .upload("short.bin", &mut &b"only nine"[..], 100)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("short.bin"));
        assert!(!client.is_usable());

        let next = tokio::time::timeout(Duration::from_secs(5), client.list())
            .await
            .unwrap();
        assert!(next.is_err());

        // Server saw the stream end mid-body and dropped the session
        assert!(serving.await.unwrap().is_err());
        assert_eq!(std::fs::read_dir(served.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_local_validation() {
        let served = tempfile::tempdir().unwrap();
        let (mut client, _serving) = start(Storage::open(served.path(), 1 << 20).unwrap());

        assert!(client.retrieve("../escape", Path::new(".")).await.is_err());
        assert!(client.delete("a/b").await.is_err());
        assert_eq!(client.channel().sender().stats().messages, 0);
    }
}
