//! File-transfer server.
//!
//! One task per accepted connection, each with its own [`SecureChannel`]
//! built from the shared pre-shared secrets. Application-level problems
//! (unknown file, bad request, size limit) are answered with `ERR` and the
//! session continues; any channel error ends the session.

use crate::progress::TransferProgress;
use crate::protocol::{Request, Response, validate_file_name};
use crate::transfer::{partial_file, recv_body, send_body};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tether_core::SecureChannel;
use tether_crypto::SessionSecrets;
use tether_transport::{
    Connection, ConnectionListener, ConnectionRead, ConnectionWrite, TransportConfig,
};
use tokio::fs;

/// Directory of served files
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    max_file_size: u64,
}

impl Storage {
    /// Serve files from `root`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>, max_file_size: u64) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            max_file_size,
        })
    }

    /// Storage root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Listing body: one `name size` line per servable file, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub async fn listing(&self) -> io::Result<String> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if validate_file_name(&name).is_err() {
                continue;
            }
            let metadata = entry.metadata().await?;
            if metadata.is_file() {
                entries.push((name, metadata.len()));
            }
        }
        entries.sort();

        Ok(entries
            .iter()
            .map(|(name, size)| format!("{name} {size}\n"))
            .collect())
    }
}

/// Accepts connections and serves each on its own task.
pub struct Server {
    listener: ConnectionListener,
    secrets: Arc<SessionSecrets>,
    storage: Arc<Storage>,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        addr: &str,
        transport: TransportConfig,
        secrets: SessionSecrets,
        storage: Storage,
    ) -> anyhow::Result<Self> {
        let listener = ConnectionListener::bind(addr, transport).await?;
        Ok(Self {
            listener,
            secrets: Arc::new(secrets),
            storage: Arc::new(storage),
        })
    }

    /// Address the server is listening on
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be determined.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is cancelled.
    pub async fn run(self) {
        tracing::info!("Serving files from {}", self.storage.root().display());
        loop {
            let conn = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let secrets = Arc::clone(&self.secrets);
            let storage = Arc::clone(&self.storage);
            tokio::spawn(async move {
                handle_connection(conn, &secrets, &storage).await;
            });
        }
    }
}

async fn handle_connection(conn: Connection, secrets: &SessionSecrets, storage: &Storage) {
    let peer = conn.peer_addr();
    let (reader, writer) = conn.into_split();

    let mut channel = match SecureChannel::new(reader, writer, secrets) {
        Ok(channel) => channel,
        Err(e) => {
            tracing::error!("Cannot set up channel for {}: {}", peer, e);
            return;
        }
    };

    tracing::info!("Session opened with {}", peer);
    match serve_session(&mut channel, storage).await {
        Ok(()) => tracing::info!("Session with {} closed", peer),
        Err(e) => tracing::warn!("Session with {} dropped: {:#}", peer, e),
    }
    let stats = channel.receiver().stats();
    tracing::debug!(
        "{}: {} requests in, {} bytes on the wire",
        peer,
        stats.messages,
        stats.wire_bytes
    );
}

/// Serve requests on `channel` until the client closes it.
///
/// # Errors
///
/// Returns an error if the channel fails or a file body cannot be sent in
/// full. The connection must then be dropped.
pub async fn serve_session<R, W>(
    channel: &mut SecureChannel<R, W>,
    storage: &Storage,
) -> anyhow::Result<()>
where
    R: ConnectionRead,
    W: ConnectionWrite,
{
    loop {
        let message = match channel.recv_message().await {
            Ok(message) => message,
            Err(e) if e.is_closed() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let request = match Request::parse(&message) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Bad request: {}", e);
                respond(channel, Response::Err(e.to_string())).await?;
                continue;
            }
        };
        tracing::info!("{}", request);

        match request {
            Request::List => list(channel, storage).await?,
            Request::Retr { name } => retrieve(channel, storage, &name).await?,
            Request::Stor { name, size } => store(channel, storage, &name, size).await?,
            Request::Dele { name } => delete(channel, storage, &name).await?,
        }
    }
}

async fn respond<R, W>(channel: &mut SecureChannel<R, W>, response: Response) -> anyhow::Result<()>
where
    R: ConnectionRead,
    W: ConnectionWrite,
{
    channel.send(&response.encode()).await?;
    Ok(())
}

/// Client-facing description of a storage error, without local paths.
fn refusal(e: &io::Error) -> Response {
    let reason = match e.kind() {
        io::ErrorKind::NotFound => "no such file",
        io::ErrorKind::PermissionDenied => "permission denied",
        _ => "storage error",
    };
    Response::Err(reason.to_string())
}

async fn list<R, W>(channel: &mut SecureChannel<R, W>, storage: &Storage) -> anyhow::Result<()>
where
    R: ConnectionRead,
    W: ConnectionWrite,
{
    let listing = match storage.listing().await {
        Ok(listing) => listing,
        Err(e) => {
            tracing::warn!("Cannot list {}: {}", storage.root().display(), e);
            return respond(channel, refusal(&e)).await;
        }
    };

    respond(channel, Response::Ok(Some(listing.len() as u64))).await?;
    channel.send_all(listing.as_bytes()).await?;
    Ok(())
}

async fn retrieve<R, W>(
    channel: &mut SecureChannel<R, W>,
    storage: &Storage,
    name: &str,
) -> anyhow::Result<()>
where
    R: ConnectionRead,
    W: ConnectionWrite,
{
    let path = storage.path_for(name);
    let opened = async {
        let file = fs::File::open(&path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        Ok::<_, io::Error>((file, metadata.len()))
    };
    let (mut file, size) = match opened.await {
        Ok(opened) => opened,
        Err(e) => {
            tracing::debug!("Cannot open {}: {}", path.display(), e);
            return respond(channel, refusal(&e)).await;
        }
    };

    if size > storage.max_file_size {
        return respond(
            channel,
            Response::Err(format!("file exceeds maximum size of {} bytes", storage.max_file_size)),
        )
        .await;
    }

    respond(channel, Response::Ok(Some(size))).await?;
    send_body(channel, &mut file, size, &TransferProgress::hidden(size)).await?;
    tracing::info!("Sent {} ({} bytes)", name, size);
    Ok(())
}

async fn store<R, W>(
    channel: &mut SecureChannel<R, W>,
    storage: &Storage,
    name: &str,
    size: u64,
) -> anyhow::Result<()>
where
    R: ConnectionRead,
    W: ConnectionWrite,
{
    if size > storage.max_file_size {
        return respond(
            channel,
            Response::Err(format!("file exceeds maximum size of {} bytes", storage.max_file_size)),
        )
        .await;
    }

    let (mut file, partial) = match partial_file(&storage.root, name) {
        Ok(created) => created,
        Err(e) => {
            tracing::warn!("Cannot create partial file for {}: {}", name, e);
            return respond(channel, refusal(&e)).await;
        }
    };

    respond(channel, Response::Ok(None)).await?;
    let written = recv_body(channel, &mut file, size, &TransferProgress::hidden(size)).await;
    drop(file);

    // Dropping `partial` removes the hidden file on every failure path
    let stored = match written? {
        Ok(()) => partial.persist(storage.path_for(name)).map_err(|e| e.error),
        Err(e) => Err(e),
    };
    match stored {
        Ok(()) => {
            tracing::info!("Stored {} ({} bytes)", name, size);
            respond(channel, Response::Ok(Some(size))).await
        }
        Err(e) => {
            tracing::warn!("Cannot store {}: {}", name, e);
            respond(channel, refusal(&e)).await
        }
    }
}

async fn delete<R, W>(
    channel: &mut SecureChannel<R, W>,
    storage: &Storage,
    name: &str,
) -> anyhow::Result<()>
where
    R: ConnectionRead,
    W: ConnectionWrite,
{
    match fs::remove_file(storage.path_for(name)).await {
        Ok(()) => {
            tracing::info!("Deleted {}", name);
            respond(channel, Response::Ok(None)).await
        }
        Err(e) => {
            tracing::debug!("Cannot delete {}: {}", name, e);
            respond(channel, refusal(&e)).await
        }
    }
}
