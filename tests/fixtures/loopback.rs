//! Secure channels and a file server over real loopback TCP.
//!
//! Every fixture binds port 0 so tests can run concurrently.
//!
//! # Example
//!
//! ```no_run
//! use tether_integration_tests::fixtures::tcp_channel_pair;
//! use tether_crypto::SessionSecrets;
//!
//! # async fn demo() {
//! let secrets = SessionSecrets::generate().unwrap();
//! let (mut alice, mut bob) = tcp_channel_pair(&secrets).await;
//! alice.send(b"ping").await.unwrap();
//! assert_eq!(bob.recv_message().await.unwrap(), b"ping");
//! # }
//! ```

use std::net::SocketAddr;
use tempfile::TempDir;
use tether_cli::{Client, Server, Storage};
use tether_core::SecureChannel;
use tether_crypto::SessionSecrets;
use tether_transport::{Connection, ConnectionListener, TransportConfig};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;

/// Secure channel over a split TCP stream
pub type TcpChannel = SecureChannel<OwnedReadHalf, OwnedWriteHalf>;

/// Connect two secure channels over loopback TCP.
///
/// # Panics
///
/// Panics if the loopback socket cannot be set up.
pub async fn tcp_channel_pair(secrets: &SessionSecrets) -> (TcpChannel, TcpChannel) {
    let listener = ConnectionListener::bind("127.0.0.1:0", TransportConfig::default())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let client_config = TransportConfig::default();
    let (client, server) = tokio::join!(
        Connection::connect(addr, &client_config),
        listener.accept()
    );

    let (cr, cw) = client.unwrap().into_split();
    let (sr, sw) = server.unwrap().into_split();
    (
        SecureChannel::new(cr, cw, secrets).unwrap(),
        SecureChannel::new(sr, sw, secrets).unwrap(),
    )
}

/// A running file server over a temporary directory
pub struct ServerFixture {
    /// Address the server listens on
    pub addr: SocketAddr,
    /// Served directory
    pub root: TempDir,
    /// Secrets shared with clients
    pub secrets: SessionSecrets,
    handle: JoinHandle<()>,
}

impl ServerFixture {
    /// Start a server refusing files above `max_file_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if the server cannot be started.
    pub async fn start(max_file_size: u64) -> Self {
        let root = TempDir::new().unwrap();
        let secrets = SessionSecrets::generate().unwrap();
        let storage = Storage::open(root.path(), max_file_size).unwrap();

        let server = Server::bind(
            "127.0.0.1:0",
            TransportConfig::default(),
            secrets.clone(),
            storage,
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.run());

        Self {
            addr,
            root,
            secrets,
            handle,
        }
    }

    /// Connect a new client session.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn client(&self) -> anyhow::Result<Client<OwnedReadHalf, OwnedWriteHalf>> {
        Client::connect(
            &self.addr.to_string(),
            &TransportConfig::default(),
            &self.secrets,
        )
        .await
    }
}

impl Drop for ServerFixture {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
