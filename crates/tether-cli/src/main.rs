//! Tether CLI
//!
//! Encrypted, authenticated file transfer over a pre-shared-key channel.

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tether_cli::progress::format_bytes;
use tether_cli::shell::{self, HELP};
use tether_cli::{Client, Config, Server, Storage, keyfile};
use tether_crypto::SessionSecrets;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing_subscriber::EnvFilter;

/// Tether - encrypted, authenticated file transfer
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where to reach the server
#[derive(Args)]
struct Remote {
    /// Server address (host:port), overrides the config file
    #[arg(short, long)]
    server: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a fresh pre-shared key file
    Keygen {
        /// Output file, defaults to keys.key_file from the config
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Serve a directory to clients
    Serve {
        /// Listen address, overrides the config file
        #[arg(short, long)]
        bind: Option<String>,

        /// Directory to serve, overrides the config file
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// Open an interactive session
    Shell {
        #[command(flatten)]
        remote: Remote,
    },

    /// Show the available remote commands
    Help,

    /// List files on the server
    List {
        #[command(flatten)]
        remote: Remote,
    },

    /// Download a file
    Retr {
        /// Remote file name
        name: String,

        /// Download directory, overrides the config file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        remote: Remote,
    },

    /// Upload a file
    Stor {
        /// Local file to upload
        path: PathBuf,

        #[command(flatten)]
        remote: Remote,
    },

    /// Delete a file on the server
    Dele {
        /// Remote file name
        name: String,

        #[command(flatten)]
        remote: Remote,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(cli.config.as_deref())?;
    config.validate()?;

    // RUST_LOG wins over --verbose and the config file
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Keygen { output, force } => {
            generate_keys(output.as_deref(), force, &config)?;
        }
        Commands::Serve { bind, root } => {
            serve(bind, root, &config).await?;
        }
        Commands::Help => {
            println!("{HELP}");
        }
        Commands::Shell { remote } => {
            let mut client = connect(&remote, &config).await?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            shell::run(&mut client, stdin, &config.storage.download_dir).await?;
            client.close().await?;
        }
        Commands::List { remote } => {
            let mut client = connect(&remote, &config).await?;
            let files = client.list().await?;
            if files.is_empty() {
                println!("No files on server");
            }
            for file in files {
                println!("{:>12}  {}", format_bytes(file.size), file.name);
            }
            client.close().await?;
        }
        Commands::Retr {
            name,
            output,
            remote,
        } => {
            let dir = output.unwrap_or_else(|| config.storage.download_dir.clone());
            let mut client = connect(&remote, &config).await?;
            let path = client.retrieve(&name, &dir).await?;
            println!("Saved {}", path.display());
            client.close().await?;
        }
        Commands::Stor { path, remote } => {
            let mut client = connect(&remote, &config).await?;
            let size = client.store(&path).await?;
            println!("Stored {} ({})", path.display(), format_bytes(size));
            client.close().await?;
        }
        Commands::Dele { name, remote } => {
            let mut client = connect(&remote, &config).await?;
            client.delete(&name).await?;
            println!("Deleted {name}");
            client.close().await?;
        }
    }

    Ok(())
}

/// Write a new key file for both peers to share
fn generate_keys(output: Option<&Path>, force: bool, config: &Config) -> anyhow::Result<()> {
    let path = output.unwrap_or(&config.keys.key_file);

    println!("Generating session secrets...");
    let secrets = SessionSecrets::generate()?;
    keyfile::write(path, &secrets, force)?;

    println!("Key file saved to: {}", path.display());
    println!("\nCopy it to the other peer over a trusted channel and keep it private.");
    Ok(())
}

/// Run the file server until Ctrl+C
async fn serve(bind: Option<String>, root: Option<PathBuf>, config: &Config) -> anyhow::Result<()> {
    let bind = bind.unwrap_or_else(|| config.network.listen_addr.clone());
    let root = root.unwrap_or_else(|| config.storage.server_root.clone());

    let secrets = keyfile::read(&config.keys.key_file)?;
    let storage = Storage::open(&root, config.storage.max_file_size)?;
    let server = Server::bind(&bind, config.transport(), secrets, storage).await?;

    println!("Tether server");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Listen: {}", server.local_addr()?);
    println!("Root: {}", root.display());
    println!("Max file size: {}", format_bytes(config.storage.max_file_size));
    println!("Press Ctrl+C to stop");

    tokio::select! {
        () = server.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            println!("\nShutting down...");
        }
    }
    Ok(())
}

async fn connect(
    remote: &Remote,
    config: &Config,
) -> anyhow::Result<Client<OwnedReadHalf, OwnedWriteHalf>> {
    let addr = remote
        .server
        .as_deref()
        .unwrap_or(&config.network.server_addr);
    let secrets = keyfile::read(&config.keys.key_file)?;

    let client = Client::connect(addr, &config.transport(), &secrets).await?;
    Ok(client
        .with_progress(true)
        .with_max_file_size(config.storage.max_file_size))
}
