//! Interactive client shell.
//!
//! Reads one command per line and runs it over a single session, so many
//! transfers share one secure channel.

use crate::client::{Client, Refused};
use crate::progress::format_bytes;
use std::path::Path;
use tether_transport::{ConnectionRead, ConnectionWrite};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

const PROMPT: &str = "> ";

/// Help text shared by the shell and the `help` subcommand
pub const HELP: &str = "\
Commands:
  help           show this message
  rlist          list files on the server
  llist          list files in the download directory
  retr <name>    download a file from the server
  stor <path>    upload a local file
  dele <name>    delete a file on the server
  quit           end the session";

/// One parsed shell line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Print help
    Help,
    /// List remote files
    RemoteList,
    /// List downloaded files
    LocalList,
    /// Download a file
    Retr(String),
    /// Upload a file
    Stor(String),
    /// Delete a remote file
    Dele(String),
    /// End the session
    Quit,
    /// Blank line
    Nothing,
    /// Anything else
    Unknown(String),
}

impl ShellCommand {
    /// Parse one input line. Command words are case-insensitive.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Self::Nothing;
        };
        let argument = words.next().map(str::to_string);
        if words.next().is_some() {
            return Self::Unknown(line.trim().to_string());
        }

        match (command.to_ascii_lowercase().as_str(), argument) {
            ("help", None) => Self::Help,
            ("rlist", None) => Self::RemoteList,
            ("llist", None) => Self::LocalList,
            ("retr", Some(name)) => Self::Retr(name),
            ("stor", Some(path)) => Self::Stor(path),
            ("dele", Some(name)) => Self::Dele(name),
            ("quit" | "exit", None) => Self::Quit,
            _ => Self::Unknown(line.trim().to_string()),
        }
    }
}

/// Run commands from `input` until `quit` or end of input.
///
/// Refusals and local mistakes are printed and the shell carries on.
///
/// # Errors
///
/// Returns the first error that leaves the session unusable.
pub async fn run<R, W, I>(
    client: &mut Client<R, W>,
    input: I,
    download_dir: &Path,
) -> anyhow::Result<()>
where
    R: ConnectionRead,
    W: ConnectionWrite,
    I: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        print!("{PROMPT}");
        flush_stdout();
        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(());
        };

        let result = match ShellCommand::parse(&line) {
            ShellCommand::Nothing => Ok(()),
            ShellCommand::Help => {
                println!("{HELP}");
                Ok(())
            }
            ShellCommand::Quit => return Ok(()),
            ShellCommand::Unknown(text) => {
                println!("Unknown command: {text} (try 'help')");
                Ok(())
            }
            ShellCommand::LocalList => print_local(download_dir).await,
            ShellCommand::RemoteList => client.list().await.map(|files| {
                for file in files {
                    println!("{:>12}  {}", format_bytes(file.size), file.name);
                }
            }),
            ShellCommand::Retr(name) => client
                .retrieve(&name, download_dir)
                .await
                .map(|path| println!("Saved {}", path.display())),
            ShellCommand::Stor(path) => client
                .store(Path::new(&path))
                .await
                .map(|size| println!("Stored {} ({})", path, format_bytes(size))),
            ShellCommand::Dele(name) => client
                .delete(&name)
                .await
                .map(|()| println!("Deleted {name}")),
        };

        if let Err(e) = result {
            if !client.is_usable() {
                return Err(e);
            }
            match e.downcast_ref::<Refused>() {
                Some(refused) => println!("{refused}"),
                None => println!("Error: {e:#}"),
            }
        }
    }
}

async fn print_local(dir: &Path) -> anyhow::Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("{} is empty", dir.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if metadata.is_file() && !name.starts_with('.') {
            files.push((name, metadata.len()));
        }
    }
    files.sort();
    for (name, size) in files {
        println!("{:>12}  {}", format_bytes(size), name);
    }
    Ok(())
}

fn flush_stdout() {
    use std::io::Write;
    if let Err(e) = std::io::stdout().flush() {
        tracing::debug!("stdout flush failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{Storage, serve_session};
    use tether_core::SecureChannel;
    use tether_crypto::SessionSecrets;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ShellCommand::parse("help"), ShellCommand::Help);
        assert_eq!(ShellCommand::parse("  RLIST "), ShellCommand::RemoteList);
        assert_eq!(ShellCommand::parse("llist"), ShellCommand::LocalList);
        assert_eq!(
            ShellCommand::parse("retr a.txt"),
            ShellCommand::Retr("a.txt".to_string())
        );
        assert_eq!(
            ShellCommand::parse("stor /tmp/b.bin"),
            ShellCommand::Stor("/tmp/b.bin".to_string())
        );
        assert_eq!(
            ShellCommand::parse("dele c"),
            ShellCommand::Dele("c".to_string())
        );
        assert_eq!(ShellCommand::parse("quit"), ShellCommand::Quit);
        assert_eq!(ShellCommand::parse(""), ShellCommand::Nothing);
    }

    #[test]
    fn test_parse_rejects_bad_arity() {
        assert!(matches!(ShellCommand::parse("retr"), ShellCommand::Unknown(_)));
        assert!(matches!(ShellCommand::parse("rlist x"), ShellCommand::Unknown(_)));
        assert!(matches!(ShellCommand::parse("retr a b"), ShellCommand::Unknown(_)));
        assert!(matches!(ShellCommand::parse("mkdir x"), ShellCommand::Unknown(_)));
    }

    #[tokio::test]
    async fn test_script_runs_to_quit() {
        let served = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        std::fs::write(served.path().join("remote.txt"), b"from server").unwrap();
        let upload = local.path().join("upload.txt");
        std::fs::write(&upload, b"from client").unwrap();

        let secrets = SessionSecrets::generate().unwrap();
        let (a, b) = tokio::io::duplex(64 * 1024);
        let storage = Storage::open(served.path(), 1 << 20).unwrap();
        let mut server = SecureChannel::from_stream(b, &secrets).unwrap();
        let serving = tokio::spawn(async move { serve_session(&mut server, &storage).await });
        let mut client = Client::new(SecureChannel::from_stream(a, &secrets).unwrap());

        let downloads = local.path().join("downloads");
        let script = format!(
            "help\nrlist\nretr remote.txt\nretr missing.txt\nstor {}\nbogus\nllist\nquit\nrlist\n",
            upload.display()
        );
        run(&mut client, script.as_bytes(), &downloads).await.unwrap();

        assert_eq!(
            std::fs::read(downloads.join("remote.txt")).unwrap(),
            b"from server"
        );
        assert_eq!(
            std::fs::read(served.path().join("upload.txt")).unwrap(),
            b"from client"
        );
        // rlist, retr, refused retr and stor; nothing after quit
        assert_eq!(client.channel().receiver().stats().messages, 2 + 2 + 1 + 2);

        client.close().await.unwrap();
        serving.await.unwrap().unwrap();
    }
}
