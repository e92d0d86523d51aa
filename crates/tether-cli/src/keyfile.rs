//! Pre-shared session secrets on disk.

use anyhow::Context;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tether_crypto::SessionSecrets;
use zeroize::Zeroizing;

/// Write `secrets` to `path` as hex lines, readable by the owner only.
///
/// # Errors
///
/// Returns an error if the file exists and `overwrite` is false, or if it
/// cannot be written.
pub fn write(path: &Path, secrets: &SessionSecrets, overwrite: bool) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => anyhow::bail!(
            "Key file {} already exists (use --force to replace it)",
            path.display()
        ),
        Err(e) => {
            return Err(e).with_context(|| format!("Cannot create key file {}", path.display()));
        }
    };

    // The creation mode is ignored when an existing file is reused
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Cannot restrict permissions of {}", path.display()))?;
    }

    file.write_all(secrets.to_hex_lines().as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Read session secrets written by [`write`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not hold three
/// well-formed keys.
pub fn read(path: &Path) -> anyhow::Result<SessionSecrets> {
    let text = Zeroizing::new(
        fs::read_to_string(path)
            .with_context(|| format!("Cannot read key file {}", path.display()))?,
    );
    SessionSecrets::from_hex_lines(&text)
        .with_context(|| format!("Malformed key file {}", path.display()))
}
