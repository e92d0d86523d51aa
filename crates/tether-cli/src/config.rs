//! Configuration system for the Tether CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_transport::TransportConfig;

/// Largest accepted value for `storage.max_file_size`
pub const MAX_FILE_SIZE_LIMIT: u64 = 1 << 40;

/// Tether configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Pre-shared key configuration
    #[serde(default)]
    pub keys: KeysConfig,
    /// File storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address the server listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Address the client connects to (`host:port`)
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Connect timeout in seconds, 0 disables it
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Disable Nagle's algorithm
    #[serde(default = "default_true")]
    pub nodelay: bool,
}

/// Pre-shared key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Session secrets file written by `tether keygen`
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
}

/// File storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory the server serves files from
    #[serde(default = "default_server_root")]
    pub server_root: PathBuf,
    /// Directory the client downloads into
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Largest file either side will transfer, in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_listen_addr() -> String {
    "0.0.0.0:4040".to_string()
}

fn default_server_addr() -> String {
    "127.0.0.1:4040".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_key_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tether/session.key")
}

fn default_server_root() -> PathBuf {
    PathBuf::from("served")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_max_file_size() -> u64 {
    1 << 30 // 1 GiB
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            server_addr: default_server_addr(),
            connect_timeout_secs: default_connect_timeout(),
            nodelay: true,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            server_root: default_server_root(),
            download_dir: default_download_dir(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("tether/config.toml")
    }

    /// Load from `path`, or fall back to defaults when no path was given
    /// and nothing exists at the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path is missing or any file present
    /// fails to parse.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    tracing::debug!("No config at {}, using defaults", path.display());
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.network.listen_addr.parse()?)
    }

    /// Transport settings derived from the network section
    #[must_use]
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            nodelay: self.network.nodelay,
            connect_timeout: match self.network.connect_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;
        validate_host_port(&self.network.server_addr, "Server address")?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.storage.max_file_size == 0 || self.storage.max_file_size > MAX_FILE_SIZE_LIMIT {
            anyhow::bail!(
                "Max file size must be between 1 and {} bytes",
                MAX_FILE_SIZE_LIMIT
            );
        }

        if self.keys.key_file.as_os_str().is_empty() {
            anyhow::bail!("Key file path is empty");
        }

        Ok(())
    }
}

/// Validate host:port format
fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
    let Some((host, port_str)) = addr.rsplit_once(':') else {
        anyhow::bail!(
            "{} '{}' missing port (expected format: host:port)",
            name,
            addr
        );
    };

    let port: u16 = port_str
        .parse()
        .map_err(|_| anyhow::anyhow!("{} '{}' has invalid port: {}", name, addr, port_str))?;

    if port == 0 {
        anyhow::bail!("{} '{}' has invalid port: 0", name, addr);
    }

    if host.is_empty() {
        anyhow::bail!("{} '{}' has empty hostname", name, addr);
    }

    if host.contains("..") || host.contains('/') || host.contains('\\') {
        anyhow::bail!("{} '{}' contains invalid characters", name, addr);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.listen_addr, "0.0.0.0:4040");
        assert_eq!(config.storage.max_file_size, 1024 * 1024 * 1024);
        assert_eq!(config.storage.download_dir, PathBuf::from("downloads"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.storage.max_file_size = 0;
        assert!(config.validate().is_err());

        config.storage.max_file_size = MAX_FILE_SIZE_LIMIT + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_address_validation() {
        let mut config = Config::default();

        config.network.listen_addr = "not-an-address".to_string();
        assert!(config.validate().is_err());

        config.network.listen_addr = "127.0.0.1:0".to_string();
        config.network.server_addr = "files.example.com:4040".to_string();
        assert!(config.validate().is_ok());

        config.network.server_addr = "files.example.com".to_string();
        assert!(config.validate().is_err());

        config.network.server_addr = "host:0".to_string();
        assert!(config.validate().is_err());

        config.network.server_addr = ":4040".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transport_timeout() {
        let mut config = Config::default();
        assert_eq!(
            config.transport().connect_timeout,
            Some(Duration::from_secs(10))
        );

        config.network.connect_timeout_secs = 0;
        assert_eq!(config.transport().connect_timeout, None);
    }

    #[test]
    fn test_toml_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.network.listen_addr, deserialized.network.listen_addr);
        assert_eq!(
            config.storage.max_file_size,
            deserialized.storage.max_file_size
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[storage]\nmax_file_size = 4096\n").unwrap();
        assert_eq!(config.storage.max_file_size, 4096);
        assert_eq!(config.network.server_addr, "127.0.0.1:4040");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.storage.server_root = PathBuf::from("/srv/tether");
        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded.storage.server_root, PathBuf::from("/srv/tether"));
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_or_default(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
