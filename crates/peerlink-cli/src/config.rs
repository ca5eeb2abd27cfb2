//! Configuration system for the peerlink CLI.

use peerlink_core::{Framing, PeerConfig, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// peerlink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection configuration
    pub connection: ConnectionConfig,
    /// Network configuration
    pub network: NetworkConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Largest packet in bytes
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
    /// Pause between dispatch cycles in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wire framing
    #[serde(default)]
    pub framing: Framing,
    /// What closing the connection leaves behind
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// Disable Nagle's algorithm
    #[serde(default = "default_true")]
    pub nodelay: bool,
    /// Treat end of stream as a disconnect
    #[serde(default = "default_true")]
    pub eof_is_disconnect: bool,
    /// Give up on a connect attempt after this many milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Server listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client remote endpoint
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Client connect attempts before giving up
    #[serde(default = "default_retries")]
    pub retries: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_packet_size() -> usize {
    peerlink_core::DEFAULT_PACKET_SIZE
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_port() -> u16 {
    54321
}

fn default_remote() -> String {
    "127.0.0.1:54321".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            packet_size: default_packet_size(),
            poll_interval_ms: default_poll_interval_ms(),
            framing: Framing::default(),
            reconnect: ReconnectPolicy::default(),
            nodelay: true,
            eof_is_disconnect: true,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            remote: default_remote(),
            retries: default_retries(),
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

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("peerlink/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Build the connection configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn to_peer_config(&self) -> anyhow::Result<PeerConfig> {
        let conn = &self.connection;
        let mut peer = PeerConfig::default()
            .with_packet_size(conn.packet_size)
            .with_poll_interval(Duration::from_millis(conn.poll_interval_ms))
            .with_framing(conn.framing)
            .with_reconnect(conn.reconnect)
            .with_eof_is_disconnect(conn.eof_is_disconnect);
        peer.transport.nodelay = conn.nodelay;
        if conn.connect_timeout_ms > 0 {
            peer = peer.with_connect_timeout(Duration::from_millis(conn.connect_timeout_ms));
        }

        peer.validate()?;
        Ok(peer)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.to_peer_config()?;

        if self.connection.poll_interval_ms == 0 || self.connection.poll_interval_ms > 10_000 {
            anyhow::bail!("Poll interval must be between 1 and 10000 ms");
        }

        validate_host_port(&self.network.remote, "Remote endpoint")?;

        if self.network.retries == 0 {
            anyhow::bail!("Retries must be at least 1");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}

/// Validate host:port format
pub fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
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
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.port, 54321);
        assert_eq!(config.network.remote, "127.0.0.1:54321");
        assert_eq!(config.connection.packet_size, 1024);
        assert_eq!(config.connection.framing, Framing::LengthPrefixed);
        assert!(config.connection.eof_is_disconnect);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        config.connection.packet_size = 0;
        assert!(config.validate().is_err());

        config.connection.packet_size = 4;
        config.network.remote = "localhost".to_string();
        assert!(config.validate().is_err());

        config.network.remote = "localhost:0".to_string();
        assert!(config.validate().is_err());

        config.network.remote = "localhost:9000".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_peer_config() {
        let mut config = Config::default();
        config.connection.packet_size = 4;
        config.connection.framing = Framing::Raw;
        config.connection.connect_timeout_ms = 0;

        let peer = config.to_peer_config().unwrap();
        assert_eq!(peer.packet_size, 4);
        assert_eq!(peer.framing, Framing::Raw);
        assert_eq!(peer.poll_interval, Duration::from_millis(10));
        assert!(peer.eof_is_disconnect);
        assert_eq!(peer.transport.connect_timeout, None);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            packet_size = 4
            framing = "raw"

            [network]
            port = 6000
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.packet_size, 4);
        assert_eq!(config.connection.framing, Framing::Raw);
        assert_eq!(config.connection.reconnect, ReconnectPolicy::Reusable);
        assert_eq!(config.network.port, 6000);
        assert_eq!(config.network.retries, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.network.port = 7000;
        config.connection.reconnect = ReconnectPolicy::Terminal;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.network.port, 7000);
        assert_eq!(loaded.connection.reconnect, ReconnectPolicy::Terminal);
        assert_eq!(loaded.connection.packet_size, config.connection.packet_size);
    }
}
