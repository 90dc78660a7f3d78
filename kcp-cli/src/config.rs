//! Configuration file support for KCP CLI tools

use kcp::Mode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Engine settings shared by both tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Conversation id; both ends must agree
    #[serde(default = "default_conv")]
    pub conv: u32,
    /// Latency profile: normal, nodelay-fast or aggressive-fast
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Send window in segments
    #[serde(default = "default_window")]
    pub send_window: u16,
    /// Receive window in segments
    #[serde(default = "default_window")]
    pub receive_window: u16,
    /// Maximum datagram size
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// Flush interval override in milliseconds
    pub interval_ms: Option<u32>,
    /// Fast retransmission threshold override (0 disables)
    pub fast_resend: Option<u32>,
}

fn default_conv() -> u32 {
    1001
}

fn default_mode() -> String {
    Mode::Normal.as_str().to_string()
}

fn default_window() -> u16 {
    128
}

fn default_mtu() -> usize {
    1400
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            conv: default_conv(),
            mode: default_mode(),
            send_window: default_window(),
            receive_window: default_window(),
            mtu: default_mtu(),
            interval_ms: None,
            fast_resend: None,
        }
    }
}

impl TransportConfig {
    /// Parse the mode name
    pub fn mode(&self) -> Result<Mode, ConfigError> {
        self.mode.parse().map_err(ConfigError::Invalid)
    }

    /// Build the engine configuration
    pub fn to_protocol(&self) -> Result<kcp::Config, ConfigError> {
        let mut config = kcp::Config::new(self.conv)
            .with_mode(self.mode()?)
            .with_windows(self.send_window, self.receive_window)
            .with_mtu(self.mtu);
        if let Some(interval) = self.interval_ms {
            config = config.with_interval(interval);
        }
        if let Some(threshold) = self.fast_resend {
            config = config.with_fast_resend(threshold);
        }
        Ok(config)
    }
}

/// Echo server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen: SocketAddr,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Statistics interval in seconds (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address
    pub server: SocketAddr,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Percentage of received datagrams to drop before input
    #[serde(default)]
    pub drop_rate: u8,
    /// Largest message accepted from the server
    #[serde(default = "default_max_recv_size")]
    pub max_recv_size: usize,
    /// Stop after this many echoes (0 runs forever)
    #[serde(default)]
    pub count: u64,
    /// Statistics interval in seconds (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_max_recv_size() -> usize {
    1024
}

fn default_stats_interval() -> u64 {
    1
}

/// Combined configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Option<ServerConfig>,
    pub client: Option<ClientConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the tools cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(server) = &self.server {
            server.transport.mode()?;
        }
        if let Some(client) = &self.client {
            client.transport.mode()?;
            if client.drop_rate > 100 {
                return Err(ConfigError::Invalid(format!(
                    "drop_rate must be a percentage, got {}",
                    client.drop_rate
                )));
            }
        }
        Ok(())
    }

    /// Create example server configuration
    pub fn example_server() -> Self {
        Config {
            server: Some(ServerConfig {
                listen: SocketAddr::from(([127, 0, 0, 1], 39603)),
                transport: TransportConfig {
                    mode: Mode::AggressiveFast.as_str().to_string(),
                    ..TransportConfig::default()
                },
                stats_interval_secs: 5,
            }),
            client: None,
        }
    }

    /// Create example client configuration
    pub fn example_client() -> Self {
        Config {
            server: None,
            client: Some(ClientConfig {
                server: SocketAddr::from(([127, 0, 0, 1], 39603)),
                transport: TransportConfig::default(),
                drop_rate: 50,
                max_recv_size: default_max_recv_size(),
                count: 0,
                stats_interval_secs: 1,
            }),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ServerConfig {
    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

impl ClientConfig {
    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_configs() {
        let server = Config::example_server();
        assert!(server.server.is_some());
        assert!(server.validate().is_ok());

        let client = Config::example_client();
        assert_eq!(client.client.as_ref().map(|c| c.drop_rate), Some(50));
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = Config::example_server();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        let server = parsed.server.unwrap();
        assert_eq!(server.transport.mode().unwrap(), Mode::AggressiveFast);
        assert_eq!(server.listen.port(), 39603);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let parsed: Config = toml::from_str(
            r#"
            [client]
            server = "10.0.0.1:4000"
            "#,
        )
        .unwrap();

        let client = parsed.client.unwrap();
        assert_eq!(client.transport, TransportConfig::default());
        assert_eq!(client.max_recv_size, 1024);
        assert_eq!(client.drop_rate, 0);
    }

    #[test]
    fn test_transport_to_protocol() {
        let transport = TransportConfig {
            conv: 42,
            mode: "nodelay-fast".to_string(),
            interval_ms: Some(20),
            fast_resend: Some(0),
            ..TransportConfig::default()
        };
        let config = transport.to_protocol().unwrap();
        assert_eq!(config.conv, 42);
        assert!(config.nodelay);
        assert_eq!(config.interval, 20);
        assert_eq!(config.fast_resend, 0);
        assert_eq!(config.receive_window, 128);
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("kcp-cli-config-{}.toml", std::process::id()));
        let config = Config::example_client();
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path);
        let _ = fs::remove_file(&path);

        let client = loaded.unwrap().client.unwrap();
        assert_eq!(client.drop_rate, 50);
        assert_eq!(client.server.port(), 39603);
        assert_eq!(client.transport, TransportConfig::default());
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let mut config = Config::example_client();
        if let Some(client) = config.client.as_mut() {
            client.transport.mode = "warp".to_string();
        }
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
