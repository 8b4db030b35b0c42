//! Server configuration.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! - Built-in defaults
//! - TOML configuration file (`--config <path>` or the first of the
//!   default locations that exists)
//! - Environment variables (`HUDDLE_PORT`, `HUDDLE_LIMITS__MAX_CONNECTIONS`, ...)

use anyhow::{Context, Result};
use huddle_protocol::WireFormat;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default configuration file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

/// Prefix of configuration environment variables.
const ENV_PREFIX: &str = "HUDDLE";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Session bootstrap rules.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Room registry behavior.
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Wire format for clients that do not ask for one.
    #[serde(default)]
    pub default_format: WireFormat,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Session bootstrap configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Maximum length of the display name and room name, in characters.
    #[serde(default = "default_max_field_length")]
    pub max_field_length: usize,
}

/// Room registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Drop rooms once their last member leaves.
    #[serde(default = "default_true")]
    pub reclaim_empty: bool,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Idle time after which a connection is closed, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/chat".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_field_length() -> usize {
    50
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    90_000 // 90 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            bootstrap: BootstrapConfig::default(),
            rooms: RoomsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            default_format: WireFormat::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_field_length: default_max_field_length(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            reclaim_empty: true,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from a file and the environment.
    ///
    /// With no explicit path, the default locations are searched and the
    /// first existing file is used. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, or if any source
    /// cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                anyhow::ensure!(path.exists(), "Config file not found: {}", path.display());
                Some(path.to_path_buf())
            }
            None => Self::find_config_file(),
        };

        let env = ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);

        Self::build(file.as_deref(), env)
    }

    /// Search the default locations for a configuration file.
    fn find_config_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    fn build(file: Option<&Path>, env: ::config::Environment) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = file {
            tracing::info!("Loading configuration from {}", path.display());
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }

        let settings = builder
            .add_source(env)
            .build()
            .context("Failed to read configuration")?;

        let config: Self = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot run.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.heartbeat.interval_ms > 0,
            "heartbeat.interval_ms must be greater than zero"
        );
        anyhow::ensure!(
            self.heartbeat.timeout_ms >= self.heartbeat.interval_ms,
            "heartbeat.timeout_ms ({}) must not be shorter than heartbeat.interval_ms ({})",
            self.heartbeat.timeout_ms,
            self.heartbeat.interval_ms
        );
        anyhow::ensure!(
            self.limits.max_connections > 0,
            "limits.max_connections must be greater than zero"
        );
        anyhow::ensure!(
            self.limits.max_message_size > 0,
            "limits.max_message_size must be greater than zero"
        );
        anyhow::ensure!(
            self.bootstrap.max_field_length > 0,
            "bootstrap.max_field_length must be greater than zero"
        );
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(vars: &[(&str, &str)]) -> ::config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(map))
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/chat");
        assert_eq!(config.transport.default_format, WireFormat::Json);
        assert_eq!(config.bootstrap.max_field_length, 50);
        assert!(config.rooms.reclaim_empty);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let config = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [transport]
            default_format = "msgpack"

            [limits]
            max_connections = 500
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.transport.default_format, WireFormat::Msgpack);
        assert_eq!(config.transport.websocket_path, "/chat");
        assert_eq!(config.limits.max_connections, 500);
        assert_eq!(config.limits.max_message_size, 64 * 1024);
    }

    #[test]
    fn test_empty_sources_yield_defaults() {
        let config = Config::build(None, env_from(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.heartbeat.interval_ms, 30_000);
    }

    #[test]
    fn test_environment_overrides() {
        let config = Config::build(
            None,
            env_from(&[
                ("HUDDLE_PORT", "9100"),
                ("HUDDLE_LIMITS__MAX_CONNECTIONS", "42"),
                ("HUDDLE_ROOMS__RECLAIM_EMPTY", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.limits.max_connections, 42);
        assert!(!config.rooms.reclaim_empty);
    }

    #[test]
    fn test_zero_heartbeat_interval_rejected() {
        let err = Config::build(None, env_from(&[("HUDDLE_HEARTBEAT__INTERVAL_MS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("interval_ms"));
    }

    #[test]
    fn test_validate_limits() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.heartbeat.timeout_ms = config.heartbeat.interval_ms - 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.max_message_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.bootstrap.max_field_length = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/huddle.toml"))).is_err());
    }
}
