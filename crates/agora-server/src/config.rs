//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (`AGORA_HOST`, `AGORA_PORT`, `AGORA__<section>__<key>`)
//! - Command line arguments

use agora_core::{HubConfig, ValidatorLimits};
use agora_transport::ConnectionConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files searched, in order, when no path is given.
const CONFIG_PATHS: [&str; 3] = [
    "agora.toml",
    "/etc/agora/agora.toml",
    "~/.config/agora/agora.toml",
];

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
    /// Paths serving the WebSocket upgrade.
    #[serde(default = "default_ws_paths")]
    pub websocket_paths: Vec<String>,

    /// Origins allowed to upgrade. Requests without an `Origin` header are
    /// always allowed.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of members.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Maximum sanitized content length in bytes.
    #[serde(default = "default_max_content_size")]
    pub max_content_size: usize,

    /// Maximum display name length in bytes.
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,

    /// Per-connection outbound queue capacity; at least 2 so a rejection
    /// carries both its error and its close.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Hub inbox capacity.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keepalive ping interval in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Read deadline in milliseconds, extended by every pong.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Deadline for a single write in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
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
    std::env::var("AGORA_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("AGORA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9092)
}

fn default_true() -> bool {
    true
}

fn default_ws_paths() -> Vec<String> {
    vec!["/websocket".to_string(), "/api/websocket".to_string()]
}

fn default_allowed_origins() -> Vec<String> {
    [
        "http://localhost:9092",
        "http://127.0.0.1:9092",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_clients() -> usize {
    100
}

fn default_max_frame_size() -> usize {
    agora_protocol::MAX_FRAME_SIZE
}

fn default_max_content_size() -> usize {
    1024
}

fn default_max_name_length() -> usize {
    50
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_event_queue_capacity() -> usize {
    1024
}

fn default_ping_interval() -> u64 {
    54_000 // 54 seconds
}

fn default_read_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
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
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_paths: default_ws_paths(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_clients: default_max_clients(),
            max_frame_size: default_max_frame_size(),
            max_content_size: default_max_content_size(),
            max_name_length: default_max_name_length(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            read_timeout_ms: default_read_timeout(),
            write_timeout_ms: default_write_timeout(),
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
    /// Load configuration.
    ///
    /// Reads `path` if given, otherwise the first existing file among the
    /// default locations, then applies `AGORA__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be parsed or the result is
    /// invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_file(),
        };

        let mut builder = ::config::Config::builder();
        if let Some(file) = &file {
            tracing::info!("Loading config file: {}", file.display());
            builder = builder.add_source(::config::File::from(file.as_path()).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("AGORA")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("transport.websocket_paths")
                .with_list_parse_key("transport.allowed_origins"),
        );

        let config: Config = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn find_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.ping_interval_ms == 0 {
            bail!("heartbeat.ping_interval_ms must be positive");
        }
        if self.heartbeat.ping_interval_ms >= self.heartbeat.read_timeout_ms {
            bail!(
                "heartbeat.ping_interval_ms ({}) must be shorter than heartbeat.read_timeout_ms ({})",
                self.heartbeat.ping_interval_ms,
                self.heartbeat.read_timeout_ms
            );
        }
        if self.limits.max_clients == 0 {
            bail!("limits.max_clients must be positive");
        }
        if self.limits.outbound_queue_capacity < 2 {
            bail!(
                "limits.outbound_queue_capacity ({}) must be at least 2",
                self.limits.outbound_queue_capacity
            );
        }
        if self.limits.event_queue_capacity == 0 {
            bail!("limits.event_queue_capacity must be positive");
        }
        if self.transport.websocket_paths.is_empty() {
            bail!("transport.websocket_paths must not be empty");
        }
        if let Some(path) = self
            .transport
            .websocket_paths
            .iter()
            .find(|p| !p.starts_with('/'))
        {
            bail!("websocket path must start with '/': {path}");
        }
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
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_clients: self.limits.max_clients,
            event_capacity: self.limits.event_queue_capacity,
        }
    }

    /// Per-connection settings.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_frame_size: self.limits.max_frame_size,
            outbound_capacity: self.limits.outbound_queue_capacity,
            read_timeout: Duration::from_millis(self.heartbeat.read_timeout_ms),
            ping_interval: Duration::from_millis(self.heartbeat.ping_interval_ms),
            write_timeout: Duration::from_millis(self.heartbeat.write_timeout_ms),
        }
    }

    /// Validator limits.
    #[must_use]
    pub fn validator_limits(&self) -> ValidatorLimits {
        ValidatorLimits {
            max_name_length: self.limits.max_name_length,
            max_content_length: self.limits.max_content_size,
        }
    }

    /// Whether a request with this `Origin` header may upgrade.
    #[must_use]
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None | Some("") => true,
            Some(origin) => self
                .transport
                .allowed_origins
                .iter()
                .any(|allowed| allowed == origin),
        }
    }
}
