//! Configuration for channels and the `lime-client` binary.
//!
//! [`ChannelConfig`] holds the options a channel recognizes at construction.
//! [`Config`] is the TOML file model used by the binary; its default path is
//! `~/.config/lime/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{Identity, SessionCompression, SessionEncryption};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("server_address must not be empty")]
    EmptyServerAddress,

    #[error("identity must be in the name@domain form, got {0:?}")]
    InvalidIdentity(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error(
        "ping_disconnection_interval_ms ({disconnection}) must be greater than ping_interval_ms ({interval})"
    )]
    InvalidPingIntervals { interval: u64, disconnection: u64 },
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Options recognized by a channel at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Fill missing `from`/`to` of received messages from the session nodes.
    pub fill_envelope_recipients: bool,

    /// Answer `GET /ping` commands automatically.
    pub auto_reply_pings: bool,

    /// Send a `received` notification for every received message.
    pub auto_notify_receipt: bool,

    /// Interval between keep-alive pings in milliseconds (0 = disabled).
    pub ping_interval_ms: u64,

    /// Close the transport after this much silence, in milliseconds (0 = never).
    pub ping_disconnection_interval_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            fill_envelope_recipients: false,
            auto_reply_pings: false,
            auto_notify_receipt: false,
            ping_interval_ms: 0,
            ping_disconnection_interval_ms: 0,
        }
    }
}

impl ChannelConfig {
    pub fn with_fill_envelope_recipients(mut self, fill: bool) -> Self {
        self.fill_envelope_recipients = fill;
        self
    }

    pub fn with_auto_reply_pings(mut self, auto_reply: bool) -> Self {
        self.auto_reply_pings = auto_reply;
        self
    }

    pub fn with_auto_notify_receipt(mut self, auto_notify: bool) -> Self {
        self.auto_notify_receipt = auto_notify;
        self
    }

    /// Set the keep-alive ping interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the silence threshold after which the transport is closed.
    pub fn with_ping_disconnection_interval(mut self, interval: Duration) -> Self {
        self.ping_disconnection_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_disconnection_interval(&self) -> Duration {
        Duration::from_millis(self.ping_disconnection_interval_ms)
    }

    /// Validate the ping intervals.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let interval = self.ping_interval_ms;
        let disconnection = self.ping_disconnection_interval_ms;
        if interval > 0 && disconnection > 0 && disconnection <= interval {
            return Err(ConfigError::InvalidPingIntervals {
                interval,
                disconnection,
            });
        }
        Ok(())
    }
}

/// Main configuration structure for the `lime-client` binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Connection and identity settings.
    pub client: ClientConfig,

    /// Channel behavior.
    pub channel: ChannelConfig,
}

/// Connection and identity settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Server `host:port`.
    pub server_address: String,

    /// Identity to authenticate as (`name@domain`).
    pub identity: String,

    /// Instance name of this client.
    pub instance: String,

    /// Password for plain authentication. Guest authentication when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Preferred compression; the first offered option when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<SessionCompression>,

    /// Preferred encryption; the first offered option when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<SessionEncryption>,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:55321".to_string(),
            identity: "guest@localhost".to_string(),
            instance: "default".to_string(),
            password: None,
            compression: None,
            encryption: None,
            log_level: "info".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lime")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - LIME_SERVER_ADDRESS: Override the server address
    /// - LIME_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var("LIME_SERVER_ADDRESS") {
            if !address.is_empty() {
                tracing::info!("Overriding server_address from environment: {}", address);
                self.client.server_address = address;
            }
        }

        if let Ok(level) = std::env::var("LIME_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.client.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.server_address.trim().is_empty() {
            return Err(ConfigError::EmptyServerAddress);
        }

        self.identity()?;

        let level = self.client.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.client.log_level.clone()));
        }

        self.channel.validate()
    }

    /// Parse the configured identity.
    pub fn identity(&self) -> Result<Identity, ConfigError> {
        let invalid = || ConfigError::InvalidIdentity(self.client.identity.clone());
        let identity = Identity::parse(&self.client.identity).map_err(|_| invalid())?;
        if identity.name.is_none() || identity.domain.is_none() {
            return Err(invalid());
        }
        Ok(identity)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
