//! Configuration management for simple-chat
//!
//! Values are layered: built-in defaults, then an optional `config.toml`,
//! then `SIMPLE_CHAT_*` environment variables. Command-line flags are applied
//! on top by the binary.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5050;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_NAME: &str = "Client";
pub const DEFAULT_MAX_CLIENTS: usize = 64;

/// Complete configuration shared by the client and server binaries
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChatConfig {
    // ═══ CLIENT ═══
    /// Host the client connects to
    pub host: String,

    /// Upper bound for name resolution plus TCP connect
    pub connect_timeout_ms: u64,

    /// Chat name used by clients that don't pick one, and the display name
    /// the server assigns before `CHATNAME` arrives
    pub default_name: String,

    // ═══ SERVER ═══
    /// Interface the server listens on
    pub bind_address: String,

    /// Connections beyond this are turned away with `!EXIT`
    pub max_clients: usize,

    // ═══ SHARED ═══
    pub port: u16,
    pub keepalive: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            default_name: DEFAULT_NAME.to_string(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            max_clients: DEFAULT_MAX_CLIENTS,
            port: DEFAULT_PORT,
            keepalive: true,
        }
    }
}

impl ChatConfig {
    /// Load configuration from `config.toml` (if present) with environment overrides
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from the given file stem, e.g. `"config"` for `config.toml`
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        let defaults = Self::default();

        let settings = Config::builder()
            .set_default("host", defaults.host)?
            .set_default("connect_timeout_ms", defaults.connect_timeout_ms as i64)?
            .set_default("default_name", defaults.default_name)?
            .set_default("bind_address", defaults.bind_address)?
            .set_default("max_clients", defaults.max_clients as i64)?
            .set_default("port", i64::from(defaults.port))?
            .set_default("keepalive", defaults.keepalive)?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("SIMPLE_CHAT"))
            .build()?;

        let config: ChatConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.port == 0 {
            return Err(config::ConfigError::Message("port cannot be 0".into()));
        }

        if self.connect_timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "connect_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.max_clients == 0 {
            return Err(config::ConfigError::Message(
                "max_clients must be greater than 0".into(),
            ));
        }

        if self.default_name.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "default_name cannot be empty".into(),
            ));
        }

        if self.host.trim().is_empty() {
            return Err(config::ConfigError::Message("host cannot be empty".into()));
        }

        Ok(())
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
