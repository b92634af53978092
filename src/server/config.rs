//! Server configuration
//!
//! Server-side view of [`ChatConfig`].

use crate::config::ChatConfig;

/// Settings the accept loop and registry need
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub bind_address: String,
    pub port: u16,
    pub max_clients: usize,
    pub keepalive: bool,
    pub default_name: String,
}

impl ServerSettings {
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
            max_clients: config.max_clients,
            keepalive: config.keepalive,
            default_name: config.default_name.clone(),
        }
    }

    /// Get bind address and port as a listen address
    pub fn listen_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::from_config(&ChatConfig::default())
    }
}
