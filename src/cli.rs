use clap::{Args, Parser, Subcommand};

use crate::config::ChatConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Minimal line-based TCP chat", long_about = None)]
pub struct Cli {
    /// Configuration file stem; `config` loads `config.toml` when present.
    #[arg(long, global = true, default_value = "config")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server with an operator console on stdin.
    Server(ServerArgs),
    /// Connect to a server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// Interface to listen on.
    #[arg(long)]
    pub bind: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Connections beyond this are refused with `!EXIT`.
    #[arg(long)]
    pub max_clients: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ClientArgs {
    /// Chat name announced to the server.
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// Connect timeout in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl ServerArgs {
    /// Overrides configuration values with the flags that were given.
    pub fn apply(&self, config: &mut ChatConfig) {
        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
    }
}

impl ClientArgs {
    /// Overrides configuration values with the flags that were given.
    /// The chat name is applied separately since it isn't configuration.
    pub fn apply(&self, config: &mut ChatConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.connect_timeout_ms = timeout_ms;
        }
    }
}
