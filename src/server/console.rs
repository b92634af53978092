//! Operator console
//!
//! Terminal stand-in for the server window: lists connected clients,
//! removes one, or sends a notice to everybody.

use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::server::registry::SessionRegistry;
use crate::server::session::SessionId;

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Remove(SessionId),
    Quit,
    Announce(String),
    Invalid(String),
}

/// Parses one console line. Blank lines yield `None`.
pub fn parse_console_command(raw: &str) -> Option<ConsoleCommand> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }

    if !line.starts_with('/') {
        return Some(ConsoleCommand::Announce(line.to_string()));
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("").to_ascii_lowercase();
    let arg = parts.next().unwrap_or("").trim();

    let command = match cmd.as_str() {
        "/list" | "/ls" => ConsoleCommand::List,
        "/quit" | "/q" => ConsoleCommand::Quit,
        "/remove" | "/kick" => match arg.parse() {
            Ok(id) => ConsoleCommand::Remove(id),
            Err(_) => ConsoleCommand::Invalid(format!("usage: /remove <session id>, got {:?}", arg)),
        },
        _ => ConsoleCommand::Invalid(format!("unknown console command {}", cmd)),
    };
    Some(command)
}

/// Why the console stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    EndOfInput,
}

/// Reads operator commands until `/quit` or end of input.
pub async fn run_console<R, W>(
    input: R,
    mut output: W,
    registry: Arc<SessionRegistry>,
) -> std::io::Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_console_command(&line) else {
            continue;
        };

        let reply = match command {
            ConsoleCommand::Quit => {
                info!("Operator requested shutdown");
                return Ok(ConsoleExit::Quit);
            }
            ConsoleCommand::List => {
                let sessions = registry.sessions().await;
                if sessions.is_empty() {
                    "no clients connected".to_string()
                } else {
                    sessions
                        .iter()
                        .map(|s| format!("{:>4}  {:<20} {}", s.id, s.name, s.peer))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            ConsoleCommand::Remove(id) => match registry.kick(id).await {
                Ok(info) => format!("removed {} ({})", info.id, info.name),
                Err(e) => {
                    warn!("Console remove failed: {}", e);
                    e.to_string()
                }
            },
            ConsoleCommand::Announce(text) => {
                let report = registry.announce(&text).await;
                format!("sent to {} client(s)", report.delivered.len())
            }
            ConsoleCommand::Invalid(msg) => msg,
        };

        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }

    Ok(ConsoleExit::EndOfInput)
}
