//! Chat line parsing
//!
//! Classifies received lines as commands or plain text.

use crate::error::ProtocolError;
use crate::protocol::commands::{ChatLine, Command, CommandKind, SENTINEL};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Looks up a command token, with or without its sentinel.
///
/// Matching is case-insensitive; anything outside the command set is an
/// `UnknownCommand` error.
pub fn decode(token: &str) -> Result<CommandKind, ProtocolError> {
    let bare = token.strip_prefix(SENTINEL).unwrap_or(token);

    CommandKind::ALL
        .into_iter()
        .find(|kind| kind.token().eq_ignore_ascii_case(bare))
        .ok_or_else(|| ProtocolError::UnknownCommand(token.to_string()))
}

/// Parses one received line into a `ChatLine`.
///
/// Lines that don't start with the sentinel are plain text and are returned
/// verbatim (minus the line terminator).
pub fn parse_line(raw: &str) -> Result<ChatLine, ProtocolError> {
    let line = raw.trim_end_matches(LINE_ENDINGS);

    if !line.starts_with(SENTINEL) {
        return Ok(ChatLine::Plain(line.to_string()));
    }

    let mut parts = line.splitn(2, ' ');
    let token = parts.next().unwrap_or("");
    let arg = parts.next().unwrap_or("").trim();

    match decode(token)? {
        CommandKind::CHATNAME if !arg.is_empty() => {
            Ok(ChatLine::Command(Command::CHATNAME(arg.to_string())))
        }
        CommandKind::CHATNAME => Err(ProtocolError::MissingArgument("CHATNAME")),
        CommandKind::EXIT => Ok(ChatLine::Command(Command::EXIT)),
    }
}
