//! Module `commands`
//!
//! Defines the chat command vocabulary and the two shapes a line can take
//! on the wire: a sentinel-prefixed command or plain chat text.

use std::fmt;

/// First character that marks a line as a command.
pub const SENTINEL: char = '!';

/// Canonical command tokens, without arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CHATNAME,
    EXIT,
}

impl CommandKind {
    pub const ALL: [CommandKind; 2] = [CommandKind::CHATNAME, CommandKind::EXIT];

    /// Wire token, without the sentinel.
    pub fn token(self) -> &'static str {
        match self {
            CommandKind::CHATNAME => "CHATNAME",
            CommandKind::EXIT => "EXIT",
        }
    }
}

/// A decoded command together with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CHATNAME(String), // Register or change the sender's display name
    EXIT,             // Terminate the session, in either direction
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::CHATNAME(_) => CommandKind::CHATNAME,
            Command::EXIT => CommandKind::EXIT,
        }
    }

    pub fn args(&self) -> Vec<&str> {
        match self {
            Command::CHATNAME(name) => vec![name.as_str()],
            Command::EXIT => Vec::new(),
        }
    }

    /// Wire form of this command, without the trailing newline.
    pub fn encode(&self) -> String {
        encode(self.kind(), &self.args())
    }
}

/// One protocol unit as received or sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatLine {
    Command(Command),
    Plain(String),
}

impl ChatLine {
    pub fn plain(text: impl Into<String>) -> Self {
        ChatLine::Plain(text.into())
    }

    pub fn as_command(&self) -> Option<&Command> {
        match self {
            ChatLine::Command(cmd) => Some(cmd),
            ChatLine::Plain(_) => None,
        }
    }
}

impl From<Command> for ChatLine {
    fn from(cmd: Command) -> Self {
        ChatLine::Command(cmd)
    }
}

impl fmt::Display for ChatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatLine::Command(cmd) => f.write_str(&cmd.encode()),
            ChatLine::Plain(text) => f.write_str(text),
        }
    }
}

/// Builds a command line: sentinel, canonical token, then arguments joined
/// by single spaces.
///
/// Line breaks inside arguments are replaced by spaces so the result is
/// always exactly one line.
pub fn encode(kind: CommandKind, args: &[&str]) -> String {
    let mut line = String::with_capacity(16);
    line.push(SENTINEL);
    line.push_str(kind.token());

    for arg in args {
        line.push(' ');
        line.extend(arg.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c }));
    }

    line
}
