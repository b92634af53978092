//! Chat protocol implementation
//!
//! Line-oriented, UTF-8, `\n`-terminated. Lines starting with `!` carry a
//! command; everything else is chat text.

pub mod commands;
pub mod parser;
pub mod responses;

pub use commands::{ChatLine, Command, CommandKind, SENTINEL, encode};
pub use parser::{decode, parse_line};
