//! UI seam
//!
//! The controller reports everything the user should see, chat text and
//! connection notices alike, through a single [`MessageSink`].

use std::io::Write;

pub trait MessageSink: Send + Sync {
    fn incoming_message(&self, message: &str);
}

impl<F> MessageSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn incoming_message(&self, message: &str) {
        self(message)
    }
}

/// Prints every message on its own stdout line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalSink;

impl MessageSink for TerminalSink {
    fn incoming_message(&self, message: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", message);
        let _ = stdout.flush();
    }
}
