#![forbid(unsafe_code)]

mod client;
mod message;

pub use client::{IrcConfig, IrcHandle, connect, spawn_session};
pub use message::{IrcMessage, IrcParseError, MAX_MESSAGE_BYTES, sanitize, split_message};

/// IRC bold toggle.
pub const BOLD: char = '\u{2}';

/// IRC color prefix (`\x03NN`).
pub const COLOR: char = '\u{3}';

/// Wrap `text` in bold toggles.
pub fn bold(text: &str) -> String {
	format!("{BOLD}{text}{BOLD}")
}
