#![forbid(unsafe_code)]

use thiserror::Error;

/// Maximum payload bytes per outgoing `PRIVMSG` chunk.
pub const MAX_MESSAGE_BYTES: usize = 400;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrcParseError {
	#[error("empty line")]
	Empty,
	#[error("missing command")]
	MissingCommand,
}

/// One parsed IRC protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
	pub prefix: Option<String>,
	pub command: String,
	pub params: Vec<String>,
}

impl IrcMessage {
	/// Parse a raw line (without or with trailing CRLF). IRCv3 tags are skipped.
	pub fn parse(line: &str) -> Result<Self, IrcParseError> {
		let mut rest = line.trim_end_matches(['\r', '\n']);
		if rest.trim().is_empty() {
			return Err(IrcParseError::Empty);
		}

		if rest.starts_with('@') {
			rest = match rest.split_once(' ') {
				Some((_, after)) => after.trim_start(),
				None => return Err(IrcParseError::MissingCommand),
			};
		}

		let mut prefix = None;
		if let Some(stripped) = rest.strip_prefix(':') {
			let (p, after) = stripped.split_once(' ').ok_or(IrcParseError::MissingCommand)?;
			prefix = Some(p.to_string());
			rest = after.trim_start();
		}

		let (command, mut rest) = match rest.split_once(' ') {
			Some((c, after)) => (c, after),
			None => (rest, ""),
		};
		if command.is_empty() {
			return Err(IrcParseError::MissingCommand);
		}

		let mut params = Vec::new();
		loop {
			rest = rest.trim_start_matches(' ');
			if rest.is_empty() {
				break;
			}
			if let Some(trailing) = rest.strip_prefix(':') {
				params.push(trailing.to_string());
				break;
			}
			match rest.split_once(' ') {
				Some((p, after)) => {
					params.push(p.to_string());
					rest = after;
				}
				None => {
					params.push(rest.to_string());
					break;
				}
			}
		}

		Ok(Self {
			prefix,
			command: command.to_ascii_uppercase(),
			params,
		})
	}

	/// Nick portion of a `nick!user@host` prefix.
	pub fn source_nick(&self) -> Option<&str> {
		let prefix = self.prefix.as_deref()?;
		Some(prefix.split_once('!').map(|(n, _)| n).unwrap_or(prefix))
	}

	pub fn param(&self, idx: usize) -> Option<&str> {
		self.params.get(idx).map(String::as_str)
	}

	pub fn trailing(&self) -> Option<&str> {
		self.params.last().map(String::as_str)
	}
}

/// Drop characters that would break line framing.
pub fn sanitize(text: &str) -> String {
	text.chars().filter(|c| !matches!(c, '\r' | '\n' | '\0')).collect()
}

/// Split `text` into chunks of at most `max_bytes`, never inside a UTF-8 sequence.
pub fn split_message(text: &str, max_bytes: usize) -> Vec<&str> {
	if text.len() <= max_bytes || max_bytes == 0 {
		return vec![text];
	}

	let mut out = Vec::new();
	let mut start = 0;
	while start < text.len() {
		let mut end = (start + max_bytes).min(text.len());
		while end > start && !text.is_char_boundary(end) {
			end -= 1;
		}
		if end == start {
			// single char wider than max_bytes
			end = start + text[start..].chars().next().map(char::len_utf8).unwrap_or(1);
		}
		out.push(&text[start..end]);
		start = end;
	}
	out
}
