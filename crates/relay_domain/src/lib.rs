#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// Channel name prefixes accepted by the relay.
pub const CHANNEL_PREFIXES: [char; 2] = ['#', '&'];

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid channel name: {0}")]
	InvalidChannel(String),
	#[error("invalid nick: {0}")]
	InvalidNick(String),
}

fn has_forbidden_chars(s: &str) -> bool {
	s.chars().any(|c| c.is_whitespace() || c.is_control() || c == ',')
}

/// Joinable chat channel (`#name` or `&name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelName(String);

impl ChannelName {
	/// Create a validated channel name. Surrounding whitespace is trimmed.
	pub fn new(name: impl Into<String>) -> Result<Self, ParseIdError> {
		let name = name.into();
		let name = name.trim();
		if name.is_empty() {
			return Err(ParseIdError::Empty);
		}

		let valid_prefix = name.starts_with(CHANNEL_PREFIXES);
		if !valid_prefix || name.len() < 2 || has_forbidden_chars(name) {
			return Err(ParseIdError::InvalidChannel(name.to_string()));
		}

		Ok(Self(name.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}

	/// Case-insensitive comparison (ASCII casemapping).
	pub fn eq_ignore_case(&self, other: &ChannelName) -> bool {
		self.0.eq_ignore_ascii_case(&other.0)
	}
}

impl fmt::Display for ChannelName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelName {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelName::new(s.to_string())
	}
}

impl TryFrom<String> for ChannelName {
	type Error = ParseIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		ChannelName::new(value)
	}
}

impl From<ChannelName> for String {
	fn from(value: ChannelName) -> Self {
		value.0
	}
}

/// User nickname.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nick(String);

impl Nick {
	/// Create a validated nick.
	pub fn new(nick: impl Into<String>) -> Result<Self, ParseIdError> {
		let nick = nick.into();
		let nick = nick.trim();
		if nick.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if nick.starts_with(CHANNEL_PREFIXES) || nick.starts_with(':') || has_forbidden_chars(nick) {
			return Err(ParseIdError::InvalidNick(nick.to_string()));
		}
		Ok(Self(nick.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Nick {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for Nick {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Nick::new(s.to_string())
	}
}

/// Where a chat message is addressed: a channel or a single user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageTarget {
	Channel(ChannelName),
	User(Nick),
}

impl MessageTarget {
	/// Parse a raw message target; channel prefixes select `Channel`.
	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		if s.starts_with(CHANNEL_PREFIXES) {
			Ok(Self::Channel(ChannelName::new(s)?))
		} else {
			Ok(Self::User(Nick::new(s)?))
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			Self::Channel(c) => c.as_str(),
			Self::User(n) => n.as_str(),
		}
	}

	pub fn as_channel(&self) -> Option<&ChannelName> {
		match self {
			Self::Channel(c) => Some(c),
			Self::User(_) => None,
		}
	}
}

impl fmt::Display for MessageTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for MessageTarget {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		MessageTarget::parse(s)
	}
}

impl From<ChannelName> for MessageTarget {
	fn from(value: ChannelName) -> Self {
		Self::Channel(value)
	}
}

impl From<Nick> for MessageTarget {
	fn from(value: Nick) -> Self {
		Self::User(value)
	}
}
