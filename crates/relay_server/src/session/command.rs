#![forbid(unsafe_code)]

use thiserror::Error;

/// Every chat command starts with this character.
pub const COMMAND_PREFIX: char = '`';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandParseError {
	#[error("`{0}` needs an argument")]
	MissingArgument(&'static str),
}

/// Parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Join { channel: String },
	Part,
	Connect { target: Option<String> },
	Disconnect,
	Reset,
	Reload,
	Quit { message: Option<String> },
	NowPlaying,
	/// Text following the token, leading whitespace included.
	Ping { suffix: String },
	LinkMe,
}

impl Command {
	/// `Ok(None)` for lines that are not commands.
	pub fn parse(text: &str) -> Result<Option<Self>, CommandParseError> {
		let Some(body) = text.strip_prefix(COMMAND_PREFIX) else {
			return Ok(None);
		};
		let token_len = body.find(char::is_whitespace).unwrap_or(body.len());
		let (token, rest) = body.split_at(token_len);
		let arg = rest.trim();
		let arg = (!arg.is_empty()).then(|| arg.to_string());

		let cmd = match token {
			"join" => Self::Join {
				channel: arg.ok_or(CommandParseError::MissingArgument("join"))?,
			},
			"part" => Self::Part,
			"connect" => Self::Connect { target: arg },
			"disconnect" => Self::Disconnect,
			"reset" => Self::Reset,
			"reload" => Self::Reload,
			"quit" => Self::Quit { message: arg },
			"np" => Self::NowPlaying,
			"ping" => Self::Ping {
				suffix: rest.to_string(),
			},
			"linkme" => Self::LinkMe,
			_ => return Ok(None),
		};
		Ok(Some(cmd))
	}

	pub fn name(&self) -> &'static str {
		match self {
			Self::Join { .. } => "join",
			Self::Part => "part",
			Self::Connect { .. } => "connect",
			Self::Disconnect => "disconnect",
			Self::Reset => "reset",
			Self::Reload => "reload",
			Self::Quit { .. } => "quit",
			Self::NowPlaying => "np",
			Self::Ping { .. } => "ping",
			Self::LinkMe => "linkme",
		}
	}

	/// `np`, `ping` and `linkme` are open to everyone.
	pub fn requires_admin(&self) -> bool {
		!matches!(self, Self::NowPlaying | Self::Ping { .. } | Self::LinkMe)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_every_command() {
		assert_eq!(
			Command::parse("`join #greenroom").unwrap(),
			Some(Command::Join {
				channel: "#greenroom".to_string()
			})
		);
		assert_eq!(Command::parse("`part").unwrap(), Some(Command::Part));
		assert_eq!(
			Command::parse("`connect  https://x/live/1 ").unwrap(),
			Some(Command::Connect {
				target: Some("https://x/live/1".to_string())
			})
		);
		assert_eq!(Command::parse("`connect").unwrap(), Some(Command::Connect { target: None }));
		assert_eq!(Command::parse("`disconnect").unwrap(), Some(Command::Disconnect));
		assert_eq!(Command::parse("`reset").unwrap(), Some(Command::Reset));
		assert_eq!(Command::parse("`reload").unwrap(), Some(Command::Reload));
		assert_eq!(
			Command::parse("`quit see you").unwrap(),
			Some(Command::Quit {
				message: Some("see you".to_string())
			})
		);
		assert_eq!(Command::parse("`quit").unwrap(), Some(Command::Quit { message: None }));
		assert_eq!(Command::parse("`np").unwrap(), Some(Command::NowPlaying));
		assert_eq!(Command::parse("`linkme").unwrap(), Some(Command::LinkMe));
	}

	#[test]
	fn ping_keeps_the_raw_suffix() {
		assert_eq!(
			Command::parse("`ping  hello").unwrap(),
			Some(Command::Ping {
				suffix: "  hello".to_string()
			})
		);
		assert_eq!(
			Command::parse("`ping").unwrap(),
			Some(Command::Ping { suffix: String::new() })
		);
	}

	#[test]
	fn non_commands_are_none() {
		assert_eq!(Command::parse("hello `np").unwrap(), None);
		assert_eq!(Command::parse("`npx").unwrap(), None);
		assert_eq!(Command::parse("`").unwrap(), None);
		assert_eq!(Command::parse("").unwrap(), None);
	}

	#[test]
	fn join_requires_a_channel() {
		assert_eq!(Command::parse("`join  "), Err(CommandParseError::MissingArgument("join")));
	}

	#[test]
	fn admin_gating() {
		assert!(Command::Reset.requires_admin());
		assert!(Command::Part.requires_admin());
		assert!(!Command::NowPlaying.requires_admin());
		assert!(!Command::LinkMe.requires_admin());
		assert!(!Command::Ping { suffix: String::new() }.requires_admin());
	}
}
