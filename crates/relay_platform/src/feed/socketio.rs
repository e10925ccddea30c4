#![forbid(unsafe_code)]

//! Minimal Engine.IO v4 / Socket.IO v5 text framing over a websocket.
//!
//! Only what a read-mostly subscriber needs: the open handshake, ping/pong,
//! namespace connect/disconnect and named events. Binary attachments are
//! rejected.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SocketIoError {
	#[error("empty frame")]
	Empty,
	#[error("unknown engine.io packet type {0:?}")]
	UnknownEngineType(char),
	#[error("unknown socket.io packet type {0:?}")]
	UnknownPacketType(char),
	#[error("binary packets are not supported")]
	Binary,
	#[error("invalid handshake payload: {0}")]
	InvalidHandshake(String),
	#[error("invalid packet payload: {0}")]
	InvalidPayload(String),
}

/// Engine.IO `open` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPacket {
	pub sid: String,
	pub ping_interval: Duration,
	pub ping_timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpen {
	sid: String,
	#[serde(default = "default_ping_interval")]
	ping_interval: u64,
	#[serde(default = "default_ping_timeout")]
	ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
	25_000
}

fn default_ping_timeout() -> u64 {
	20_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
	Connect,
	Disconnect,
	Event,
	Ack,
	ConnectError,
}

impl PacketKind {
	fn from_char(c: char) -> Result<Self, SocketIoError> {
		match c {
			'0' => Ok(Self::Connect),
			'1' => Ok(Self::Disconnect),
			'2' => Ok(Self::Event),
			'3' => Ok(Self::Ack),
			'4' => Ok(Self::ConnectError),
			'5' | '6' => Err(SocketIoError::Binary),
			other => Err(SocketIoError::UnknownPacketType(other)),
		}
	}

	fn as_char(self) -> char {
		match self {
			Self::Connect => '0',
			Self::Disconnect => '1',
			Self::Event => '2',
			Self::Ack => '3',
			Self::ConnectError => '4',
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocketIoPacket {
	pub kind: PacketKind,
	pub namespace: String,
	pub ack_id: Option<u64>,
	pub data: Option<Value>,
}

impl SocketIoPacket {
	/// Parse the Socket.IO part of an Engine.IO `message` frame.
	pub fn parse(s: &str) -> Result<Self, SocketIoError> {
		let mut chars = s.chars();
		let kind = PacketKind::from_char(chars.next().ok_or(SocketIoError::Empty)?)?;
		let mut rest = chars.as_str();

		let mut namespace = "/".to_string();
		if rest.starts_with('/') {
			match rest.split_once(',') {
				Some((ns, after)) => {
					namespace = ns.to_string();
					rest = after;
				}
				None => {
					namespace = rest.to_string();
					rest = "";
				}
			}
		}

		let digits = rest.chars().take_while(char::is_ascii_digit).count();
		let ack_id = if digits > 0 {
			let id = rest[..digits]
				.parse::<u64>()
				.map_err(|e| SocketIoError::InvalidPayload(e.to_string()))?;
			rest = &rest[digits..];
			Some(id)
		} else {
			None
		};

		let data = if rest.trim().is_empty() {
			None
		} else {
			Some(serde_json::from_str(rest).map_err(|e| SocketIoError::InvalidPayload(e.to_string()))?)
		};

		Ok(Self {
			kind,
			namespace,
			ack_id,
			data,
		})
	}

	/// Event name and first argument. A missing argument is an empty object.
	pub fn event(&self) -> Option<(String, Value)> {
		if self.kind != PacketKind::Event {
			return None;
		}
		let mut items = match self.data.as_ref()? {
			Value::Array(items) => items.clone().into_iter(),
			_ => return None,
		};
		let name = match items.next()? {
			Value::String(name) => name,
			_ => return None,
		};
		let payload = items.next().unwrap_or_else(|| Value::Object(Default::default()));
		Some((name, payload))
	}

	/// Human-readable reason carried by a `CONNECT_ERROR` packet.
	pub fn error_message(&self) -> String {
		match &self.data {
			Some(Value::Object(map)) => map
				.get("message")
				.and_then(Value::as_str)
				.map(str::to_string)
				.unwrap_or_else(|| Value::Object(map.clone()).to_string()),
			Some(Value::String(s)) => s.clone(),
			Some(other) => other.to_string(),
			None => "connection refused".to_string(),
		}
	}
}

/// One decoded Engine.IO text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineFrame {
	Open(OpenPacket),
	Close,
	Ping,
	Pong,
	Message(SocketIoPacket),
	Upgrade,
	Noop,
}

impl EngineFrame {
	pub fn parse(s: &str) -> Result<Self, SocketIoError> {
		let mut chars = s.chars();
		let ty = chars.next().ok_or(SocketIoError::Empty)?;
		let rest = chars.as_str();
		match ty {
			'0' => {
				let raw: RawOpen =
					serde_json::from_str(rest).map_err(|e| SocketIoError::InvalidHandshake(e.to_string()))?;
				Ok(Self::Open(OpenPacket {
					sid: raw.sid,
					ping_interval: Duration::from_millis(raw.ping_interval),
					ping_timeout: Duration::from_millis(raw.ping_timeout),
				}))
			}
			'1' => Ok(Self::Close),
			'2' => Ok(Self::Ping),
			'3' => Ok(Self::Pong),
			'4' => Ok(Self::Message(SocketIoPacket::parse(rest)?)),
			'5' => Ok(Self::Upgrade),
			'6' => Ok(Self::Noop),
			other => Err(SocketIoError::UnknownEngineType(other)),
		}
	}
}

/// Engine.IO `pong` frame sent in answer to a server ping.
pub const PONG_FRAME: &str = "3";

fn namespace_prefix(namespace: &str) -> String {
	if namespace.is_empty() || namespace == "/" {
		String::new()
	} else {
		format!("{namespace},")
	}
}

/// `40/ns,`: join a namespace.
pub fn connect_packet(namespace: &str) -> String {
	format!("4{}{}", PacketKind::Connect.as_char(), namespace_prefix(namespace))
}

/// `41/ns,`: leave a namespace.
pub fn disconnect_packet(namespace: &str) -> String {
	format!("4{}{}", PacketKind::Disconnect.as_char(), namespace_prefix(namespace))
}
