#![forbid(unsafe_code)]

pub mod feed;
pub mod irc;
pub mod shortener;

use std::fmt;
use std::time::{Duration, SystemTime};

use relay_domain::{ChannelName, MessageTarget, Nick};
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

/// Transport → relay chat notification.
#[derive(Debug, Clone)]
pub enum ChatEvent {
	/// Server accepted our registration (`001`).
	Registered { nick: String },

	/// `PRIVMSG` addressed to a channel we are in or to us directly.
	Message(IncomingMessage),

	/// `NOTICE` (services replies land here).
	Notice(IncomingMessage),

	/// Connection to the chat server was lost.
	Disconnected { reason: String },
}

/// Inbound chat line with its parsed sender and target.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
	pub sender: Nick,
	pub target: MessageTarget,
	pub text: String,
}

impl IncomingMessage {
	/// Where a reply should go: the channel it was said in, or back to the sender.
	pub fn reply_target(&self) -> MessageTarget {
		match &self.target {
			MessageTarget::Channel(c) => MessageTarget::Channel(c.clone()),
			MessageTarget::User(_) => MessageTarget::User(self.sender.clone()),
		}
	}

	pub fn channel(&self) -> Option<&ChannelName> {
		self.target.as_channel()
	}
}

/// Feed → relay notification.
#[derive(Debug, Clone)]
pub enum FeedEvent {
	/// Named socket event with its (first) argument.
	Event(FeedPayload),

	/// Subscription status update.
	Status(FeedStatus),
}

#[derive(Debug, Clone)]
pub struct FeedPayload {
	pub name: String,
	pub payload: serde_json::Value,
	pub session_id: String,
	pub received_at: SystemTime,
}

#[derive(Debug, Clone)]
pub struct FeedStatus {
	pub connected: bool,
	pub detail: String,
	pub last_error: Option<String>,
}

pub type ChatEventTx = mpsc::Sender<ChatEvent>;
pub type ChatEventRx = mpsc::Receiver<ChatEvent>;
pub type FeedEventTx = mpsc::Sender<FeedEvent>;
pub type FeedEventRx = mpsc::Receiver<FeedEvent>;

/// Outbound chat primitives used by the relay.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync + 'static {
	/// Join a channel; resolves once the server confirmed (or refused) the join.
	async fn join(&self, channel: &ChannelName) -> anyhow::Result<()>;

	async fn part(&self, channel: &ChannelName, reason: Option<&str>) -> anyhow::Result<()>;

	async fn send_message(&self, target: &MessageTarget, text: &str) -> anyhow::Result<()>;

	async fn quit(&self, reason: &str) -> anyhow::Result<()>;
}

/// Lifecycle control for the upstream feed subscription.
#[async_trait::async_trait]
pub trait FeedControl: Send + 'static {
	/// Establish a subscription. Any previous subscription is torn down first.
	async fn connect(&mut self, url: &Url) -> anyhow::Result<()>;

	/// Tear down the subscription and wait until its task has exited.
	async fn disconnect(&mut self);

	/// URL of the live subscription, if any.
	fn current_url(&self) -> Option<&Url>;
}

/// Remote URL shortening service.
#[async_trait::async_trait]
pub trait Shortener: Send + Sync + 'static {
	async fn shorten(&self, url: &str) -> anyhow::Result<String>;
}

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

/// Build a feed status event.
pub fn feed_status(connected: bool, detail: impl Into<String>) -> FeedEvent {
	FeedEvent::Status(FeedStatus {
		connected,
		detail: detail.into(),
		last_error: None,
	})
}

/// Build a feed error status event.
pub fn feed_status_error(detail: impl Into<String>, err: impl fmt::Display) -> FeedEvent {
	FeedEvent::Status(FeedStatus {
		connected: false,
		detail: detail.into(),
		last_error: Some(err.to_string()),
	})
}

/// Generate an opaque session id.
pub fn new_session_id() -> String {
	Uuid::new_v4().to_string()
}

/// Exponential backoff clamped to `[min, max]`.
pub fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
	let pow = attempt.min(16);
	let ms = min.as_millis().saturating_mul(1u128 << pow);
	let d = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
	d.min(max).max(min)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn secret_string_is_redacted() {
		let s = SecretString::new("hunter2");
		assert_eq!(format!("{s}"), "<redacted>");
		assert_eq!(format!("{s:?}"), "SecretString(<redacted>)");
		assert_eq!(s.expose(), "hunter2");
	}

	#[test]
	fn backoff_doubles_and_clamps() {
		let min = Duration::from_millis(500);
		let max = Duration::from_secs(30);
		assert_eq!(backoff_delay(0, min, max), min);
		assert_eq!(backoff_delay(1, min, max), Duration::from_secs(1));
		assert_eq!(backoff_delay(3, min, max), Duration::from_secs(4));
		assert_eq!(backoff_delay(40, min, max), max);
	}

	#[test]
	fn reply_target_prefers_channel() {
		let in_channel = IncomingMessage {
			sender: Nick::new("dave").unwrap(),
			target: MessageTarget::parse("#skr").unwrap(),
			text: "`np".to_string(),
		};
		assert_eq!(in_channel.reply_target().as_str(), "#skr");

		let direct = IncomingMessage {
			sender: Nick::new("dave").unwrap(),
			target: MessageTarget::parse("splitkit-relay").unwrap(),
			text: "`np".to_string(),
		};
		assert_eq!(direct.reply_target().as_str(), "dave");
		assert!(direct.channel().is_none());
	}
}
