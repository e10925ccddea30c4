#![forbid(unsafe_code)]

//! Recording fakes for the transport traits.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_domain::{ChannelName, MessageTarget};
use relay_platform::{ChatTransport, FeedControl, Shortener};
use url::Url;

use crate::relay::UrlShortener;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
	Join(String),
	Part(String),
	Message { target: String, text: String },
	Quit(String),
}

#[derive(Default)]
pub struct RecordingChat {
	pub sent: Mutex<Vec<Sent>>,
	pub refuse_joins: Mutex<HashSet<String>>,
	pub refuse_parts: Mutex<HashSet<String>>,
}

impl RecordingChat {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn refuse_join(&self, channel: &str) {
		self.refuse_joins.lock().insert(channel.to_ascii_lowercase());
	}

	pub fn refuse_part(&self, channel: &str) {
		self.refuse_parts.lock().insert(channel.to_ascii_lowercase());
	}

	pub fn take(&self) -> Vec<Sent> {
		std::mem::take(&mut *self.sent.lock())
	}

	/// `(target, text)` of every message sent so far.
	pub fn messages(&self) -> Vec<(String, String)> {
		self.sent
			.lock()
			.iter()
			.filter_map(|s| match s {
				Sent::Message { target, text } => Some((target.clone(), text.clone())),
				_ => None,
			})
			.collect()
	}
}

#[async_trait]
impl ChatTransport for RecordingChat {
	async fn join(&self, channel: &ChannelName) -> anyhow::Result<()> {
		self.sent.lock().push(Sent::Join(channel.to_string()));
		if self.refuse_joins.lock().contains(&channel.as_str().to_ascii_lowercase()) {
			return Err(anyhow!("join {channel} refused: Cannot join channel (+b)"));
		}
		Ok(())
	}

	async fn part(&self, channel: &ChannelName, _reason: Option<&str>) -> anyhow::Result<()> {
		self.sent.lock().push(Sent::Part(channel.to_string()));
		if self.refuse_parts.lock().contains(&channel.as_str().to_ascii_lowercase()) {
			return Err(anyhow!("part {channel} failed: outgoing queue closed"));
		}
		Ok(())
	}

	async fn send_message(&self, target: &MessageTarget, text: &str) -> anyhow::Result<()> {
		self.sent.lock().push(Sent::Message {
			target: target.to_string(),
			text: text.to_string(),
		});
		Ok(())
	}

	async fn quit(&self, reason: &str) -> anyhow::Result<()> {
		self.sent.lock().push(Sent::Quit(reason.to_string()));
		Ok(())
	}
}

/// Shortener that returns a fixed URL, or fails.
#[derive(Default)]
pub struct StaticShortener {
	pub fail: bool,
	pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Shortener for StaticShortener {
	async fn shorten(&self, url: &str) -> anyhow::Result<String> {
		self.calls.lock().push(url.to_string());
		if self.fail {
			return Err(anyhow!("shortener unavailable"));
		}
		Ok(format!("https://short.test/{}", self.calls.lock().len()))
	}
}

pub fn url_shortener(remote: Arc<StaticShortener>) -> UrlShortener {
	UrlShortener::new(
		remote,
		"cloudfront",
		"https://www.wavlake.com/_next/image?url={url}&w=750&q=75",
	)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCall {
	Connect(String),
	Disconnect,
}

/// Feed control that records calls and shares them with the test.
#[derive(Clone, Default)]
pub struct FakeFeed {
	pub calls: Arc<Mutex<Vec<FeedCall>>>,
	pub fail_connect: Arc<Mutex<bool>>,
	current: Option<Url>,
}

#[async_trait]
impl FeedControl for FakeFeed {
	async fn connect(&mut self, url: &Url) -> anyhow::Result<()> {
		self.disconnect().await;
		self.calls.lock().push(FeedCall::Connect(url.to_string()));
		if *self.fail_connect.lock() {
			return Err(anyhow!("feed unreachable"));
		}
		self.current = Some(url.clone());
		Ok(())
	}

	async fn disconnect(&mut self) {
		self.calls.lock().push(FeedCall::Disconnect);
		self.current = None;
	}

	fn current_url(&self) -> Option<&Url> {
		self.current.as_ref()
	}
}
