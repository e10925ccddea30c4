#![forbid(unsafe_code)]

mod client;
pub mod socketio;

use std::time::Duration;

use anyhow::{Context, anyhow};
use url::Url;

pub use client::FeedClient;

/// Share links on this host are rewritten to the backing event feed.
pub const SHARE_LINK_MARKER: &str = "splitkit";

/// Event feed that serves share-link aliases.
pub const ALIAS_FEED_BASE: &str = "https://curiohoster.com/event";

#[derive(Debug, Clone)]
pub struct FeedConfig {
	/// Socket.IO namespace to join.
	pub namespace: String,

	/// Engine.IO endpoint path on the feed host.
	pub engine_path: String,

	pub connect_timeout: Duration,
	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
}

impl Default for FeedConfig {
	fn default() -> Self {
		Self {
			namespace: "/event".to_string(),
			engine_path: "/socket.io/".to_string(),
			connect_timeout: Duration::from_secs(15),
			reconnect_min_delay: Duration::from_millis(500),
			reconnect_max_delay: Duration::from_secs(30),
		}
	}
}

/// Turn a user-supplied feed target into the subscribable URL.
///
/// Share links (`https://…splitkit…/live/<uuid>/`) become
/// `https://curiohoster.com/event?event_id=<uuid>`; anything else must
/// already be an absolute URL.
pub fn resolve_feed_alias(raw: &str) -> anyhow::Result<Url> {
	let raw = raw.trim();
	if raw.is_empty() {
		return Err(anyhow!("empty feed url"));
	}

	if raw.contains(SHARE_LINK_MARKER) {
		let tail = raw.rsplit("live/").next().unwrap_or(raw);
		let event_id = tail.replace('/', "");
		if event_id.is_empty() {
			return Err(anyhow!("share link has no event id: {raw}"));
		}
		let mut url = Url::parse(ALIAS_FEED_BASE).context("parse alias feed base")?;
		url.query_pairs_mut().append_pair("event_id", &event_id);
		return Ok(url);
	}

	Url::parse(raw).with_context(|| format!("invalid feed url: {raw}"))
}

/// Websocket transport URL for a feed URL: the feed's path is replaced by
/// the Engine.IO path and its query is kept.
pub fn engine_io_url(feed: &Url, engine_path: &str) -> anyhow::Result<Url> {
	let mut url = feed.clone();
	let scheme = match feed.scheme() {
		"http" | "ws" => "ws",
		"https" | "wss" => "wss",
		other => return Err(anyhow!("unsupported feed scheme: {other}")),
	};
	url.set_scheme(scheme)
		.map_err(|_| anyhow!("cannot switch {feed} to {scheme}"))?;
	url.set_path(engine_path);
	url.set_fragment(None);
	url.query_pairs_mut()
		.append_pair("EIO", "4")
		.append_pair("transport", "websocket");
	Ok(url)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn share_link_resolves_to_event_feed() {
		let url = resolve_feed_alias("https://splitkit.podcastindex.org/live/1234-abcd/").unwrap();
		assert_eq!(url.as_str(), "https://curiohoster.com/event?event_id=1234-abcd");
	}

	#[test]
	fn plain_url_passes_through() {
		let url = resolve_feed_alias(" https://curiohoster.com/event?event_id=x ").unwrap();
		assert_eq!(url.as_str(), "https://curiohoster.com/event?event_id=x");
	}

	#[test]
	fn garbage_is_rejected() {
		assert!(resolve_feed_alias("").is_err());
		assert!(resolve_feed_alias("not a url").is_err());
		assert!(resolve_feed_alias("https://splitkit.example/live/").is_err());
	}

	#[test]
	fn engine_url_keeps_query_and_switches_scheme() {
		let feed = Url::parse("https://curiohoster.com/event?event_id=abc").unwrap();
		let ws = engine_io_url(&feed, "/socket.io/").unwrap();
		assert_eq!(
			ws.as_str(),
			"wss://curiohoster.com/socket.io/?event_id=abc&EIO=4&transport=websocket"
		);

		let local = Url::parse("http://127.0.0.1:9000/event").unwrap();
		assert_eq!(
			engine_io_url(&local, "/socket.io/").unwrap().as_str(),
			"ws://127.0.0.1:9000/socket.io/?EIO=4&transport=websocket"
		);
	}
}
