#![forbid(unsafe_code)]

use std::path::Path;

use relay_platform::ChatTransport;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::destinations::Destinations;
use super::normalize::compose_announcement;
use super::shorten::UrlShortener;
use super::state::{AnnouncementState, NOTHING_PLAYING};
use crate::util::time::unix_secs_now;

/// Dedup identity used when an event carries no `blockGuid`.
pub const MISSING_GUID: &str = "guid";

/// Image reported when an event carries none.
pub const MISSING_IMAGE: &str = "N/A";

/// Prefix of every announcement line.
pub const NOW_PLAYING_PREFIX: &str = "Now Playing: ";

/// What `handle_event` did with one feed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
	/// Not the value-update event.
	Ignored,
	/// Same epoch second as the previous event.
	Coalesced,
	/// Empty payload; state now says nothing is playing.
	NothingPlaying,
	/// `blockGuid` matches the active one.
	Duplicate,
	Announced { delivered: usize },
}

impl EventOutcome {
	fn discard_reason(&self) -> Option<&'static str> {
		match self {
			Self::Ignored => Some("ignored"),
			Self::Coalesced => Some("coalesced"),
			Self::Duplicate => Some("duplicate"),
			Self::NothingPlaying | Self::Announced { .. } => None,
		}
	}
}

/// Fields consumed from one raw feed payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct NowPlaying {
	guid: String,
	image: String,
	title: String,
	lines: Vec<String>,
	link_url: String,
}

impl NowPlaying {
	fn from_map(map: &Map<String, Value>) -> Self {
		let guid = match map.get("blockGuid") {
			Some(Value::String(s)) => s.clone(),
			Some(Value::Null) | None => MISSING_GUID.to_string(),
			Some(other) => other.to_string(),
		};
		let image = map
			.get("image")
			.and_then(Value::as_str)
			.unwrap_or(MISSING_IMAGE)
			.to_string();
		let title = map.get("title").and_then(Value::as_str).unwrap_or_default().to_string();
		let lines = match map.get("line") {
			Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
			_ => Vec::new(),
		};
		let link_url = map
			.get("link")
			.and_then(|l| l.get("url"))
			.and_then(Value::as_str)
			.unwrap_or_default()
			.to_string();

		Self {
			guid,
			image,
			title,
			lines,
			link_url,
		}
	}
}

/// Owns the announcement state and turns feed events into channel messages.
pub struct EventRelay {
	state: AnnouncementState,
	shortener: UrlShortener,
	event_name: String,
	placeholder: String,
}

impl EventRelay {
	pub fn new(
		state: AnnouncementState,
		shortener: UrlShortener,
		event_name: impl Into<String>,
		placeholder: impl Into<String>,
	) -> Self {
		Self {
			state,
			shortener,
			event_name: event_name.into(),
			placeholder: placeholder.into(),
		}
	}

	#[cfg(test)]
	pub fn state(&self) -> &AnnouncementState {
		&self.state
	}

	/// `(lastImage, lastMessage)`.
	pub fn query(&self) -> (&str, &str) {
		self.state.query()
	}

	pub fn reset(&mut self) {
		self.state = AnnouncementState::default();
	}

	pub fn set_placeholder(&mut self, placeholder: impl Into<String>) {
		self.placeholder = placeholder.into();
	}

	pub fn save(&self, path: &Path) -> anyhow::Result<()> {
		self.state.save(path)
	}

	pub async fn handle_event(
		&mut self,
		event_name: &str,
		raw: Value,
		destinations: &Destinations,
		chat: &dyn ChatTransport,
	) -> EventOutcome {
		self.handle_event_at(unix_secs_now(), event_name, raw, destinations, chat)
			.await
	}

	/// `handle_event` with an explicit clock.
	pub async fn handle_event_at(
		&mut self,
		now: i64,
		event_name: &str,
		raw: Value,
		destinations: &Destinations,
		chat: &dyn ChatTransport,
	) -> EventOutcome {
		let outcome = self.process(now, event_name, raw, destinations, chat).await;
		match outcome.discard_reason() {
			Some(reason) => {
				metrics::counter!("relay_events_discarded_total", "reason" => reason).increment(1);
				debug!(event = %event_name, reason, "relay: event discarded");
			}
			None => {
				if matches!(outcome, EventOutcome::Announced { .. }) {
					metrics::counter!("relay_announcements_total").increment(1);
				}
			}
		}
		outcome
	}

	async fn process(
		&mut self,
		now: i64,
		event_name: &str,
		raw: Value,
		destinations: &Destinations,
		chat: &dyn ChatTransport,
	) -> EventOutcome {
		if event_name != self.event_name {
			return EventOutcome::Ignored;
		}

		if now == self.state.last_event_timestamp {
			return EventOutcome::Coalesced;
		}
		self.state.last_event_timestamp = now;

		let mut map = match raw {
			Value::Object(map) => map,
			_ => Map::new(),
		};
		map.remove("value");

		if map.is_empty() {
			self.state.last_message = NOTHING_PLAYING.to_string();
			return EventOutcome::NothingPlaying;
		}

		let np = NowPlaying::from_map(&map);
		if np.guid == self.state.active_guid {
			return EventOutcome::Duplicate;
		}

		let image = self.shortener.shorten(&np.image).await.into_url();
		let text = compose_announcement(&np.title, &np.lines, &np.link_url, &self.placeholder);
		let line = format!("{NOW_PLAYING_PREFIX}{text}");

		let delivered = destinations.fan_out(chat, &[image.as_str(), line.as_str()]).await;
		info!(guid = %np.guid, channels = destinations.len(), text = %text, "relay: announced");

		self.state.active_guid = np.guid;
		self.state.last_message = text;
		self.state.last_image = image;

		EventOutcome::Announced { delivered }
	}
}
