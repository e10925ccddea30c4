#![forbid(unsafe_code)]

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Reply body when nothing has been announced.
pub const NOTHING_PLAYING: &str = "nothing";

/// Durable dedup identity and last announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementState {
	#[serde(rename = "activeGUID", default)]
	pub active_guid: String,

	#[serde(rename = "lastMsg", default = "default_last_message")]
	pub last_message: String,

	#[serde(rename = "lastImg", default)]
	pub last_image: String,

	#[serde(rename = "lastEventTimestamp", default)]
	pub last_event_timestamp: i64,
}

fn default_last_message() -> String {
	NOTHING_PLAYING.to_string()
}

impl Default for AnnouncementState {
	fn default() -> Self {
		Self {
			active_guid: String::new(),
			last_message: default_last_message(),
			last_image: String::new(),
			last_event_timestamp: 0,
		}
	}
}

impl AnnouncementState {
	/// Load from `path`; a missing or unreadable file yields defaults.
	pub fn load(path: &Path) -> Self {
		let raw = match fs::read_to_string(path) {
			Ok(raw) => raw,
			Err(e) if e.kind() == ErrorKind::NotFound => {
				debug!(path = %path.display(), "state: no state file; starting fresh");
				return Self::default();
			}
			Err(e) => {
				warn!(path = %path.display(), error = %e, "state: read failed; starting fresh");
				return Self::default();
			}
		};

		match serde_json::from_str(&raw) {
			Ok(state) => state,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "state: parse failed; starting fresh");
				Self::default()
			}
		}
	}

	/// Write to `path` through a sibling temp file, then rename.
	pub fn save(&self, path: &Path) -> anyhow::Result<()> {
		if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
			fs::create_dir_all(dir).with_context(|| format!("create state dir {}", dir.display()))?;
		}
		let body = serde_json::to_vec_pretty(self).context("serialize state")?;
		let tmp = path.with_extension("json.tmp");
		fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
		fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
		Ok(())
	}

	/// `(lastImage, lastMessage)` for now-playing queries.
	pub fn query(&self) -> (&str, &str) {
		(&self.last_image, &self.last_message)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let s = AnnouncementState::default();
		assert_eq!(s.query(), ("", "nothing"));
		assert_eq!(s.active_guid, "");
		assert_eq!(s.last_event_timestamp, 0);
	}

	#[test]
	fn save_then_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("MESSAGES.json");
		let state = AnnouncementState {
			active_guid: "g-1".to_string(),
			last_message: "\u{2}Ep\u{2} - Band".to_string(),
			last_image: "https://therelay.cc/x".to_string(),
			last_event_timestamp: 1_700_000_000,
		};
		state.save(&path).unwrap();

		let raw = std::fs::read_to_string(&path).unwrap();
		assert!(raw.contains("\"activeGUID\""));
		assert!(raw.contains("\"lastMsg\""));
		assert!(raw.contains("\"lastImg\""));
		assert_eq!(AnnouncementState::load(&path), state);
	}

	#[test]
	fn missing_or_garbage_file_yields_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("MESSAGES.json");
		assert_eq!(AnnouncementState::load(&path), AnnouncementState::default());

		std::fs::write(&path, "{not json").unwrap();
		assert_eq!(AnnouncementState::load(&path), AnnouncementState::default());
	}

	#[test]
	fn partial_legacy_file_fills_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("MESSAGES.json");
		std::fs::write(&path, r#"{"activeGUID":"abc"}"#).unwrap();
		let s = AnnouncementState::load(&path);
		assert_eq!(s.active_guid, "abc");
		assert_eq!(s.last_message, "nothing");
		assert_eq!(s.last_image, "");
	}
}
