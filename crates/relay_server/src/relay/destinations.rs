#![forbid(unsafe_code)]

use relay_domain::{ChannelName, MessageTarget};
use relay_platform::ChatTransport;
use tracing::{debug, warn};

/// Insertion-ordered set of joined channels. Names compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Destinations {
	channels: Vec<ChannelName>,
}

impl Destinations {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns `false` if the channel was already present.
	pub fn insert(&mut self, channel: ChannelName) -> bool {
		if self.contains(&channel) {
			return false;
		}
		self.channels.push(channel);
		true
	}

	pub fn remove(&mut self, channel: &ChannelName) -> bool {
		let before = self.channels.len();
		self.channels.retain(|c| !c.eq_ignore_case(channel));
		before != self.channels.len()
	}

	pub fn contains(&self, channel: &ChannelName) -> bool {
		self.channels.iter().any(|c| c.eq_ignore_case(channel))
	}

	pub fn iter(&self) -> impl Iterator<Item = &ChannelName> {
		self.channels.iter()
	}

	pub fn len(&self) -> usize {
		self.channels.len()
	}

	pub fn is_empty(&self) -> bool {
		self.channels.is_empty()
	}

	/// Send `lines` in order to every current member. Returns the number of
	/// messages delivered; per-channel send failures are logged and skipped.
	pub async fn fan_out(&self, chat: &dyn ChatTransport, lines: &[&str]) -> usize {
		let mut delivered = 0;
		for channel in &self.channels {
			let target = MessageTarget::Channel(channel.clone());
			for line in lines {
				match chat.send_message(&target, line).await {
					Ok(()) => delivered += 1,
					Err(e) => {
						warn!(channel = %channel, error = %e, "fan-out: send failed");
						break;
					}
				}
			}
		}
		debug!(channels = self.channels.len(), delivered, "fan-out: done");
		delivered
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ch(s: &str) -> ChannelName {
		ChannelName::new(s).unwrap()
	}

	#[test]
	fn keeps_insertion_order_and_ignores_case_duplicates() {
		let mut d = Destinations::new();
		assert!(d.insert(ch("#skr")));
		assert!(d.insert(ch("#greenroom")));
		assert!(!d.insert(ch("#SKR")));
		assert_eq!(d.iter().map(|c| c.as_str()).collect::<Vec<_>>(), vec!["#skr", "#greenroom"]);

		assert!(d.remove(&ch("#GreenRoom")));
		assert!(!d.remove(&ch("#missing")));
		assert_eq!(d.len(), 1);

		assert!(d.remove(&ch("#skr")));
		assert!(d.is_empty());
	}
}
