#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use relay_domain::{ChannelName, MessageTarget, Nick};
use relay_platform::feed::resolve_feed_alias;
use relay_platform::{ChatEvent, ChatTransport, FeedControl, FeedEvent, IncomingMessage, SecretString};
use tracing::{debug, info, warn};

use super::command::Command;
use crate::config::{AdminSettings, RelayConfig, ReloadableSettings, reload_relay_config_from_path};
use crate::relay::{Destinations, EventRelay, NOW_PLAYING_PREFIX};
use crate::server::health::HealthState;

const NICKSERV: &str = "NickServ";
const IDENTIFY_ACCEPTED: &str = "Password accepted";
const DEFAULT_QUIT_MESSAGE: &str = "Goodbye!";
const NO_FEED: &str = "No feed configured";

/// Whether the event loop should keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
	Continue,
	Quit,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
	pub admins: AdminSettings,
	pub initial_channels: Vec<ChannelName>,
	pub default_channel: ChannelName,
	/// Feed target as configured (share links allowed).
	pub feed_url: Option<String>,
	pub nickserv_password: Option<SecretString>,
	pub state_path: PathBuf,
	/// Re-read by `reload`.
	pub config_path: Option<PathBuf>,
}

impl SessionSettings {
	pub fn from_config(cfg: &RelayConfig, config_path: Option<PathBuf>) -> Self {
		Self {
			admins: cfg.admins.clone(),
			initial_channels: cfg.channels.initial.clone(),
			default_channel: cfg.channels.default.clone(),
			feed_url: cfg.feed.url.clone(),
			nickserv_password: cfg.irc.nickserv_password.clone(),
			state_path: cfg.server.state_path.clone(),
			config_path,
		}
	}
}

/// Owns the chat-side lifecycle, the feed subscription and the relay.
///
/// Lives on the event loop task; nothing else mutates the destination set.
pub struct SessionController {
	chat: Arc<dyn ChatTransport>,
	feed: Box<dyn FeedControl>,
	relay: EventRelay,
	destinations: Destinations,
	settings: SessionSettings,
	health: HealthState,
	/// Feed target of the live (or last requested) subscription.
	link: Option<String>,
	awaiting_identify: bool,
	started: bool,
}

impl SessionController {
	pub fn new(
		chat: Arc<dyn ChatTransport>,
		feed: Box<dyn FeedControl>,
		relay: EventRelay,
		settings: SessionSettings,
		health: HealthState,
	) -> Self {
		let link = settings.feed_url.clone();
		Self {
			chat,
			feed,
			relay,
			destinations: Destinations::new(),
			settings,
			health,
			link,
			awaiting_identify: false,
			started: false,
		}
	}

	#[cfg(test)]
	pub fn destinations(&self) -> &Destinations {
		&self.destinations
	}

	#[cfg(test)]
	pub fn relay(&self) -> &EventRelay {
		&self.relay
	}

	#[cfg(test)]
	pub fn settings(&self) -> &SessionSettings {
		&self.settings
	}

	/// `(lastImage, lastMessage)`.
	pub fn query(&self) -> (&str, &str) {
		self.relay.query()
	}

	pub fn is_admin(&self, nick: &Nick) -> bool {
		self.settings.admins.names.iter().any(|a| a == nick)
	}

	pub async fn handle_chat_event(&mut self, ev: ChatEvent) -> anyhow::Result<Flow> {
		match ev {
			ChatEvent::Registered { nick } => {
				info!(%nick, "irc: registered");
				self.health.set_irc_registered(true);
				match self.settings.nickserv_password.clone() {
					Some(password) => {
						self.awaiting_identify = true;
						let target = MessageTarget::User(Nick::new(NICKSERV)?);
						self.say(&target, &format!("IDENTIFY {}", password.expose())).await;
						info!("irc: identifying with NickServ");
					}
					None => self.start_session().await,
				}
				Ok(Flow::Continue)
			}
			ChatEvent::Notice(msg) => {
				self.check_identify(&msg).await;
				Ok(Flow::Continue)
			}
			ChatEvent::Message(msg) => {
				if self.check_identify(&msg).await {
					return Ok(Flow::Continue);
				}
				Ok(self.handle_message(&msg).await)
			}
			ChatEvent::Disconnected { reason } => {
				warn!(%reason, "irc: disconnected");
				self.health.set_irc_registered(false);
				self.health.set_channels_joined(false);
				self.save_state();
				self.feed.disconnect().await;
				self.health.set_feed_connected(false);
				Err(anyhow!("irc connection lost: {reason}"))
			}
		}
	}

	/// Returns `true` when `msg` was the NickServ confirmation we were waiting for.
	async fn check_identify(&mut self, msg: &IncomingMessage) -> bool {
		if !self.awaiting_identify || !msg.sender.as_str().eq_ignore_ascii_case(NICKSERV) {
			return false;
		}
		if !msg.text.contains(IDENTIFY_ACCEPTED) {
			debug!(text = %msg.text, "irc: nickserv");
			return false;
		}
		info!("irc: identified");
		self.awaiting_identify = false;
		self.start_session().await;
		true
	}

	/// Join the initial channels and subscribe to the configured feed. Runs once.
	async fn start_session(&mut self) {
		if self.started {
			return;
		}
		self.started = true;

		for channel in self.settings.initial_channels.clone() {
			self.join_channel(&channel).await;
		}
		self.health.set_channels_joined(true);

		if let Some(raw) = self.settings.feed_url.clone()
			&& let Err(e) = self.connect_to(&raw).await
		{
			warn!(feed = %raw, error = %e, "feed: initial connect failed");
			self.dm_primary(&format!("I couldn't connect to {raw}")).await;
		}
	}

	pub async fn handle_message(&mut self, msg: &IncomingMessage) -> Flow {
		let cmd = match Command::parse(&msg.text) {
			Ok(Some(cmd)) => cmd,
			Ok(None) => return Flow::Continue,
			Err(e) => {
				debug!(sender = %msg.sender, error = %e, "command: ignored");
				return Flow::Continue;
			}
		};

		if cmd.requires_admin() && !self.is_admin(&msg.sender) {
			debug!(sender = %msg.sender, command = cmd.name(), "command: not an admin");
			return Flow::Continue;
		}
		metrics::counter!("relay_commands_total", "command" => cmd.name()).increment(1);
		debug!(sender = %msg.sender, command = cmd.name(), "command");

		let reply_to = msg.reply_target();
		match cmd {
			Command::Join { channel } => self.join_destination(&channel).await,
			Command::Part => self.part_destination(msg).await,
			Command::Connect { target } => self.connect_feed(target.as_deref(), &reply_to).await,
			Command::Disconnect => self.disconnect_feed(&reply_to).await,
			Command::Reset => self.reset_state(&msg.sender).await,
			Command::Reload => self.reload(&reply_to).await,
			Command::Quit { message } => {
				self.quit(message.as_deref().unwrap_or(DEFAULT_QUIT_MESSAGE)).await;
				return Flow::Quit;
			}
			Command::NowPlaying => self.now_playing(&reply_to).await,
			Command::Ping { suffix } => self.say(&reply_to, &format!("pong{suffix}")).await,
			Command::LinkMe => {
				let link = self.link.clone().unwrap_or_else(|| NO_FEED.to_string());
				self.say(&reply_to, &link).await;
			}
		}
		Flow::Continue
	}

	pub async fn handle_feed_event(&mut self, ev: FeedEvent) {
		match ev {
			FeedEvent::Event(p) => {
				metrics::counter!("relay_feed_events_total").increment(1);
				let lag_ms = p.received_at.elapsed().map(|d| d.as_millis() as u64).unwrap_or_default();
				let outcome = self
					.relay
					.handle_event(&p.name, p.payload, &self.destinations, &*self.chat)
					.await;
				debug!(event = %p.name, session = %p.session_id, lag_ms, ?outcome, "feed: event handled");
			}
			FeedEvent::Status(s) => {
				self.health.set_feed_connected(s.connected);
				match s.last_error {
					Some(err) => warn!(detail = %s.detail, error = %err, "feed: status"),
					None => info!(connected = s.connected, detail = %s.detail, "feed: status"),
				}
			}
		}
	}

	/// Send one line to every destination.
	pub async fn broadcast(&self, line: &str) -> usize {
		if self.destinations.is_empty() {
			debug!("broadcast: no channels joined");
			return 0;
		}
		self.destinations.fan_out(&*self.chat, &[line]).await
	}

	pub async fn connect_feed(&mut self, target: Option<&str>, reply_to: &MessageTarget) {
		let Some(raw) = target.map(str::to_string).or_else(|| self.settings.feed_url.clone()) else {
			warn!("feed: connect requested but no feed is configured");
			self.say(reply_to, "I couldn't connect").await;
			return;
		};

		match self.connect_to(&raw).await {
			Ok(()) => {
				self.relay.reset();
				self.say(reply_to, "Connected!").await;
			}
			Err(e) => {
				warn!(feed = %raw, error = ?e, "feed: connect failed");
				self.say(reply_to, "I couldn't connect").await;
			}
		}
	}

	async fn connect_to(&mut self, raw: &str) -> anyhow::Result<()> {
		let url = resolve_feed_alias(raw)?;
		self.feed.disconnect().await;
		self.health.set_feed_connected(false);
		self.feed.connect(&url).await?;
		self.health.set_feed_connected(true);
		self.link = Some(raw.to_string());
		info!(feed = %url, "feed: subscribed");
		Ok(())
	}

	pub async fn disconnect_feed(&mut self, reply_to: &MessageTarget) {
		self.feed.disconnect().await;
		self.health.set_feed_connected(false);
		info!("feed: disconnected on request");
		self.say(reply_to, "Disconnected").await;
	}

	/// Forget the announcement state, leave every channel and rejoin the default one.
	///
	/// Channels that could not be left stay in the destination set.
	pub async fn reset_state(&mut self, requested_by: &Nick) {
		self.relay.reset();
		if let Err(e) = self.relay.save(&self.settings.state_path) {
			warn!(error = ?e, "state: save after reset failed");
			self.dm_primary(&format!("error saving state: {e}")).await;
		}

		let joined: Vec<ChannelName> = self.destinations.iter().cloned().collect();
		for channel in joined {
			match self.chat.part(&channel, None).await {
				Ok(()) => {
					self.destinations.remove(&channel);
				}
				Err(e) => {
					warn!(%channel, error = %e, "irc: part failed");
					self.dm_primary(&format!("error leaving {channel}")).await;
				}
			}
		}
		let default = self.settings.default_channel.clone();
		self.join_channel(&default).await;

		info!(by = %requested_by, "session: reset");
		self.say(&MessageTarget::User(requested_by.clone()), "Reset complete").await;
	}

	pub async fn join_destination(&mut self, raw: &str) {
		match ChannelName::new(raw) {
			Ok(channel) => self.join_channel(&channel).await,
			Err(e) => {
				warn!(channel = %raw, error = %e, "irc: invalid channel");
				self.dm_primary(&format!("error joining {raw}")).await;
			}
		}
	}

	async fn join_channel(&mut self, channel: &ChannelName) {
		match self.chat.join(channel).await {
			Ok(()) => {
				self.destinations.insert(channel.clone());
				info!(%channel, "irc: joined");
			}
			Err(e) => {
				warn!(%channel, error = %e, "irc: join failed");
				self.dm_primary(&format!("error joining {channel}")).await;
			}
		}
	}

	/// Leave the channel the command was issued in. Private messages are ignored.
	pub async fn part_destination(&mut self, msg: &IncomingMessage) {
		let Some(channel) = msg.channel().cloned() else {
			debug!(sender = %msg.sender, "command: part outside a channel");
			return;
		};
		match self.chat.part(&channel, None).await {
			Ok(()) => {
				self.destinations.remove(&channel);
				info!(%channel, "irc: parted");
				self.dm_primary(&format!("Left {channel}")).await;
			}
			Err(e) => {
				warn!(%channel, error = %e, "irc: part failed");
				self.dm_primary(&format!("error leaving {channel}")).await;
			}
		}
	}

	async fn reload(&mut self, reply_to: &MessageTarget) {
		let Some(path) = self.settings.config_path.clone() else {
			self.dm_primary("reload failed: no config file").await;
			return;
		};
		match reload_relay_config_from_path(&path) {
			Ok(cfg) => {
				self.apply_reload(cfg.reloadable());
				info!(path = %path.display(), "config: reloaded");
				self.say(reply_to, "Config reloaded").await;
			}
			Err(e) => {
				warn!(path = %path.display(), error = ?e, "config: reload failed");
				self.dm_primary(&format!("reload failed: {e}")).await;
			}
		}
	}

	pub fn apply_reload(&mut self, reloaded: ReloadableSettings) {
		if reloaded.admins.names.is_empty() {
			warn!("config: reload has no admins, keeping the current list");
		} else {
			self.settings.admins = reloaded.admins;
		}
		self.relay.set_placeholder(reloaded.placeholder);
		if self.feed.current_url().is_none() {
			self.link = reloaded.feed_url.clone();
		}
		self.settings.feed_url = reloaded.feed_url;
	}

	/// Persist state, drop the feed and leave the chat server.
	pub async fn quit(&mut self, message: &str) {
		info!(%message, "session: quitting");
		self.save_state();
		self.feed.disconnect().await;
		self.health.set_feed_connected(false);
		if let Err(e) = self.chat.quit(message).await {
			warn!(error = %e, "irc: quit failed");
		}
	}

	async fn now_playing(&self, reply_to: &MessageTarget) {
		let (image, message) = self.query();
		if !image.is_empty() {
			self.say(reply_to, image).await;
		}
		self.say(reply_to, &format!("{NOW_PLAYING_PREFIX}{message}")).await;
	}

	fn save_state(&self) {
		match self.relay.save(&self.settings.state_path) {
			Ok(()) => debug!(path = %self.settings.state_path.display(), "state: saved"),
			Err(e) => warn!(error = ?e, "state: save failed"),
		}
	}

	async fn dm_primary(&self, text: &str) {
		let Some(primary) = self.settings.admins.primary() else {
			warn!(%text, "no primary admin to notify");
			return;
		};
		self.say(&MessageTarget::User(primary.clone()), text).await;
	}

	async fn say(&self, target: &MessageTarget, text: &str) {
		if let Err(e) = self.chat.send_message(target, text).await {
			warn!(%target, error = %e, "irc: send failed");
		}
	}
}
