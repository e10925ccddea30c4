#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use relay_domain::{ChannelName, Nick};
use relay_platform::SecretString;
use serde::Deserialize;
use tracing::{debug, info, warn};

pub const DEFAULT_EVENT_NAME: &str = "remoteValue";
pub const DEFAULT_PLACEHOLDER: &str = "Text - click to edit";
pub const DEFAULT_CHANNEL: &str = "#skr";
pub const STATE_FILE_NAME: &str = "MESSAGES.json";

/// Default config path: `~/.nowplaying-relay/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".nowplaying-relay").join("config.toml"))
}

/// Load the relay config from TOML and env overrides.
pub fn load_relay_config_from_path(path: &Path) -> anyhow::Result<RelayConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = RelayConfig::from_file(file_cfg, path);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

/// Like [`load_relay_config_from_path`], but a missing file is an error.
pub fn reload_relay_config_from_path(path: &Path) -> anyhow::Result<RelayConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.ok_or_else(|| anyhow!("config file {} not found", path.display()))?;

	let mut cfg = RelayConfig::from_file(file_cfg, path);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

/// Relay config (v1).
#[derive(Debug, Clone)]
pub struct RelayConfig {
	pub feed: FeedSettings,
	pub irc: IrcSettings,
	pub admins: AdminSettings,
	pub channels: ChannelSettings,
	pub text: TextSettings,
	pub shortener: ShortenerSettings,
	pub webhook: WebhookSettings,
	pub server: ServerSettings,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
	/// Feed URL or share-link alias to subscribe to at startup.
	pub url: Option<String>,
	/// Socket event carrying now-playing payloads.
	pub event_name: String,
	pub namespace: String,
	pub connect_timeout: Duration,
	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct IrcSettings {
	pub host: String,
	pub port: u16,
	pub tls: bool,
	pub nick: String,
	pub user: String,
	pub realname: String,
	/// Password sent to NickServ after registration.
	pub nickserv_password: Option<SecretString>,
	pub join_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct AdminSettings {
	/// Nicks allowed to run admin commands (case-sensitive).
	pub names: Vec<Nick>,
	/// Receives failure notices; first admin when unset.
	pub primary: Option<Nick>,
}

impl AdminSettings {
	pub fn primary(&self) -> Option<&Nick> {
		self.primary.as_ref().or_else(|| self.names.first())
	}
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
	pub initial: Vec<ChannelName>,
	/// Channel rejoined after `reset`.
	pub default: ChannelName,
}

#[derive(Debug, Clone)]
pub struct TextSettings {
	pub placeholder: String,
}

#[derive(Debug, Clone)]
pub struct ShortenerSettings {
	pub endpoint: String,
	pub signature: Option<SecretString>,
	pub timeout: Duration,
	/// Image URLs containing this marker are routed through the image proxy.
	pub cdn_marker: String,
	/// Proxy template; `{url}` is replaced by the form-encoded image URL.
	pub image_proxy_template: String,
}

#[derive(Debug, Clone, Default)]
pub struct WebhookSettings {
	pub bind: Option<String>,
	pub auth_token: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Announcement state file.
	pub state_path: PathBuf,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

/// The subset of config that `reload` applies to a running relay.
#[derive(Debug, Clone)]
pub struct ReloadableSettings {
	pub admins: AdminSettings,
	pub placeholder: String,
	pub feed_url: Option<String>,
}

impl RelayConfig {
	/// Startup validation; a relay without admins cannot be operated.
	pub fn validate(&self) -> anyhow::Result<()> {
		if self.admins.names.is_empty() {
			return Err(anyhow!("no admins configured ([admins].names or RELAY_ADMINS)"));
		}
		Ok(())
	}

	pub fn reloadable(&self) -> ReloadableSettings {
		ReloadableSettings {
			admins: self.admins.clone(),
			placeholder: self.text.placeholder.clone(),
			feed_url: self.feed.url.clone(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	feed: FileFeedSettings,

	#[serde(default)]
	irc: FileIrcSettings,

	#[serde(default)]
	admins: FileAdminSettings,

	#[serde(default)]
	channels: FileChannelSettings,

	#[serde(default)]
	text: FileTextSettings,

	#[serde(default)]
	shortener: FileShortenerSettings,

	#[serde(default)]
	webhook: FileWebhookSettings,

	#[serde(default)]
	server: FileServerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileFeedSettings {
	url: Option<String>,
	event_name: Option<String>,
	namespace: Option<String>,
	connect_timeout_ms: Option<u64>,
	reconnect_min_delay_ms: Option<u64>,
	reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileIrcSettings {
	host: Option<String>,
	port: Option<u16>,
	tls: Option<bool>,
	nick: Option<String>,
	user: Option<String>,
	realname: Option<String>,
	nickserv_password: Option<String>,
	join_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileAdminSettings {
	#[serde(default)]
	names: Vec<String>,
	primary: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileChannelSettings {
	initial: Option<Vec<String>>,
	default: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTextSettings {
	placeholder: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileShortenerSettings {
	endpoint: Option<String>,
	signature: Option<String>,
	timeout_ms: Option<u64>,
	cdn_marker: Option<String>,
	image_proxy_template: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileWebhookSettings {
	bind: Option<String>,
	auth_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	state_path: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_admins(names: impl IntoIterator<Item = String>) -> Vec<Nick> {
	let mut out: Vec<Nick> = Vec::new();
	for name in names {
		match Nick::new(name.clone()) {
			Ok(nick) if !out.contains(&nick) => out.push(nick),
			Ok(_) => {}
			Err(e) => warn!(name = %name, error = %e, "relay config: ignoring invalid admin name"),
		}
	}
	out
}

fn parse_channels(names: impl IntoIterator<Item = String>) -> Vec<ChannelName> {
	let mut out: Vec<ChannelName> = Vec::new();
	for name in names {
		match ChannelName::new(name.clone()) {
			Ok(channel) if !out.iter().any(|c| c.eq_ignore_case(&channel)) => out.push(channel),
			Ok(_) => {}
			Err(e) => warn!(name = %name, error = %e, "relay config: ignoring invalid channel"),
		}
	}
	out
}

fn default_channel() -> ChannelName {
	ChannelName::new(DEFAULT_CHANNEL).unwrap_or_else(|_| unreachable!("default channel is valid"))
}

impl RelayConfig {
	fn from_file(file: FileConfig, config_path: &Path) -> Self {
		let nick = non_empty(file.irc.nick).unwrap_or_else(|| "splitkit-relay".to_string());

		let feed = FeedSettings {
			url: non_empty(file.feed.url),
			event_name: non_empty(file.feed.event_name).unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
			namespace: non_empty(file.feed.namespace).unwrap_or_else(|| "/event".to_string()),
			connect_timeout: Duration::from_millis(file.feed.connect_timeout_ms.unwrap_or(15_000)),
			reconnect_min_delay: Duration::from_millis(file.feed.reconnect_min_delay_ms.unwrap_or(500)),
			reconnect_max_delay: Duration::from_millis(file.feed.reconnect_max_delay_ms.unwrap_or(30_000)),
		};

		let irc = IrcSettings {
			host: non_empty(file.irc.host).unwrap_or_else(|| "irc.zeronode.net".to_string()),
			port: file.irc.port.unwrap_or(6697),
			tls: file.irc.tls.unwrap_or(true),
			user: non_empty(file.irc.user).unwrap_or_else(|| nick.clone()),
			realname: non_empty(file.irc.realname).unwrap_or_else(|| "splitkit relay".to_string()),
			nick,
			nickserv_password: non_empty(file.irc.nickserv_password).map(SecretString::new),
			join_timeout: Duration::from_millis(file.irc.join_timeout_ms.unwrap_or(10_000)),
		};

		let admins = AdminSettings {
			names: parse_admins(file.admins.names),
			primary: non_empty(file.admins.primary).and_then(|p| Nick::new(p).ok()),
		};

		let initial = match file.channels.initial {
			Some(list) => parse_channels(list),
			None => parse_channels(["#skr".to_string(), "#greenroom".to_string()]),
		};
		let default = non_empty(file.channels.default)
			.and_then(|c| ChannelName::new(c).ok())
			.unwrap_or_else(default_channel);

		let state_path = match non_empty(file.server.state_path) {
			Some(p) => PathBuf::from(p),
			None => config_path
				.parent()
				.map(|dir| dir.join(STATE_FILE_NAME))
				.unwrap_or_else(|| PathBuf::from(STATE_FILE_NAME)),
		};

		Self {
			feed,
			irc,
			admins,
			channels: ChannelSettings { initial, default },
			text: TextSettings {
				placeholder: file.text.placeholder.unwrap_or_else(|| DEFAULT_PLACEHOLDER.to_string()),
			},
			shortener: ShortenerSettings {
				endpoint: non_empty(file.shortener.endpoint)
					.unwrap_or_else(|| "https://therelay.cc/yourls-api.php".to_string()),
				signature: non_empty(file.shortener.signature).map(SecretString::new),
				timeout: Duration::from_millis(file.shortener.timeout_ms.unwrap_or(10_000)),
				cdn_marker: non_empty(file.shortener.cdn_marker).unwrap_or_else(|| "cloudfront".to_string()),
				image_proxy_template: non_empty(file.shortener.image_proxy_template)
					.unwrap_or_else(|| "https://www.wavlake.com/_next/image?url={url}&w=750&q=75".to_string()),
			},
			webhook: WebhookSettings {
				bind: non_empty(file.webhook.bind).or_else(|| Some("0.0.0.0:8080".to_string())),
				auth_token: non_empty(file.webhook.auth_token).map(SecretString::new),
			},
			server: ServerSettings {
				state_path,
				metrics_bind: non_empty(file.server.metrics_bind),
				health_bind: non_empty(file.server.health_bind),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut RelayConfig, env: impl Fn(&str) -> Option<String>) {
	let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = var("RELAY_FEED_URL") {
		cfg.feed.url = Some(v);
		info!("feed config: url overridden by env");
	}

	if let Some(v) = var("RELAY_IRC_HOST") {
		cfg.irc.host = v;
		info!("irc config: host overridden by env");
	}

	if let Some(v) = var("RELAY_IRC_PORT")
		&& let Ok(port) = v.parse::<u16>()
	{
		cfg.irc.port = port;
		info!(port, "irc config: port overridden by env");
	}

	if let Some(v) = var("RELAY_IRC_TLS")
		&& let Some(tls) = parse_env_bool(&v)
	{
		cfg.irc.tls = tls;
		info!(tls, "irc config: tls overridden by env");
	}

	if let Some(v) = var("RELAY_IRC_NICK") {
		cfg.irc.nick = v;
		info!("irc config: nick overridden by env");
	}

	if let Some(v) = var("RELAY_NICKSERV_PASSWORD") {
		cfg.irc.nickserv_password = Some(SecretString::new(v));
		info!("irc config: nickserv_password overridden by env");
	}

	if let Some(v) = var("RELAY_ADMINS") {
		cfg.admins.names = parse_admins(v.split(',').map(str::to_string));
		info!(count = cfg.admins.names.len(), "admins overridden by env");
	}

	if let Some(v) = env("RELAY_PLACEHOLDER") {
		cfg.text.placeholder = v;
		info!("text config: placeholder overridden by env");
	}

	if let Some(v) = var("RELAY_SHORTENER_ENDPOINT") {
		cfg.shortener.endpoint = v;
		info!("shortener config: endpoint overridden by env");
	}

	if let Some(v) = var("RELAY_SHORTENER_SIGNATURE") {
		cfg.shortener.signature = Some(SecretString::new(v));
		info!("shortener config: signature overridden by env");
	}

	if let Some(v) = var("RELAY_WEBHOOK_BIND") {
		cfg.webhook.bind = Some(v);
		info!("webhook config: bind overridden by env");
	}

	if let Some(v) = var("RELAY_WEBHOOK_AUTH_TOKEN") {
		cfg.webhook.auth_token = Some(SecretString::new(v));
		info!("webhook config: auth_token overridden by env");
	}

	if let Some(v) = var("RELAY_STATE_PATH") {
		cfg.server.state_path = PathBuf::from(v);
		info!("server config: state_path overridden by env");
	}

	if let Some(v) = var("RELAY_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = var("RELAY_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if cfg.shortener.signature.is_none() {
		debug!("shortener config: no signature; requests will be unsigned");
	}

	if cfg.feed.reconnect_min_delay > cfg.feed.reconnect_max_delay {
		warn!(
			min_ms = cfg.feed.reconnect_min_delay.as_millis(),
			max_ms = cfg.feed.reconnect_max_delay.as_millis(),
			"feed config: reconnect_min_delay > reconnect_max_delay; swapping"
		);
		std::mem::swap(&mut cfg.feed.reconnect_min_delay, &mut cfg.feed.reconnect_max_delay);
	}
}

#[cfg(test)]
mod config_tests;
