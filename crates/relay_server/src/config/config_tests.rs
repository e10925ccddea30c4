#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use super::*;

fn parse(toml_src: &str) -> RelayConfig {
	let file: FileConfig = toml::from_str(toml_src).unwrap();
	RelayConfig::from_file(file, Path::new("/etc/relay/config.toml"))
}

#[test]
fn empty_file_yields_defaults() {
	let cfg = parse("");
	assert_eq!(cfg.feed.event_name, "remoteValue");
	assert_eq!(cfg.feed.namespace, "/event");
	assert_eq!(cfg.irc.host, "irc.zeronode.net");
	assert_eq!(cfg.irc.port, 6697);
	assert!(cfg.irc.tls);
	assert_eq!(cfg.irc.nick, "splitkit-relay");
	assert_eq!(cfg.irc.user, "splitkit-relay");
	assert_eq!(cfg.irc.realname, "splitkit relay");
	assert_eq!(
		cfg.channels.initial.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
		vec!["#skr", "#greenroom"]
	);
	assert_eq!(cfg.channels.default.as_str(), "#skr");
	assert_eq!(cfg.text.placeholder, "Text - click to edit");
	assert_eq!(cfg.shortener.timeout, Duration::from_secs(10));
	assert_eq!(cfg.shortener.cdn_marker, "cloudfront");
	assert_eq!(cfg.webhook.bind.as_deref(), Some("0.0.0.0:8080"));
	assert_eq!(cfg.server.state_path, Path::new("/etc/relay/MESSAGES.json"));
	assert!(cfg.validate().is_err(), "no admins is fatal");
}

#[test]
fn parses_sections_and_filters_invalid_entries() {
	let cfg = parse(
		r##"
[feed]
url = "https://splitkit.podcastindex.org/live/abc/"

[irc]
host = "irc.example.net"
port = 6667
tls = false
nick = "np-bot"

[admins]
names = ["cottongin", "bad nick", "cottongin", "dave"]

[channels]
initial = ["#a", "nope", "#A", "#b"]
default = "#testing"

[text]
placeholder = "PLACEHOLDER"

[webhook]
auth_token = "secret"
"##,
	);

	assert_eq!(cfg.feed.url.as_deref(), Some("https://splitkit.podcastindex.org/live/abc/"));
	assert_eq!(cfg.irc.port, 6667);
	assert!(!cfg.irc.tls);
	assert_eq!(cfg.irc.user, "np-bot");
	assert_eq!(
		cfg.admins.names.iter().map(|n| n.as_str()).collect::<Vec<_>>(),
		vec!["cottongin", "dave"]
	);
	assert_eq!(cfg.admins.primary().map(|n| n.as_str()), Some("cottongin"));
	assert_eq!(
		cfg.channels.initial.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
		vec!["#a", "#b"]
	);
	assert_eq!(cfg.channels.default.as_str(), "#testing");
	assert_eq!(cfg.text.placeholder, "PLACEHOLDER");
	assert_eq!(cfg.webhook.auth_token.as_ref().map(|t| t.expose()), Some("secret"));
	assert!(cfg.validate().is_ok());
}

#[test]
fn explicit_primary_admin_wins() {
	let cfg = parse(
		r#"
[admins]
names = ["a", "b"]
primary = "b"
"#,
	);
	assert_eq!(cfg.admins.primary().map(|n| n.as_str()), Some("b"));
}

#[test]
fn env_overrides_apply_and_blank_values_are_ignored() {
	let mut cfg = parse("");
	let env: HashMap<&str, &str> = HashMap::from([
		("RELAY_ADMINS", "cottongin, dave"),
		("RELAY_IRC_PORT", "7000"),
		("RELAY_IRC_TLS", "off"),
		("RELAY_FEED_URL", "   "),
		("RELAY_WEBHOOK_AUTH_TOKEN", "tok"),
		("RELAY_STATE_PATH", "/var/lib/relay/state.json"),
	]);
	apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

	assert_eq!(cfg.admins.names.len(), 2);
	assert_eq!(cfg.irc.port, 7000);
	assert!(!cfg.irc.tls);
	assert!(cfg.feed.url.is_none());
	assert_eq!(cfg.webhook.auth_token.as_ref().map(|t| t.expose()), Some("tok"));
	assert_eq!(cfg.server.state_path, Path::new("/var/lib/relay/state.json"));
}

#[test]
fn reconnect_delays_are_swapped_when_inverted() {
	let mut cfg = parse(
		r#"
[feed]
reconnect_min_delay_ms = 5000
reconnect_max_delay_ms = 100
"#,
	);
	apply_env_overrides(&mut cfg, |_| None);
	assert_eq!(cfg.feed.reconnect_min_delay, Duration::from_millis(100));
	assert_eq!(cfg.feed.reconnect_max_delay, Duration::from_millis(5000));
}

#[test]
fn load_from_missing_path_uses_defaults() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("config.toml");
	let cfg = load_relay_config_from_path(&path).unwrap();
	assert_eq!(cfg.server.state_path, dir.path().join("MESSAGES.json"));
}

#[test]
fn malformed_toml_is_an_error() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("config.toml");
	std::fs::write(&path, "[irc\nport = ").unwrap();
	assert!(load_relay_config_from_path(&path).is_err());
}

#[test]
fn reload_requires_the_file_to_exist() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("config.toml");
	let err = reload_relay_config_from_path(&path).unwrap_err();
	assert!(err.to_string().contains("not found"), "{err:#}");

	std::fs::write(&path, "[text]\nplaceholder = \"TBD\"\n").unwrap();
	let cfg = reload_relay_config_from_path(&path).unwrap();
	assert_eq!(cfg.text.placeholder, "TBD");
}
