#![forbid(unsafe_code)]

mod config;
mod relay;
mod server;
mod session;
mod util;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use relay_platform::feed::{FeedClient, FeedConfig};
use relay_platform::irc::IrcConfig;
use relay_platform::shortener::{ShortenerConfig, YourlsClient};
use relay_platform::{ChatTransport, FeedControl};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::RelayConfig;
use crate::relay::{AnnouncementState, EventRelay, UrlShortener};
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::webhook::{WebhookState, spawn_webhook_server};
use crate::session::{LoopChannels, SessionController, SessionSettings, run_event_loop};

const CHAT_EVENT_CAPACITY: usize = 256;
const FEED_EVENT_CAPACITY: usize = 256;
const BROADCAST_CAPACITY: usize = 64;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: relay_server [--config path]\n\
\n\
Options:\n\
\t--config  Config file (default: ~/.nowplaying-relay/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<PathBuf> {
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" | "-c" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config_path
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,relay_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("relay_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn init_health(bind: Option<&str>) -> HealthState {
	let health_state = HealthState::new();
	if let Some(bind) = bind {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}
	health_state
}

fn irc_config(cfg: &RelayConfig) -> IrcConfig {
	let mut irc = IrcConfig::new(cfg.irc.host.clone(), cfg.irc.port, cfg.irc.nick.clone());
	irc.tls = cfg.irc.tls;
	irc.user = cfg.irc.user.clone();
	irc.realname = cfg.irc.realname.clone();
	irc.join_timeout = cfg.irc.join_timeout;
	irc
}

fn feed_config(cfg: &RelayConfig) -> FeedConfig {
	FeedConfig {
		namespace: cfg.feed.namespace.clone(),
		connect_timeout: cfg.feed.connect_timeout,
		reconnect_min_delay: cfg.feed.reconnect_min_delay,
		reconnect_max_delay: cfg.feed.reconnect_max_delay,
		..FeedConfig::default()
	}
}

/// Start the boostagram listener when both a bind address and a token are set.
fn init_webhook(cfg: &RelayConfig, broadcast_tx: mpsc::Sender<String>) {
	let (Some(bind), Some(token)) = (cfg.webhook.bind.as_deref(), cfg.webhook.auth_token.clone()) else {
		info!("webhook disabled (needs [webhook].bind and auth_token)");
		return;
	};
	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => spawn_webhook_server(addr, WebhookState::new(token, broadcast_tx)),
		Err(e) => warn!(error = %e, %bind, "invalid webhook bind address (expected host:port)"),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let config_path = match parse_args() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let relay_cfg = crate::config::load_relay_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded relay config (toml + env overrides)");
	relay_cfg.validate()?;

	init_metrics(relay_cfg.server.metrics_bind.as_deref());
	let health_state = init_health(relay_cfg.server.health_bind.as_deref());

	let remote = YourlsClient::new(ShortenerConfig {
		endpoint: relay_cfg.shortener.endpoint.clone(),
		signature: relay_cfg.shortener.signature.clone(),
		timeout: relay_cfg.shortener.timeout,
	})?;
	let shortener = UrlShortener::new(
		Arc::new(remote),
		relay_cfg.shortener.cdn_marker.clone(),
		relay_cfg.shortener.image_proxy_template.clone(),
	);

	let state = AnnouncementState::load(&relay_cfg.server.state_path);
	info!(
		path = %relay_cfg.server.state_path.display(),
		last = %state.last_message,
		"loaded announcement state"
	);
	let relay = EventRelay::new(
		state,
		shortener,
		relay_cfg.feed.event_name.clone(),
		relay_cfg.text.placeholder.clone(),
	);

	let (chat_tx, chat_rx) = mpsc::channel(CHAT_EVENT_CAPACITY);
	let (feed_tx, feed_rx) = mpsc::channel(FEED_EVENT_CAPACITY);
	let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_CAPACITY);

	let irc = relay_platform::irc::connect(irc_config(&relay_cfg), chat_tx)
		.await
		.with_context(|| format!("connect to {}:{}", relay_cfg.irc.host, relay_cfg.irc.port))?;
	info!(host = %relay_cfg.irc.host, port = relay_cfg.irc.port, "irc connected");

	let chat: Arc<dyn ChatTransport> = Arc::new(irc);
	let feed: Box<dyn FeedControl> = Box::new(FeedClient::new(feed_config(&relay_cfg), feed_tx));

	init_webhook(&relay_cfg, broadcast_tx);

	let controller = SessionController::new(
		chat,
		feed,
		relay,
		SessionSettings::from_config(&relay_cfg, Some(config_path)),
		health_state,
	);
	let channels = LoopChannels {
		chat_rx,
		feed_rx,
		broadcast_rx,
	};

	let shutdown = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			warn!(error = %e, "failed to listen for ctrl-c");
			std::future::pending::<()>().await;
		}
	};
	run_event_loop(controller, channels, shutdown).await
}
