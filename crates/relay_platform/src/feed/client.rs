#![forbid(unsafe_code)]

use std::time::SystemTime;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::socketio::{EngineFrame, OpenPacket, PONG_FRAME, PacketKind, connect_packet, disconnect_packet};
use super::{FeedConfig, engine_io_url};
use crate::{
	FeedControl, FeedEvent, FeedEventTx, FeedPayload, backoff_delay, feed_status, feed_status_error, new_session_id,
};

type FeedWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Subscription {
	url: Url,
	shutdown_tx: oneshot::Sender<()>,
	task: JoinHandle<()>,
}

/// Socket.IO feed subscriber. At most one subscription is live at a time.
pub struct FeedClient {
	cfg: FeedConfig,
	events_tx: FeedEventTx,
	current: Option<Subscription>,
}

impl FeedClient {
	pub fn new(cfg: FeedConfig, events_tx: FeedEventTx) -> Self {
		Self {
			cfg,
			events_tx,
			current: None,
		}
	}
}

#[async_trait]
impl FeedControl for FeedClient {
	async fn connect(&mut self, url: &Url) -> anyhow::Result<()> {
		self.disconnect().await;

		let (ws, open) = open_session(&self.cfg, url).await?;
		let session_id = new_session_id();
		info!(url = %url, sid = %open.sid, session_id = %session_id, "feed: subscribed");
		let _ = self
			.events_tx
			.try_send(feed_status(true, format!("feed connected (session_id={session_id})")));

		let (shutdown_tx, shutdown_rx) = oneshot::channel();
		let session = Session {
			cfg: self.cfg.clone(),
			url: url.clone(),
			session_id,
			events_tx: self.events_tx.clone(),
		};
		let task = tokio::spawn(session.run(ws, open, shutdown_rx));

		self.current = Some(Subscription {
			url: url.clone(),
			shutdown_tx,
			task,
		});
		Ok(())
	}

	async fn disconnect(&mut self) {
		let Some(sub) = self.current.take() else {
			return;
		};
		let _ = sub.shutdown_tx.send(());
		if let Err(e) = sub.task.await {
			warn!(error = %e, "feed: subscription task failed");
		}
		info!(url = %sub.url, "feed: unsubscribed");
		let _ = self.events_tx.try_send(feed_status(false, "feed disconnected"));
	}

	fn current_url(&self) -> Option<&Url> {
		self.current.as_ref().map(|s| &s.url)
	}
}

/// Connect the websocket and complete the Engine.IO + namespace handshake.
async fn open_session(cfg: &FeedConfig, url: &Url) -> anyhow::Result<(FeedWs, OpenPacket)> {
	let ws_url = engine_io_url(url, &cfg.engine_path)?;
	tokio::time::timeout(cfg.connect_timeout, handshake(ws_url, &cfg.namespace))
		.await
		.map_err(|_| anyhow!("feed handshake timed out after {:?}", cfg.connect_timeout))?
}

async fn handshake(ws_url: Url, namespace: &str) -> anyhow::Result<(FeedWs, OpenPacket)> {
	let (mut ws, _resp) = tokio_tungstenite::connect_async(ws_url.as_str())
		.await
		.context("connect_async to feed ws")?;

	let open = loop {
		match next_frame(&mut ws).await? {
			EngineFrame::Open(open) => break open,
			EngineFrame::Ping => ws.send(Message::text(PONG_FRAME)).await.context("ws send pong")?,
			other => debug!(frame = ?other, "feed: ignoring frame before open"),
		}
	};

	ws.send(Message::text(connect_packet(namespace)))
		.await
		.context("ws send namespace connect")?;

	loop {
		match next_frame(&mut ws).await? {
			EngineFrame::Message(packet) if packet.namespace == namespace => match packet.kind {
				PacketKind::Connect => return Ok((ws, open)),
				PacketKind::ConnectError => {
					return Err(anyhow!("namespace {namespace} refused: {}", packet.error_message()));
				}
				_ => {}
			},
			EngineFrame::Ping => ws.send(Message::text(PONG_FRAME)).await.context("ws send pong")?,
			EngineFrame::Close => return Err(anyhow!("feed closed during handshake")),
			other => debug!(frame = ?other, "feed: ignoring frame during handshake"),
		}
	}
}

async fn next_frame(ws: &mut FeedWs) -> anyhow::Result<EngineFrame> {
	loop {
		let Some(msg) = ws.next().await else {
			return Err(anyhow!("ws closed during handshake"));
		};
		match msg.context("ws read")? {
			Message::Text(t) => return EngineFrame::parse(t.as_str()).context("decode engine.io frame"),
			Message::Ping(p) => {
				let _ = ws.send(Message::Pong(p)).await;
			}
			Message::Close(c) => return Err(anyhow!("ws closed during handshake: close={c:?}")),
			_ => {}
		}
	}
}

enum Exit {
	Shutdown,
	Dropped(String),
}

struct Session {
	cfg: FeedConfig,
	url: Url,
	session_id: String,
	events_tx: FeedEventTx,
}

impl Session {
	async fn run(self, mut ws: FeedWs, mut open: OpenPacket, mut shutdown_rx: oneshot::Receiver<()>) {
		loop {
			match self.pump(&mut ws, &open, &mut shutdown_rx).await {
				Exit::Shutdown => {
					let _ = ws.send(Message::text(disconnect_packet(&self.cfg.namespace))).await;
					let _ = ws.close(None).await;
					return;
				}
				Exit::Dropped(reason) => {
					warn!(url = %self.url, reason = %reason, "feed: connection lost");
					let _ = self.events_tx.try_send(feed_status(false, format!("feed connection lost: {reason}")));
				}
			}

			match self.reconnect(&mut shutdown_rx).await {
				Some((next_ws, next_open)) => {
					ws = next_ws;
					open = next_open;
				}
				None => return,
			}
		}
	}

	async fn reconnect(&self, shutdown_rx: &mut oneshot::Receiver<()>) -> Option<(FeedWs, OpenPacket)> {
		let mut attempt: u32 = 0;
		loop {
			let delay = backoff_delay(attempt, self.cfg.reconnect_min_delay, self.cfg.reconnect_max_delay);
			let _ = self.events_tx.try_send(feed_status(
				false,
				format!("reconnecting in {delay:?} (attempt={attempt})"),
			));

			tokio::select! {
				_ = &mut *shutdown_rx => return None,
				_ = sleep(delay) => {}
			}

			let result = tokio::select! {
				_ = &mut *shutdown_rx => return None,
				r = open_session(&self.cfg, &self.url) => r,
			};

			match result {
				Ok(session) => {
					info!(url = %self.url, session_id = %self.session_id, "feed: reconnected");
					let _ = self.events_tx.try_send(feed_status(true, "feed reconnected"));
					return Some(session);
				}
				Err(e) => {
					attempt = attempt.saturating_add(1);
					let _ = self.events_tx.try_send(feed_status_error("feed reconnect failed", e));
				}
			}
		}
	}

	async fn pump(&self, ws: &mut FeedWs, open: &OpenPacket, shutdown_rx: &mut oneshot::Receiver<()>) -> Exit {
		let idle_limit = open.ping_interval + open.ping_timeout;
		loop {
			tokio::select! {
				_ = &mut *shutdown_rx => return Exit::Shutdown,

				_ = sleep(idle_limit) => {
					return Exit::Dropped(format!("no traffic for {idle_limit:?}"));
				}

				msg = ws.next() => {
					let Some(msg) = msg else {
						return Exit::Dropped("ws ended".to_string());
					};
					let msg = match msg {
						Ok(m) => m,
						Err(e) => return Exit::Dropped(format!("ws read error: {e}")),
					};
					match msg {
						Message::Text(t) => {
							if let Some(exit) = self.handle_text(ws, t.as_str()).await {
								return exit;
							}
						}
						Message::Ping(p) => {
							let _ = ws.send(Message::Pong(p)).await;
						}
						Message::Close(frame) => {
							return Exit::Dropped(format!("ws closed: {frame:?}"));
						}
						_ => {}
					}
				}
			}
		}
	}

	async fn handle_text(&self, ws: &mut FeedWs, text: &str) -> Option<Exit> {
		let frame = match EngineFrame::parse(text) {
			Ok(f) => f,
			Err(e) => {
				debug!(error = %e, "feed: ignoring undecodable frame");
				return None;
			}
		};

		match frame {
			EngineFrame::Ping => {
				if let Err(e) = ws.send(Message::text(PONG_FRAME)).await {
					return Some(Exit::Dropped(format!("ws send pong: {e}")));
				}
			}
			EngineFrame::Close => return Some(Exit::Dropped("engine.io close".to_string())),
			EngineFrame::Message(packet) if packet.namespace == self.cfg.namespace => match packet.kind {
				PacketKind::Event => {
					if let Some((name, payload)) = packet.event() {
						metrics::counter!("relay_feed_frames_total").increment(1);
						let ev = FeedEvent::Event(FeedPayload {
							name,
							payload,
							session_id: self.session_id.clone(),
							received_at: SystemTime::now(),
						});
						if self.events_tx.try_send(ev).is_err() {
							metrics::counter!("relay_feed_events_dropped_total").increment(1);
							warn!("feed: event channel full; dropping event");
						}
					}
				}
				PacketKind::Disconnect => {
					return Some(Exit::Dropped("server closed namespace".to_string()));
				}
				_ => {}
			},
			_ => {}
		}
		None
	}
}

impl Drop for FeedClient {
	fn drop(&mut self) {
		if let Some(sub) = self.current.take() {
			let _ = sub.shutdown_tx.send(());
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use serde_json::json;
	use tokio::net::TcpListener;
	use tokio::sync::mpsc;
	use tokio::time::timeout;

	use super::*;

	async fn serve_one(listener: TcpListener) {
		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		ws.send(Message::text(r#"0{"sid":"s1","pingInterval":25000,"pingTimeout":20000}"#))
			.await
			.unwrap();

		let connect = ws.next().await.unwrap().unwrap();
		assert_eq!(connect.to_text().unwrap(), "40/event,");
		ws.send(Message::text(r#"40/event,{"sid":"n1"}"#)).await.unwrap();

		ws.send(Message::text("2")).await.unwrap();
		let pong = ws.next().await.unwrap().unwrap();
		assert_eq!(pong.to_text().unwrap(), "3");

		ws.send(Message::text(r#"42/event,["remoteValue",{"title":"Ep 1"}]"#))
			.await
			.unwrap();

		// wait for the client to leave the namespace
		while let Some(Ok(msg)) = ws.next().await {
			if msg.to_text().map(|t| t == "41/event,").unwrap_or(false) {
				break;
			}
		}
	}

	#[tokio::test]
	async fn subscribes_forwards_events_and_disconnects() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(serve_one(listener));

		let (events_tx, mut events_rx) = mpsc::channel(16);
		let mut client = FeedClient::new(FeedConfig::default(), events_tx);
		let url = Url::parse(&format!("http://{addr}/event?event_id=abc")).unwrap();
		client.connect(&url).await.unwrap();
		assert_eq!(client.current_url(), Some(&url));

		let payload = timeout(Duration::from_secs(2), async {
			loop {
				match events_rx.recv().await {
					Some(FeedEvent::Event(p)) => return p,
					Some(FeedEvent::Status(_)) => continue,
					None => panic!("feed channel closed"),
				}
			}
		})
		.await
		.expect("feed event");
		assert_eq!(payload.name, "remoteValue");
		assert_eq!(payload.payload, json!({"title": "Ep 1"}));

		client.disconnect().await;
		assert!(client.current_url().is_none());
		timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
	}

	#[tokio::test]
	async fn refused_namespace_is_a_connect_error() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
			ws.send(Message::text(r#"0{"sid":"s1"}"#)).await.unwrap();
			let _ = ws.next().await;
			ws.send(Message::text(r#"44/event,{"message":"Invalid namespace"}"#))
				.await
				.unwrap();
			let _ = ws.next().await;
		});

		let (events_tx, _events_rx) = mpsc::channel(16);
		let mut client = FeedClient::new(FeedConfig::default(), events_tx);
		let url = Url::parse(&format!("http://{addr}/event")).unwrap();
		let err = client.connect(&url).await.expect_err("namespace refused");
		assert!(err.to_string().contains("Invalid namespace"));
		assert!(client.current_url().is_none());
	}
}
