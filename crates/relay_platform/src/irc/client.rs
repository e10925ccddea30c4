#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use relay_domain::{ChannelName, MessageTarget, Nick};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::message::{IrcMessage, MAX_MESSAGE_BYTES, sanitize, split_message};
use crate::{ChatEvent, ChatEventTx, ChatTransport, IncomingMessage};

/// Numerics the server uses to refuse a `JOIN`.
const JOIN_ERROR_NUMERICS: [&str; 8] = ["403", "405", "471", "473", "474", "475", "476", "477"];

const QUIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// IRC connection configuration.
#[derive(Debug, Clone)]
pub struct IrcConfig {
	pub host: String,
	pub port: u16,
	pub tls: bool,
	pub nick: String,
	pub user: String,
	pub realname: String,
	pub join_timeout: Duration,
	pub outgoing_queue_capacity: usize,
}

impl IrcConfig {
	pub fn new(host: impl Into<String>, port: u16, nick: impl Into<String>) -> Self {
		let nick = nick.into();
		Self {
			host: host.into(),
			port,
			tls: true,
			user: nick.clone(),
			realname: nick.clone(),
			nick,
			join_timeout: Duration::from_secs(10),
			outgoing_queue_capacity: 256,
		}
	}
}

type PendingJoins = Arc<Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>>;

/// Cloneable handle to a running IRC connection.
#[derive(Debug, Clone)]
pub struct IrcHandle {
	outgoing: mpsc::Sender<String>,
	pending_joins: PendingJoins,
	join_timeout: Duration,
}

/// Connect, register and spawn the reader/writer tasks.
pub async fn connect(cfg: IrcConfig, events_tx: ChatEventTx) -> anyhow::Result<IrcHandle> {
	let tcp = TcpStream::connect((cfg.host.as_str(), cfg.port))
		.await
		.with_context(|| format!("connect to {}:{}", cfg.host, cfg.port))?;
	tcp.set_nodelay(true).ok();

	if cfg.tls {
		let mut roots = tokio_rustls::rustls::RootCertStore::empty();
		roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
		let tls_cfg = tokio_rustls::rustls::ClientConfig::builder()
			.with_root_certificates(roots)
			.with_no_client_auth();
		let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_cfg));
		let server_name = tokio_rustls::rustls::pki_types::ServerName::try_from(cfg.host.clone()).context("invalid tls server name")?;
		let stream = connector.connect(server_name, tcp).await.context("tls handshake")?;
		info!(host = %cfg.host, port = cfg.port, "irc: tls connection established");
		Ok(spawn_session(stream, cfg, events_tx))
	} else {
		info!(host = %cfg.host, port = cfg.port, "irc: plaintext connection established");
		Ok(spawn_session(tcp, cfg, events_tx))
	}
}

/// Start the session over an already-open stream.
pub fn spawn_session<S>(stream: S, cfg: IrcConfig, events_tx: ChatEventTx) -> IrcHandle
where
	S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
	let (read_half, write_half) = tokio::io::split(stream);
	let (out_tx, out_rx) = mpsc::channel::<String>(cfg.outgoing_queue_capacity.max(8));
	let pending_joins: PendingJoins = Arc::new(Mutex::new(HashMap::new()));

	tokio::spawn(run_writer(write_half, out_rx));

	let handle = IrcHandle {
		outgoing: out_tx.clone(),
		pending_joins: Arc::clone(&pending_joins),
		join_timeout: cfg.join_timeout,
	};

	let _ = out_tx.try_send(format!("NICK {}", cfg.nick));
	let _ = out_tx.try_send(format!("USER {} 0 * :{}", cfg.user, cfg.realname));

	let reader = Reader {
		nick: cfg.nick.clone(),
		registered: false,
		out_tx,
		events_tx,
		pending_joins,
	};
	tokio::spawn(reader.run(read_half));

	handle
}

async fn run_writer<W>(mut writer: W, mut out_rx: mpsc::Receiver<String>)
where
	W: AsyncWrite + Unpin,
{
	while let Some(line) = out_rx.recv().await {
		let is_quit = line.starts_with("QUIT");
		let mut buf = sanitize(&line);
		buf.push_str("\r\n");
		if let Err(e) = writer.write_all(buf.as_bytes()).await {
			warn!(error = %e, "irc: write failed; writer exiting");
			break;
		}
		if let Err(e) = writer.flush().await {
			warn!(error = %e, "irc: flush failed; writer exiting");
			break;
		}
		if is_quit {
			let _ = writer.shutdown().await;
			break;
		}
	}
	debug!("irc: writer task finished");
}

struct Reader {
	nick: String,
	registered: bool,
	out_tx: mpsc::Sender<String>,
	events_tx: ChatEventTx,
	pending_joins: PendingJoins,
}

impl Reader {
	async fn run<R>(mut self, read_half: R)
	where
		R: AsyncRead + Unpin,
	{
		let mut lines = BufReader::new(read_half).lines();
		let reason = loop {
			match lines.next_line().await {
				Ok(Some(line)) => match IrcMessage::parse(&line) {
					Ok(msg) => self.handle(msg).await,
					Err(e) => debug!(error = %e, line = %line, "irc: ignoring unparseable line"),
				},
				Ok(None) => break "connection closed by server".to_string(),
				Err(e) => break format!("read error: {e}"),
			}
		};

		self.fail_pending_joins(&reason);
		info!(reason = %reason, "irc: reader finished");
		let _ = self.events_tx.send(ChatEvent::Disconnected { reason }).await;
	}

	async fn handle(&mut self, msg: IrcMessage) {
		match msg.command.as_str() {
			"PING" => {
				let token = msg.trailing().unwrap_or_default();
				let _ = self.out_tx.send(format!("PONG :{token}")).await;
			}
			"001" => {
				if let Some(nick) = msg.param(0) {
					self.nick = nick.to_string();
				}
				self.registered = true;
				info!(nick = %self.nick, "irc: registered");
				let _ = self
					.events_tx
					.send(ChatEvent::Registered { nick: self.nick.clone() })
					.await;
			}
			"433" if !self.registered => {
				self.nick.push('_');
				warn!(nick = %self.nick, "irc: nick in use; retrying");
				let _ = self.out_tx.send(format!("NICK {}", self.nick)).await;
			}
			"NICK" => {
				if msg.source_nick() == Some(self.nick.as_str())
					&& let Some(new_nick) = msg.param(0)
				{
					self.nick = new_nick.to_string();
				}
			}
			"JOIN" => {
				if msg.source_nick() == Some(self.nick.as_str())
					&& let Some(channel) = msg.param(0)
				{
					self.resolve_join(channel, Ok(()));
				}
			}
			"PRIVMSG" | "NOTICE" => {
				let Some(incoming) = to_incoming(&msg) else {
					return;
				};
				let event = if msg.command == "PRIVMSG" {
					ChatEvent::Message(incoming)
				} else {
					ChatEvent::Notice(incoming)
				};
				if self.events_tx.send(event).await.is_err() {
					debug!("irc: chat events channel closed");
				}
			}
			"ERROR" => {
				warn!(detail = ?msg.trailing(), "irc: server error");
			}
			numeric if JOIN_ERROR_NUMERICS.contains(&numeric) => {
				if let Some(channel) = msg.param(1) {
					let reason = msg.trailing().unwrap_or("join refused").to_string();
					self.resolve_join(channel, Err(reason));
				}
			}
			_ => {}
		}
	}

	fn resolve_join(&self, channel: &str, result: Result<(), String>) {
		let key = channel.to_ascii_lowercase();
		if let Some(tx) = self.pending_joins.lock().remove(&key) {
			let _ = tx.send(result);
		}
	}

	fn fail_pending_joins(&self, reason: &str) {
		let mut pending = self.pending_joins.lock();
		for (_, tx) in pending.drain() {
			let _ = tx.send(Err(reason.to_string()));
		}
	}
}

fn to_incoming(msg: &IrcMessage) -> Option<IncomingMessage> {
	let sender = Nick::new(msg.source_nick()?.to_string()).ok()?;
	let target = MessageTarget::parse(msg.param(0)?).ok()?;
	let text = msg.param(1)?.to_string();
	Some(IncomingMessage { sender, target, text })
}

impl IrcHandle {
	async fn send_line(&self, line: String) -> anyhow::Result<()> {
		self.outgoing
			.send(line)
			.await
			.map_err(|_| anyhow!("irc connection closed"))
	}
}

#[async_trait]
impl ChatTransport for IrcHandle {
	async fn join(&self, channel: &ChannelName) -> anyhow::Result<()> {
		let (tx, rx) = oneshot::channel();
		self.pending_joins
			.lock()
			.insert(channel.as_str().to_ascii_lowercase(), tx);

		self.send_line(format!("JOIN {channel}")).await?;

		match tokio::time::timeout(self.join_timeout, rx).await {
			Ok(Ok(Ok(()))) => Ok(()),
			Ok(Ok(Err(reason))) => Err(anyhow!("join {channel} refused: {reason}")),
			Ok(Err(_)) => Err(anyhow!("join {channel}: connection dropped")),
			Err(_) => {
				self.pending_joins.lock().remove(&channel.as_str().to_ascii_lowercase());
				Err(anyhow!("join {channel}: timed out"))
			}
		}
	}

	async fn part(&self, channel: &ChannelName, reason: Option<&str>) -> anyhow::Result<()> {
		let line = match reason.map(str::trim).filter(|r| !r.is_empty()) {
			Some(reason) => format!("PART {channel} :{reason}"),
			None => format!("PART {channel}"),
		};
		self.send_line(line).await
	}

	async fn send_message(&self, target: &MessageTarget, text: &str) -> anyhow::Result<()> {
		let text = sanitize(text);
		for chunk in split_message(&text, MAX_MESSAGE_BYTES) {
			self.send_line(format!("PRIVMSG {target} :{chunk}")).await?;
		}
		Ok(())
	}

	async fn quit(&self, reason: &str) -> anyhow::Result<()> {
		self.send_line(format!("QUIT :{}", sanitize(reason))).await?;
		// the writer drops its receiver once QUIT is flushed
		if tokio::time::timeout(QUIT_FLUSH_TIMEOUT, self.outgoing.closed()).await.is_err() {
			warn!("irc: QUIT not flushed in time");
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};
	use tokio::time::timeout;

	use super::*;

	fn cfg() -> IrcConfig {
		let mut cfg = IrcConfig::new("localhost", 6667, "splitkit-relay");
		cfg.tls = false;
		cfg.join_timeout = Duration::from_millis(500);
		cfg
	}

	#[tokio::test]
	async fn registers_and_answers_ping() {
		let (client, server) = duplex(4096);
		let (events_tx, mut events_rx) = mpsc::channel(16);
		let _handle = spawn_session(client, cfg(), events_tx);

		let (server_read, mut server_write) = tokio::io::split(server);
		let mut server_lines = BufReader::new(server_read).lines();

		assert_eq!(server_lines.next_line().await.unwrap().unwrap(), "NICK splitkit-relay");
		assert!(server_lines.next_line().await.unwrap().unwrap().starts_with("USER splitkit-relay"));

		server_write
			.write_all(b":srv 001 splitkit-relay :Welcome\r\nPING :abc\r\n")
			.await
			.unwrap();

		let ev = timeout(Duration::from_millis(500), events_rx.recv())
			.await
			.expect("registered event")
			.expect("channel open");
		assert!(matches!(ev, ChatEvent::Registered { ref nick } if nick == "splitkit-relay"));

		assert_eq!(server_lines.next_line().await.unwrap().unwrap(), "PONG :abc");
	}

	#[tokio::test]
	async fn join_resolves_on_echo_and_fails_on_numeric() {
		let (client, server) = duplex(4096);
		let (events_tx, _events_rx) = mpsc::channel(16);
		let handle = spawn_session(client, cfg(), events_tx);

		let (server_read, mut server_write) = tokio::io::split(server);
		let mut server_lines = BufReader::new(server_read).lines();
		let _ = server_lines.next_line().await;
		let _ = server_lines.next_line().await;

		let ok_chan = ChannelName::new("#skr").unwrap();
		let joining = {
			let handle = handle.clone();
			let ok_chan = ok_chan.clone();
			tokio::spawn(async move { handle.join(&ok_chan).await })
		};
		assert_eq!(server_lines.next_line().await.unwrap().unwrap(), "JOIN #skr");
		server_write
			.write_all(b":splitkit-relay!u@h JOIN #SKR\r\n")
			.await
			.unwrap();
		joining.await.unwrap().expect("join confirmed");

		let bad_chan = ChannelName::new("#closed").unwrap();
		let joining = {
			let handle = handle.clone();
			tokio::spawn(async move { handle.join(&bad_chan).await })
		};
		assert_eq!(server_lines.next_line().await.unwrap().unwrap(), "JOIN #closed");
		server_write
			.write_all(b":srv 474 splitkit-relay #closed :Cannot join channel (+b)\r\n")
			.await
			.unwrap();
		let err = joining.await.unwrap().expect_err("join refused");
		assert!(err.to_string().contains("Cannot join channel"));
	}

	#[tokio::test]
	async fn privmsg_becomes_chat_event_and_send_is_framed() {
		let (client, server) = duplex(4096);
		let (events_tx, mut events_rx) = mpsc::channel(16);
		let handle = spawn_session(client, cfg(), events_tx);

		let (server_read, mut server_write) = tokio::io::split(server);
		let mut server_lines = BufReader::new(server_read).lines();
		let _ = server_lines.next_line().await;
		let _ = server_lines.next_line().await;

		server_write
			.write_all(b":dave!~d@host PRIVMSG #skr :`np\r\n")
			.await
			.unwrap();
		let ev = timeout(Duration::from_millis(500), events_rx.recv())
			.await
			.expect("message event")
			.expect("channel open");
		match ev {
			ChatEvent::Message(m) => {
				assert_eq!(m.sender.as_str(), "dave");
				assert_eq!(m.target.as_str(), "#skr");
				assert_eq!(m.text, "`np");
			}
			other => panic!("expected Message, got {other:?}"),
		}

		let target = MessageTarget::parse("#skr").unwrap();
		handle.send_message(&target, "Now Playing: a\nb").await.unwrap();
		assert_eq!(
			server_lines.next_line().await.unwrap().unwrap(),
			"PRIVMSG #skr :Now Playing: ab"
		);
	}
}
