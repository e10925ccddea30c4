#![forbid(unsafe_code)]

use std::future::Future;

use anyhow::anyhow;
use relay_platform::{ChatEventRx, FeedEventRx};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::controller::{Flow, SessionController};

/// Receivers drained by the relay event loop.
pub struct LoopChannels {
	pub chat_rx: ChatEventRx,
	pub feed_rx: FeedEventRx,
	/// Preformatted lines to announce everywhere (boostagrams).
	pub broadcast_rx: mpsc::Receiver<String>,
}

/// Drive the controller until a `quit` command, `shutdown` resolving, or the
/// chat connection going away. Exactly one handler runs at a time.
pub async fn run_event_loop(
	mut controller: SessionController,
	channels: LoopChannels,
	shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
	let LoopChannels {
		mut chat_rx,
		mut feed_rx,
		mut broadcast_rx,
	} = channels;
	tokio::pin!(shutdown);

	loop {
		tokio::select! {
			_ = &mut shutdown => {
				info!("event loop: shutdown requested");
				controller.quit("Goodbye!").await;
				return Ok(());
			}
			ev = chat_rx.recv() => {
				let Some(ev) = ev else {
					return Err(anyhow!("chat transport stopped"));
				};
				if controller.handle_chat_event(ev).await? == Flow::Quit {
					info!("event loop: quit");
					return Ok(());
				}
			}
			Some(ev) = feed_rx.recv() => {
				controller.handle_feed_event(ev).await;
			}
			Some(line) = broadcast_rx.recv() => {
				let delivered = controller.broadcast(&line).await;
				debug!(delivered, "event loop: broadcast");
			}
		}
	}
}
