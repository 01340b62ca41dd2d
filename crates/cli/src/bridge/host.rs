//! The host side of the bridge: one socket over which pages are opened.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tabmux_protocol::bridge::{HostCommand, HostReply, OpenPageResult};
use tabmux_runtime::{BoxFuture, Error, HostPages};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// How long `openPage` waits for the host before giving up.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

type PendingReply = oneshot::Sender<Result<i64, String>>;

#[derive(Default)]
struct HostState {
	tx: Option<mpsc::UnboundedSender<Message>>,
	pending: HashMap<u64, PendingReply>,
	generation: u64,
}

impl HostState {
	fn fail_pending(&mut self, reason: &str) {
		for (_, pending) in self.pending.drain() {
			let _ = pending.send(Err(reason.to_string()));
		}
	}
}

/// [`HostPages`] implementation that forwards `openPage` to the connected host socket.
pub struct HostRelay {
	state: Mutex<HostState>,
	next_id: AtomicU64,
	reply_timeout: Duration,
}

impl HostRelay {
	pub fn new(reply_timeout: Duration) -> Self {
		Self {
			state: Mutex::new(HostState::default()),
			next_id: AtomicU64::new(1),
			reply_timeout,
		}
	}

	pub fn is_connected(&self) -> bool {
		self.state.lock().tx.is_some()
	}

	/// Installs a new host connection, replacing and closing any previous one.
	fn attach(&self, tx: mpsc::UnboundedSender<Message>) -> u64 {
		let mut state = self.state.lock();
		if let Some(previous) = state.tx.take() {
			warn!(target = "tabmux.bridge", "replacing existing host connection");
			let _ = previous.send(Message::Close(None));
			state.fail_pending("host connection replaced");
		}
		state.tx = Some(tx);
		state.generation += 1;
		state.generation
	}

	/// Drops the connection installed as `generation`, unless it was already replaced.
	fn detach(&self, generation: u64) {
		let mut state = self.state.lock();
		if state.generation != generation {
			return;
		}
		state.tx = None;
		state.fail_pending("host disconnected");
	}

	fn handle_reply(&self, raw: &str) {
		let reply: HostReply = match serde_json::from_str(raw) {
			Ok(reply) => reply,
			Err(err) => {
				warn!(target = "tabmux.bridge", error = %err, "dropping malformed host frame");
				return;
			}
		};

		let Some(pending) = self.state.lock().pending.remove(&reply.id) else {
			warn!(target = "tabmux.bridge", id = reply.id, "host reply with unknown id");
			return;
		};

		let outcome = match (reply.error, reply.result) {
			(Some(error), _) => Err(error),
			(None, Some(result)) => serde_json::from_value::<OpenPageResult>(result)
				.map(|r| r.tab_id)
				.map_err(|err| format!("malformed openPage result: {err}")),
			(None, None) => Err("host reply carried neither result nor error".to_string()),
		};
		let _ = pending.send(outcome);
	}
}

/// Removes a pending request if its caller stops waiting.
struct PendingGuard<'a> {
	relay: &'a HostRelay,
	id: u64,
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		self.relay.state.lock().pending.remove(&self.id);
	}
}

impl HostPages for HostRelay {
	fn open_page(&self, url: &str) -> BoxFuture<'_, tabmux_runtime::Result<i64>> {
		let url = url.to_string();
		Box::pin(async move {
			let id = self.next_id.fetch_add(1, Ordering::Relaxed);
			let frame = serde_json::to_string(&HostCommand::open_page(id, &url))?;
			let (tx, rx) = oneshot::channel();
			{
				let mut state = self.state.lock();
				let sender = state
					.tx
					.clone()
					.ok_or_else(|| Error::Host("no host connected".into()))?;
				state.pending.insert(id, tx);
				if sender.send(Message::Text(frame.into())).is_err() {
					state.pending.remove(&id);
					return Err(Error::Host("host connection closed".into()));
				}
			}
			let _guard = PendingGuard { relay: self, id };
			debug!(target = "tabmux.bridge", id, url, "openPage sent");

			match tokio::time::timeout(self.reply_timeout, rx).await {
				Ok(Ok(Ok(tab_id))) => {
					debug!(target = "tabmux.bridge", id, tab_id, "openPage answered");
					Ok(tab_id)
				}
				Ok(Ok(Err(message))) => Err(Error::Host(message)),
				Ok(Err(_)) => Err(Error::Host("host connection closed".into())),
				Err(_) => Err(Error::Host(format!(
					"host did not answer openPage within {}ms",
					self.reply_timeout.as_millis()
				))),
			}
		})
	}
}

pub(crate) async fn serve_socket(socket: WebSocket, relay: Arc<HostRelay>) {
	info!(target = "tabmux.bridge", "host connected");

	let (tx, rx) = mpsc::unbounded_channel();
	let generation = relay.attach(tx);

	let mut rx_stream = UnboundedReceiverStream::new(rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(msg) = rx_stream.next().await {
			if ws_tx.send(msg).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => relay.handle_reply(text.as_str()),
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "tabmux.bridge", error = %err, "host websocket error");
				break;
			}
		}
	}

	relay.detach(generation);
	send_task.abort();
	info!(target = "tabmux.bridge", "host disconnected");
}
