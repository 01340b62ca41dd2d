//! The agent side of the bridge: one socket per in-page agent.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tabmux_protocol::PageLocator;
use tabmux_protocol::bridge::{AgentError, AgentMessage, ServerMessage};
use tabmux_runtime::{ActionError, AgentChannel, AgentLink, BoxFuture, Registered, SessionCall, SessionId};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

type PendingCall = oneshot::Sender<Result<Value, ActionError>>;

/// [`AgentChannel`] backed by an agent's WebSocket.
///
/// Calls are correlated by a per-socket `callId`. When the socket ends every outstanding call
/// fails with `CHANNEL_CLOSED`.
pub struct SocketChannel {
	tx: mpsc::UnboundedSender<Message>,
	pending: Mutex<HashMap<u64, PendingCall>>,
	next_call: AtomicU64,
	closed: AtomicBool,
}

impl SocketChannel {
	pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
		Self {
			tx,
			pending: Mutex::new(HashMap::new()),
			next_call: AtomicU64::new(1),
			closed: AtomicBool::new(false),
		}
	}

	pub fn pending_calls(&self) -> usize {
		self.pending.lock().len()
	}

	/// Completes call `call_id` with the agent's answer.
	pub fn resolve(&self, call_id: u64, data: Option<Value>, error: Option<AgentError>) {
		let Some(pending) = self.pending.lock().remove(&call_id) else {
			debug!(target = "tabmux.bridge", call_id, "result for unknown or abandoned call");
			return;
		};
		let outcome = match error {
			Some(error) => Err(ActionError::from(error)),
			None => Ok(data.unwrap_or(Value::Null)),
		};
		let _ = pending.send(outcome);
	}

	/// Fails every outstanding call and refuses new ones.
	pub fn fail_all(&self, reason: &str) {
		self.closed.store(true, Ordering::SeqCst);
		for (_, pending) in self.pending.lock().drain() {
			let _ = pending.send(Err(ActionError::channel_closed(reason)));
		}
	}
}

struct CallGuard<'a> {
	channel: &'a SocketChannel,
	call_id: u64,
}

impl Drop for CallGuard<'_> {
	fn drop(&mut self) {
		self.channel.pending.lock().remove(&self.call_id);
	}
}

impl AgentChannel for SocketChannel {
	fn call(&self, call: SessionCall) -> BoxFuture<'_, Result<Value, ActionError>> {
		Box::pin(async move {
			if self.closed.load(Ordering::SeqCst) {
				return Err(ActionError::channel_closed("agent socket closed"));
			}

			let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
			let frame = ServerMessage::Call {
				call_id,
				request_id: call.request_id,
				session_id: call.session_id.to_string(),
				target_kind: call.target_kind,
				name: call.name,
				params: call.params,
			};
			let text = serde_json::to_string(&frame)
				.map_err(|err| ActionError::new("ENCODE_FAILED", format!("could not encode call: {err}")))?;

			let (tx, rx) = oneshot::channel();
			self.pending.lock().insert(call_id, tx);
			let _guard = CallGuard { channel: self, call_id };

			if self.tx.send(Message::Text(text.into())).is_err() {
				return Err(ActionError::channel_closed("agent socket closed"));
			}
			rx.await
				.unwrap_or_else(|_| Err(ActionError::channel_closed("agent socket closed before replying")))
		})
	}
}

fn send_frame(tx: &mpsc::UnboundedSender<Message>, frame: &ServerMessage) {
	match serde_json::to_string(frame) {
		Ok(text) => {
			let _ = tx.send(Message::Text(text.into()));
		}
		Err(err) => warn!(target = "tabmux.bridge", error = %err, "failed to encode agent frame"),
	}
}

pub(crate) async fn serve_socket(socket: WebSocket, link: AgentLink) {
	let (tx, rx) = mpsc::unbounded_channel();
	let channel = Arc::new(SocketChannel::new(tx.clone()));

	let mut rx_stream = UnboundedReceiverStream::new(rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(msg) = rx_stream.next().await {
			if ws_tx.send(msg).await.is_err() {
				break;
			}
		}
	});

	let mut registered: Option<Registered> = None;

	while let Some(msg) = ws_rx.next().await {
		let text = match msg {
			Ok(Message::Text(text)) => text,
			Ok(Message::Close(_)) => break,
			Ok(_) => continue,
			Err(err) => {
				warn!(target = "tabmux.bridge", error = %err, "agent websocket error");
				break;
			}
		};

		let message: AgentMessage = match serde_json::from_str(text.as_str()) {
			Ok(message) => message,
			Err(err) => {
				warn!(target = "tabmux.bridge", error = %err, "dropping malformed agent frame");
				continue;
			}
		};

		match message {
			AgentMessage::Register {
				target_kind,
				tab_id,
				frame_id,
				url,
				session_id,
			} => {
				if let Some(current) = &registered {
					warn!(target = "tabmux.bridge", id = %current.session_id, "agent tried to register twice");
					send_frame(
						&tx,
						&ServerMessage::Rejected {
							reason: format!("socket already registered as {}", current.session_id),
						},
					);
					continue;
				}

				let locator = PageLocator {
					host_id: tab_id,
					frame_id,
					url,
				};
				let proposed = session_id.map(SessionId::from);
				match link.register(target_kind, locator, proposed, channel.clone()).await {
					Ok(reg) => {
						info!(target = "tabmux.bridge", id = %reg.session_id, tab = tab_id, "agent registered");
						send_frame(
							&tx,
							&ServerMessage::Registered {
								session_id: reg.session_id.to_string(),
							},
						);
						registered = Some(reg);
					}
					Err(err) => {
						warn!(target = "tabmux.bridge", error = %err, "cannot register agent");
						break;
					}
				}
			}
			AgentMessage::Event { name, data } => match &registered {
				Some(reg) => {
					if link.push(reg.session_id.clone(), reg.epoch, name, data).is_err() {
						break;
					}
				}
				None => warn!(target = "tabmux.bridge", name = %name, "event before register; dropped"),
			},
			AgentMessage::Result { call_id, data, error } => channel.resolve(call_id, data, error),
		}
	}

	channel.fail_all("agent socket closed");
	if let Some(reg) = registered {
		info!(target = "tabmux.bridge", id = %reg.session_id, "agent disconnected");
		let _ = link.closed(reg.session_id, reg.epoch);
	}
	send_task.abort();
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn call(name: &str) -> SessionCall {
		SessionCall {
			request_id: "r1".into(),
			session_id: SessionId::from("grok-1"),
			target_kind: "grok".into(),
			name: name.into(),
			params: json!({"prompt": "hi"}),
		}
	}

	fn sent_call_id(rx: &mut mpsc::UnboundedReceiver<Message>) -> u64 {
		let Message::Text(text) = rx.try_recv().unwrap() else {
			panic!("expected text frame");
		};
		match serde_json::from_str(text.as_str()).unwrap() {
			ServerMessage::Call {
				call_id,
				request_id,
				session_id,
				..
			} => {
				assert_eq!(request_id, "r1");
				assert_eq!(session_id, "grok-1");
				call_id
			}
			other => panic!("expected call frame, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn result_resolves_call() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let channel = Arc::new(SocketChannel::new(tx));

		let caller = Arc::clone(&channel);
		let task = tokio::spawn(async move { caller.call(call("submitPrompt")).await });
		while rx.is_empty() {
			tokio::task::yield_now().await;
		}

		let call_id = sent_call_id(&mut rx);
		channel.resolve(call_id, Some(json!({"chatId": "abc"})), None);
		assert_eq!(task.await.unwrap().unwrap(), json!({"chatId": "abc"}));
		assert_eq!(channel.pending_calls(), 0);
	}

	#[tokio::test]
	async fn agent_error_passes_through() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let channel = Arc::new(SocketChannel::new(tx));

		let caller = Arc::clone(&channel);
		let task = tokio::spawn(async move { caller.call(call("submitPrompt")).await });
		while rx.is_empty() {
			tokio::task::yield_now().await;
		}

		let call_id = sent_call_id(&mut rx);
		channel.resolve(
			call_id,
			None,
			Some(AgentError {
				code: "LOGGED_OUT".into(),
				message: "sign in required".into(),
				details: None,
			}),
		);
		let err = task.await.unwrap().unwrap_err();
		assert_eq!(err.code, "LOGGED_OUT");
	}

	#[tokio::test]
	async fn socket_close_fails_outstanding_calls() {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let channel = Arc::new(SocketChannel::new(tx));

		let caller = Arc::clone(&channel);
		let task = tokio::spawn(async move { caller.call(call("submitPrompt")).await });
		while rx.is_empty() {
			tokio::task::yield_now().await;
		}
		channel.fail_all("agent socket closed");

		let err = task.await.unwrap().unwrap_err();
		assert_eq!(err.code, "CHANNEL_CLOSED");

		// Later calls fail fast.
		let err = channel.call(call("again")).await.unwrap_err();
		assert_eq!(err.code, "CHANNEL_CLOSED");
	}

	#[tokio::test(start_paused = true)]
	async fn abandoned_call_is_forgotten() {
		let (tx, _rx) = mpsc::unbounded_channel();
		let channel = SocketChannel::new(tx);

		let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), channel.call(call("slow"))).await;
		assert!(outcome.is_err());
		assert_eq!(channel.pending_calls(), 0);

		// A late result for the abandoned call is ignored.
		channel.resolve(1, Some(json!(null)), None);
	}
}
