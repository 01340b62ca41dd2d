//! Outbound WebSocket connection to the controller.
//!
//! A [`Transport`] owns one logical connection and keeps re-establishing it with [`Backoff`]
//! until shut down. Inbound text frames and connect/disconnect transitions are delivered in order
//! on a [`TransportEvent`] channel. Outbound frames go through a cloneable [`TransportHandle`];
//! nothing is buffered across a disconnect, so sending while down fails immediately with
//! [`Error::NotConnected`].

mod backoff;


use std::sync::Arc;
use std::time::Duration;

pub use backoff::Backoff;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Connected,
	Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
	/// One inbound text frame, verbatim.
	Message(String),
	State(ConnectionState),
}

type OutboundSlot = Arc<Mutex<Option<mpsc::UnboundedSender<WsMessage>>>>;

/// Sending side of a running [`Transport`].
#[derive(Clone)]
pub struct TransportHandle {
	outbound: OutboundSlot,
	shutdown: Arc<watch::Sender<bool>>,
}

impl TransportHandle {
	/// Queues one text frame on the live connection.
	pub fn send(&self, text: String) -> Result<()> {
		let slot = self.outbound.lock();
		let tx = slot.as_ref().ok_or(Error::NotConnected)?;
		tx.send(WsMessage::Text(text)).map_err(|_| Error::NotConnected)
	}

	pub fn is_connected(&self) -> bool {
		self.outbound.lock().is_some()
	}

	/// Closes the connection and stops reconnecting.
	pub fn shutdown(&self) {
		let _ = self.shutdown.send(true);
	}
}

/// Reconnecting controller connection.
pub struct Transport {
	url: String,
	backoff: Backoff,
	outbound: OutboundSlot,
	events: mpsc::UnboundedSender<TransportEvent>,
	shutdown: watch::Receiver<bool>,
}

enum Exit {
	/// The connection failed or dropped; carries how long it was up.
	Dropped(Option<Duration>),
	Shutdown,
}

impl Transport {
	pub fn new(url: impl Into<String>, backoff: Backoff) -> (Self, TransportHandle, mpsc::UnboundedReceiver<TransportEvent>) {
		let (events, events_rx) = mpsc::unbounded_channel();
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let outbound: OutboundSlot = Arc::new(Mutex::new(None));

		let transport = Self {
			url: url.into(),
			backoff,
			outbound: Arc::clone(&outbound),
			events,
			shutdown: shutdown_rx,
		};
		let handle = TransportHandle {
			outbound,
			shutdown: Arc::new(shutdown_tx),
		};
		(transport, handle, events_rx)
	}

	/// Builds a transport from `config` and starts it on the current runtime.
	pub fn spawn(config: &Config) -> (TransportHandle, mpsc::UnboundedReceiver<TransportEvent>, JoinHandle<()>) {
		let (transport, handle, events) = Self::new(config.controller_url.clone(), Backoff::from_config(&config.reconnect));
		let task = tokio::spawn(transport.run());
		(handle, events, task)
	}

	/// Connects, pumps frames, and reconnects until [`TransportHandle::shutdown`] is called or
	/// every handle is dropped.
	pub async fn run(mut self) {
		let mut shutdown = self.shutdown.clone();
		loop {
			let uptime = match self.connect_once(&mut shutdown).await {
				Exit::Dropped(uptime) => uptime,
				Exit::Shutdown => break,
			};

			let delay = self.backoff.next_delay(uptime);
			info!(
				target = "tabmux.transport",
				url = %self.url,
				delay_ms = delay.as_millis() as u64,
				"scheduling reconnect"
			);
			tokio::select! {
				_ = tokio::time::sleep(delay) => {}
				_ = wait_for_shutdown(&mut shutdown) => break,
			}
		}
		debug!(target = "tabmux.transport", "transport stopped");
	}

	async fn connect_once(&mut self, shutdown: &mut watch::Receiver<bool>) -> Exit {
		debug!(target = "tabmux.transport", url = %self.url, "connecting");
		let stream = tokio::select! {
			res = connect_async(self.url.as_str()) => match res {
				Ok((stream, _)) => stream,
				Err(err) => {
					warn!(target = "tabmux.transport", url = %self.url, error = %err, "connection failed");
					return Exit::Dropped(None);
				}
			},
			_ = wait_for_shutdown(shutdown) => return Exit::Shutdown,
		};

		let connected_at = Instant::now();
		let (mut sink, mut source) = stream.split();
		let (tx, mut rx) = mpsc::unbounded_channel();
		*self.outbound.lock() = Some(tx);
		info!(target = "tabmux.transport", url = %self.url, "connected");
		let _ = self.events.send(TransportEvent::State(ConnectionState::Connected));

		let exit = loop {
			tokio::select! {
				outgoing = rx.recv() => {
					let Some(frame) = outgoing else {
						break Exit::Dropped(Some(connected_at.elapsed()));
					};
					if let Err(err) = sink.send(frame).await {
						warn!(target = "tabmux.transport", error = %err, "send failed");
						break Exit::Dropped(Some(connected_at.elapsed()));
					}
				}
				incoming = source.next() => match incoming {
					Some(Ok(WsMessage::Text(text))) => {
						let _ = self.events.send(TransportEvent::Message(text));
					}
					Some(Ok(WsMessage::Close(frame))) => {
						debug!(target = "tabmux.transport", ?frame, "controller closed connection");
						break Exit::Dropped(Some(connected_at.elapsed()));
					}
					Some(Ok(_)) => {}
					Some(Err(err)) => {
						warn!(target = "tabmux.transport", error = %err, "websocket error");
						break Exit::Dropped(Some(connected_at.elapsed()));
					}
					None => break Exit::Dropped(Some(connected_at.elapsed())),
				},
				_ = wait_for_shutdown(shutdown) => {
					let _ = sink.send(WsMessage::Close(None)).await;
					break Exit::Shutdown;
				}
			}
		};

		self.outbound.lock().take();
		info!(
			target = "tabmux.transport",
			url = %self.url,
			uptime_ms = connected_at.elapsed().as_millis() as u64,
			"disconnected"
		);
		let _ = self.events.send(TransportEvent::State(ConnectionState::Disconnected));
		exit
	}
}

/// Resolves once shutdown is requested or every handle is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
	let _ = rx.wait_for(|stop| *stop).await;
}
