//! Local WebSocket server connecting the host and page agents to the orchestrator.
//!
//! - `GET /`: health check
//! - `/host`: the host connection used to open pages
//! - `/agent`: one connection per in-page agent

mod agent;
mod host;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::routing::get;
use tabmux_runtime::AgentLink;
use tokio::net::TcpListener;
use tracing::info;

pub use agent::SocketChannel;
pub use host::{DEFAULT_REPLY_TIMEOUT, HostRelay};

#[derive(Clone)]
pub struct BridgeState {
	pub host: Arc<HostRelay>,
	pub agents: AgentLink,
}

pub fn router(state: BridgeState) -> Router {
	Router::new()
		.route("/", get(|| async { "OK" }))
		.route(
			"/host",
			get(
				|ws: WebSocketUpgrade, State(state): State<BridgeState>| async move {
					ws.on_upgrade(move |socket| host::serve_socket(socket, state.host))
				},
			),
		)
		.route(
			"/agent",
			get(
				|ws: WebSocketUpgrade, State(state): State<BridgeState>| async move {
					ws.on_upgrade(move |socket| agent::serve_socket(socket, state.agents))
				},
			),
		)
		.with_state(state)
}

/// Serves the bridge on an already-bound listener until the task is dropped or the listener fails.
pub async fn serve(listener: TcpListener, state: BridgeState) -> Result<()> {
	let addr = listener.local_addr().context("Bridge listener has no local address")?;
	info!(target = "tabmux.bridge", %addr, "bridge listening");

	axum::serve(listener, router(state).into_make_service())
		.await
		.context("Bridge server error")
}
