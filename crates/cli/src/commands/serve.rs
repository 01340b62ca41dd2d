use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tabmux_runtime::{AgentLink, Orchestrator, Transport};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::bridge::{self, BridgeState, DEFAULT_REPLY_TIMEOUT, HostRelay};
use crate::cli::ServeArgs;
use crate::settings::Settings;

pub async fn run(args: ServeArgs) -> Result<()> {
	let settings = Settings::resolve(args.config.as_deref(), args.controller_url, args.listen)?;

	let listener = TcpListener::bind(settings.listen)
		.await
		.with_context(|| format!("Failed to bind bridge server to {}", settings.listen))?;

	info!(
		target = "tabmux.serve",
		controller = %settings.config.controller_url,
		listen = %settings.listen,
		targets = settings.config.targets.len(),
		"starting"
	);

	let host = Arc::new(HostRelay::new(DEFAULT_REPLY_TIMEOUT));
	let (agents, agent_rx) = AgentLink::channel();
	let (transport, transport_rx, transport_task) = Transport::spawn(&settings.config);

	let orchestrator = Orchestrator::new(&settings.config, host.clone(), Arc::new(transport.clone()));
	let orchestrator_task = tokio::spawn(orchestrator.run(transport_rx, agent_rx));
	let mut bridge_task = tokio::spawn(bridge::serve(listener, BridgeState { host, agents }));

	let outcome = tokio::select! {
		res = &mut bridge_task => match res {
			Ok(Ok(())) => Err(anyhow!("Bridge server stopped unexpectedly")),
			Ok(Err(err)) => Err(err),
			Err(err) => Err(anyhow!("Bridge server task failed: {err}")),
		},
		signal = shutdown_signal() => signal,
	};

	transport.shutdown();
	if let Err(err) = transport_task.await {
		warn!(target = "tabmux.serve", error = %err, "transport task failed");
	}
	if let Err(err) = orchestrator_task.await {
		warn!(target = "tabmux.serve", error = %err, "orchestrator task failed");
	}
	bridge_task.abort();

	info!(target = "tabmux.serve", "stopped");
	outcome
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
	let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

	tokio::select! {
		_ = sigterm.recv() => info!(target = "tabmux.serve", "received SIGTERM, shutting down"),
		_ = sigint.recv() => info!(target = "tabmux.serve", "received SIGINT, shutting down"),
	}
	Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
	tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
	info!(target = "tabmux.serve", "received Ctrl+C, shutting down");
	Ok(())
}
