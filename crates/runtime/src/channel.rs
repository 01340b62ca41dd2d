//! Boundary with the in-host collaborators.
//!
//! The orchestrator never knows concrete agent or host types. It talks to agents through
//! [`AgentChannel`], opens pages through [`HostPages`], and learns about agent lifecycle from
//! [`AgentEvent`]s delivered over an [`AgentLink`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tabmux_protocol::PageLocator;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ActionError, Error, Result};
use crate::session::SessionId;

/// Boxed future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A call forwarded to the agent owning a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCall {
	/// Controller request id this call answers.
	pub request_id: String,
	pub session_id: SessionId,
	pub target_kind: String,
	/// Action name.
	pub name: String,
	pub params: Value,
}

/// Per-session pipe to an in-host agent.
pub trait AgentChannel: Send + Sync {
	/// Performs an action and resolves with the agent's result or reported error.
	fn call(&self, call: SessionCall) -> BoxFuture<'_, std::result::Result<Value, ActionError>>;
}

/// The host's page-creation primitive.
pub trait HostPages: Send + Sync {
	/// Opens `url` in a new page and returns the host page id.
	///
	/// Resolves once the page exists, without waiting for its agent to register.
	fn open_page(&self, url: &str) -> BoxFuture<'_, Result<i64>>;
}

/// Agent lifecycle and push notifications, consumed by the orchestrator loop.
pub enum AgentEvent {
	Register(Registration),
	Push {
		session_id: SessionId,
		/// Registration epoch of the pushing channel.
		epoch: u64,
		name: String,
		data: Value,
	},
	Closed {
		session_id: SessionId,
		/// Registration epoch the closing channel was given.
		epoch: u64,
	},
}

/// A session announcing itself.
pub struct Registration {
	pub target_kind: String,
	pub locator: PageLocator,
	/// Agent-chosen id. When `None` the orchestrator mints one.
	pub proposed_id: Option<SessionId>,
	pub channel: Arc<dyn AgentChannel>,
	pub reply: oneshot::Sender<Registered>,
}

/// Outcome of a [`Registration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
	pub session_id: SessionId,
	pub epoch: u64,
}

/// Sending side of the agent event stream.
///
/// Cloned into every agent connection; the receiver belongs to the orchestrator.
#[derive(Clone)]
pub struct AgentLink {
	tx: mpsc::UnboundedSender<AgentEvent>,
}

impl AgentLink {
	pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}

	/// Registers a session and waits for the orchestrator to assign its id.
	pub async fn register(
		&self,
		target_kind: impl Into<String>,
		locator: PageLocator,
		proposed_id: Option<SessionId>,
		channel: Arc<dyn AgentChannel>,
	) -> Result<Registered> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(AgentEvent::Register(Registration {
				target_kind: target_kind.into(),
				locator,
				proposed_id,
				channel,
				reply,
			}))
			.map_err(|_| Error::Stopped)?;
		rx.await.map_err(|_| Error::Stopped)
	}

	pub fn push(&self, session_id: SessionId, epoch: u64, name: impl Into<String>, data: Value) -> Result<()> {
		self.tx
			.send(AgentEvent::Push {
				session_id,
				epoch,
				name: name.into(),
				data,
			})
			.map_err(|_| Error::Stopped)
	}

	pub fn closed(&self, session_id: SessionId, epoch: u64) -> Result<()> {
		self.tx
			.send(AgentEvent::Closed { session_id, epoch })
			.map_err(|_| Error::Stopped)
	}
}
