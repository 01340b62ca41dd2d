//! Translation between the controller wire protocol and per-session agent calls.
//!
//! The [`Orchestrator`] loop consumes two streams: [`TransportEvent`]s from the controller
//! connection and [`AgentEvent`]s from in-host agents. Registry mutation (register, close) happens
//! on the loop itself. Requests are resolved and dispatched on their own tasks so a slow
//! provisioning wait or agent call never stalls the loop.


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tabmux_protocol::wire::{PAGE_OFFLINE, PAGE_ONLINE};
use tabmux_protocol::{Body, Message, PageLocator, Request};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{AgentEvent, HostPages, Registered, Registration, SessionCall};
use crate::config::Config;
use crate::error::{ActionError, Result};
use crate::session::{Provisioner, Session, SessionId, SessionRegistry, SessionResolver};
use crate::transport::{ConnectionState, TransportEvent, TransportHandle};

/// Outbound side of the controller connection.
pub trait WireSink: Send + Sync {
	/// Sends one frame, failing if the connection is down.
	fn send_message(&self, message: &Message) -> Result<()>;
}

impl WireSink for TransportHandle {
	fn send_message(&self, message: &Message) -> Result<()> {
		self.send(message.encode()?)
	}
}

/// Assigns `seq` to agent-pushed events, counting from 1 per target kind and page.
///
/// Counters outlive the sessions that used them so a page that re-registers never sees `seq`
/// go backwards. The table holds one entry per page ever seen.
#[derive(Debug, Default)]
pub struct EventSequencer {
	counters: HashMap<(String, i64, Option<i64>), u64>,
}

impl EventSequencer {
	pub fn next(&mut self, target_kind: &str, page: &PageLocator) -> u64 {
		let counter = self
			.counters
			.entry((target_kind.to_string(), page.host_id, page.frame_id))
			.or_insert(0);
		*counter += 1;
		*counter
	}
}

pub struct Orchestrator {
	registry: Arc<SessionRegistry>,
	provisioner: Arc<Provisioner>,
	resolver: Arc<SessionResolver>,
	sink: Arc<dyn WireSink>,
	call_timeout: Duration,
	sequencer: EventSequencer,
	minted: u64,
}

impl Orchestrator {
	pub fn new(config: &Config, host: Arc<dyn HostPages>, sink: Arc<dyn WireSink>) -> Self {
		let registry = Arc::new(SessionRegistry::new());
		let provisioner = Arc::new(Provisioner::from_config(config, Arc::clone(&registry), host));
		let resolver = Arc::new(SessionResolver::new(
			Arc::clone(&registry),
			Arc::clone(&provisioner),
			config.provision_timeout(),
		));

		Self {
			registry,
			provisioner,
			resolver,
			sink,
			call_timeout: config.call_timeout(),
			sequencer: EventSequencer::default(),
			minted: 0,
		}
	}

	pub fn registry(&self) -> Arc<SessionRegistry> {
		Arc::clone(&self.registry)
	}

	pub fn provisioner(&self) -> Arc<Provisioner> {
		Arc::clone(&self.provisioner)
	}

	/// Runs until the transport event stream ends.
	///
	/// The agent stream closing only disables that branch; the controller side keeps working.
	pub async fn run(
		mut self,
		mut transport: mpsc::UnboundedReceiver<TransportEvent>,
		mut agents: mpsc::UnboundedReceiver<AgentEvent>,
	) {
		info!(target = "tabmux.orchestrator", "orchestrator started");
		let mut agents_open = true;
		loop {
			tokio::select! {
				event = transport.recv() => match event {
					Some(event) => self.handle_transport(event),
					None => break,
				},
				event = agents.recv(), if agents_open => match event {
					Some(event) => self.handle_agent(event),
					None => {
						debug!(target = "tabmux.orchestrator", "agent link closed");
						agents_open = false;
					}
				},
			}
		}
		info!(
			target = "tabmux.orchestrator",
			sessions = self.registry.len(),
			"orchestrator stopped"
		);
	}

	fn handle_transport(&mut self, event: TransportEvent) {
		match event {
			TransportEvent::Message(text) => self.handle_frame(&text),
			TransportEvent::State(ConnectionState::Connected) => self.replay_online(),
			TransportEvent::State(ConnectionState::Disconnected) => {
				debug!(target = "tabmux.orchestrator", "controller offline; replies will be dropped");
			}
		}
	}

	fn handle_frame(&self, text: &str) {
		let message = match Message::decode(text) {
			Ok(message) => message,
			Err(err) => {
				warn!(target = "tabmux.orchestrator", error = %err, "dropping malformed frame");
				return;
			}
		};

		match message.body {
			Body::Request(request) => self.dispatch(request),
			other => debug!(target = "tabmux.orchestrator", body = ?other, "ignoring non-request frame"),
		}
	}

	fn dispatch(&self, request: Request) {
		let resolver = Arc::clone(&self.resolver);
		let sink = Arc::clone(&self.sink);
		let call_timeout = self.call_timeout;

		tokio::spawn(async move {
			let id = request.id.clone();
			let reply = handle_request(&resolver, call_timeout, request).await;
			if let Err(err) = sink.send_message(&reply) {
				debug!(target = "tabmux.orchestrator", %id, error = %err, "reply not delivered");
			}
		});
	}

	fn handle_agent(&mut self, event: AgentEvent) {
		match event {
			AgentEvent::Register(registration) => self.register(registration),
			AgentEvent::Push {
				session_id,
				epoch,
				name,
				data,
			} => {
				let Some(session) = self.registry.get(&session_id).filter(|s| s.epoch == epoch) else {
					warn!(
						target = "tabmux.orchestrator",
						id = %session_id,
						epoch,
						name = %name,
						"dropping event from unknown or replaced session"
					);
					return;
				};
				let seq = self.sequencer.next(&session.target_kind, &session.locator);
				self.emit(Message::event(session.target_kind, name, session.locator, seq, data));
			}
			AgentEvent::Closed { session_id, epoch } => match self.registry.remove_if_epoch(&session_id, epoch) {
				Some(session) => {
					info!(
						target = "tabmux.orchestrator",
						id = %session.id,
						kind = %session.target_kind,
						tab = session.locator.host_id,
						"session offline"
					);
					self.emit(lifecycle(&session, PAGE_OFFLINE));
				}
				None => debug!(
					target = "tabmux.orchestrator",
					id = %session_id,
					epoch,
					"ignoring close of replaced or unknown session"
				),
			},
		}
	}

	fn register(&mut self, registration: Registration) {
		let Registration {
			target_kind,
			locator,
			proposed_id,
			channel,
			reply,
		} = registration;

		let id = match proposed_id {
			Some(id) => id,
			None => self.mint_id(&target_kind),
		};
		let mut session = Session::new(id.clone(), target_kind, locator, channel);
		session.epoch = self.registry.put(session.clone());

		info!(
			target = "tabmux.orchestrator",
			id = %session.id,
			kind = %session.target_kind,
			tab = session.locator.host_id,
			epoch = session.epoch,
			"session online"
		);
		if reply
			.send(Registered {
				session_id: id,
				epoch: session.epoch,
			})
			.is_err()
		{
			debug!(target = "tabmux.orchestrator", id = %session.id, "registrant went away before reply");
		}
		self.emit(lifecycle(&session, PAGE_ONLINE));
	}

	fn mint_id(&mut self, target_kind: &str) -> SessionId {
		loop {
			self.minted += 1;
			let id = SessionId::from(format!("{target_kind}-{}", self.minted));
			if self.registry.get(&id).is_none() {
				return id;
			}
		}
	}

	fn replay_online(&self) {
		let sessions = self.registry.all();
		info!(target = "tabmux.orchestrator", sessions = sessions.len(), "controller online");
		for session in &sessions {
			self.emit(lifecycle(session, PAGE_ONLINE));
		}
	}

	fn emit(&self, message: Message) {
		if let Err(err) = self.sink.send_message(&message) {
			debug!(target = "tabmux.orchestrator", error = %err, "event not delivered");
		}
	}
}

/// Resolves, dispatches, and produces the single terminal frame for `request`.
async fn handle_request(resolver: &SessionResolver, call_timeout: Duration, request: Request) -> Message {
	let Request {
		id,
		target_kind,
		name,
		data,
		page,
	} = request;
	debug!(target = "tabmux.orchestrator", %id, kind = %target_kind, name = %name, "resolving request");

	let session = match resolver.resolve(&target_kind, page.as_ref()).await {
		Ok(session) => session,
		Err(err) => {
			warn!(target = "tabmux.orchestrator", %id, kind = %target_kind, error = %err, "resolution failed");
			let details = json!({ "targetKind": target_kind, "cause": err.to_string() });
			return Message::error(Some(id), err.code().as_str(), err.to_string(), Some(details));
		}
	};

	let call = SessionCall {
		request_id: id.clone(),
		session_id: session.id.clone(),
		target_kind,
		name,
		params: data,
	};
	debug!(target = "tabmux.orchestrator", %id, session = %session.id, "dispatching");

	let outcome = match tokio::time::timeout(call_timeout, session.channel.call(call)).await {
		Ok(outcome) => outcome,
		Err(_) => Err(ActionError::channel_timeout(call_timeout.as_millis() as u64)),
	};
	match outcome {
		Ok(data) => Message::response(id, data),
		Err(err) => {
			debug!(target = "tabmux.orchestrator", %id, code = %err.code, "call failed");
			Message::error(Some(id), err.code, err.message, err.details)
		}
	}
}

/// `page.online` / `page.offline` frame for `session`, always seq 0.
fn lifecycle(session: &Session, name: &str) -> Message {
	Message::event(
		session.target_kind.clone(),
		name,
		session.locator.clone(),
		0,
		json!({
			"sessionId": session.id.as_str(),
			"url": session.locator.url,
		}),
	)
}
