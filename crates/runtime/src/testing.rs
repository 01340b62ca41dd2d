//! Test doubles for the collaborator traits.
//!
//! - [`RecordingSink`]: a [`WireSink`] that captures every frame on a channel
//! - [`ScriptedChannel`]: an [`AgentChannel`] with a canned reply
//! - [`FakeHost`]: a [`HostPages`] that hands out tab ids and runs a hook per opened page
//!
//! ```ignore
//! let (link, agent_rx) = AgentLink::channel();
//! let host = FakeHost::with_hook(move |tab_id, _url| {
//!     let link = link.clone();
//!     tokio::spawn(async move {
//!         link.register("grok", PageLocator::new(tab_id), None, ScriptedChannel::replying(json!({}))).await
//!     });
//! });
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tabmux_protocol::Message;
use tokio::sync::mpsc;

use crate::channel::{AgentChannel, BoxFuture, HostPages, SessionCall};
use crate::error::{ActionError, Error, Result};
use crate::orchestrator::WireSink;

/// Captures outbound frames. Starts connected.
pub struct RecordingSink {
	tx: mpsc::UnboundedSender<Message>,
	connected: AtomicBool,
}

impl RecordingSink {
	pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let sink = Arc::new(Self {
			tx,
			connected: AtomicBool::new(true),
		});
		(sink, rx)
	}

	/// While disconnected every send fails with [`Error::NotConnected`] and nothing is recorded.
	pub fn set_connected(&self, connected: bool) {
		self.connected.store(connected, Ordering::SeqCst);
	}
}

impl WireSink for RecordingSink {
	fn send_message(&self, message: &Message) -> Result<()> {
		if !self.connected.load(Ordering::SeqCst) {
			return Err(Error::NotConnected);
		}
		self.tx.send(message.clone()).map_err(|_| Error::NotConnected)
	}
}

#[derive(Debug, Clone)]
enum Script {
	Reply(Value),
	Fail(ActionError),
	Hang,
}

/// Agent channel that answers every call the same way and remembers what it was asked.
pub struct ScriptedChannel {
	script: Script,
	calls: Mutex<Vec<SessionCall>>,
}

impl ScriptedChannel {
	fn with_script(script: Script) -> Arc<Self> {
		Arc::new(Self {
			script,
			calls: Mutex::new(Vec::new()),
		})
	}

	pub fn replying(data: Value) -> Arc<Self> {
		Self::with_script(Script::Reply(data))
	}

	pub fn failing(err: ActionError) -> Arc<Self> {
		Self::with_script(Script::Fail(err))
	}

	/// Never answers.
	pub fn hanging() -> Arc<Self> {
		Self::with_script(Script::Hang)
	}

	pub fn calls(&self) -> Vec<SessionCall> {
		self.calls.lock().clone()
	}
}

impl AgentChannel for ScriptedChannel {
	fn call(&self, call: SessionCall) -> BoxFuture<'_, std::result::Result<Value, ActionError>> {
		self.calls.lock().push(call);
		let script = self.script.clone();
		Box::pin(async move {
			match script {
				Script::Reply(data) => Ok(data),
				Script::Fail(err) => Err(err),
				Script::Hang => std::future::pending().await,
			}
		})
	}
}

type OpenHook = Box<dyn Fn(i64, &str) + Send + Sync>;

/// Host that "opens" pages by numbering them from 100.
pub struct FakeHost {
	next_tab: AtomicI64,
	opened: Mutex<Vec<String>>,
	hook: Option<OpenHook>,
	failure: Option<String>,
}

impl FakeHost {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::bare())
	}

	/// Runs `hook(tab_id, url)` synchronously inside every successful `open_page`.
	pub fn with_hook(hook: impl Fn(i64, &str) + Send + Sync + 'static) -> Arc<Self> {
		Arc::new(Self {
			hook: Some(Box::new(hook)),
			..Self::bare()
		})
	}

	/// Every `open_page` fails with `message`.
	pub fn failing(message: impl Into<String>) -> Arc<Self> {
		Arc::new(Self {
			failure: Some(message.into()),
			..Self::bare()
		})
	}

	fn bare() -> Self {
		Self {
			next_tab: AtomicI64::new(100),
			opened: Mutex::new(Vec::new()),
			hook: None,
			failure: None,
		}
	}

	pub fn open_count(&self) -> usize {
		self.opened.lock().len()
	}

	/// URLs passed to `open_page`, in call order.
	pub fn opened(&self) -> Vec<String> {
		self.opened.lock().clone()
	}
}

impl HostPages for FakeHost {
	fn open_page(&self, url: &str) -> BoxFuture<'_, Result<i64>> {
		self.opened.lock().push(url.to_string());
		let outcome = match &self.failure {
			Some(message) => Err(Error::Host(message.clone())),
			None => {
				let tab_id = self.next_tab.fetch_add(1, Ordering::SeqCst);
				if let Some(hook) = &self.hook {
					hook(tab_id, url);
				}
				Ok(tab_id)
			}
		};
		Box::pin(async move { outcome })
	}
}
