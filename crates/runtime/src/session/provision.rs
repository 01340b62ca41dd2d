//! Deduplicated on-demand session creation.
//!
//! The first caller for a target kind spawns a provisioning task and records a
//! [`PendingProvision`] holding a shared handle to its outcome. Later callers for the same kind
//! join that handle instead of opening another page. The task owns its own cleanup, so the entry
//! disappears on success, failure or timeout even if every caller has gone away.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{SessionId, SessionRegistry};
use crate::channel::{BoxFuture, HostPages};
use crate::config::Config;
use crate::error::ResolveError;

type Outcome = std::result::Result<SessionId, ResolveError>;
type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;
type PendingTable = Arc<Mutex<HashMap<String, PendingProvision>>>;

/// An outstanding "create a session for this target kind" operation.
struct PendingProvision {
	deadline: Instant,
	/// Callers awaiting this outcome, including the one that started it.
	waiters: usize,
	outcome: SharedOutcome,
}

/// Opens at most one page per target kind at a time.
pub struct Provisioner {
	registry: Arc<SessionRegistry>,
	host: Arc<dyn HostPages>,
	entry_urls: HashMap<String, String>,
	pending: PendingTable,
}

impl Provisioner {
	pub fn new(registry: Arc<SessionRegistry>, host: Arc<dyn HostPages>, entry_urls: HashMap<String, String>) -> Self {
		Self {
			registry,
			host,
			entry_urls,
			pending: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	pub fn from_config(config: &Config, registry: Arc<SessionRegistry>, host: Arc<dyn HostPages>) -> Self {
		let entry_urls = config
			.targets
			.iter()
			.map(|(kind, target)| (kind.clone(), target.entry_url.clone()))
			.collect();
		Self::new(registry, host, entry_urls)
	}

	/// Returns the id of a newly registered session of `target_kind`.
	///
	/// Joins the in-flight provision for the kind if there is one; otherwise opens the kind's entry
	/// URL and waits up to `timeout` for an agent to register.
	pub async fn acquire_or_join(&self, target_kind: &str, timeout: Duration) -> Outcome {
		let outcome = {
			let mut pending = self.pending.lock();
			match pending.entry(target_kind.to_string()) {
				Entry::Occupied(mut occupied) => {
					let provision = occupied.get_mut();
					provision.waiters += 1;
					debug!(
						target = "tabmux.provision",
						kind = target_kind,
						waiters = provision.waiters,
						remaining_ms = provision.deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
						"joining pending provision"
					);
					provision.outcome.clone()
				}
				Entry::Vacant(vacant) => {
					let provision = self.start(target_kind, timeout);
					let outcome = provision.outcome.clone();
					vacant.insert(provision);
					outcome
				}
			}
		};
		outcome.await
	}

	/// Whether a provision is currently outstanding for `target_kind`.
	pub fn is_pending(&self, target_kind: &str) -> bool {
		self.pending.lock().contains_key(target_kind)
	}

	pub fn pending_count(&self) -> usize {
		self.pending.lock().len()
	}

	fn start(&self, target_kind: &str, timeout: Duration) -> PendingProvision {
		let deadline = Instant::now() + timeout;
		let job = ProvisionJob {
			target_kind: target_kind.to_string(),
			entry_url: self.entry_urls.get(target_kind).cloned(),
			host: Arc::clone(&self.host),
			registry: Arc::clone(&self.registry),
			pending: Arc::clone(&self.pending),
			deadline,
			timeout,
		};

		let task = tokio::spawn(job.execute());
		let outcome: BoxFuture<'static, Outcome> = async move {
			task.await
				.unwrap_or_else(|err| Err(ResolveError::NoSession(format!("provisioning task failed: {err}"))))
		}
		.boxed();

		PendingProvision {
			deadline,
			waiters: 1,
			outcome: outcome.shared(),
		}
	}
}

struct ProvisionJob {
	target_kind: String,
	entry_url: Option<String>,
	host: Arc<dyn HostPages>,
	registry: Arc<SessionRegistry>,
	pending: PendingTable,
	deadline: Instant,
	timeout: Duration,
}

impl ProvisionJob {
	async fn execute(self) -> Outcome {
		let outcome = self.provision().await;

		let waiters = self
			.pending
			.lock()
			.remove(&self.target_kind)
			.map(|p| p.waiters)
			.unwrap_or(0);

		match &outcome {
			Ok(id) => info!(target = "tabmux.provision", kind = %self.target_kind, %id, waiters, "provisioned session"),
			Err(err) => warn!(target = "tabmux.provision", kind = %self.target_kind, waiters, error = %err, "provisioning failed"),
		}
		outcome
	}

	async fn provision(&self) -> Outcome {
		let Some(url) = self.entry_url.as_deref() else {
			return Err(ResolveError::NoSession(format!(
				"no entry URL configured for target kind '{}'",
				self.target_kind
			)));
		};

		info!(target = "tabmux.provision", kind = %self.target_kind, url, "opening page");
		match tokio::time::timeout_at(self.deadline, self.host.open_page(url)).await {
			Ok(Ok(host_id)) => debug!(target = "tabmux.provision", kind = %self.target_kind, host_id, "host opened page"),
			Ok(Err(err)) => return Err(ResolveError::NoSession(format!("host could not open {url}: {err}"))),
			Err(_) => return Err(self.timeout_error()),
		}

		// The page is left open on timeout; the agent may still register later.
		self.registry
			.wait_for_target(&self.target_kind, self.deadline)
			.await
			.ok_or_else(|| self.timeout_error())
	}

	fn timeout_error(&self) -> ResolveError {
		ResolveError::Timeout {
			target_kind: self.target_kind.clone(),
			timeout_ms: self.timeout.as_millis() as u64,
		}
	}
}
