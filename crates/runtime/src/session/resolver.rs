//! Binds a request to a session.

use std::sync::Arc;
use std::time::Duration;

use tabmux_protocol::PageLocator;
use tracing::{debug, warn};

use super::{Provisioner, Session, SessionRegistry};
use crate::error::ResolveError;

/// Resolves `(target kind, optional page)` to a session, provisioning one when needed.
pub struct SessionResolver {
	registry: Arc<SessionRegistry>,
	provisioner: Arc<Provisioner>,
	provision_timeout: Duration,
}

impl SessionResolver {
	pub fn new(registry: Arc<SessionRegistry>, provisioner: Arc<Provisioner>, provision_timeout: Duration) -> Self {
		Self {
			registry,
			provisioner,
			provision_timeout,
		}
	}

	/// Three tiers, in order:
	///
	/// 1. explicit `page`: that exact session or `NO_SESSION`; never provisions
	/// 2. the first registered session of `target_kind`
	/// 3. provision one (or join the in-flight provision) and wait
	pub async fn resolve(&self, target_kind: &str, page: Option<&PageLocator>) -> Result<Session, ResolveError> {
		if let Some(page) = page {
			return self.registry.find_by_locator(target_kind, page).ok_or_else(|| {
				ResolveError::NoSession(format!(
					"no '{target_kind}' session on tab {}{}",
					page.host_id,
					page.frame_id.map(|f| format!(" frame {f}")).unwrap_or_default()
				))
			});
		}

		let candidates = self.registry.find_by_target(target_kind);
		if candidates.len() > 1 {
			warn!(
				target = "tabmux.resolver",
				kind = target_kind,
				count = candidates.len(),
				chosen = %candidates[0].id,
				"ambiguous session selection; using first registered"
			);
		}
		if let Some(session) = candidates.into_iter().next() {
			return Ok(session);
		}

		debug!(target = "tabmux.resolver", kind = target_kind, "no session registered; provisioning");
		let id = self.provisioner.acquire_or_join(target_kind, self.provision_timeout).await?;
		self.registry
			.get(&id)
			.ok_or_else(|| ResolveError::NoSession(format!("session {id} closed before it could be used")))
	}
}
