//! Sessions and the machinery that finds or creates them.
//!
//! - [`SessionRegistry`]: the table of live sessions
//! - [`Provisioner`]: opens at most one page per target kind at a time
//! - [`SessionResolver`]: explicit locator, then reuse, then provision

mod provision;
mod registry;
mod resolver;


use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tabmux_protocol::PageLocator;

pub use provision::Provisioner;
pub use registry::SessionRegistry;
pub use resolver::SessionResolver;

use crate::channel::AgentChannel;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for SessionId {
	fn from(value: &str) -> Self {
		Self(Arc::from(value))
	}
}

impl From<String> for SessionId {
	fn from(value: String) -> Self {
		Self(Arc::from(value.as_str()))
	}
}

/// A live, addressable automation context paired with its channel.
///
/// Cheap to clone; clones share the channel.
#[derive(Clone)]
pub struct Session {
	pub id: SessionId,
	pub target_kind: String,
	pub channel: Arc<dyn AgentChannel>,
	/// Captured at registration and never re-queried.
	pub locator: PageLocator,
	pub created_at: SystemTime,
	/// Assigned by [`SessionRegistry::put`].
	pub epoch: u64,
}

impl Session {
	pub fn new(id: SessionId, target_kind: impl Into<String>, locator: PageLocator, channel: Arc<dyn AgentChannel>) -> Self {
		Self {
			id,
			target_kind: target_kind.into(),
			channel,
			locator,
			created_at: SystemTime::now(),
			epoch: 0,
		}
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("target_kind", &self.target_kind)
			.field("locator", &self.locator)
			.field("epoch", &self.epoch)
			.finish_non_exhaustive()
	}
}
