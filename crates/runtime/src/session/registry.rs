//! In-memory session table with per-target-kind registration notification.
//!
//! Lookups preserve registration order so "first registered wins" is stable. Waiters for a target
//! kind park on a per-kind [`Notify`] and register before checking, so a registration landing
//! between the check and the wait is never missed.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tabmux_protocol::PageLocator;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Session, SessionId};

struct Slot {
	session: Session,
	order: u64,
}

#[derive(Default)]
struct Table {
	sessions: HashMap<SessionId, Slot>,
	next_order: u64,
	next_epoch: u64,
}

impl Table {
	fn ordered(&self) -> Vec<&Slot> {
		let mut slots: Vec<&Slot> = self.sessions.values().collect();
		slots.sort_by_key(|slot| slot.order);
		slots
	}
}

/// Registry of live sessions keyed by [`SessionId`].
#[derive(Default)]
pub struct SessionRegistry {
	table: Mutex<Table>,
	waiters: DashMap<String, Arc<Notify>>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a session, assigns its epoch, and wakes waiters for its target kind.
	///
	/// Re-using an id overwrites the previous entry in place (keeping its registration order)
	/// without closing the replaced channel.
	pub fn put(&self, mut session: Session) -> u64 {
		let target_kind = session.target_kind.clone();
		let epoch = {
			let mut guard = self.table.lock();
			let table = &mut *guard;
			table.next_epoch += 1;
			let epoch = table.next_epoch;
			session.epoch = epoch;

			let next_order = table.next_order;
			match table.sessions.entry(session.id.clone()) {
				Entry::Occupied(mut occupied) => {
					warn!(
						target = "tabmux.registry",
						id = %session.id,
						previous = ?occupied.get().session.locator,
						locator = ?session.locator,
						"replacing session with duplicate id; previous channel left open"
					);
					let order = occupied.get().order;
					occupied.insert(Slot { session, order });
				}
				Entry::Vacant(vacant) => {
					debug!(target = "tabmux.registry", id = %session.id, kind = %target_kind, "session registered");
					vacant.insert(Slot {
						session,
						order: next_order,
					});
					table.next_order += 1;
				}
			}
			epoch
		};

		if let Some((_, notify)) = self.waiters.remove(&target_kind) {
			notify.notify_waiters();
		}
		epoch
	}

	pub fn remove(&self, id: &SessionId) -> Option<Session> {
		self.table.lock().sessions.remove(id).map(|slot| slot.session)
	}

	/// Removes the session only if it still carries `epoch`.
	///
	/// A channel replaced by a duplicate registration reports its close with a stale epoch; that
	/// close must not evict the live replacement.
	pub fn remove_if_epoch(&self, id: &SessionId, epoch: u64) -> Option<Session> {
		let mut table = self.table.lock();
		let current = table.sessions.get(id).is_some_and(|slot| slot.session.epoch == epoch);
		if !current {
			return None;
		}
		table.sessions.remove(id).map(|slot| slot.session)
	}

	pub fn get(&self, id: &SessionId) -> Option<Session> {
		self.table.lock().sessions.get(id).map(|slot| slot.session.clone())
	}

	/// Sessions of `target_kind`, in registration order.
	pub fn find_by_target(&self, target_kind: &str) -> Vec<Session> {
		self.table
			.lock()
			.ordered()
			.into_iter()
			.filter(|slot| slot.session.target_kind == target_kind)
			.map(|slot| slot.session.clone())
			.collect()
	}

	/// First session of `target_kind` whose locator matches `locator`.
	pub fn find_by_locator(&self, target_kind: &str, locator: &PageLocator) -> Option<Session> {
		self.table
			.lock()
			.ordered()
			.into_iter()
			.find(|slot| slot.session.target_kind == target_kind && slot.session.locator.matches(locator))
			.map(|slot| slot.session.clone())
	}

	/// Every session, in registration order.
	pub fn all(&self) -> Vec<Session> {
		self.table
			.lock()
			.ordered()
			.into_iter()
			.map(|slot| slot.session.clone())
			.collect()
	}

	pub fn len(&self) -> usize {
		self.table.lock().sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Waits until a session of `target_kind` is registered or `deadline` passes.
	pub async fn wait_for_target(&self, target_kind: &str, deadline: Instant) -> Option<SessionId> {
		loop {
			let notify = self
				.waiters
				.entry(target_kind.to_string())
				.or_insert_with(|| Arc::new(Notify::new()))
				.clone();
			let notified = notify.notified();

			if let Some(session) = self.find_by_target(target_kind).into_iter().next() {
				return Some(session.id);
			}

			if Instant::now() >= deadline {
				return None;
			}

			tokio::select! {
				biased;
				_ = notified => {}
				_ = tokio::time::sleep_until(deadline) => {
					return self.find_by_target(target_kind).into_iter().next().map(|s| s.id);
				}
			}
		}
	}
}
