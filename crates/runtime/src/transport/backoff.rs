use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential reconnect delay.
///
/// Doubles after every failed or short-lived connection up to `max`. A connection that stayed up
/// for at least `stable_after` starts the sequence over from `initial`.
#[derive(Debug, Clone)]
pub struct Backoff {
	initial: Duration,
	max: Duration,
	stable_after: Duration,
	current: Duration,
}

impl Backoff {
	pub fn new(initial: Duration, max: Duration, stable_after: Duration) -> Self {
		Self {
			initial,
			max,
			stable_after,
			current: initial.min(max),
		}
	}

	pub fn from_config(config: &ReconnectConfig) -> Self {
		Self::new(
			Duration::from_millis(config.initial_delay_ms),
			Duration::from_millis(config.max_delay_ms),
			Duration::from_millis(config.stable_after_ms),
		)
	}

	/// Delay before the next attempt.
	///
	/// `uptime` is how long the last connection stayed open, or `None` if it never opened.
	pub fn next_delay(&mut self, uptime: Option<Duration>) -> Duration {
		if uptime.is_some_and(|up| up >= self.stable_after) {
			self.reset();
		}
		let delay = self.current;
		self.current = self.current.saturating_mul(2).min(self.max);
		delay
	}

	pub fn reset(&mut self) {
		self.current = self.initial.min(self.max);
	}
}
