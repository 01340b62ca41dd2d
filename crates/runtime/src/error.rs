//! Error types for the tabmux runtime.

use serde_json::Value;
use tabmux_protocol::ErrorCode;
use tabmux_protocol::bridge::AgentError;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tabmux runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// The controller connection is currently down; nothing was sent.
	#[error("Not connected to controller")]
	NotConnected,

	/// The host could not open a page.
	#[error("Host error: {0}")]
	Host(String),

	/// The orchestrator loop is no longer running.
	#[error("Orchestrator stopped")]
	Stopped,

	/// Configuration failed validation.
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Why a request could not be bound to a session.
///
/// `Clone` so a single provisioning outcome can be handed to every joined waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
	#[error("No session: {0}")]
	NoSession(String),

	#[error("Timed out after {timeout_ms}ms waiting for a '{target_kind}' session")]
	Timeout { target_kind: String, timeout_ms: u64 },
}

impl ResolveError {
	pub fn code(&self) -> ErrorCode {
		match self {
			ResolveError::NoSession(_) => ErrorCode::NoSession,
			ResolveError::Timeout { .. } => ErrorCode::Timeout,
		}
	}
}

/// Failure of a dispatched call, as reported by (or on behalf of) the agent.
///
/// Codes are opaque strings so agent-defined codes pass through untouched.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct ActionError {
	pub code: String,
	pub message: String,
	pub details: Option<Value>,
}

impl ActionError {
	pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			code: code.into(),
			message: message.into(),
			details: None,
		}
	}

	pub fn with_details(mut self, details: Value) -> Self {
		self.details = Some(details);
		self
	}

	/// The agent never answered within `timeout_ms`.
	pub fn channel_timeout(timeout_ms: u64) -> Self {
		Self::new(
			ErrorCode::ChannelTimeout.as_str(),
			format!("No reply from agent within {timeout_ms}ms"),
		)
		.with_details(serde_json::json!({ "timeoutMs": timeout_ms }))
	}

	/// The agent's channel went away before it answered.
	pub fn channel_closed(reason: impl Into<String>) -> Self {
		Self::new(ErrorCode::ChannelClosed.as_str(), reason)
	}
}

impl From<AgentError> for ActionError {
	fn from(err: AgentError) -> Self {
		Self {
			code: err.code,
			message: err.message,
			details: err.details,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resolve_error_codes() {
		assert_eq!(ResolveError::NoSession("x".into()).code(), ErrorCode::NoSession);
		let timeout = ResolveError::Timeout {
			target_kind: "grok".into(),
			timeout_ms: 500,
		};
		assert_eq!(timeout.code(), ErrorCode::Timeout);
		assert_eq!(timeout.to_string(), "Timed out after 500ms waiting for a 'grok' session");
	}

	#[test]
	fn agent_error_passes_through() {
		let err: ActionError = AgentError {
			code: "RATE_LIMITED".into(),
			message: "slow down".into(),
			details: Some(serde_json::json!({"retryAfter": 30})),
		}
		.into();
		assert_eq!(err.code, "RATE_LIMITED");
		assert_eq!(err.details.unwrap()["retryAfter"], 30);
	}

	#[test]
	fn channel_timeout_code() {
		let err = ActionError::channel_timeout(1500);
		assert_eq!(err.code, "CHANNEL_TIMEOUT");
		assert!(err.message.contains("1500ms"));
	}
}
