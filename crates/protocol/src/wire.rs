//! Controller wire protocol.
//!
//! Every frame is a JSON object with a protocol version `v`, a timestamp `ts` (unix epoch
//! milliseconds), and a `kind` discriminator selecting one of four bodies:
//!
//! ```text
//! Request  {v, ts, kind:"request",  id, targetKind, name, data, page?}
//! Response {v, ts, kind:"response", id, data}
//! Error    {v, ts, kind:"error",    id?, code, message, details?}
//! Event    {v, ts, kind:"event",    targetKind, name, page, seq, data}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::locator::PageLocator;

/// Current controller protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Event name emitted when a session registers.
pub const PAGE_ONLINE: &str = "page.online";

/// Event name emitted when a session's channel closes.
pub const PAGE_OFFLINE: &str = "page.offline";

/// Single controller protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
	#[serde(default = "default_version")]
	pub v: u32,
	#[serde(default)]
	pub ts: i64,
	#[serde(flatten)]
	pub body: Body,
}

/// Frame body, tagged on `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Body {
	Request(Request),
	Response(Response),
	Error(ErrorBody),
	Event(Event),
}

/// Controller asks a session of `target_kind` to perform action `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
	pub id: String,
	pub target_kind: String,
	pub name: String,
	#[serde(default)]
	pub data: Value,
	/// Explicit page targeting. When present the request never provisions a new page.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub page: Option<PageLocator>,
}

/// Successful reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	pub id: String,
	#[serde(default)]
	pub data: Value,
}

/// Failure reply to a [`Request`], or an unsolicited error when `id` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	pub code: String,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub details: Option<Value>,
}

/// Unsolicited notification about a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
	pub target_kind: String,
	pub name: String,
	pub page: PageLocator,
	/// Zero for synthetic lifecycle events, otherwise increasing per target kind and page.
	pub seq: u64,
	#[serde(default)]
	pub data: Value,
}

/// Error codes produced by tabmux itself.
///
/// Agent-reported failures carry their own codes, which pass through as plain strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
	/// Explicit page target missed, or no session could be found or created.
	NoSession,
	/// Provisioning deadline elapsed before a session registered.
	Timeout,
	/// A dispatched call was never answered.
	ChannelTimeout,
	/// The agent's channel closed before it answered.
	ChannelClosed,
}

impl ErrorCode {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorCode::NoSession => "NO_SESSION",
			ErrorCode::Timeout => "TIMEOUT",
			ErrorCode::ChannelTimeout => "CHANNEL_TIMEOUT",
			ErrorCode::ChannelClosed => "CHANNEL_CLOSED",
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl Message {
	/// Wraps a body with the current version and timestamp.
	pub fn new(body: Body) -> Self {
		Self {
			v: PROTOCOL_VERSION,
			ts: now_ms(),
			body,
		}
	}

	pub fn response(id: impl Into<String>, data: Value) -> Self {
		Self::new(Body::Response(Response { id: id.into(), data }))
	}

	pub fn error(id: Option<String>, code: impl Into<String>, message: impl Into<String>, details: Option<Value>) -> Self {
		Self::new(Body::Error(ErrorBody {
			id,
			code: code.into(),
			message: message.into(),
			details,
		}))
	}

	pub fn event(target_kind: impl Into<String>, name: impl Into<String>, page: PageLocator, seq: u64, data: Value) -> Self {
		Self::new(Body::Event(Event {
			target_kind: target_kind.into(),
			name: name.into(),
			page,
			seq,
			data,
		}))
	}

	/// Parses a text frame.
	pub fn decode(text: &str) -> serde_json::Result<Self> {
		serde_json::from_str(text)
	}

	pub fn encode(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}

	/// Request or response id carried by this frame, if any.
	pub fn id(&self) -> Option<&str> {
		match &self.body {
			Body::Request(r) => Some(&r.id),
			Body::Response(r) => Some(&r.id),
			Body::Error(e) => e.id.as_deref(),
			Body::Event(_) => None,
		}
	}
}

/// Milliseconds since the unix epoch.
pub fn now_ms() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as i64
}

fn default_version() -> u32 {
	PROTOCOL_VERSION
}
