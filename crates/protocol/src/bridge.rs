//! In-host bridge protocol.
//!
//! Page agents and the host connect to the local bridge server over WebSocket.
//!
//! Agents (one socket per page):
//!
//! 1. Agent connects and sends [`AgentMessage::Register`] with its target kind and page
//! 2. Server responds with [`ServerMessage::Registered`] carrying the session id
//! 3. Server sends [`ServerMessage::Call`] for each dispatched request; agent answers with
//!    [`AgentMessage::Result`]
//! 4. Agent may send [`AgentMessage::Event`] at any time after registering
//!
//! Host (single socket, the browser extension background):
//!
//! - Server sends [`HostCommand`] (currently only `openPage`), host answers with [`HostReply`]
//!   correlated by `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method name for the host page-creation command.
pub const OPEN_PAGE: &str = "openPage";

/// Message sent from a page agent to the bridge server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentMessage {
	/// Announces the session. Must be the first frame on the socket.
	Register {
		target_kind: String,
		tab_id: i64,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		frame_id: Option<i64>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		url: Option<String>,
		/// Agent-chosen session id. Re-using a live id replaces that session.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		session_id: Option<String>,
	},
	/// Unsolicited page event.
	Event {
		name: String,
		#[serde(default)]
		data: Value,
	},
	/// Answer to a [`ServerMessage::Call`]. Exactly one of `data` or `error` is meaningful.
	Result {
		call_id: u64,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		data: Option<Value>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<AgentError>,
	},
}

/// Message sent from the bridge server to a page agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
	Registered {
		session_id: String,
	},
	/// Registration refused (for example a second `register` on the same socket).
	Rejected {
		reason: String,
	},
	Call {
		call_id: u64,
		request_id: String,
		session_id: String,
		target_kind: String,
		name: String,
		#[serde(default)]
		params: Value,
	},
}

/// Failure reported by an agent, passed through to the controller verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentError {
	pub code: String,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub details: Option<Value>,
}

/// Command sent from the bridge server to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostCommand {
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

impl HostCommand {
	pub fn open_page(id: u64, url: &str) -> Self {
		Self {
			id,
			method: OPEN_PAGE.to_string(),
			params: serde_json::json!({ "url": url }),
		}
	}
}

/// Host answer to a [`HostCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostReply {
	pub id: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Result payload of a successful `openPage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPageResult {
	pub tab_id: i64,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn register_frame_parses_camel_case_fields() {
		let raw = r#"{"type":"register","targetKind":"chatgpt","tabId":5,"frameId":0,"url":"https://chatgpt.com/"}"#;
		let message: AgentMessage = serde_json::from_str(raw).unwrap();
		assert_eq!(
			message,
			AgentMessage::Register {
				target_kind: "chatgpt".into(),
				tab_id: 5,
				frame_id: Some(0),
				url: Some("https://chatgpt.com/".into()),
				session_id: None,
			}
		);
	}

	#[test]
	fn result_frame_with_error() {
		let raw = r#"{"type":"result","callId":3,"error":{"code":"SELECTOR_MISSING","message":"no input box"}}"#;
		let AgentMessage::Result { call_id, data, error } = serde_json::from_str(raw).unwrap() else {
			panic!("Expected Result");
		};
		assert_eq!(call_id, 3);
		assert!(data.is_none());
		assert_eq!(error.unwrap().code, "SELECTOR_MISSING");
	}

	#[test]
	fn call_frame_shape() {
		let call = ServerMessage::Call {
			call_id: 1,
			request_id: "r1".into(),
			session_id: "chatgpt-1".into(),
			target_kind: "chatgpt".into(),
			name: "chat.send".into(),
			params: json!({"prompt": "hi"}),
		};
		let value = serde_json::to_value(call).unwrap();
		assert_eq!(value["type"], "call");
		assert_eq!(value["callId"], 1);
		assert_eq!(value["requestId"], "r1");
		assert_eq!(value["sessionId"], "chatgpt-1");
		assert_eq!(value["targetKind"], "chatgpt");
	}

	#[test]
	fn open_page_command() {
		let value = serde_json::to_value(HostCommand::open_page(9, "https://grok.com/")).unwrap();
		assert_eq!(value, json!({"id": 9, "method": "openPage", "params": {"url": "https://grok.com/"}}));

		let reply: HostReply = serde_json::from_str(r#"{"id":9,"result":{"tabId":41}}"#).unwrap();
		let result: OpenPageResult = serde_json::from_value(reply.result.unwrap()).unwrap();
		assert_eq!(result.tab_id, 41);
	}
}
