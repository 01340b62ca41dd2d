//! Bridge server exercised over real sockets: a scripted host and agent connect via WebSocket,
//! and controller requests are fed straight into the orchestrator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tabmux_cli::bridge::{self, BridgeState, HostRelay};
use tabmux_protocol::{Body, Message};
use tabmux_runtime::testing::RecordingSink;
use tabmux_runtime::{AgentLink, Config, Orchestrator, TransportEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

struct Bridge {
	addr: SocketAddr,
	host: Arc<HostRelay>,
	transport: mpsc::UnboundedSender<TransportEvent>,
	frames: mpsc::UnboundedReceiver<Message>,
}

async fn start_bridge() -> Bridge {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	let host = Arc::new(HostRelay::new(Duration::from_secs(5)));
	let (agents, agent_rx) = AgentLink::channel();
	let (sink, frames) = RecordingSink::new();
	let config = Config {
		provision_timeout_ms: 5_000,
		call_timeout_ms: 5_000,
		..Config::default()
	};
	let orchestrator = Orchestrator::new(&config, host.clone(), sink);
	let (transport, transport_rx) = mpsc::unbounded_channel();

	tokio::spawn(orchestrator.run(transport_rx, agent_rx));
	tokio::spawn(bridge::serve(
		listener,
		BridgeState {
			host: host.clone(),
			agents,
		},
	));

	Bridge {
		addr,
		host,
		transport,
		frames,
	}
}

/// Runs an agent on `/agent` that registers for `tab_id` and echoes every call name back.
async fn run_agent(addr: SocketAddr, tab_id: i64, url: String) {
	let (mut ws, _) = connect_async(format!("ws://{addr}/agent")).await.unwrap();
	let register = json!({
		"type": "register",
		"targetKind": "grok",
		"tabId": tab_id,
		"url": url,
	});
	ws.send(WsMessage::Text(register.to_string())).await.unwrap();

	while let Some(Ok(frame)) = ws.next().await {
		let WsMessage::Text(text) = frame else { continue };
		let value: Value = serde_json::from_str(&text).unwrap();
		match value["type"].as_str() {
			Some("registered") => {}
			Some("call") => {
				let reply = json!({
					"type": "result",
					"callId": value["callId"],
					"data": {"answer": value["name"], "session": value["sessionId"]},
				});
				ws.send(WsMessage::Text(reply.to_string())).await.unwrap();
			}
			other => panic!("unexpected frame type {other:?}"),
		}
	}
}

/// Runs a host on `/host` that answers every `openPage` with tab 7 and starts an agent for it.
async fn run_host(addr: SocketAddr) {
	let (mut ws, _) = connect_async(format!("ws://{addr}/host")).await.unwrap();
	while let Some(Ok(frame)) = ws.next().await {
		let WsMessage::Text(text) = frame else { continue };
		let command: Value = serde_json::from_str(&text).unwrap();
		assert_eq!(command["method"], "openPage");

		let url = command["params"]["url"].as_str().unwrap().to_string();
		let reply = json!({"id": command["id"], "result": {"tabId": 7}});
		ws.send(WsMessage::Text(reply.to_string())).await.unwrap();
		tokio::spawn(run_agent(addr, 7, url));
	}
}

impl Bridge {
	async fn wait_for_host(&self) {
		timeout(Duration::from_secs(5), async {
			while !self.host.is_connected() {
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.expect("host never connected");
	}

	fn request(&self, id: &str) {
		let raw = json!({
			"v": 1,
			"ts": 0,
			"kind": "request",
			"id": id,
			"targetKind": "grok",
			"name": "submitPrompt",
			"data": {"prompt": "hello"},
		});
		self.transport
			.send(TransportEvent::Message(raw.to_string()))
			.unwrap();
	}

	async fn next(&mut self) -> Message {
		timeout(Duration::from_secs(10), self.frames.recv())
			.await
			.expect("timed out waiting for a frame")
			.expect("sink closed")
	}
}

#[tokio::test]
async fn health_check_answers_ok() {
	let bridge = start_bridge().await;

	let mut stream = TcpStream::connect(bridge.addr).await.unwrap();
	stream
		.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
		.await
		.unwrap();
	let mut response = String::new();
	stream.read_to_string(&mut response).await.unwrap();

	assert!(response.starts_with("HTTP/1.1 200"), "{response}");
	assert!(response.ends_with("OK"), "{response}");
}

#[tokio::test]
async fn request_provisions_through_host_and_agent() {
	let mut bridge = start_bridge().await;
	tokio::spawn(run_host(bridge.addr));
	bridge.wait_for_host().await;

	bridge.request("r1");

	let online = bridge.next().await;
	let session_id = match online.body {
		Body::Event(event) => {
			assert_eq!(event.name, "page.online");
			assert_eq!(event.page.host_id, 7);
			assert_eq!(event.page.url.as_deref(), Some("https://grok.com/"));
			event.data["sessionId"].as_str().unwrap().to_string()
		}
		other => panic!("expected page.online, got {other:?}"),
	};

	let reply = bridge.next().await;
	assert_eq!(reply.id(), Some("r1"));
	match reply.body {
		Body::Response(response) => {
			assert_eq!(response.data["answer"], "submitPrompt");
			assert_eq!(response.data["session"], session_id.as_str());
		}
		other => panic!("expected response, got {other:?}"),
	}

	// The session is reused for the next request; no second page.
	bridge.request("r2");
	let reply = bridge.next().await;
	assert_eq!(reply.id(), Some("r2"));
	assert!(matches!(reply.body, Body::Response(_)));
}

#[tokio::test]
async fn agent_disconnect_emits_page_offline() {
	let mut bridge = start_bridge().await;

	let (mut ws, _) = connect_async(format!("ws://{}/agent", bridge.addr)).await.unwrap();
	let register = json!({"type": "register", "targetKind": "grok", "tabId": 12, "sessionId": "grok-fixed"});
	ws.send(WsMessage::Text(register.to_string())).await.unwrap();

	let Some(Ok(WsMessage::Text(text))) = ws.next().await else {
		panic!("expected registered frame");
	};
	let registered: Value = serde_json::from_str(&text).unwrap();
	assert_eq!(registered, json!({"type": "registered", "sessionId": "grok-fixed"}));
	assert!(matches!(bridge.next().await.body, Body::Event(ref e) if e.name == "page.online"));

	// A second register on the same socket is refused.
	ws.send(WsMessage::Text(register.to_string())).await.unwrap();
	let Some(Ok(WsMessage::Text(text))) = ws.next().await else {
		panic!("expected rejected frame");
	};
	let rejected: Value = serde_json::from_str(&text).unwrap();
	assert_eq!(rejected["type"], "rejected");

	ws.send(WsMessage::Text(json!({"type": "event", "name": "chat.done", "data": {"ok": true}}).to_string()))
		.await
		.unwrap();
	match bridge.next().await.body {
		Body::Event(event) => {
			assert_eq!(event.name, "chat.done");
			assert_eq!(event.seq, 1);
			assert_eq!(event.page.host_id, 12);
		}
		other => panic!("expected pushed event, got {other:?}"),
	}

	ws.close(None).await.unwrap();
	match bridge.next().await.body {
		Body::Event(event) => {
			assert_eq!(event.name, "page.offline");
			assert_eq!(event.seq, 0);
			assert_eq!(event.data["sessionId"], "grok-fixed");
		}
		other => panic!("expected page.offline, got {other:?}"),
	}
}

#[tokio::test]
async fn replaced_agent_socket_events_are_dropped() {
	let mut bridge = start_bridge().await;

	let url = format!("ws://{}/agent", bridge.addr);
	let (mut first, _) = connect_async(url.as_str()).await.unwrap();
	let (mut second, _) = connect_async(url.as_str()).await.unwrap();

	for (ws, tab_id) in [(&mut first, 1), (&mut second, 2)] {
		let register = json!({"type": "register", "targetKind": "grok", "tabId": tab_id, "sessionId": "x"});
		ws.send(WsMessage::Text(register.to_string())).await.unwrap();
		let Some(Ok(WsMessage::Text(text))) = ws.next().await else {
			panic!("expected registered frame");
		};
		assert_eq!(serde_json::from_str::<Value>(&text).unwrap()["sessionId"], "x");
		match bridge.next().await.body {
			Body::Event(event) => {
				assert_eq!(event.name, "page.online");
				assert_eq!(event.page.host_id, tab_id);
			}
			other => panic!("expected page.online, got {other:?}"),
		}
	}

	let stale = json!({"type": "event", "name": "chat.updated", "data": {"from": "first"}});
	first.send(WsMessage::Text(stale.to_string())).await.unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;
	let live = json!({"type": "event", "name": "chat.updated", "data": {"from": "second"}});
	second.send(WsMessage::Text(live.to_string())).await.unwrap();

	match bridge.next().await.body {
		Body::Event(event) => {
			assert_eq!(event.data, json!({"from": "second"}));
			assert_eq!(event.page.host_id, 2);
			assert_eq!(event.seq, 1);
		}
		other => panic!("expected pushed event, got {other:?}"),
	}
	assert!(bridge.frames.try_recv().is_err());
}
