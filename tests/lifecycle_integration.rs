//! Transport-independent protocol scenarios driven through the lifecycle,
//! the way the stdio loop drives it: one per-process session slot, no
//! headers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use toolhost_mcp::mcp::{
    validate_message, Handled, ProtocolEngine, RequestContext, SessionLifecycle,
};
use toolhost_mcp::registry::{ToolDescriptor, ToolHandler, ToolRegistry, ToolResult};
use toolhost_mcp::store::{SessionStatus, SessionStore};

struct AddNumbers;

#[async_trait]
impl ToolHandler for AddNumbers {
    async fn call(&self, arguments: Value) -> ToolResult {
        let a = arguments.get("a").and_then(Value::as_i64).unwrap_or(0);
        let b = arguments.get("b").and_then(Value::as_i64).unwrap_or(0);
        ToolResult::text((a + b).to_string()).with_structured(json!({ "sum": a + b }))
    }
}

fn make_lifecycle(dir: &TempDir) -> SessionLifecycle {
    let mut registry = ToolRegistry::new();
    registry.register_tool(
        ToolDescriptor::new(
            "add_numbers",
            "Add two integers.",
            json!({"type": "object", "required": ["a", "b"]}),
        ),
        Arc::new(AddNumbers),
    );
    let store = Arc::new(SessionStore::open(dir.path()).unwrap());
    let engine = ProtocolEngine::new(
        Arc::new(registry),
        "test-host".to_string(),
        "0.0.0".to_string(),
    );
    SessionLifecycle::new(engine, store)
}

/// Mimics the stdio loop: track the slot, feed lines, collect replies.
struct Session<'a> {
    lifecycle: &'a SessionLifecycle,
    slot: Option<String>,
}

impl<'a> Session<'a> {
    fn new(lifecycle: &'a SessionLifecycle) -> Self {
        Self {
            lifecycle,
            slot: None,
        }
    }

    async fn line(&mut self, raw: &str) -> Option<Value> {
        let msg = validate_message(raw).unwrap();
        let ctx = RequestContext::stdio(self.slot.clone());
        match self.lifecycle.handle(&msg, &ctx).await {
            Handled::Initialized {
                session_id,
                response,
                ..
            } => {
                self.slot = Some(session_id);
                Some(serde_json::to_value(&response).unwrap())
            }
            Handled::Reply(response) | Handled::Refused(response) => {
                Some(serde_json::to_value(&response).unwrap())
            }
            Handled::Accepted => None,
            Handled::Failed(message) => panic!("internal failure: {message}"),
        }
    }
}

#[tokio::test]
async fn s6_stdio_handshake() {
    let dir = TempDir::new().unwrap();
    let lifecycle = make_lifecycle(&dir);
    let mut session = Session::new(&lifecycle);

    // Line 1: initialize -> initialize result.
    let reply = session
        .line(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","clientInfo":{"name":"x","version":"0"}}}"#,
        )
        .await
        .expect("initialize result");
    assert_eq!(reply["jsonrpc"], "2.0");
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["protocolVersion"], "2025-06-18");

    // Line 2: initialized notification -> no output.
    let reply = session
        .line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
    assert!(reply.is_none());

    // Line 3: ping -> empty result.
    let reply = session
        .line(r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#)
        .await
        .expect("ping reply");
    assert_eq!(reply, json!({"jsonrpc": "2.0", "id": "p", "result": {}}));

    // End of stream: close the session; the persisted record is CLOSED.
    let slot = session.slot.clone().unwrap();
    assert!(lifecycle.close_session(&slot));
    let record = lifecycle.store().read(&slot).unwrap();
    assert_eq!(record.status, SessionStatus::Closed);
    assert_ne!(record.closed_at, 0);
}

#[tokio::test]
async fn requests_before_initialize_are_rejected() {
    let dir = TempDir::new().unwrap();
    let lifecycle = make_lifecycle(&dir);
    let mut session = Session::new(&lifecycle);

    let reply = session
        .line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
        .await
        .expect("error reply");
    assert_eq!(reply["error"]["code"], -32600);
    assert_eq!(reply["error"]["message"], "Connection not established");
}

#[tokio::test]
async fn second_initialize_on_the_same_connection_is_rejected() {
    let dir = TempDir::new().unwrap();
    let lifecycle = make_lifecycle(&dir);
    let mut session = Session::new(&lifecycle);

    let init = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","clientInfo":{"name":"x","version":"0"}}}"#;
    session.line(init).await.expect("first initialize");

    let reply = session.line(init).await.expect("second initialize reply");
    assert_eq!(reply["error"]["code"], -32600);
}

#[tokio::test]
async fn no_version_header_gating_on_stdio() {
    // The MCP-Protocol-Version header rule is HTTP-only; a 2025-06-18 stdio
    // session dispatches without one.
    let dir = TempDir::new().unwrap();
    let lifecycle = make_lifecycle(&dir);
    let mut session = Session::new(&lifecycle);

    session
        .line(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","clientInfo":{"name":"x","version":"0"}}}"#,
        )
        .await
        .expect("initialize");
    assert!(session
        .line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await
        .is_none());

    let reply = session
        .line(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
        .await
        .expect("tools/list reply");
    assert_eq!(reply["result"]["tools"][0]["name"], "add_numbers");
}

#[tokio::test]
async fn response_ids_match_request_ids_in_order() {
    let dir = TempDir::new().unwrap();
    let lifecycle = make_lifecycle(&dir);
    let mut session = Session::new(&lifecycle);

    session
        .line(
            r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"protocolVersion":"2025-06-18","clientInfo":{"name":"x","version":"0"}}}"#,
        )
        .await
        .expect("initialize");
    session
        .line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;

    let lines = [
        (json!(1), r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#),
        (json!("two"), r#"{"jsonrpc":"2.0","id":"two","method":"tools/list"}"#),
        (
            json!(3),
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"add_numbers","arguments":{"a":1,"b":2}}}"#,
        ),
        (json!(4), r#"{"jsonrpc":"2.0","id":4,"method":"does/not/exist"}"#),
    ];

    let mut reply_ids = Vec::new();
    for (_, raw) in &lines {
        let reply = session.line(raw).await.expect("reply");
        assert_eq!(reply["jsonrpc"], "2.0");
        reply_ids.push(reply["id"].clone());
    }

    let request_ids: Vec<Value> = lines.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(reply_ids, request_ids);
}

#[tokio::test]
async fn tool_call_notification_produces_no_reply() {
    // A tools/call without an id is a notification per JSON-RPC; it is
    // consumed without output once the session is open.
    let dir = TempDir::new().unwrap();
    let lifecycle = make_lifecycle(&dir);
    let mut session = Session::new(&lifecycle);

    session
        .line(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","clientInfo":{"name":"x","version":"0"}}}"#,
        )
        .await
        .expect("initialize");
    session
        .line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;

    let reply = session
        .line(
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"add_numbers","arguments":{"a":1,"b":1}}}"#,
        )
        .await;
    assert!(reply.is_none());
}
