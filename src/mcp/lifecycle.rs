//! Session lifecycle and request gating.
//!
//! Every validated message passes through here before the engine runs. The
//! lifecycle owns the `INITIALIZING → OPEN → CLOSED` state machine:
//! `initialize` negotiates a protocol version and creates the session,
//! `notifications/initialized` opens it, DELETE (HTTP) or end-of-stream
//! (STDIO) closes it, and everything else is dispatched only while the
//! session is OPEN.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::mcp::engine::{Dispatch, ProtocolEngine};
use crate::mcp::protocol::{
    is_supported_version, ErrorObject, JsonRpcResponse, RawMessage, SUPPORTED_VERSIONS,
    VERSION_2025_06_18,
};
use crate::store::{SessionRecord, SessionStatus, SessionStore};

/// Current wall-clock time in whole seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Which transport a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Streamable HTTP.
    Http,
    /// Line-delimited stdio.
    Stdio,
}

/// Transport-supplied facts about one incoming message.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The transport the message arrived on.
    pub transport: TransportKind,
    /// Session id: the `Mcp-Session-Id` header (HTTP) or the per-process
    /// slot (STDIO).
    pub session_id: Option<String>,
    /// The `MCP-Protocol-Version` header, HTTP only.
    pub version_header: Option<String>,
}

impl RequestContext {
    /// Context for an HTTP request.
    #[must_use]
    pub fn http(session_id: Option<String>, version_header: Option<String>) -> Self {
        Self {
            transport: TransportKind::Http,
            session_id,
            version_header,
        }
    }

    /// Context for a STDIO line.
    #[must_use]
    pub fn stdio(session_id: Option<String>) -> Self {
        Self {
            transport: TransportKind::Stdio,
            session_id,
            version_header: None,
        }
    }
}

/// Outcome of running one message through the lifecycle.
#[derive(Debug)]
pub enum Handled {
    /// `initialize` succeeded and a session was created.
    Initialized {
        /// The new session id.
        session_id: String,
        /// The negotiated protocol version.
        protocol_version: String,
        /// The initialize result to send.
        response: JsonRpcResponse,
    },
    /// The engine produced a response (success or dispatch error).
    Reply(JsonRpcResponse),
    /// A notification was accepted; there is no body.
    Accepted,
    /// The message was refused before dispatch (gating or negotiation).
    Refused(JsonRpcResponse),
    /// Internal failure (for example, session persistence).
    Failed(String),
}

/// The lifecycle gate in front of the protocol engine.
pub struct SessionLifecycle {
    engine: ProtocolEngine,
    store: Arc<SessionStore>,
}

impl SessionLifecycle {
    /// Creates the gate.
    #[must_use]
    pub fn new(engine: ProtocolEngine, store: Arc<SessionStore>) -> Self {
        Self { engine, store }
    }

    /// The underlying session store.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The protocol engine behind the gate.
    #[must_use]
    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    /// Closes a session explicitly (HTTP DELETE, STDIO end-of-stream).
    ///
    /// Returns false when the session is unknown. Closing an
    /// already-closed session is a no-op that still reports true.
    pub fn close_session(&self, session_id: &str) -> bool {
        match self.store.update(session_id, SessionStatus::Closed, unix_now()) {
            Some(prior) => {
                info!(session = %session_id, ?prior, "session closed");
                true
            }
            None => false,
        }
    }

    /// Runs one validated message through gating and dispatch.
    pub async fn handle(&self, msg: &RawMessage, ctx: &RequestContext) -> Handled {
        if msg.method == "initialize" {
            return self.handle_initialize(msg, ctx);
        }

        let refuse = |error: ErrorObject| Handled::Refused(JsonRpcResponse::failure(msg.id.clone(), error));

        // 1. A session id must accompany every non-initialize message.
        let Some(session_id) = ctx.session_id.as_deref() else {
            let message = match ctx.transport {
                TransportKind::Http => "Missing Mcp-Session-Id header",
                TransportKind::Stdio => "Connection not established",
            };
            return refuse(ErrorObject::invalid_request(message));
        };

        // 2. The session must exist and not be closed.
        let Some(mut record) = self.store.read(session_id) else {
            return refuse(ErrorObject::invalid_request("Invalid or closed session"));
        };
        if record.status == SessionStatus::Closed {
            return refuse(ErrorObject::invalid_request("Invalid or closed session"));
        }

        // 3. 2025-06-18 requires the protocol-version header on HTTP and it
        //    must match what was negotiated.
        if ctx.transport == TransportKind::Http && record.protocol_version == VERSION_2025_06_18 {
            match ctx.version_header.as_deref() {
                None => {
                    return refuse(ErrorObject::invalid_request(
                        "Missing MCP-Protocol-Version header",
                    ));
                }
                Some(v) if v != record.protocol_version => {
                    return refuse(ErrorObject::invalid_request(format!(
                        "Protocol version mismatch: negotiated {}, got {v}",
                        record.protocol_version
                    )));
                }
                Some(_) => {}
            }
        }

        // 4. The initialized notification opens an INITIALIZING session.
        if msg.method == "notifications/initialized" && record.status == SessionStatus::Initializing {
            self.store.update(session_id, SessionStatus::Open, unix_now());
            record.status = SessionStatus::Open;
            debug!(session = %session_id, "handshake complete");
        }

        // 5. Dispatch only once the session is OPEN.
        if record.status != SessionStatus::Open {
            return refuse(ErrorObject::invalid_request(
                "Connection not fully initialized",
            ));
        }

        match self.engine.dispatch(msg, &record.protocol_version).await {
            Dispatch::Reply(response) => Handled::Reply(response),
            Dispatch::Ack => Handled::Accepted,
        }
    }

    fn handle_initialize(&self, msg: &RawMessage, ctx: &RequestContext) -> Handled {
        let refuse = |error: ErrorObject| Handled::Refused(JsonRpcResponse::failure(msg.id.clone(), error));

        // Clients must not pre-supply a session: the header on HTTP, an
        // already-established slot on STDIO.
        if ctx.session_id.is_some() {
            let message = match ctx.transport {
                TransportKind::Http => "Session id must not be supplied on initialize",
                TransportKind::Stdio => "Session already initialized",
            };
            return refuse(ErrorObject::invalid_request(message));
        }

        if msg.id.is_none() {
            return refuse(ErrorObject::invalid_request("initialize requires an id"));
        }

        let Some(requested) = msg.param("protocolVersion").and_then(Value::as_str) else {
            return refuse(ErrorObject::invalid_request(
                "initialize requires params.protocolVersion",
            ));
        };
        let Some(client_info) = msg.param("clientInfo") else {
            return refuse(ErrorObject::invalid_request(
                "initialize requires params.clientInfo",
            ));
        };

        if !is_supported_version(requested) {
            return refuse(
                ErrorObject::invalid_params("Unsupported protocol version").with_data(json!({
                    "supported": SUPPORTED_VERSIONS,
                    "requested": requested,
                })),
            );
        }

        let session_id = Uuid::new_v4().simple().to_string();
        let record = SessionRecord::new(
            session_id.clone(),
            unix_now(),
            client_info.clone(),
            requested.to_string(),
        );

        if let Err(e) = self.store.create(&record) {
            error!(session = %session_id, error = %e, "failed to persist new session");
            return Handled::Failed("failed to persist session".to_string());
        }

        info!(session = %session_id, version = %requested, "session created");
        let id = msg.id.clone().unwrap_or(Value::Null);
        let response = JsonRpcResponse::success(id, self.engine.initialize_result(requested));
        Handled::Initialized {
            session_id,
            protocol_version: requested.to_string(),
            response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::validate_message;
    use crate::registry::ToolRegistry;
    use crate::store::is_session_id;

    fn lifecycle() -> (tempfile::TempDir, SessionLifecycle) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::open(dir.path()).unwrap());
        let engine = ProtocolEngine::new(
            Arc::new(ToolRegistry::new()),
            "test-server".to_string(),
            "0.0.0".to_string(),
        );
        (dir, SessionLifecycle::new(engine, store))
    }

    fn init_msg(version: &str) -> RawMessage {
        validate_message(&format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"initialize","params":{{"protocolVersion":"{version}","clientInfo":{{"name":"t","version":"0"}}}}}}"#
        ))
        .unwrap()
    }

    async fn open_session(lc: &SessionLifecycle, version: &str) -> String {
        let handled = lc
            .handle(&init_msg(version), &RequestContext::http(None, None))
            .await;
        let Handled::Initialized { session_id, .. } = handled else {
            panic!("initialize failed: {handled:?}");
        };
        let ctx = RequestContext::http(Some(session_id.clone()), Some(version.to_string()));
        let notif = validate_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(lc.handle(&notif, &ctx).await, Handled::Accepted));
        session_id
    }

    #[tokio::test]
    async fn initialize_creates_an_initializing_session() {
        let (_dir, lc) = lifecycle();
        let handled = lc
            .handle(&init_msg(VERSION_2025_06_18), &RequestContext::http(None, None))
            .await;
        let Handled::Initialized {
            session_id,
            protocol_version,
            ..
        } = handled
        else {
            panic!("expected Initialized");
        };
        assert!(is_session_id(&session_id));
        assert_eq!(protocol_version, VERSION_2025_06_18);

        let record = lc.store().read(&session_id).unwrap();
        assert_eq!(record.status, SessionStatus::Initializing);
        assert_eq!(record.closed_at, 0);
    }

    #[tokio::test]
    async fn initialize_rejects_presupplied_session_header() {
        let (_dir, lc) = lifecycle();
        let ctx = RequestContext::http(Some("deadbeef".to_string()), None);
        let handled = lc.handle(&init_msg(VERSION_2025_06_18), &ctx).await;
        let Handled::Refused(reply) = handled else {
            panic!("expected Refused");
        };
        assert_eq!(reply.error_code(), Some(-32600));
    }

    #[tokio::test]
    async fn initialize_rejects_unsupported_version_with_diagnostics() {
        let (_dir, lc) = lifecycle();
        for requested in ["2024-11-05", "1.0.0"] {
            let handled = lc
                .handle(&init_msg(requested), &RequestContext::http(None, None))
                .await;
            let Handled::Refused(reply) = handled else {
                panic!("expected Refused for {requested}");
            };
            assert_eq!(reply.error_code(), Some(-32602));
            let v = serde_json::to_value(&reply).unwrap();
            assert_eq!(v["error"]["data"]["supported"], json!(["2025-03-26", "2025-06-18"]));
            assert_eq!(v["error"]["data"]["requested"], requested);
        }
    }

    #[tokio::test]
    async fn initialize_requires_id_and_params() {
        let (_dir, lc) = lifecycle();
        let ctx = RequestContext::http(None, None);

        let no_id = validate_message(
            r#"{"jsonrpc":"2.0","method":"initialize","params":{"protocolVersion":"2025-06-18","clientInfo":{}}}"#,
        )
        .unwrap();
        assert!(matches!(lc.handle(&no_id, &ctx).await, Handled::Refused(_)));

        let no_version = validate_message(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"clientInfo":{}}}"#,
        )
        .unwrap();
        assert!(matches!(lc.handle(&no_version, &ctx).await, Handled::Refused(_)));

        let no_client = validate_message(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18"}}"#,
        )
        .unwrap();
        assert!(matches!(lc.handle(&no_client, &ctx).await, Handled::Refused(_)));
    }

    #[tokio::test]
    async fn requests_before_initialized_notification_are_refused() {
        let (_dir, lc) = lifecycle();
        let Handled::Initialized { session_id, .. } = lc
            .handle(&init_msg(VERSION_2025_06_18), &RequestContext::http(None, None))
            .await
        else {
            panic!("initialize failed");
        };

        let ctx = RequestContext::http(Some(session_id), Some(VERSION_2025_06_18.to_string()));
        let list = validate_message(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#).unwrap();
        let Handled::Refused(reply) = lc.handle(&list, &ctx).await else {
            panic!("expected Refused");
        };
        assert_eq!(reply.error_code(), Some(-32600));
        let v = serde_json::to_value(&reply).unwrap();
        assert!(v["error"]["message"]
            .as_str()
            .unwrap()
            .contains("not fully initialized"));
    }

    #[tokio::test]
    async fn handshake_then_dispatch() {
        let (_dir, lc) = lifecycle();
        let session_id = open_session(&lc, VERSION_2025_06_18).await;
        assert_eq!(
            lc.store().read(&session_id).unwrap().status,
            SessionStatus::Open
        );

        let ctx = RequestContext::http(Some(session_id), Some(VERSION_2025_06_18.to_string()));
        let ping = validate_message(r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#).unwrap();
        let Handled::Reply(reply) = lc.handle(&ping, &ctx).await else {
            panic!("expected Reply");
        };
        let v = serde_json::to_value(&reply).unwrap();
        assert_eq!(v["id"], "p");
        assert_eq!(v["result"], json!({}));
    }

    #[tokio::test]
    async fn missing_session_id_is_refused_per_transport() {
        let (_dir, lc) = lifecycle();
        let ping = validate_message(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();

        let Handled::Refused(reply) = lc.handle(&ping, &RequestContext::http(None, None)).await
        else {
            panic!("expected Refused");
        };
        let v = serde_json::to_value(&reply).unwrap();
        assert!(v["error"]["message"].as_str().unwrap().contains("Mcp-Session-Id"));

        let Handled::Refused(reply) = lc.handle(&ping, &RequestContext::stdio(None)).await else {
            panic!("expected Refused");
        };
        let v = serde_json::to_value(&reply).unwrap();
        assert_eq!(v["error"]["message"], "Connection not established");
    }

    #[tokio::test]
    async fn version_header_rules_apply_only_to_latest() {
        let (_dir, lc) = lifecycle();

        // 2025-06-18: header required and must match.
        let session = open_session(&lc, VERSION_2025_06_18).await;
        let ping = validate_message(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();

        let no_header = RequestContext::http(Some(session.clone()), None);
        assert!(matches!(lc.handle(&ping, &no_header).await, Handled::Refused(_)));

        let wrong = RequestContext::http(Some(session.clone()), Some("2025-03-26".to_string()));
        assert!(matches!(lc.handle(&ping, &wrong).await, Handled::Refused(_)));

        // 2025-03-26: no header requirement.
        let session = open_session(&lc, "2025-03-26").await;
        let ctx = RequestContext::http(Some(session), None);
        assert!(matches!(lc.handle(&ping, &ctx).await, Handled::Reply(_)));
    }

    #[tokio::test]
    async fn closed_session_is_refused() {
        let (_dir, lc) = lifecycle();
        let session = open_session(&lc, VERSION_2025_06_18).await;
        assert!(lc.close_session(&session));

        let ctx = RequestContext::http(Some(session), Some(VERSION_2025_06_18.to_string()));
        let ping = validate_message(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        let Handled::Refused(reply) = lc.handle(&ping, &ctx).await else {
            panic!("expected Refused");
        };
        let v = serde_json::to_value(&reply).unwrap();
        assert!(v["error"]["message"].as_str().unwrap().contains("Invalid or closed"));
    }

    #[tokio::test]
    async fn close_unknown_session_reports_false() {
        let (_dir, lc) = lifecycle();
        assert!(!lc.close_session("0123456789abcdef0123456789abcdef"));
    }

    #[tokio::test]
    async fn initialized_notification_is_idempotent_on_open_sessions() {
        let (_dir, lc) = lifecycle();
        let session = open_session(&lc, VERSION_2025_06_18).await;
        let ctx = RequestContext::http(Some(session.clone()), Some(VERSION_2025_06_18.to_string()));

        let notif = validate_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(lc.handle(&notif, &ctx).await, Handled::Accepted));
        assert_eq!(
            lc.store().read(&session).unwrap().status,
            SessionStatus::Open
        );
    }
}
