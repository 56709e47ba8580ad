//! Version-aware JSON-RPC dispatcher.
//!
//! The engine receives messages that already passed the validator and the
//! session gate, routes them against the MCP method set, and shapes every
//! outgoing tool descriptor and tool result for the session's negotiated
//! protocol version. Sessions negotiated below 2025-06-18 never see
//! `title`, `outputSchema`, or `structuredContent`.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::mcp::protocol::{
    version_precedes, ErrorObject, JsonRpcResponse, RawMessage, VERSION_2025_06_18,
};
use crate::registry::{ToolDescriptor, ToolRegistry, ToolResult};

/// Outcome of dispatching one message.
#[derive(Debug)]
pub enum Dispatch {
    /// A response body to send back (success or dispatch error).
    Reply(JsonRpcResponse),
    /// A notification was consumed; the transport acknowledges without a body.
    Ack,
}

/// The MCP method dispatcher.
pub struct ProtocolEngine {
    registry: Arc<ToolRegistry>,
    server_name: String,
    server_version: String,
}

impl ProtocolEngine {
    /// Creates an engine over the host's registry.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, server_name: String, server_version: String) -> Self {
        Self {
            registry,
            server_name,
            server_version,
        }
    }

    /// The registry this engine dispatches into.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Builds the `initialize` result for a freshly negotiated session.
    #[must_use]
    pub fn initialize_result(&self, protocol_version: &str) -> Value {
        json!({
            "protocolVersion": protocol_version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version,
            },
        })
    }

    /// Dispatches one gated message under the session's negotiated version.
    pub async fn dispatch(&self, msg: &RawMessage, protocol_version: &str) -> Dispatch {
        if msg.is_notification() {
            debug!(method = %msg.method, "notification consumed");
            return Dispatch::Ack;
        }
        let id = msg.id.clone().unwrap_or(Value::Null);

        match msg.method.as_str() {
            "ping" => Dispatch::Reply(JsonRpcResponse::success(id, json!({}))),
            "tools/list" => self.handle_tools_list(msg, id, protocol_version),
            "tools/call" => self.handle_tools_call(msg, id, protocol_version).await,
            // A live session never negotiates twice; the lifecycle routes
            // first-time initialize before dispatch.
            "initialize" => Dispatch::Reply(JsonRpcResponse::failure(
                Some(id),
                ErrorObject::invalid_request("Session already initialized"),
            )),
            other => Dispatch::Reply(JsonRpcResponse::failure(
                Some(id),
                ErrorObject::method_not_found(other),
            )),
        }
    }

    fn handle_tools_list(&self, msg: &RawMessage, id: Value, protocol_version: &str) -> Dispatch {
        if msg.param("cursor").is_some() {
            return Dispatch::Reply(JsonRpcResponse::failure(
                Some(id),
                ErrorObject::invalid_params("Pagination is not supported"),
            ));
        }

        let tools: Vec<Value> = self
            .registry
            .list_tools()
            .into_iter()
            .map(|mut descriptor| {
                shape_descriptor(&mut descriptor, protocol_version);
                serde_json::to_value(descriptor).unwrap_or(Value::Null)
            })
            .collect();

        Dispatch::Reply(JsonRpcResponse::success(id, json!({ "tools": tools })))
    }

    async fn handle_tools_call(&self, msg: &RawMessage, id: Value, protocol_version: &str) -> Dispatch {
        let Some(name) = msg.param("name").and_then(Value::as_str) else {
            return Dispatch::Reply(JsonRpcResponse::failure(
                Some(id),
                ErrorObject::invalid_params("Missing tool name"),
            ));
        };

        let arguments = msg
            .param("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let Some(mut result) = self.registry.invoke(name, arguments).await else {
            return Dispatch::Reply(JsonRpcResponse::failure(
                Some(id),
                ErrorObject::invalid_params(format!("Unknown tool: {name}")),
            ));
        };

        shape_tool_result(&mut result, protocol_version);
        let value = serde_json::to_value(&result).unwrap_or(Value::Null);
        Dispatch::Reply(JsonRpcResponse::success(id, value))
    }
}

/// Strips fields a pre-2025-06-18 client must not see from a descriptor.
fn shape_descriptor(descriptor: &mut ToolDescriptor, protocol_version: &str) {
    if version_precedes(protocol_version, VERSION_2025_06_18) {
        descriptor.title = None;
        descriptor.output_schema = None;
    }
}

/// Strips structured content from a result for pre-2025-06-18 clients.
fn shape_tool_result(result: &mut ToolResult, protocol_version: &str) {
    if version_precedes(protocol_version, VERSION_2025_06_18) {
        result.structured_content = None;
    }
}
