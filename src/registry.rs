//! Tool and endpoint registration.
//!
//! The host registers every tool and custom HTTP endpoint explicitly before
//! a transport starts; the registry is the only view the protocol engine has
//! of host code. A tool is a descriptor plus an invocation handler keyed by
//! the descriptor's exact `name`; a custom endpoint is a handler keyed by
//! its path.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool made visible through `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name; must equal the invocation key.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Display title. Only emitted to clients on protocol 2025-06-18.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
    /// JSON Schema for structured output. Only emitted on 2025-06-18.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Optional tool annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

impl ToolDescriptor {
    /// Creates a descriptor with the three required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            title: None,
            input_schema,
            output_schema: None,
            annotations: None,
        }
    }

    /// Adds a display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Declares a structured-output schema.
    ///
    /// A tool declaring an output schema must still return plain `content`,
    /// so clients on older protocol versions never receive an empty result.
    #[must_use]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Attaches annotations.
    #[must_use]
    pub fn with_annotations(mut self, annotations: Value) -> Self {
        self.annotations = Some(annotations);
        self
    }
}

/// One part of a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Base64-encoded image data.
    Image {
        /// The encoded payload.
        data: String,
        /// MIME type of the payload.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Base64-encoded audio data.
    Audio {
        /// The encoded payload.
        data: String,
        /// MIME type of the payload.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// Result of a tool invocation.
///
/// Failures inside a tool are reported here with `is_error` set; they never
/// become JSON-RPC errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Whether the invocation failed.
    pub is_error: bool,
    /// Content parts returned by the tool.
    pub content: Vec<ToolContent>,
    /// Structured output matching the declared output schema.
    /// Only emitted to clients on protocol 2025-06-18.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl ToolResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![ToolContent::Text { text: text.into() }],
            structured_content: None,
        }
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            structured_content: None,
        }
    }

    /// Attaches structured content.
    #[must_use]
    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured_content = Some(value);
        self
    }
}

/// Invocation side of a registered tool.
///
/// The registry passes the raw `arguments` object through; validating it
/// against the declared input schema is the tool's own job.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Executes the tool.
    async fn call(&self, arguments: Value) -> ToolResult;
}

/// Reply produced by a custom HTTP endpoint.
#[derive(Debug, Clone)]
pub struct EndpointReply {
    /// HTTP status code.
    pub status: u16,
    /// Content-Type header value.
    pub content_type: String,
    /// Response body.
    pub body: String,
}

impl EndpointReply {
    /// Creates a 200 reply with a JSON body.
    #[must_use]
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "application/json".to_string(),
            body: body.into(),
        }
    }

    /// Creates a reply with an explicit status and plain-text body.
    #[must_use]
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            body: body.into(),
        }
    }
}

/// Handler for a custom HTTP endpoint.
///
/// Custom endpoints may accept `GET` and `POST` and police their own
/// methods.
#[async_trait]
pub trait EndpointHandler: Send + Sync {
    /// Handles one request. `body` is `None` for `GET`.
    async fn handle(&self, method: &str, body: Option<&str>) -> EndpointReply;
}

struct ToolEntry {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
    /// Expected duration hint in seconds for long-running tools.
    timing_hint: Option<u64>,
}

/// Registration table mapping tool names to descriptors and handlers, and
/// endpoint paths to handlers.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolEntry>,
    endpoints: BTreeMap<String, Arc<dyn EndpointHandler>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its descriptor's name, replacing any previous
    /// registration with the same name.
    pub fn register_tool(&mut self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        self.tools.insert(
            descriptor.name.clone(),
            ToolEntry {
                descriptor,
                handler,
                timing_hint: None,
            },
        );
    }

    /// Registers a tool with an expected-duration hint in seconds.
    pub fn register_tool_with_timing(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
        timing_hint_secs: u64,
    ) {
        self.tools.insert(
            descriptor.name.clone(),
            ToolEntry {
                descriptor,
                handler,
                timing_hint: Some(timing_hint_secs),
            },
        );
    }

    /// Registers a custom HTTP endpoint under `path`.
    pub fn register_endpoint(&mut self, path: impl Into<String>, handler: Arc<dyn EndpointHandler>) {
        self.endpoints.insert(path.into(), handler);
    }

    /// Descriptors of every registered tool.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|e| e.descriptor.clone()).collect()
    }

    /// Whether a tool with this exact name is registered.
    #[must_use]
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Invokes a tool by name.
    ///
    /// Returns `None` when no such tool is registered; the caller turns
    /// that into an invalid-params error.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Option<ToolResult> {
        let entry = self.tools.get(name)?;
        Some(entry.handler.call(arguments).await)
    }

    /// Timing hint for a single tool, if the host supplied one.
    #[must_use]
    pub fn timing_hint(&self, name: &str) -> Option<u64> {
        self.tools.get(name).and_then(|e| e.timing_hint)
    }

    /// The largest timing hint across all tools, or 0 if none is supplied.
    #[must_use]
    pub fn max_tool_timing(&self) -> u64 {
        self.tools
            .values()
            .filter_map(|e| e.timing_hint)
            .max()
            .unwrap_or(0)
    }

    /// Handler for a custom endpoint path, if registered.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<Arc<dyn EndpointHandler>> {
        self.endpoints.get(path).cloned()
    }

    /// Every registered custom endpoint path.
    #[must_use]
    pub fn endpoint_paths(&self) -> Vec<String> {
        self.endpoints.keys().cloned().collect()
    }
}
