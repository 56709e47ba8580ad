//! JSON-RPC 2.0 message types and the request validator.
//!
//! Every inbound byte string passes through [`validate_message`] before any
//! protocol handling: it classifies the input as unparseable, malformed
//! (with a JSON-RPC error code), or well-formed. The validator checks the
//! envelope only; it does not interpret `id`, `method` semantics, or
//! `params` contents.

use serde::Serialize;
use serde_json::{json, Map, Value};

/// Protocol version 2025-03-26.
pub const VERSION_2025_03_26: &str = "2025-03-26";

/// Protocol version 2025-06-18.
pub const VERSION_2025_06_18: &str = "2025-06-18";

/// Versions this server will negotiate, oldest first.
///
/// 2024-11-05 is recognisable on the wire but requires SSE and is refused.
pub const SUPPORTED_VERSIONS: [&str; 2] = [VERSION_2025_03_26, VERSION_2025_06_18];

/// Whether version `a` precedes version `b`.
///
/// Versions are ISO-8601 dates, so lexicographic comparison is
/// order-preserving. All version ordering in the crate goes through this
/// one function; a future version scheme that breaks the property only has
/// to change this comparison.
#[must_use]
pub fn version_precedes(a: &str, b: &str) -> bool {
    a < b
}

/// Whether `version` is one this server negotiates.
#[must_use]
pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// JSON-RPC error code: invalid request.
pub const INVALID_REQUEST: i64 = -32600;

/// JSON-RPC error code: method not found.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC error code: invalid params.
pub const INVALID_PARAMS: i64 = -32602;

/// A validated incoming message.
///
/// A message with an `id` is a request; one without is a notification.
/// The `id` is echoed back verbatim and never interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Request id, absent for notifications.
    pub id: Option<Value>,
    /// The method to invoke.
    pub method: String,
    /// Parameters, when supplied.
    pub params: Option<Map<String, Value>>,
}

impl RawMessage {
    /// Whether this message expects no response.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// A named member of `params`, if present.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.get(key))
    }
}

/// Validation failure for an incoming byte string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidateError {
    /// Not valid JSON at all.
    Unparseable,
    /// Valid JSON but not a JSON-RPC 2.0 message; carries the reason.
    Malformed(&'static str),
}

/// Parses and classifies a single JSON-RPC 2.0 message.
///
/// # Errors
///
/// Returns [`ValidateError::Unparseable`] for invalid JSON and
/// [`ValidateError::Malformed`] (error code `-32600`) when the envelope is
/// wrong: not an object, `jsonrpc` ≠ `"2.0"`, `method` missing or empty,
/// or `params` present but not an object.
pub fn validate_message(raw: &str) -> Result<RawMessage, ValidateError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| ValidateError::Unparseable)?;

    let Value::Object(mut obj) = value else {
        return Err(ValidateError::Malformed("message is not an object"));
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(ValidateError::Malformed("jsonrpc field must be \"2.0\""));
    }

    let method = match obj.get("method").and_then(Value::as_str) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => return Err(ValidateError::Malformed("method field missing or empty")),
    };

    let params = match obj.remove("params") {
        None => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => return Err(ValidateError::Malformed("params must be an object")),
    };

    Ok(RawMessage {
        id: obj.remove("id"),
        method,
        params,
    })
}

/// A JSON-RPC 2.0 error object.
///
/// `data` is always emitted; an empty object when nothing more is known.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorObject {
    /// The error code.
    pub code: i64,
    /// A short human-readable description.
    pub message: String,
    /// Additional information about the error.
    pub data: Value,
}

impl ErrorObject {
    /// Creates an error with empty `data`.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: json!({}),
        }
    }

    /// Attaches diagnostic data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// `-32600` invalid request.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    /// `-32601` method not found.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// `-32602` invalid params.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }
}

/// An outgoing JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcResponse {
    /// A successful result.
    Success {
        /// Always "2.0".
        jsonrpc: &'static str,
        /// The request id this responds to.
        id: Value,
        /// The result of the method call.
        result: Value,
    },
    /// An error.
    Error {
        /// Always "2.0".
        jsonrpc: &'static str,
        /// The request id, or null when it could not be determined.
        id: Value,
        /// The error details.
        error: ErrorObject,
    },
}

impl JsonRpcResponse {
    /// Creates a success response echoing `id`.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self::Success {
            jsonrpc: "2.0",
            id,
            result,
        }
    }

    /// Creates an error response; a missing id serialises as null.
    #[must_use]
    pub fn failure(id: Option<Value>, error: ErrorObject) -> Self {
        Self::Error {
            jsonrpc: "2.0",
            id: id.unwrap_or(Value::Null),
            error,
        }
    }

    /// The error code, if this is an error response.
    #[must_use]
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::Error { error, .. } => Some(error.code),
            Self::Success { .. } => None,
        }
    }
}
