//! Streamable HTTP transport.
//!
//! A single fallback handler implements the endpoint selection rules: the
//! configured MCP endpoint (with or without a trailing slash, plus the
//! `/mcp` sub-path) reaches the protocol core, registered custom endpoints
//! are forwarded to their handlers, everything else is 404. CORS preflight,
//! DELETE-to-close and method policing happen here; JSON-RPC semantics live
//! behind the lifecycle gate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::mcp::lifecycle::{unix_now, Handled, RequestContext, SessionLifecycle, TransportKind};
use crate::mcp::protocol::{validate_message, ErrorObject, JsonRpcResponse, ValidateError, VERSION_2025_06_18};

/// Largest request body the transport will buffer.
const BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Header carrying the session id.
const SESSION_HEADER: &str = "mcp-session-id";

/// Header carrying the protocol version (2025-06-18 and later).
const VERSION_HEADER: &str = "mcp-protocol-version";

/// Shared state behind the HTTP application.
#[derive(Clone)]
pub struct HttpState {
    inner: Arc<HttpStateInner>,
}

struct HttpStateInner {
    lifecycle: SessionLifecycle,
    endpoint: String,
    max_uptime_secs: u64,
    init_timeout_secs: u64,
}

impl HttpState {
    /// Bundles the lifecycle with the transport configuration.
    #[must_use]
    pub fn new(
        lifecycle: SessionLifecycle,
        endpoint: String,
        max_uptime_secs: u64,
        init_timeout_secs: u64,
    ) -> Self {
        Self {
            inner: Arc::new(HttpStateInner {
                lifecycle,
                endpoint,
                max_uptime_secs,
                init_timeout_secs,
            }),
        }
    }
}

/// Builds the axum application.
#[must_use]
pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .fallback(handle_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Binds `listen` and serves until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(listen: SocketAddr, state: HttpState) -> std::io::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listen, "MCP HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("MCP HTTP server shut down");
    Ok(())
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT, shutting down"); }
        () = terminate => { info!("received SIGTERM, shutting down"); }
    }
}

/// Whether `path` addresses the protocol core for the configured endpoint.
///
/// Accepted: the endpoint itself, the endpoint with a trailing slash, and
/// the `/mcp` (or `/mcp/`) sub-path relative to it.
fn is_core_path(endpoint: &str, path: &str) -> bool {
    let base = endpoint.trim_end_matches('/');
    let path = path.trim_end_matches('/');
    path == base || (path.strip_prefix(base) == Some("/mcp"))
}

async fn handle_request(State(state): State<HttpState>, req: Request) -> Response {
    let state = &state.inner;
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if method == Method::OPTIONS {
        return access_logged(&method, &path, preflight_response());
    }

    // Each request sweeps stale sessions before it is handled.
    state
        .lifecycle
        .store()
        .reap(unix_now(), state.max_uptime_secs, state.init_timeout_secs);

    let response = if is_core_path(&state.endpoint, &path) {
        handle_core(state, req).await
    } else if let Some(handler) = state.lifecycle.engine().registry().endpoint(&path) {
        let body = read_body(req).await.ok().filter(|b| !b.is_empty());
        let reply = handler.handle(method.as_str(), body.as_deref()).await;
        let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        raw_response(status, &reply.content_type, reply.body)
    } else {
        json_error(StatusCode::NOT_FOUND, "Unknown endpoint")
    };

    access_logged(&method, &path, response)
}

async fn handle_core(state: &HttpStateInner, req: Request) -> Response {
    let method = req.method().clone();
    if method == Method::DELETE {
        handle_delete(state, req.headers())
    } else if method == Method::POST {
        handle_post(state, req).await
    } else {
        let mut response = json_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
        if let Ok(allow) = "POST, DELETE".parse() {
            response.headers_mut().insert("allow", allow);
        }
        response
    }
}

fn handle_delete(state: &HttpStateInner, headers: &HeaderMap) -> Response {
    let Some(session_id) = header_str(headers, SESSION_HEADER) else {
        return json_error(StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header");
    };

    if state.lifecycle.close_session(session_id) {
        json_response(
            StatusCode::OK,
            &json!({ "status": "closed", "session": session_id }),
        )
    } else {
        json_error(StatusCode::NOT_FOUND, "Unknown session")
    }
}

async fn handle_post(state: &HttpStateInner, req: Request) -> Response {
    let ctx = RequestContext {
        transport: TransportKind::Http,
        session_id: header_str(req.headers(), SESSION_HEADER).map(str::to_string),
        version_header: header_str(req.headers(), VERSION_HEADER).map(str::to_string),
    };

    let Ok(body) = read_body(req).await else {
        return json_error(StatusCode::BAD_REQUEST, "Unreadable request body");
    };
    if body.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Empty request body");
    }

    let msg = match validate_message(&body) {
        Ok(msg) => msg,
        Err(ValidateError::Unparseable) => {
            return json_error(StatusCode::BAD_REQUEST, "Request body is not valid JSON");
        }
        Err(ValidateError::Malformed(reason)) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &JsonRpcResponse::failure(None, ErrorObject::invalid_request(reason)),
            );
        }
    };

    // Expected-duration hint for the tool about to be called, if any.
    let duration_hint = if msg.method == "tools/call" {
        msg.param("name")
            .and_then(serde_json::Value::as_str)
            .and_then(|name| state.lifecycle.engine().registry().timing_hint(name))
    } else {
        None
    };

    let limit = request_limit(state);
    let handled = match tokio::time::timeout(limit, state.lifecycle.handle(&msg, &ctx)).await {
        Ok(handled) => handled,
        Err(_) => {
            warn!(method = %msg.method, "request exceeded wall-clock limit");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Request timed out");
        }
    };

    match handled {
        Handled::Initialized {
            session_id,
            protocol_version,
            response,
        } => {
            let mut http_response = json_response(StatusCode::OK, &response);
            let headers = http_response.headers_mut();
            if let Ok(value) = session_id.parse() {
                headers.insert(SESSION_HEADER, value);
            }
            if protocol_version == VERSION_2025_06_18 {
                if let Ok(value) = protocol_version.parse() {
                    headers.insert(VERSION_HEADER, value);
                }
            }
            http_response
        }
        Handled::Reply(response) => {
            let mut http_response = json_response(StatusCode::OK, &response);
            if let Some(secs) = duration_hint {
                if let Ok(value) = secs.to_string().parse() {
                    http_response
                        .headers_mut()
                        .insert("mcp-expected-duration", value);
                }
            }
            http_response
        }
        Handled::Accepted => Response::builder()
            .status(StatusCode::ACCEPTED)
            .body(Body::empty())
            .unwrap_or_default(),
        Handled::Refused(response) => json_response(StatusCode::BAD_REQUEST, &response),
        Handled::Failed(message) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &message),
    }
}

/// Per-request wall-clock limit: `min(maxToolTiming, maxUptime)`, where a
/// zero tool hint means no tool declared one.
fn request_limit(state: &HttpStateInner) -> Duration {
    let max_tool = state.lifecycle.engine().registry().max_tool_timing();
    let secs = if max_tool > 0 {
        max_tool.min(state.max_uptime_secs)
    } else {
        state.max_uptime_secs
    };
    Duration::from_secs(secs)
}

fn preflight_response() -> Response {
    let mut response = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .unwrap_or_default();
    let headers = response.headers_mut();
    let pairs = [
        ("access-control-allow-origin", "*"),
        ("access-control-allow-methods", "GET, POST, DELETE, OPTIONS"),
        (
            "access-control-allow-headers",
            "Content-Type, Accept, Mcp-Session-Id, MCP-Protocol-Version, Authorization",
        ),
    ];
    for (name, value) in pairs {
        if let Ok(value) = value.parse() {
            headers.insert(name, value);
        }
    }
    response
}

async fn read_body(req: Request) -> Result<String, ()> {
    let bytes = axum::body::to_bytes(req.into_body(), BODY_LIMIT)
        .await
        .map_err(|_| ())?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn json_response(status: StatusCode, body: &impl serde::Serialize) -> Response {
    let body = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    raw_response(status, "application/json", body)
}

fn json_error(status: StatusCode, message: &str) -> Response {
    json_response(status, &json!({ "error": message }))
}

fn raw_response(status: StatusCode, content_type: &str, body: String) -> Response {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .body(Body::from(body))
        .unwrap_or_default()
}

fn access_logged(method: &Method, path: &str, response: Response) -> Response {
    info!(
        target: "access",
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "http request"
    );
    response
}
