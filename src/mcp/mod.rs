//! Model Context Protocol (MCP) server implementation.
//!
//! This module implements the MCP wire protocol for exposing host-registered
//! tools to AI assistants over JSON-RPC 2.0.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        toolhost-mcp                          │
//! │                                                              │
//! │  ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌────────┐ │
//! │  │ Transport │──▶│ Validator │──▶│ Lifecycle │──▶│ Engine │ │
//! │  │ http/stdio│   │ (protocol)│   │  (gating) │   │        │ │
//! │  └───────────┘   └───────────┘   └─────┬─────┘   └───┬────┘ │
//! │                                        ▼             ▼      │
//! │                                 ┌───────────┐  ┌──────────┐ │
//! │                                 │  Session  │  │   Tool   │ │
//! │                                 │   Store   │  │ Registry │ │
//! │                                 └───────────┘  └──────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Versions
//!
//! 2025-03-26 and 2025-06-18 are negotiated; responses are shaped per
//! version. 2024-11-05 is refused (it requires SSE).

pub mod engine;
pub mod http;
pub mod lifecycle;
pub mod protocol;
pub mod stdio;

pub use engine::ProtocolEngine;
pub use lifecycle::{Handled, RequestContext, SessionLifecycle, TransportKind};
pub use protocol::{validate_message, ErrorObject, JsonRpcResponse, SUPPORTED_VERSIONS};
pub use stdio::StdioServer;
